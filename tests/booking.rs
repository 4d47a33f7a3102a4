//! End-to-end exercise of the reservation engine: catalog setup, first-fit
//! booking across a fleet, attribute gating, permissions, and a restart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use corral::engine::{Engine, EngineError};
use corral::model::Span;

const H: i64 = 3_600_000;

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("corral_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn rental_fleet_scenario() {
    let path = wal_path("fleet.wal");
    let engine = Engine::new(path.clone()).unwrap();

    // A rental operator sets up a small fleet
    let vans = Ulid::new();
    engine
        .create_item_type(vans, "vans".into(), vec!["mileage".into(), "plate".into()])
        .await
        .unwrap();

    let fleet: Vec<Ulid> = {
        let mut ids = Vec::new();
        for i in 0..3 {
            let id = Ulid::new();
            engine
                .create_item(id, vans, Some(format!("van-{i}")))
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    };
    engine
        .update_item_attributes(fleet[0], attrs(&[("plate", "AB-123"), ("mileage", "42000")]))
        .await
        .unwrap();

    // The booking service gets write access; the billing service read-only
    engine
        .grant_permission("bookings".into(), vans, true)
        .await
        .unwrap();
    engine
        .grant_permission("billing".into(), vans, false)
        .await
        .unwrap();
    assert!(engine.check_permission("bookings", vans));
    assert!(!engine.check_permission("billing", vans));

    // Three customers want the same morning: the whole fleet books out
    let mut morning = Vec::new();
    for _ in 0..3 {
        let info = engine.book(vans, 9 * H, 12 * H).await.unwrap().unwrap();
        assert_eq!(info.item_type, "vans");
        morning.push(info);
    }
    assert!(engine.book(vans, 9 * H, 12 * H).await.unwrap().is_none());
    assert_eq!(engine.find_available(vans, 9 * H, 12 * H).await.unwrap(), None);

    // The afternoon is still wide open
    let afternoon = engine.book(vans, 12 * H, 15 * H).await.unwrap().unwrap();
    assert_eq!(afternoon.item_id, fleet[0], "first-fit picks the oldest van");

    // One customer cancels; the slot frees up on that van only
    let cancelled = morning.pop().unwrap();
    engine.cancel_reservation(cancelled.id).await.unwrap();
    let rebooked = engine.book(vans, 9 * H, 12 * H).await.unwrap().unwrap();
    assert_eq!(rebooked.item_id, cancelled.item_id);

    // van-1's customer shifts an hour later: overlaps only itself, fine
    let shifted = engine
        .relocate_reservation(morning[1].id, Some(10 * H), Some(13 * H))
        .await
        .unwrap();
    assert_eq!((shifted.start, shifted.end), (10 * H, 13 * H));

    // van-0's customer can't do the same: the 12-15h rental is in the way
    let blocked = engine
        .relocate_reservation(morning[0].id, Some(10 * H), Some(13 * H))
        .await;
    assert!(matches!(blocked, Err(EngineError::Validation(_))));

    // Gate check: "vin" was never allow-listed
    let result = engine
        .update_item_attributes(fleet[0], attrs(&[("vin", "XYZ")]))
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));

    // Everything above survives a restart
    drop(engine);
    let engine = Engine::new(path).unwrap();
    assert!(engine.check_permission("bookings", vans));
    let info = engine.get_item_info(fleet[0]).await.unwrap();
    assert_eq!(info.attributes.get("plate"), Some(&"AB-123".to_string()));
    assert_eq!(
        engine.get_reservation(afternoon.id).await.unwrap(),
        afternoon
    );
    assert!(engine.book(vans, 9 * H, 12 * H).await.unwrap().is_none());
}

#[tokio::test]
async fn storm_of_identical_requests_books_each_item_once() {
    let path = wal_path("storm.wal");
    let engine = Arc::new(Engine::new(path).unwrap());

    let cars = Ulid::new();
    engine
        .create_item_type(cars, "cars".into(), vec![])
        .await
        .unwrap();
    let fleet_size = 5;
    for _ in 0..fleet_size {
        engine.create_item(Ulid::new(), cars, None).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(
            async move { engine.book(cars, 0, H).await },
        ));
    }

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(info) = handle.await.unwrap().unwrap() {
            winners.push(info.item_id);
        }
    }
    winners.sort();
    winners.dedup();
    assert_eq!(winners.len(), fleet_size);

    // Each item carries exactly one reservation, and the fleet's free
    // windows reflect it
    for item_id in winners {
        let reservations = engine.list_reservations(item_id).await.unwrap();
        assert_eq!(reservations.len(), 1);
        let free = engine.free_windows(item_id, 0, 3 * H).await.unwrap();
        assert_eq!(free, vec![Span::new(H, 3 * H)]);
    }
}
