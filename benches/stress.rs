use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ulid::Ulid;

use corral::engine::Engine;

const HOUR: i64 = 3_600_000; // 1 hour in ms

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn bench_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("corral_bench");
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let path = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&path);
    Arc::new(Engine::new(path).expect("engine startup"))
}

async fn fleet(engine: &Engine, items: usize) -> (Ulid, Vec<Ulid>) {
    let type_id = Ulid::new();
    engine
        .create_item_type(type_id, "bench".into(), vec![])
        .await
        .unwrap();
    let mut ids = Vec::with_capacity(items);
    for _ in 0..items {
        let id = Ulid::new();
        engine.create_item(id, type_id, None).await.unwrap();
        ids.push(id);
    }
    (type_id, ids)
}

async fn phase1_sequential(engine: Arc<Engine>) {
    let (_, items) = fleet(&engine, 1).await;
    let item = items[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = (i as i64) * HOUR;
        let t = Instant::now();
        engine
            .create_reservation(Ulid::new(), item, s, s + HOUR)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} bookings in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: Arc<Engine>) {
    let n_tasks = 10;
    let n_per_task = 200;
    let (_, items) = fleet(&engine, n_tasks).await;

    let start = Instant::now();
    let mut handles = Vec::new();

    for (task, &item) in items.iter().enumerate() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let s = (task as i64 * 100_000 + j as i64) * HOUR;
                engine
                    .create_reservation(Ulid::new(), item, s, s + HOUR)
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let (type_id, items) = fleet(&engine, 10).await;

    // Pre-fill so availability answers are non-trivial
    for &item in &items {
        for i in 0..50 {
            let s = (i as i64) * 2 * HOUR;
            engine
                .create_reservation(Ulid::new(), item, s, s + HOUR)
                .await
                .unwrap();
        }
    }

    // Writers keep booking fresh slots in the background
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for (w, &item) in items.iter().take(5).enumerate() {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = (w as i64 * 1_000_000 + 1_000 + i) * HOUR;
                let _ = engine
                    .create_reservation(Ulid::new(), item, s, s + HOUR)
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let engine = engine.clone();
        let item = items[r % items.len()];
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                engine.find_available(type_id, 0, HOUR).await.unwrap();
                engine.free_windows(item, 0, 100 * HOUR).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_contended_slot(engine: Arc<Engine>) {
    let fleet_size = 10;
    let n_tasks = 200;
    let (type_id, _) = fleet(&engine, fleet_size).await;

    let start = Instant::now();
    let booked = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    // Everyone wants the same hour; only `fleet_size` can get it
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let booked = booked.clone();
        handles.push(tokio::spawn(async move {
            if engine.book(type_id, 0, HOUR).await.unwrap().is_some() {
                booked.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = booked.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} contenders for {fleet_size} items: {ok} booked in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(ok, fleet_size, "every item booked exactly once");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let metrics_port = std::env::var("CORRAL_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok());
    corral::observability::init(metrics_port);

    println!("=== corral stress benchmark ===\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential(bench_engine("phase1")).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(bench_engine("phase2")).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(bench_engine("phase3")).await;

    println!("\n[phase 4] contended slot storm");
    phase4_contended_slot(bench_engine("phase4")).await;

    println!("\n=== benchmark complete ===");
}
