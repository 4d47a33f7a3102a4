mod attrs;
mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::free_within;
pub use conflict::{MSG_RESERVATION_OVERLAPS, MSG_START_BEFORE_END};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedItemState = Arc<RwLock<ItemState>>;
pub type SharedItemTypeState = Arc<RwLock<ItemTypeState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch before handling the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    let result = match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    };

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    /// Per-item state; the item's write lock is the booking transaction.
    pub items: DashMap<Ulid, SharedItemState>,
    pub item_types: DashMap<Ulid, SharedItemTypeState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → item id.
    pub(super) reservation_to_item: DashMap<Ulid, Ulid>,
    /// Type → items in creation order. This is the first-fit scan order.
    pub(super) type_items: DashMap<Ulid, Vec<Ulid>>,
    /// Unique type-name index.
    pub(super) type_names: DashMap<String, Ulid>,
    /// (service, type id) → write capability.
    pub(super) permissions: DashMap<(String, Ulid), bool>,
}

/// Apply an item-scoped event directly to an ItemState (no locking — the
/// caller holds the item's write lock).
fn apply_to_item(rs: &mut ItemState, event: &Event, reservation_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationBooked { id, item_id, span } => {
            rs.insert_reservation(Reservation { id: *id, span: *span });
            reservation_map.insert(*id, *item_id);
        }
        Event::ReservationRelocated { id, span, .. } => {
            rs.remove_reservation(*id);
            rs.insert_reservation(Reservation { id: *id, span: *span });
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove_reservation(*id);
            reservation_map.remove(id);
        }
        Event::ItemAttributesUpdated { changes, .. } => {
            for (key, value) in changes {
                rs.attributes.insert(key.clone(), value.clone());
            }
        }
        // Type, item-lifecycle and permission events are handled at the
        // DashMap level, not here
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            items: DashMap::new(),
            item_types: DashMap::new(),
            wal_tx,
            reservation_to_item: DashMap::new(),
            type_items: DashMap::new(),
            type_names: DashMap::new(),
            permissions: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read /
        // try_write always succeed instantly. blocking_read would panic here
        // because replay may run inside an async context.
        for event in &events {
            match event {
                Event::ItemTypeCreated { id, name, allowed_keys } => {
                    let ts = ItemTypeState::new(*id, name.clone(), allowed_keys.clone());
                    engine.item_types.insert(*id, Arc::new(RwLock::new(ts)));
                    engine.type_names.insert(name.clone(), *id);
                    engine.type_items.entry(*id).or_default();
                }
                Event::ItemTypeUpdated { id, name, allowed_keys } => {
                    if let Some(entry) = engine.item_types.get(id) {
                        let ts_arc = entry.clone();
                        drop(entry);
                        let mut guard = ts_arc.try_write().expect("replay: uncontended write");
                        engine.type_names.remove(&guard.name);
                        engine.type_names.insert(name.clone(), *id);
                        guard.name = name.clone();
                        guard.allowed_keys = allowed_keys.clone();
                    }
                }
                Event::ItemCreated { id, type_id, name } => {
                    let rs = ItemState::new(*id, *type_id, name.clone());
                    engine.items.insert(*id, Arc::new(RwLock::new(rs)));
                    engine.type_items.entry(*type_id).or_default().push(*id);
                }
                Event::ItemDeleted { id } => {
                    if let Some((_, rs)) = engine.items.remove(id) {
                        let guard = rs.try_read().expect("replay: uncontended read");
                        if let Some(mut ids) = engine.type_items.get_mut(&guard.type_id) {
                            ids.retain(|i| i != id);
                        }
                        for r in &guard.reservations {
                            engine.reservation_to_item.remove(&r.id);
                        }
                    }
                }
                Event::PermissionGranted { service, type_id, write } => {
                    engine.permissions.insert((service.clone(), *type_id), *write);
                }
                Event::PermissionRevoked { service, type_id } => {
                    engine.permissions.remove(&(service.clone(), *type_id));
                }
                other => {
                    if let Some(item_id) = event_item_id(other)
                        && let Some(entry) = engine.items.get(&item_id)
                    {
                        let rs_arc = entry.clone();
                        drop(entry);
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_item(&mut guard, other, &engine.reservation_to_item);
                    }
                }
            }
        }

        if !events.is_empty() {
            tracing::info!("replayed {} WAL events", events.len());
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_item(&self, id: &Ulid) -> Option<SharedItemState> {
        self.items.get(id).map(|e| e.value().clone())
    }

    pub fn get_item_type(&self, id: &Ulid) -> Option<SharedItemTypeState> {
        self.item_types.get(id).map(|e| e.value().clone())
    }

    pub fn get_item_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_item
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// WAL-append + apply in one call, inside the caller's item write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ItemState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_item(rs, event, &self.reservation_to_item);
        Ok(())
    }

    /// Lookup reservation → item, fetch the item, acquire its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ItemState>), EngineError> {
        let item_id = self
            .get_item_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let rs = self
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = rs.write_owned().await;
        // A concurrent delete_item may have emptied the map entry while we
        // waited on the lock
        if !self.items.contains_key(&item_id) {
            return Err(EngineError::NotFound(*reservation_id));
        }
        Ok((item_id, guard))
    }

    /// Current name of an item type. Types are never deleted, so a missing
    /// entry only happens for ids that never existed.
    pub(super) async fn type_name(&self, type_id: &Ulid) -> String {
        match self.get_item_type(type_id) {
            Some(ts) => ts.read().await.name.clone(),
            None => String::new(),
        }
    }

    pub(super) async fn allowed_keys(&self, type_id: &Ulid) -> Option<Vec<String>> {
        let ts = self.get_item_type(type_id)?;
        let guard = ts.read().await;
        Some(guard.allowed_keys.clone())
    }
}

/// Extract the item id from an item-scoped event.
fn event_item_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationBooked { item_id, .. }
        | Event::ReservationRelocated { item_id, .. }
        | Event::ReservationCancelled { item_id, .. } => Some(*item_id),
        Event::ItemAttributesUpdated { id, .. } => Some(*id),
        _ => None,
    }
}
