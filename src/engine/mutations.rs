use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::attrs::validate_keys;
use super::conflict::{
    MSG_RESERVATION_OVERLAPS, MSG_START_BEFORE_END, check_no_conflict, validate_bounds,
    validate_interval,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Catalog ──────────────────────────────────────────

    pub async fn create_item_type(
        &self,
        id: Ulid,
        name: String,
        allowed_keys: Vec<String>,
    ) -> Result<(), EngineError> {
        if self.item_types.len() >= MAX_ITEM_TYPES {
            return Err(EngineError::LimitExceeded("too many item types"));
        }
        validate_type_fields(&name, &allowed_keys)?;
        if self.item_types.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // Reserve the name first so two concurrent creates can't both pass
        // the uniqueness check.
        match self.type_names.entry(name.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::Validation(vec![
                    "Name has already been taken".into(),
                ]));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let event = Event::ItemTypeCreated {
            id,
            name: name.clone(),
            allowed_keys: allowed_keys.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.type_names.remove(&name);
            return Err(e);
        }

        let ts = ItemTypeState::new(id, name, allowed_keys);
        self.item_types.insert(id, Arc::new(RwLock::new(ts)));
        self.type_items.entry(id).or_default();
        Ok(())
    }

    /// Partial update of an item type. Rejected wholesale on any violation;
    /// on success the post-update type is returned.
    pub async fn update_item_type(
        &self,
        id: Ulid,
        name: Option<String>,
        allowed_keys: Option<Vec<String>>,
    ) -> Result<ItemTypeInfo, EngineError> {
        let ts = self.get_item_type(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ts.write().await;

        let new_name = name.unwrap_or_else(|| guard.name.clone());
        let new_keys = allowed_keys.unwrap_or_else(|| guard.allowed_keys.clone());
        validate_type_fields(&new_name, &new_keys)?;

        let renamed = new_name != guard.name;
        if renamed {
            match self.type_names.entry(new_name.clone()) {
                Entry::Occupied(_) => {
                    return Err(EngineError::Validation(vec![
                        "Name has already been taken".into(),
                    ]));
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }

        let event = Event::ItemTypeUpdated {
            id,
            name: new_name.clone(),
            allowed_keys: new_keys.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            if renamed {
                self.type_names.remove(&new_name);
            }
            return Err(e);
        }

        if renamed {
            self.type_names.remove(&guard.name);
        }
        guard.name = new_name.clone();
        guard.allowed_keys = new_keys.clone();
        // Release the type lock before touching item locks (item summaries
        // take item reads; writers hold item-then-type, never the reverse)
        drop(guard);

        Ok(ItemTypeInfo {
            id,
            name: new_name,
            allowed_keys: new_keys,
            items: self.item_summaries(&id).await,
        })
    }

    // ── Inventory ────────────────────────────────────────

    pub async fn create_item(
        &self,
        id: Ulid,
        type_id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if !self.item_types.contains_key(&type_id) {
            return Err(EngineError::NotFound(type_id));
        }
        if self.items.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("item name too long"));
        }
        if let Some(ids) = self.type_items.get(&type_id)
            && ids.len() >= MAX_ITEMS_PER_TYPE
        {
            return Err(EngineError::LimitExceeded("too many items of this type"));
        }

        let event = Event::ItemCreated {
            id,
            type_id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;

        let rs = ItemState::new(id, type_id, name);
        self.items.insert(id, Arc::new(RwLock::new(rs)));
        self.type_items.entry(type_id).or_default().push(id);
        Ok(())
    }

    /// Remove an item. Its reservations go with it (exclusive ownership).
    pub async fn delete_item(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_item(&id).ok_or(EngineError::NotFound(id))?;
        // Hold the write lock through removal so no booking commits mid-delete
        let guard = rs.write().await;

        let event = Event::ItemDeleted { id };
        self.wal_append(&event).await?;

        if let Some(mut ids) = self.type_items.get_mut(&guard.type_id) {
            ids.retain(|i| *i != id);
        }
        for reservation in &guard.reservations {
            self.reservation_to_item.remove(&reservation.id);
        }
        // Remove the map entry while still holding the lock: a writer that
        // fetched the Arc earlier and is queued behind this delete re-checks
        // membership once it acquires the lock
        self.items.remove(&id);
        Ok(())
    }

    /// Merge `changes` into the item's attribute map, gated by the item
    /// type's allow-list. All violations are reported; nothing is applied
    /// on failure.
    pub async fn update_item_attributes(
        &self,
        item_id: Ulid,
        changes: HashMap<String, String>,
    ) -> Result<ItemInfo, EngineError> {
        if changes.len() > MAX_ATTRS_PER_UPDATE {
            return Err(EngineError::LimitExceeded("too many attributes in update"));
        }
        for (key, value) in &changes {
            if key.len() > MAX_ATTR_KEY_LEN {
                return Err(EngineError::LimitExceeded("attribute key too long"));
            }
            if value.len() > MAX_ATTR_VALUE_LEN {
                return Err(EngineError::LimitExceeded("attribute value too long"));
            }
        }

        let rs = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let mut guard = rs.write().await;
        if !self.items.contains_key(&item_id) {
            return Err(EngineError::NotFound(item_id));
        }

        // The allow-list is data, not code: re-read it on every update,
        // under the item's write lock so a concurrent shrink can't land
        // between validation and apply.
        let allowed = self
            .allowed_keys(&guard.type_id)
            .await
            .ok_or(EngineError::NotFound(guard.type_id))?;
        if let Err(e) = validate_keys(&allowed, &changes) {
            metrics::counter!(observability::ATTRIBUTE_UPDATES_REJECTED_TOTAL).increment(1);
            return Err(e);
        }

        // Overwrites don't grow the map; only genuinely new keys count
        let added = changes
            .keys()
            .filter(|k| !guard.attributes.contains_key(*k))
            .count();
        if guard.attributes.len() + added > MAX_ATTRS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many attributes on item"));
        }

        let event = Event::ItemAttributesUpdated {
            id: item_id,
            changes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(ItemInfo {
            id: guard.id,
            type_id: guard.type_id,
            name: guard.name.clone(),
            attributes: guard.attributes.clone(),
        })
    }

    // ── Reservation lifecycle ────────────────────────────

    /// Commit a reservation on a specific item. The no-overlap invariant is
    /// re-checked here, under the item's write lock — not merely at the
    /// moment the item was selected — so a lost race surfaces as `Conflict`.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        item_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<ReservationInfo, EngineError> {
        let span = validate_interval(start, end)?;
        let rs = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let mut guard = rs.write().await;
        // A delete may have won the lock first; the map entry is gone then
        if !self.items.contains_key(&item_id) {
            return Err(EngineError::NotFound(item_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many reservations on item"));
        }

        if let Err(e) = check_no_conflict(&guard, &span, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::ReservationBooked { id, item_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_BOOKED_TOTAL).increment(1);

        let item_type = self.type_name(&guard.type_id).await;
        Ok(ReservationInfo {
            id,
            item_id,
            item_type,
            start: span.start,
            end: span.end,
        })
    }

    /// The combined select-and-reserve operation: scan the type's items in
    /// creation order and commit on the first free one. Each candidate's
    /// write lock is taken before its overlap check, so there is no window
    /// in which two callers can book the same slot on the same item.
    /// `Ok(None)` means every candidate conflicts.
    pub async fn book(
        &self,
        type_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Option<ReservationInfo>, EngineError> {
        let span = validate_interval(start, end)?;
        if !self.item_types.contains_key(&type_id) {
            return Err(EngineError::NotFound(type_id));
        }
        let item_type = self.type_name(&type_id).await;
        let candidates: Vec<Ulid> = self
            .type_items
            .get(&type_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        for item_id in candidates {
            let Some(rs) = self.get_item(&item_id) else {
                continue; // deleted since the snapshot
            };
            let mut guard = rs.write().await;
            if !self.items.contains_key(&item_id) {
                continue; // deleted while we waited for the lock
            }
            if guard.reservations.len() >= MAX_RESERVATIONS_PER_ITEM {
                continue;
            }
            if check_no_conflict(&guard, &span, None).is_err() {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                continue;
            }

            let id = Ulid::new();
            let event = Event::ReservationBooked { id, item_id, span };
            self.persist_and_apply(&mut guard, &event).await?;
            metrics::counter!(observability::RESERVATIONS_BOOKED_TOTAL).increment(1);
            return Ok(Some(ReservationInfo {
                id,
                item_id,
                item_type,
                start: span.start,
                end: span.end,
            }));
        }

        Ok(None)
    }

    /// Partial update of a reservation's interval. The result must still
    /// order correctly and must not overlap any *other* reservation on the
    /// item — the reservation's own old interval is excluded. Violations
    /// are reported together and nothing is applied.
    pub async fn relocate_reservation(
        &self,
        id: Ulid,
        new_start: Option<Ms>,
        new_end: Option<Ms>,
    ) -> Result<ReservationInfo, EngineError> {
        let (item_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .copied()
            .ok_or(EngineError::NotFound(id))?;

        let start = new_start.unwrap_or(current.span.start);
        let end = new_end.unwrap_or(current.span.end);

        let mut errors = Vec::new();
        let span = if start < end {
            let span = Span::new(start, end);
            validate_bounds(&span)?;
            if check_no_conflict(&guard, &span, Some(id)).is_err() {
                errors.push(MSG_RESERVATION_OVERLAPS.to_string());
            }
            Some(span)
        } else {
            errors.push(MSG_START_BEFORE_END.to_string());
            None
        };
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }
        let span = span.unwrap_or(current.span);

        let event = Event::ReservationRelocated { id, item_id, span };
        self.persist_and_apply(&mut guard, &event).await?;

        let item_type = self.type_name(&guard.type_id).await;
        Ok(ReservationInfo {
            id,
            item_id,
            item_type,
            start: span.start,
            end: span.end,
        })
    }

    /// Delete a reservation. Cancelling an id that does not exist is
    /// `NotFound`, never a silent success.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (item_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let event = Event::ReservationCancelled { id, item_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        Ok(item_id)
    }

    // ── Permission registry ──────────────────────────────

    /// Grant a service a write capability on an item type. One record per
    /// (service, type) pair.
    pub async fn grant_permission(
        &self,
        service: String,
        type_id: Ulid,
        write: bool,
    ) -> Result<(), EngineError> {
        if service.is_empty() {
            return Err(EngineError::Validation(vec![
                "Service can't be blank".into(),
            ]));
        }
        if service.len() > MAX_SERVICE_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if !self.item_types.contains_key(&type_id) {
            return Err(EngineError::NotFound(type_id));
        }

        match self.permissions.entry((service.clone(), type_id)) {
            Entry::Occupied(_) => {
                return Err(EngineError::Validation(vec![
                    "Item type has already been taken".into(),
                ]));
            }
            Entry::Vacant(slot) => {
                slot.insert(write);
            }
        }

        let event = Event::PermissionGranted {
            service: service.clone(),
            type_id,
            write,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.permissions.remove(&(service, type_id));
            return Err(e);
        }
        Ok(())
    }

    /// Returns whether a permission record existed.
    pub async fn revoke_permission(
        &self,
        service: &str,
        type_id: Ulid,
    ) -> Result<bool, EngineError> {
        let key = (service.to_string(), type_id);
        if !self.permissions.contains_key(&key) {
            return Ok(false);
        }
        let event = Event::PermissionRevoked {
            service: service.to_string(),
            type_id,
        };
        self.wal_append(&event).await?;
        self.permissions.remove(&key);
        Ok(true)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current
    /// state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let type_ids: Vec<Ulid> = self.item_types.iter().map(|e| *e.key()).collect();
        for type_id in type_ids {
            let Some(ts) = self.get_item_type(&type_id) else {
                continue;
            };
            {
                let guard = ts.read().await;
                events.push(Event::ItemTypeCreated {
                    id: type_id,
                    name: guard.name.clone(),
                    allowed_keys: guard.allowed_keys.clone(),
                });
            }

            let item_ids: Vec<Ulid> = self
                .type_items
                .get(&type_id)
                .map(|e| e.value().clone())
                .unwrap_or_default();
            for item_id in item_ids {
                let Some(rs) = self.get_item(&item_id) else {
                    continue;
                };
                let item = rs.read().await;
                events.push(Event::ItemCreated {
                    id: item.id,
                    type_id,
                    name: item.name.clone(),
                });
                if !item.attributes.is_empty() {
                    events.push(Event::ItemAttributesUpdated {
                        id: item.id,
                        changes: item.attributes.clone(),
                    });
                }
                for reservation in &item.reservations {
                    events.push(Event::ReservationBooked {
                        id: reservation.id,
                        item_id: item.id,
                        span: reservation.span,
                    });
                }
            }
        }

        for entry in self.permissions.iter() {
            let (service, type_id) = entry.key().clone();
            events.push(Event::PermissionGranted {
                service,
                type_id,
                write: *entry.value(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_type_fields(name: &str, allowed_keys: &[String]) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("type name too long"));
    }
    if allowed_keys.len() > MAX_ALLOWED_KEYS {
        return Err(EngineError::LimitExceeded("too many allowed keys"));
    }
    if allowed_keys.iter().any(|k| k.len() > MAX_ATTR_KEY_LEN) {
        return Err(EngineError::LimitExceeded("allowed key too long"));
    }
    if name.trim().is_empty() {
        return Err(EngineError::Validation(vec!["Name can't be blank".into()]));
    }
    Ok(())
}
