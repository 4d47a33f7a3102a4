use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::availability::free_within;
use super::conflict::{check_no_conflict, validate_interval};
use super::{Engine, EngineError};

impl Engine {
    /// First item of the type free over `[start, end)`, in creation order.
    ///
    /// This is advisory: the answer can go stale the moment it is returned.
    /// Booking re-checks under the item's write lock, which is why callers
    /// that want select-and-reserve atomically use `book` instead.
    pub async fn find_available(
        &self,
        type_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Option<Ulid>, EngineError> {
        let span = validate_interval(start, end)?;
        if !self.item_types.contains_key(&type_id) {
            return Err(EngineError::NotFound(type_id));
        }
        let candidates: Vec<Ulid> = self
            .type_items
            .get(&type_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        for item_id in candidates {
            let Some(rs) = self.get_item(&item_id) else {
                continue;
            };
            let guard = rs.read().await;
            if check_no_conflict(&guard, &span, None).is_ok() {
                return Ok(Some(item_id));
            }
        }
        Ok(None)
    }

    /// Free sub-windows of `[start, end)` on one item, clamped to the query.
    pub async fn free_windows(
        &self,
        item_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let query = validate_interval(start, end)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let guard = rs.read().await;
        let occupied: Vec<Span> = guard.overlapping(&query).map(|r| r.span).collect();
        Ok(free_within(&query, &occupied))
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        let item_id = self
            .get_item_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_item(&item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        let guard = rs.read().await;
        let reservation = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;
        let item_type = self.type_name(&guard.type_id).await;
        Ok(ReservationInfo {
            id,
            item_id,
            item_type,
            start: reservation.span.start,
            end: reservation.span.end,
        })
    }

    /// All reservations on one item, sorted by start time.
    pub async fn list_reservations(&self, item_id: Ulid) -> Result<Vec<ReservationInfo>, EngineError> {
        let rs = self.get_item(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let guard = rs.read().await;
        let item_type = self.type_name(&guard.type_id).await;
        Ok(guard
            .reservations
            .iter()
            .map(|r| ReservationInfo {
                id: r.id,
                item_id,
                item_type: item_type.clone(),
                start: r.span.start,
                end: r.span.end,
            })
            .collect())
    }

    pub async fn get_item_type_info(&self, id: Ulid) -> Result<ItemTypeInfo, EngineError> {
        let ts = self.get_item_type(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ts.read().await;
        let info = ItemTypeInfo {
            id,
            name: guard.name.clone(),
            allowed_keys: guard.allowed_keys.clone(),
            items: self.item_summaries(&id).await,
        };
        Ok(info)
    }

    pub async fn list_item_types(&self) -> Vec<ItemTypeInfo> {
        let ids: Vec<Ulid> = self.item_types.iter().map(|e| *e.key()).collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(info) = self.get_item_type_info(id).await {
                out.push(info);
            }
        }
        // DashMap iteration order is arbitrary; present types stably
        out.sort_by_key(|t| t.id);
        out
    }

    pub async fn get_item_info(&self, id: Ulid) -> Result<ItemInfo, EngineError> {
        let rs = self.get_item(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(ItemInfo {
            id: guard.id,
            type_id: guard.type_id,
            name: guard.name.clone(),
            attributes: guard.attributes.clone(),
        })
    }

    /// Missing records deny: a service with no permission row has no access.
    pub fn check_permission(&self, service: &str, type_id: Ulid) -> bool {
        self.permissions
            .get(&(service.to_string(), type_id))
            .map(|e| *e.value())
            .unwrap_or(false)
    }

    pub(super) async fn item_summaries(&self, type_id: &Ulid) -> Vec<ItemSummary> {
        let item_ids: Vec<Ulid> = self
            .type_items
            .get(type_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut summaries = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            if let Some(rs) = self.get_item(&item_id) {
                let guard = rs.read().await;
                summaries.push(ItemSummary {
                    id: item_id,
                    name: guard.name.clone(),
                });
            }
        }
        summaries
    }
}
