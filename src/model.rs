use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type. The boundary layer parses and
/// formats ISO-8601; the engine never sees a time string.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Two half-open intervals overlap iff `a.start < b.end && b.start < a.end`.
    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A committed reservation on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub span: Span,
}

/// A category of interchangeable items. `name` is unique across types;
/// `allowed_keys` is the attribute allow-list for items of this type.
#[derive(Debug, Clone)]
pub struct ItemTypeState {
    pub id: Ulid,
    pub name: String,
    pub allowed_keys: Vec<String>,
}

impl ItemTypeState {
    pub fn new(id: Ulid, name: String, allowed_keys: Vec<String>) -> Self {
        Self { id, name, allowed_keys }
    }
}

#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: Ulid,
    pub type_id: Ulid,
    pub name: Option<String>,
    /// Free-form attribute bag, gated by the item type's allow-list.
    pub attributes: HashMap<String, String>,
    /// All reservations, sorted by `span.start`. Never overlapping.
    pub reservations: Vec<Reservation>,
}

impl ItemState {
    pub fn new(id: Ulid, type_id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            type_id,
            name,
            attributes: HashMap::new(),
            reservations: Vec::new(),
        }
    }

    /// Insert a reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Remove a reservation by id.
    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Only reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ItemTypeCreated {
        id: Ulid,
        name: String,
        allowed_keys: Vec<String>,
    },
    ItemTypeUpdated {
        id: Ulid,
        name: String,
        allowed_keys: Vec<String>,
    },
    ItemCreated {
        id: Ulid,
        type_id: Ulid,
        name: Option<String>,
    },
    ItemDeleted {
        id: Ulid,
    },
    ItemAttributesUpdated {
        id: Ulid,
        changes: HashMap<String, String>,
    },
    ReservationBooked {
        id: Ulid,
        item_id: Ulid,
        span: Span,
    },
    ReservationRelocated {
        id: Ulid,
        item_id: Ulid,
        span: Span,
    },
    ReservationCancelled {
        id: Ulid,
        item_id: Ulid,
    },
    PermissionGranted {
        service: String,
        type_id: Ulid,
        write: bool,
    },
    PermissionRevoked {
        service: String,
        type_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSummary {
    pub id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTypeInfo {
    pub id: Ulid,
    pub name: String,
    pub allowed_keys: Vec<String>,
    /// Items of this type, in creation order.
    pub items: Vec<ItemSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: Ulid,
    pub type_id: Ulid,
    pub name: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub item_id: Ulid,
    /// Name of the item's type, for boundary rendering.
    pub item_type: String,
    pub start: Ms,
    pub end: Ms,
}
