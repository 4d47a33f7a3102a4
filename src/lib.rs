//! In-memory reservation engine for fleets of typed, interchangeable items.
//!
//! State is event-sourced: every mutation is appended to a write-ahead log
//! before it touches the in-memory maps, and startup replays the log. The
//! unit of booking concurrency is the item — holding an item's write lock
//! is the booking transaction.

pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;
