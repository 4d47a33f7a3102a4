//! Hard limits. Every externally supplied quantity is bounded so a single
//! caller cannot grow the store or a scan without end.

use crate::model::Ms;

pub const MAX_ITEM_TYPES: usize = 10_000;
pub const MAX_ITEMS_PER_TYPE: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ITEM: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_SERVICE_NAME_LEN: usize = 256;

pub const MAX_ALLOWED_KEYS: usize = 256;
pub const MAX_ATTR_KEY_LEN: usize = 128;
pub const MAX_ATTR_VALUE_LEN: usize = 4096;
pub const MAX_ATTRS_PER_ITEM: usize = 1024;
pub const MAX_ATTRS_PER_UPDATE: usize = 256;

/// 1970-01-01T00:00:00Z. Intervals before the epoch are rejected.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single reservation may span at most 10 years.
pub const MAX_SPAN_DURATION_MS: Ms = 10 * 365 * 24 * 3_600_000;
/// Availability queries may scan at most ~1 year of schedule.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
