use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub const MSG_START_BEFORE_END: &str = "Start time must be before end time";
pub const MSG_RESERVATION_OVERLAPS: &str =
    "Reservation overlaps another reservation on this item";

/// Bounds checks that are resource-exhaustion guards, not business rules.
pub(crate) fn validate_bounds(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Interval ordering is a business rule (`Validation`); bounds are limits.
pub(crate) fn validate_interval(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Validation(vec![MSG_START_BEFORE_END.into()]));
    }
    let span = Span::new(start, end);
    validate_bounds(&span)?;
    Ok(span)
}

/// The overlap invariant check. Runs under the item's lock; `exclude` skips
/// one reservation id so a relocation doesn't collide with its own old
/// interval.
pub(crate) fn check_no_conflict(
    item: &ItemState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for reservation in item.overlapping(span) {
        if exclude == Some(reservation.id) {
            continue;
        }
        return Err(EngineError::Conflict(reservation.id));
    }
    Ok(())
}
