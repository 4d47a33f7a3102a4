use crate::model::*;

/// Gaps of `query` not covered by `occupied`.
///
/// `occupied` must be sorted by start and pairwise disjoint — which the
/// no-overlap invariant guarantees for a single item's reservations.
/// Spans are clamped to the query window.
pub fn free_within(query: &Span, occupied: &[Span]) -> Vec<Span> {
    let mut free = Vec::new();
    let mut cursor = query.start;

    for span in occupied {
        if span.end <= cursor {
            continue;
        }
        if span.start >= query.end {
            break;
        }
        if span.start > cursor {
            free.push(Span::new(cursor, span.start));
        }
        cursor = cursor.max(span.end);
        if cursor >= query.end {
            break;
        }
    }

    if cursor < query.end {
        free.push(Span::new(cursor, query.end));
    }
    free
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    #[test]
    fn empty_schedule_is_fully_free() {
        let free = free_within(&Span::new(0, 24 * H), &[]);
        assert_eq!(free, vec![Span::new(0, 24 * H)]);
    }

    #[test]
    fn single_reservation_splits_window() {
        let free = free_within(&Span::new(9 * H, 17 * H), &[Span::new(12 * H, 13 * H)]);
        assert_eq!(
            free,
            vec![Span::new(9 * H, 12 * H), Span::new(13 * H, 17 * H)]
        );
    }

    #[test]
    fn reservation_covering_window_leaves_nothing() {
        let free = free_within(&Span::new(10 * H, 11 * H), &[Span::new(9 * H, 12 * H)]);
        assert!(free.is_empty());
    }

    #[test]
    fn reservations_outside_window_ignored() {
        let occupied = [Span::new(0, 2 * H), Span::new(20 * H, 22 * H)];
        let free = free_within(&Span::new(9 * H, 17 * H), &occupied);
        assert_eq!(free, vec![Span::new(9 * H, 17 * H)]);
    }

    #[test]
    fn partial_overlap_at_edges() {
        let occupied = [Span::new(8 * H, 10 * H), Span::new(16 * H, 18 * H)];
        let free = free_within(&Span::new(9 * H, 17 * H), &occupied);
        assert_eq!(free, vec![Span::new(10 * H, 16 * H)]);
    }

    #[test]
    fn adjacent_reservations_leave_no_gap_between() {
        let occupied = [Span::new(10 * H, 11 * H), Span::new(11 * H, 12 * H)];
        let free = free_within(&Span::new(9 * H, 13 * H), &occupied);
        assert_eq!(
            free,
            vec![Span::new(9 * H, 10 * H), Span::new(12 * H, 13 * H)]
        );
    }
}
