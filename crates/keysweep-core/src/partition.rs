//! Weighted splitting of a contiguous range.
//!
//! [`partition`] is used twice per session: by the coordinator to hand each
//! participant a share of the keyspace proportional to its advertised
//! capacity, and by each worker to fan its own share out across local
//! scanners (one unit weight per scanner).

use crate::types::SearchRange;

/// Splits `[start, end)` into one contiguous sub-range per weight.
///
/// The per-unit size is `ceil((end - start) / sum(weights))` and weight `i`
/// receives `weights[i]` consecutive units, in order. Both bounds of every
/// sub-range are clamped to `end`, and the last sub-range always ends at `end`,
/// so the output covers `[start, end)` exactly with no gaps or overlaps.
///
/// When the range holds fewer candidates than the total weight, trailing
/// sub-ranges come out empty (`start == end`). A zero weight yields an empty
/// sub-range at the current cursor. A weight sum beyond `u64::MAX` saturates,
/// which hands the whole range to the leading weights.
pub fn partition(start: u64, end: u64, weights: &[usize]) -> Vec<SearchRange> {
    let end = end.max(start);
    let span = end - start;
    let total = weights
        .iter()
        .fold(0u64, |acc, w| acc.saturating_add(*w as u64));
    let unit = if total == 0 { 0 } else { span.div_ceil(total) };

    let mut cursor = start;
    let mut ranges = Vec::with_capacity(weights.len());

    for (i, weight) in weights.iter().enumerate() {
        let from = cursor;
        let to = if i + 1 == weights.len() {
            end
        } else {
            cursor.saturating_add(unit.saturating_mul(*weight as u64)).min(end)
        };
        ranges.push(SearchRange::new(from, to));
        cursor = to;
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(start: u64, end: u64, weights: &[usize]) {
        let ranges = partition(start, end, weights);
        assert_eq!(ranges.len(), weights.len());
        assert_eq!(ranges.first().unwrap().start, start);
        assert_eq!(ranges.last().unwrap().end, end);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap in {ranges:?}");
        }
        for range in &ranges {
            assert!(range.start <= range.end);
        }
        let covered: u64 = ranges.iter().map(SearchRange::len).sum();
        assert_eq!(covered, end - start);
    }

    #[test]
    fn weighted_ranges_follow_capacity() {
        let ranges = partition(0, 40, &[1, 2, 1]);
        assert_eq!(
            ranges,
            vec![
                SearchRange::new(0, 10),
                SearchRange::new(10, 30),
                SearchRange::new(30, 40),
            ]
        );
    }

    #[test]
    fn last_range_absorbs_rounding() {
        // unit = ceil(10 / 3) = 4
        let ranges = partition(0, 10, &[1, 1, 1]);
        assert_eq!(
            ranges,
            vec![
                SearchRange::new(0, 4),
                SearchRange::new(4, 8),
                SearchRange::new(8, 10),
            ]
        );
    }

    #[test]
    fn offset_ranges_start_at_start() {
        let ranges = partition(500, 1000, &[1; 4]);
        assert_eq!(ranges[0], SearchRange::new(500, 625));
        assert_eq!(ranges[3], SearchRange::new(875, 1000));
    }

    #[test]
    fn small_ranges_leave_trailing_empties() {
        let ranges = partition(0, 3, &[1, 1, 1, 1, 1]);
        assert_eq!(
            ranges,
            vec![
                SearchRange::new(0, 1),
                SearchRange::new(1, 2),
                SearchRange::new(2, 3),
                SearchRange::new(3, 3),
                SearchRange::new(3, 3),
            ]
        );
        assert!(ranges[3].is_empty());
    }

    #[test]
    fn covers_exactly_for_assorted_inputs() {
        let weights: [&[usize]; 6] = [&[1], &[3], &[1, 1], &[2, 5, 1], &[8; 7], &[1, 16, 4, 2]];
        let spans = [(0, 1), (0, 100), (7, 1_000), (100_000, 200_000), (0, 10_u64.pow(12))];
        for &(start, end) in &spans {
            for w in weights {
                assert_exact_cover(start, end, w);
            }
        }
    }

    #[test]
    fn empty_input_range() {
        let ranges = partition(5, 5, &[2, 2]);
        assert_eq!(ranges, vec![SearchRange::new(5, 5), SearchRange::new(5, 5)]);
        assert!(partition(0, 10, &[]).is_empty());
    }

    #[test]
    fn full_u64_keyspace_does_not_overflow() {
        let keyspace = SearchRange::keyspace(19).unwrap();
        assert_exact_cover(keyspace.start, keyspace.end, &[usize::MAX / 2, 3, 1]);
        assert_exact_cover(keyspace.start, keyspace.end, &[usize::MAX, 1]);
        assert_exact_cover(0, 10, &[usize::MAX, usize::MAX, 1]);
        assert_eq!(
            partition(0, 10, &[usize::MAX, 1]),
            vec![SearchRange::new(0, 10), SearchRange::new(10, 10)]
        );
        assert!(SearchRange::keyspace(20).is_none());
    }
}
