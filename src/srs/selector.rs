use std::cmp::Ordering;

use crate::srs::MemoryRecord;

/// Orders a due set and truncates it to `limit`.
///
/// Total order: oldest-overdue first, ties broken hardest-first (higher
/// difficulty), then item id so repeated calls over an unchanged store give
/// byte-identical output. The store only filters by `due_at <= as_of`; all
/// ordering policy lives here.
pub fn select_due(mut records: Vec<MemoryRecord>, limit: usize) -> Vec<MemoryRecord> {
    records.sort_by(compare_due);
    records.truncate(limit);
    records
}

fn compare_due(a: &MemoryRecord, b: &MemoryRecord) -> Ordering {
    a.due_at
        .cmp(&b.due_at)
        .then_with(|| b.difficulty.total_cmp(&a.difficulty))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;

    // Records that should tie on due_at must share one timestamp; calling
    // Utc::now() per record would break the tie by nanoseconds.
    fn record(
        now: DateTime<Utc>,
        item_id: &str,
        overdue_days: i64,
        difficulty: f64,
    ) -> MemoryRecord {
        let mut r = MemoryRecord::unseen("learner-1", item_id, now);
        r.due_at = now - Duration::days(overdue_days);
        r.difficulty = difficulty;
        r
    }

    fn ids(records: &[MemoryRecord]) -> Vec<&str> {
        records.iter().map(|r| r.item_id.as_str()).collect()
    }

    #[test]
    fn oldest_overdue_comes_first() {
        let now = Utc::now();
        let out = select_due(
            vec![
                record(now, "a", 1, 5.0),
                record(now, "b", 10, 5.0),
                record(now, "c", 3, 5.0),
            ],
            10,
        );
        assert_eq!(ids(&out), ["b", "c", "a"]);
    }

    #[test]
    fn equal_due_dates_order_hardest_first() {
        let now = Utc::now();
        let out = select_due(
            vec![
                record(now, "a", 0, 2.0),
                record(now, "b", 0, 9.0),
                record(now, "c", 0, 6.0),
            ],
            10,
        );
        assert_eq!(ids(&out), ["b", "c", "a"]);
    }

    #[test]
    fn limit_truncates_without_error() {
        let now = Utc::now();
        let out = select_due(
            vec![
                record(now, "a", 1, 5.0),
                record(now, "b", 10, 5.0),
                record(now, "c", 3, 5.0),
            ],
            2,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(ids(&out), ["b", "c"]);
        assert!(select_due(vec![], 5).is_empty());
    }

    #[test]
    fn ordering_is_deterministic_for_fixed_input() {
        let now = Utc::now();
        let make = || {
            vec![
                record(now, "d", 2, 3.0),
                record(now, "a", 2, 3.0),
                record(now, "b", 5, 8.0),
                record(now, "c", 2, 7.0),
            ]
        };
        let first = select_due(make(), 10);
        let second = select_due(make(), 10);
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), ["b", "c", "a", "d"]);
    }
}
