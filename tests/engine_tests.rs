use chrono::{Duration, Utc};
use proptest::prelude::*;

use lexikon_srs::srs::record::{MAX_DIFFICULTY, MIN_DIFFICULTY};
use lexikon_srs::srs::{apply, select_due, MemoryRecord, Outcome, RecordState, SchedulerParams};

fn arb_state() -> impl Strategy<Value = RecordState> {
    prop_oneof![
        Just(RecordState::New),
        Just(RecordState::Learning),
        Just(RecordState::Review),
        Just(RecordState::Mature),
    ]
}

fn arb_record() -> impl Strategy<Value = MemoryRecord> {
    (0.1f64..1000.0, 1.0f64..=10.0, arb_state(), 0i64..500, 0i64..10).prop_map(
        |(stability, difficulty, state, review_count, consecutive)| {
            let now = Utc::now();
            let mut record = MemoryRecord::unseen("learner-1", "item-1", now);
            record.stability = stability;
            record.difficulty = difficulty;
            record.state = state;
            record.review_count = review_count;
            record.consecutive_successes = consecutive;
            record
        },
    )
}

proptest! {
    #[test]
    fn success_never_decreases_stability(record in arb_record(), quality in 3u8..=5) {
        let now = Utc::now();
        let updated = apply(&record, Outcome::Graded { quality }, now, &SchedulerParams::default()).unwrap();
        prop_assert!(updated.stability >= record.stability);
    }

    #[test]
    fn failure_always_decreases_stability(record in arb_record(), quality in 0u8..3) {
        let now = Utc::now();
        let updated = apply(&record, Outcome::Graded { quality }, now, &SchedulerParams::default()).unwrap();
        prop_assert!(updated.stability < record.stability);
    }

    #[test]
    fn due_date_is_in_the_future_and_after_review_time(record in arb_record(), quality in 0u8..=5) {
        let now = Utc::now();
        let updated = apply(&record, Outcome::Graded { quality }, now, &SchedulerParams::default()).unwrap();
        prop_assert!(updated.due_at > now);
        prop_assert_eq!(updated.last_reviewed_at, Some(now));
        prop_assert!(updated.due_at >= updated.last_reviewed_at.unwrap());
    }

    #[test]
    fn review_count_is_monotonic(record in arb_record(), quality in 0u8..=5) {
        let now = Utc::now();
        let updated = apply(&record, Outcome::Graded { quality }, now, &SchedulerParams::default()).unwrap();
        prop_assert_eq!(updated.review_count, record.review_count + 1);
    }

    #[test]
    fn difficulty_stays_in_bounds(record in arb_record(), quality in 0u8..=5) {
        let now = Utc::now();
        let updated = apply(&record, Outcome::Graded { quality }, now, &SchedulerParams::default()).unwrap();
        prop_assert!(updated.difficulty >= MIN_DIFFICULTY);
        prop_assert!(updated.difficulty <= MAX_DIFFICULTY);
    }

    #[test]
    fn lapse_from_stable_states_always_demotes_to_learning(
        stability in 1.0f64..500.0,
        quality in 0u8..3,
        mature in any::<bool>(),
    ) {
        let now = Utc::now();
        let mut record = MemoryRecord::unseen("learner-1", "item-1", now);
        record.state = if mature { RecordState::Mature } else { RecordState::Review };
        record.stability = stability;
        record.review_count = 5;

        let updated = apply(&record, Outcome::Graded { quality }, now, &SchedulerParams::default()).unwrap();
        prop_assert_eq!(updated.state, RecordState::Learning);
        prop_assert_eq!((updated.due_at - now).num_days(), 1);
    }
}

#[test]
fn selector_is_idempotent_for_a_fixed_as_of() {
    let now = Utc::now();
    let mut records = Vec::new();
    for (i, overdue) in [3i64, 1, 8, 1, 5].iter().enumerate() {
        let mut r = MemoryRecord::unseen("learner-1", &format!("item-{i}"), now);
        r.due_at = now - Duration::days(*overdue);
        r.difficulty = 1.0 + i as f64;
        records.push(r);
    }

    let first: Vec<String> = select_due(records.clone(), 10)
        .into_iter()
        .map(|r| r.item_id)
        .collect();
    let second: Vec<String> = select_due(records, 10)
        .into_iter()
        .map(|r| r.item_id)
        .collect();
    assert_eq!(first, second);
}

#[test]
fn repeated_successes_walk_new_to_mature() {
    let params = SchedulerParams::default();
    let mut now = Utc::now();
    let mut record = MemoryRecord::unseen("learner-1", "item-1", now);

    let mut states = vec![record.state];
    for _ in 0..12 {
        now = record.due_at + Duration::days(1);
        record = apply(&record, Outcome::Graded { quality: 5 }, now, &params).unwrap();
        states.push(record.state);
    }

    assert_eq!(record.state, RecordState::Mature);
    // Forward-only path: New, then Learning, then Review, then Mature.
    let mut dedup = states.clone();
    dedup.dedup();
    assert_eq!(
        dedup,
        vec![
            RecordState::New,
            RecordState::Learning,
            RecordState::Review,
            RecordState::Mature
        ]
    );
}
