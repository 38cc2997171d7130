use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::record::{
    MemoryRecord, RecordState, MAX_DIFFICULTY, MAX_STABILITY, MIN_DIFFICULTY, MIN_STABILITY,
};
use super::Outcome;

/// Forgetting-curve shape shared with the retrievability formula:
/// R(t) = (1 + FACTOR * t / S)^DECAY, calibrated so that t = S at R = 0.9.
const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;

pub const PASS_THRESHOLD: u8 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerParams {
    /// Fraction of reviews the schedule aims to land as successful recalls.
    pub desired_retention: f64,
    /// Difficulty drift per quality step above pass on success.
    pub difficulty_step: f64,
    /// Difficulty bump applied on a lapse.
    pub lapse_difficulty_step: f64,
    /// Multiplier applied to stability on a lapse; < 1 by contract.
    pub lapse_factor: f64,
    /// Stability above which a Learning item is considered stabilized.
    pub learning_threshold: f64,
    /// Interval (days) beyond which a Review item graduates to Mature.
    pub mature_interval_days: i64,
    /// Fixed short interval after a lapse out of Review/Mature.
    pub relearn_interval_days: i64,
    pub max_interval_days: i64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            desired_retention: 0.9,
            difficulty_step: 0.8,
            lapse_difficulty_step: 1.0,
            lapse_factor: 0.5,
            learning_threshold: 3.0,
            mature_interval_days: 21,
            relearn_interval_days: 1,
            max_interval_days: 36500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid outcome: quality {0} outside 0-5")]
    InvalidOutcome(u8),
    #[error("corrupt record for item {item_id}: {reason}")]
    CorruptRecord { item_id: String, reason: String },
}

/// Probability of recall after `elapsed_days` given current stability.
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    let safe_elapsed = elapsed_days.max(0.0);
    (1.0 + FACTOR * safe_elapsed / stability).powf(DECAY)
}

/// Maps (current record, outcome) to the updated record. Pure: no I/O, no
/// clock reads beyond the `now` the caller supplies. Persistence is the
/// caller's problem.
pub fn apply(
    record: &MemoryRecord,
    outcome: Outcome,
    now: DateTime<Utc>,
    params: &SchedulerParams,
) -> Result<MemoryRecord, EngineError> {
    record.validate()?;
    let quality = outcome.canonical_quality()?;
    let success = quality >= PASS_THRESHOLD;

    let (difficulty, stability, consecutive) = if success {
        let d = (record.difficulty
            - params.difficulty_step * f64::from(quality - PASS_THRESHOLD))
        .clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        let s = (record.stability * growth(d, quality)).clamp(MIN_STABILITY, MAX_STABILITY);
        (d, s, record.consecutive_successes + 1)
    } else {
        let d = (record.difficulty + params.lapse_difficulty_step)
            .clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        let s = (record.stability * params.lapse_factor).clamp(MIN_STABILITY, MAX_STABILITY);
        (d, s, 0)
    };

    let lapsed_from_stable =
        !success && matches!(record.state, RecordState::Review | RecordState::Mature);
    let interval_days = if lapsed_from_stable {
        params.relearn_interval_days
    } else {
        interval_for(stability, params.desired_retention, params.max_interval_days)
    };

    let state = next_state(record.state, success, consecutive, stability, interval_days, params);

    Ok(MemoryRecord {
        stability,
        difficulty,
        state,
        review_count: record.review_count + 1,
        consecutive_successes: consecutive,
        due_at: now + Duration::days(interval_days),
        last_reviewed_at: Some(now),
        updated_at: now,
        ..record.clone()
    })
}

/// `apply` with the auto-heal contract: a corrupt record is reset to the
/// unseen defaults and the outcome applied to the healed record. Logged so a
/// corruption source can be chased down; never surfaced to the learner.
pub fn apply_healed(
    record: &MemoryRecord,
    outcome: Outcome,
    now: DateTime<Utc>,
    params: &SchedulerParams,
) -> Result<MemoryRecord, EngineError> {
    match apply(record, outcome, now, params) {
        Err(EngineError::CorruptRecord { item_id, reason }) => {
            tracing::warn!(item_id = %item_id, reason = %reason, "corrupt memory record, resetting to defaults");
            apply(&record.reset(now), outcome, now, params)
        }
        other => other,
    }
}

/// Stability multiplier on successful recall: above 1, rising with quality,
/// falling with difficulty.
fn growth(difficulty: f64, quality: u8) -> f64 {
    let quality_lift = f64::from(quality.saturating_sub(PASS_THRESHOLD - 1));
    1.0 + 0.4 * quality_lift * (11.0 - difficulty) / 10.0
}

/// Interval in whole days that lands retrievability at the desired retention.
fn interval_for(stability: f64, desired_retention: f64, max_interval_days: i64) -> i64 {
    let safe_retention = desired_retention.clamp(0.0001, 0.9999);
    let interval = stability / FACTOR * (safe_retention.powf(1.0 / DECAY) - 1.0);
    (interval.round() as i64).clamp(1, max_interval_days)
}

fn next_state(
    current: RecordState,
    success: bool,
    consecutive: i64,
    stability: f64,
    interval_days: i64,
    params: &SchedulerParams,
) -> RecordState {
    let next = match (current, success) {
        (RecordState::New, _) => RecordState::Learning,
        (RecordState::Learning, false) => RecordState::Learning,
        (RecordState::Learning, true) => {
            if consecutive >= 2 || stability > params.learning_threshold {
                RecordState::Review
            } else {
                RecordState::Learning
            }
        }
        (RecordState::Review | RecordState::Mature, false) => RecordState::Learning,
        (state, true) => state,
    };

    if next == RecordState::Review && interval_days > params.mature_interval_days {
        RecordState::Mature
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srs::record::{INITIAL_DIFFICULTY, INITIAL_STABILITY};

    fn params() -> SchedulerParams {
        SchedulerParams::default()
    }

    #[test]
    fn first_review_good_quality_enters_learning() {
        let now = Utc::now();
        let record = MemoryRecord::unseen("learner-1", "item-1", now);
        let updated = apply(&record, Outcome::Graded { quality: 4 }, now, &params()).unwrap();

        assert_eq!(updated.state, RecordState::Learning);
        assert_eq!(updated.review_count, 1);
        assert!(updated.stability > record.stability);
        assert!(updated.difficulty < record.difficulty);
        let days_out = (updated.due_at - now).num_days();
        assert!((1..=3).contains(&days_out), "due {days_out} days out");
        assert_eq!(updated.last_reviewed_at, Some(now));
    }

    #[test]
    fn lapse_from_review_demotes_and_forces_next_day() {
        let now = Utc::now();
        let mut record = MemoryRecord::unseen("learner-1", "item-1", now);
        record.state = RecordState::Review;
        record.stability = 20.0;
        record.consecutive_successes = 4;
        record.review_count = 6;

        let updated = apply(&record, Outcome::Graded { quality: 1 }, now, &params()).unwrap();
        assert_eq!(updated.state, RecordState::Learning);
        assert_eq!((updated.due_at - now).num_days(), 1);
        assert!(updated.difficulty > record.difficulty);
        assert!(updated.stability < record.stability);
        assert_eq!(updated.consecutive_successes, 0);
    }

    #[test]
    fn two_consecutive_successes_promote_learning_to_review() {
        let now = Utc::now();
        let mut record = MemoryRecord::unseen("learner-1", "item-1", now);
        record.state = RecordState::Learning;
        record.review_count = 1;
        record.consecutive_successes = 1;

        let updated = apply(&record, Outcome::Graded { quality: 3 }, now, &params()).unwrap();
        assert_eq!(updated.state, RecordState::Review);
        assert_eq!(updated.consecutive_successes, 2);
    }

    #[test]
    fn long_interval_promotes_review_to_mature() {
        let now = Utc::now();
        let mut record = MemoryRecord::unseen("learner-1", "item-1", now);
        record.state = RecordState::Review;
        record.stability = 25.0;
        record.consecutive_successes = 3;
        record.review_count = 8;

        let updated = apply(&record, Outcome::Graded { quality: 4 }, now, &params()).unwrap();
        assert_eq!(updated.state, RecordState::Mature);
        assert!((updated.due_at - now).num_days() > 21);
    }

    #[test]
    fn binary_outcomes_drive_the_same_math() {
        let now = Utc::now();
        let record = MemoryRecord::unseen("learner-1", "item-1", now);

        let retained =
            apply(&record, Outcome::Binary { retained: true }, now, &params()).unwrap();
        let graded = apply(&record, Outcome::Graded { quality: 4 }, now, &params()).unwrap();
        assert_eq!(retained.stability, graded.stability);
        assert_eq!(retained.difficulty, graded.difficulty);

        let lapsed =
            apply(&record, Outcome::Binary { retained: false }, now, &params()).unwrap();
        assert!(lapsed.stability < record.stability);
    }

    #[test]
    fn invalid_quality_is_rejected_without_mutation() {
        let now = Utc::now();
        let record = MemoryRecord::unseen("learner-1", "item-1", now);
        let err = apply(&record, Outcome::Graded { quality: 9 }, now, &params()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOutcome(9)));
    }

    #[test]
    fn corrupt_record_is_healed_and_applied() {
        let now = Utc::now();
        let mut record = MemoryRecord::unseen("learner-1", "item-1", now);
        record.stability = f64::INFINITY;
        record.review_count = 3;

        assert!(matches!(
            apply(&record, Outcome::Graded { quality: 4 }, now, &params()),
            Err(EngineError::CorruptRecord { .. })
        ));

        let healed = apply_healed(&record, Outcome::Graded { quality: 4 }, now, &params()).unwrap();
        assert_eq!(healed.review_count, 4);
        assert!(healed.stability > INITIAL_STABILITY);
        assert!(healed.difficulty < INITIAL_DIFFICULTY);
    }

    #[test]
    fn retrievability_decays_from_one() {
        let r_0 = retrievability(10.0, 0.0);
        let r_5 = retrievability(10.0, 5.0);
        let r_10 = retrievability(10.0, 10.0);
        assert!((r_0 - 1.0).abs() < 1e-9);
        assert!(r_0 > r_5 && r_5 > r_10);
    }

    #[test]
    fn interval_matches_stability_at_default_retention() {
        // The curve is calibrated so a 0.9 retention target schedules at
        // exactly the stability.
        assert_eq!(interval_for(10.0, 0.9, 36500), 10);
        assert_eq!(interval_for(0.2, 0.9, 36500), 1);
    }
}
