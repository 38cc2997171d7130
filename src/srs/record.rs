use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::engine::EngineError;

pub const MIN_STABILITY: f64 = 0.01;
pub const MAX_STABILITY: f64 = 36500.0;
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Defaults for a record the learner has never reviewed.
pub const INITIAL_STABILITY: f64 = 0.5;
pub const INITIAL_DIFFICULTY: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    New,
    Learning,
    Review,
    Mature,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Learning => "learning",
            Self::Review => "review",
            Self::Mature => "mature",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "learning" => Some(Self::Learning),
            "review" => Some(Self::Review),
            "mature" => Some(Self::Mature),
            _ => None,
        }
    }
}

/// One learner's recall decision for one item. Casual surfaces (flashcards,
/// swipe, typing) report a binary signal; the formal review surface reports a
/// graded 0-5 quality. Both funnel through the same type so the update path
/// is written once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outcome {
    Graded { quality: u8 },
    Binary { retained: bool },
}

pub const QUALITY_MAX: u8 = 5;
pub const BINARY_RETAINED_QUALITY: u8 = 4;
pub const BINARY_LAPSED_QUALITY: u8 = 1;

impl Outcome {
    /// Resolves either variant to the canonical 0-5 quality the engine
    /// operates on.
    pub fn canonical_quality(&self) -> Result<u8, EngineError> {
        match self {
            Self::Graded { quality } => {
                if *quality > QUALITY_MAX {
                    Err(EngineError::InvalidOutcome(*quality))
                } else {
                    Ok(*quality)
                }
            }
            Self::Binary { retained: true } => Ok(BINARY_RETAINED_QUALITY),
            Self::Binary { retained: false } => Ok(BINARY_LAPSED_QUALITY),
        }
    }
}

/// Per (learner, item) memory model. Mutated only by the review update
/// engine; persisted only through the batching queue's flush step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub learner_id: String,
    pub item_id: String,
    pub stability: f64,
    pub difficulty: f64,
    pub state: RecordState,
    pub review_count: i64,
    pub consecutive_successes: i64,
    pub due_at: DateTime<Utc>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Sentinel record for an item on first exposure. Due immediately so the
    /// item enters the next due set.
    pub fn unseen(learner_id: &str, item_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            item_id: item_id.to_string(),
            stability: INITIAL_STABILITY,
            difficulty: INITIAL_DIFFICULTY,
            state: RecordState::New,
            review_count: 0,
            consecutive_successes: 0,
            due_at: now,
            last_reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Soft reset back to the unseen defaults. `review_count` is kept: the
    /// counter is monotonic and downstream idempotency keys off it.
    pub fn reset(&self, now: DateTime<Utc>) -> Self {
        Self {
            stability: INITIAL_STABILITY,
            difficulty: INITIAL_DIFFICULTY,
            state: RecordState::New,
            consecutive_successes: 0,
            due_at: now,
            last_reviewed_at: self.last_reviewed_at,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Detects parameters that would poison the forgetting-curve math. A
    /// corrupt record is auto-healed by the caller (treated as unseen).
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.stability.is_finite()
            || self.stability < MIN_STABILITY
            || self.stability > MAX_STABILITY
        {
            return Err(EngineError::CorruptRecord {
                item_id: self.item_id.clone(),
                reason: format!("stability {} out of range", self.stability),
            });
        }
        if !self.difficulty.is_finite()
            || self.difficulty < MIN_DIFFICULTY
            || self.difficulty > MAX_DIFFICULTY
        {
            return Err(EngineError::CorruptRecord {
                item_id: self.item_id.clone(),
                reason: format!("difficulty {} out of range", self.difficulty),
            });
        }
        if self.review_count < 0 {
            return Err(EngineError::CorruptRecord {
                item_id: self.item_id.clone(),
                reason: format!("negative review count {}", self.review_count),
            });
        }
        Ok(())
    }
}
