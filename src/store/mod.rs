pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::srs::MemoryRecord;

pub use memory::MemStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Result of a batch upsert. `failed_ids` non-empty means a partial failure:
/// the applied records must not be retried, the failed ones must be.
#[derive(Debug, Default)]
pub struct UpsertReport {
    pub applied: usize,
    pub failed_ids: Vec<String>,
}

impl UpsertReport {
    pub fn is_complete(&self) -> bool {
        self.failed_ids.is_empty()
    }
}

/// The memory record store. The only durable shared resource in the
/// scheduler; written exclusively with engine output via the batching
/// queue's flush step (and the synchronous formal-review path).
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(
        &self,
        learner_id: &str,
        item_id: &str,
    ) -> Result<Option<MemoryRecord>, StoreError>;

    /// All records with `due_at <= as_of`, unordered. Ordering policy lives
    /// in `srs::selector`.
    async fn due_records(
        &self,
        learner_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>, StoreError>;

    async fn learner_records(&self, learner_id: &str) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Idempotent per (item_id, review_count): replaying a partially-applied
    /// batch never double-advances a record.
    async fn upsert_records(&self, records: &[MemoryRecord]) -> Result<UpsertReport, StoreError>;
}

/// Candidate descriptor handed over by the ingestion/dictionary collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabItem {
    pub item_id: String,
    pub lemma: String,
    pub definition: Option<String>,
    pub book_id: Option<String>,
}

/// Seam to the external vocabulary source. Used only by session bootstrap and
/// the prefetch controller; an empty page signals exhaustion.
#[async_trait]
pub trait VocabSource: Send + Sync {
    async fn fetch_candidates(
        &self,
        learner_id: &str,
        book_id: Option<&str>,
        offset: i64,
        limit: i64,
        filter: Option<&str>,
    ) -> Result<Vec<VocabItem>, StoreError>;
}
