use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::srs::MemoryRecord;

use super::{RecordStore, StoreError, UpsertReport, VocabItem, VocabSource};

/// In-memory record store and vocabulary source. Backs tests and embedded
/// (no-database) runs. Carries fault-injection toggles so flush retry paths
/// can be exercised deterministically.
#[derive(Default)]
pub struct MemStore {
    records: RwLock<HashMap<(String, String), MemoryRecord>>,
    vocab: RwLock<Vec<VocabItem>>,
    /// Number of upcoming upsert calls to reject wholesale.
    fail_upserts: AtomicU32,
    /// Item ids to report as failed on the next upsert call.
    fail_items: RwLock<Vec<String>>,
    upsert_calls: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_vocab(&self, items: Vec<VocabItem>) {
        *self.vocab.write() = items;
    }

    pub fn insert_record(&self, record: MemoryRecord) {
        self.records.write().insert(
            (record.learner_id.clone(), record.item_id.clone()),
            record,
        );
    }

    /// Makes the next `n` upsert calls fail with `StoreError::Unavailable`.
    pub fn fail_next_upserts(&self, n: u32) {
        self.fail_upserts.store(n, Ordering::SeqCst);
    }

    /// Marks ids to be reported as failed (partial failure) on the next
    /// upsert call that contains them.
    pub fn fail_items_once(&self, ids: &[&str]) {
        *self.fail_items.write() = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl RecordStore for MemStore {
    async fn get_record(
        &self,
        learner_id: &str,
        item_id: &str,
    ) -> Result<Option<MemoryRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .get(&(learner_id.to_string(), item_id.to_string()))
            .cloned())
    }

    async fn due_records(
        &self,
        learner_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.learner_id == learner_id && r.due_at <= as_of)
            .cloned()
            .collect())
    }

    async fn learner_records(&self, learner_id: &str) -> Result<Vec<MemoryRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.learner_id == learner_id)
            .cloned()
            .collect())
    }

    async fn upsert_records(&self, records: &[MemoryRecord]) -> Result<UpsertReport, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let outstanding = self.fail_upserts.load(Ordering::SeqCst);
        if outstanding > 0 {
            self.fail_upserts.store(outstanding - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }

        let failing: Vec<String> = std::mem::take(&mut *self.fail_items.write());
        let mut report = UpsertReport::default();
        let mut map = self.records.write();
        for record in records {
            if failing.iter().any(|id| id == &record.item_id) {
                report.failed_ids.push(record.item_id.clone());
                continue;
            }
            let key = (record.learner_id.clone(), record.item_id.clone());
            match map.get(&key) {
                // Idempotency per (item_id, review_count): a replayed write
                // that does not advance the counter is a no-op success.
                Some(existing) if existing.review_count > record.review_count => {}
                _ => {
                    map.insert(key, record.clone());
                }
            }
            report.applied += 1;
        }
        Ok(report)
    }
}

#[async_trait]
impl VocabSource for MemStore {
    async fn fetch_candidates(
        &self,
        _learner_id: &str,
        book_id: Option<&str>,
        offset: i64,
        limit: i64,
        filter: Option<&str>,
    ) -> Result<Vec<VocabItem>, StoreError> {
        let vocab = self.vocab.read();
        let page = vocab
            .iter()
            .filter(|item| match book_id {
                Some(book) => item.book_id.as_deref() == Some(book),
                None => true,
            })
            .filter(|item| match filter {
                Some(prefix) => item.lemma.starts_with(prefix),
                None => true,
            })
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(id: &str, book: Option<&str>) -> VocabItem {
        VocabItem {
            item_id: id.to_string(),
            lemma: format!("lemma-{id}"),
            definition: None,
            book_id: book.map(|b| b.to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = MemStore::new();
        let record = MemoryRecord::unseen("learner-1", "item-1", Utc::now());
        let report = store.upsert_records(&[record.clone()]).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.applied, 1);

        let loaded = store.get_record("learner-1", "item-1").await.unwrap().unwrap();
        assert_eq!(loaded.item_id, record.item_id);
    }

    #[tokio::test]
    async fn stale_replay_does_not_regress_review_count() {
        let store = MemStore::new();
        let now = Utc::now();
        let mut fresh = MemoryRecord::unseen("learner-1", "item-1", now);
        fresh.review_count = 5;
        store.insert_record(fresh);

        let stale = MemoryRecord::unseen("learner-1", "item-1", now);
        store.upsert_records(&[stale]).await.unwrap();
        let kept = store.get_record("learner-1", "item-1").await.unwrap().unwrap();
        assert_eq!(kept.review_count, 5);
    }

    #[tokio::test]
    async fn injected_outage_fails_exactly_n_calls() {
        let store = MemStore::new();
        store.fail_next_upserts(1);
        let record = MemoryRecord::unseen("learner-1", "item-1", Utc::now());
        assert!(matches!(
            store.upsert_records(std::slice::from_ref(&record)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.upsert_records(&[record]).await.is_ok());
        assert_eq!(store.upsert_calls(), 2);
    }

    #[tokio::test]
    async fn vocab_paging_filters_by_book() {
        let store = MemStore::new();
        store.seed_vocab(vec![
            vocab("1", Some("book-a")),
            vocab("2", Some("book-b")),
            vocab("3", Some("book-a")),
        ]);
        let page = store
            .fetch_candidates("learner-1", Some("book-a"), 0, 10, None)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        let empty = store
            .fetch_candidates("learner-1", Some("book-a"), 2, 10, None)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
