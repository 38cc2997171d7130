pub mod prefetch;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::UpdateBatchQueue;
use crate::srs::Outcome;

/// Bounded cross-session history of item ids, oldest evicted first. Supplied
/// by the client (it persists the list device-side) and used only to bias
/// ordering, never for correctness.
#[derive(Debug, Clone)]
pub struct RecentlySeen {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl RecentlySeen {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    pub fn from_history(capacity: usize, history: Vec<String>) -> Self {
        let mut seen = Self::new(capacity);
        for id in history {
            seen.record(&id);
        }
        seen
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.members.contains(item_id)
    }

    /// Appends `item_id` as most recent; an existing entry is refreshed
    /// rather than duplicated.
    pub fn record(&mut self, item_id: &str) {
        if self.members.contains(item_id) {
            self.order.retain(|id| id != item_id);
        } else {
            self.members.insert(item_id.to_string());
        }
        self.order.push_back(item_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}

/// Builds a session queue from a candidate pool: dedupe by id (first wins),
/// items not seen recently before repeats (each half keeping its input
/// order), truncated to the session cap.
pub fn compose(pool: Vec<String>, recently_seen: &RecentlySeen, session_cap: usize) -> Vec<String> {
    let mut ordered = order_fresh_first(pool, recently_seen, &HashSet::new());
    ordered.truncate(session_cap);
    ordered
}

/// Fresh-before-repeat ordering of `pool`, excluding any id in `taken`.
/// Shared by the composer and the prefetch append path (which must only
/// reorder the appended slice).
fn order_fresh_first(
    pool: Vec<String>,
    recently_seen: &RecentlySeen,
    taken: &HashSet<String>,
) -> Vec<String> {
    let mut dedupe: HashSet<String> = HashSet::new();
    let mut fresh = Vec::new();
    let mut repeats = Vec::new();
    for id in pool {
        if taken.contains(&id) || !dedupe.insert(id.clone()) {
            continue;
        }
        if recently_seen.contains(&id) {
            repeats.push(id);
        } else {
            fresh.push(id);
        }
    }
    fresh.append(&mut repeats);
    fresh
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub learner_id: String,
    pub book_id: Option<String>,
    pub queue: Vec<String>,
    pub cursor: usize,
    pub remaining: usize,
    pub source_exhausted: bool,
    pub pending_flush: usize,
    pub flush_degraded: bool,
    pub seen_history: Vec<String>,
    pub created_at: DateTime<Utc>,
}

struct SessionInner {
    queue: Vec<String>,
    cursor: usize,
    recently_seen: RecentlySeen,
    prefetch_offset: i64,
    source_exhausted: bool,
    last_touched: Instant,
}

/// One learner's live study session: the ordered queue, its cursor, the
/// recency history, and the session's own update batching queue. Created on
/// session start, torn down (with a forced flush) on session end. Replaces
/// what would otherwise be scattered module-level mutable state.
pub struct StudySession {
    pub id: Uuid,
    pub learner_id: String,
    pub book_id: Option<String>,
    created_at: DateTime<Utc>,
    session_cap: usize,
    inner: Mutex<SessionInner>,
    batch: Arc<UpdateBatchQueue>,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    prefetch_busy: AtomicBool,
}

impl StudySession {
    pub fn new(
        learner_id: &str,
        book_id: Option<String>,
        pool: Vec<String>,
        recently_seen: RecentlySeen,
        session_cap: usize,
        batch: Arc<UpdateBatchQueue>,
    ) -> Self {
        let queue = compose(pool, &recently_seen, session_cap);
        let flush_task = batch.start();
        Self {
            id: Uuid::new_v4(),
            learner_id: learner_id.to_string(),
            book_id,
            created_at: Utc::now(),
            session_cap,
            inner: Mutex::new(SessionInner {
                prefetch_offset: queue.len() as i64,
                queue,
                cursor: 0,
                recently_seen,
                source_exhausted: false,
                last_touched: Instant::now(),
            }),
            batch,
            flush_task: Mutex::new(Some(flush_task)),
            prefetch_busy: AtomicBool::new(false),
        }
    }

    pub fn batch(&self) -> &Arc<UpdateBatchQueue> {
        &self.batch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut inner = self.inner.lock();
        inner.last_touched = Instant::now();
        SessionSnapshot {
            session_id: self.id,
            learner_id: self.learner_id.clone(),
            book_id: self.book_id.clone(),
            queue: inner.queue.clone(),
            cursor: inner.cursor,
            remaining: inner.queue.len() - inner.cursor,
            source_exhausted: inner.source_exhausted,
            pending_flush: self.batch.pending_len(),
            flush_degraded: self.batch.is_degraded(),
            seen_history: inner.recently_seen.to_vec(),
            created_at: self.created_at,
        }
    }

    /// Optimistic outcome intake: records recency, advances the cursor past
    /// the acted-on head, and enqueues the outcome for batched persistence.
    /// Always succeeds locally; returns the number of unconsumed items.
    pub fn submit_outcome(&self, item_id: &str, outcome: Outcome) -> usize {
        let remaining = {
            let mut inner = self.inner.lock();
            inner.last_touched = Instant::now();
            inner.recently_seen.record(item_id);
            if inner.queue.get(inner.cursor).map(String::as_str) == Some(item_id) {
                inner.cursor += 1;
            } else if let Some(pos) = inner.queue[inner.cursor..]
                .iter()
                .position(|id| id == item_id)
            {
                // Out-of-order action (surfaces allow jumping around):
                // consume the item where it sits.
                let idx = inner.cursor + pos;
                inner.queue.remove(idx);
            }
            inner.queue.len() - inner.cursor
        };
        self.batch.enqueue(item_id, outcome);
        remaining
    }

    pub fn remaining(&self) -> usize {
        let inner = self.inner.lock();
        inner.queue.len() - inner.cursor
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn session_cap(&self) -> usize {
        self.session_cap
    }

    pub fn prefetch_offset(&self) -> i64 {
        self.inner.lock().prefetch_offset
    }

    pub fn advance_prefetch_offset(&self, by: i64) {
        self.inner.lock().prefetch_offset += by;
    }

    pub fn source_exhausted(&self) -> bool {
        self.inner.lock().source_exhausted
    }

    pub fn mark_source_exhausted(&self) {
        self.inner.lock().source_exhausted = true;
    }

    /// Appends new candidates, ordering only the appended slice fresh-first.
    /// Ids already queued are dropped; the visible queue is never reordered.
    pub fn append_candidates(&self, candidates: Vec<String>) -> usize {
        let mut inner = self.inner.lock();
        let taken: HashSet<String> = inner.queue.iter().cloned().collect();
        let mut slice = order_fresh_first(candidates, &inner.recently_seen, &taken);
        let room = self.session_cap.saturating_sub(inner.queue.len());
        slice.truncate(room);
        let appended = slice.len();
        inner.queue.extend(slice);
        appended
    }

    pub fn idle_for(&self) -> Duration {
        self.inner.lock().last_touched.elapsed()
    }

    /// Single-flight guard for prefetch; `finish_prefetch` must be called
    /// when the in-flight request completes.
    pub fn try_begin_prefetch(&self) -> bool {
        self.prefetch_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_prefetch(&self) {
        self.prefetch_busy.store(false, Ordering::Release);
    }

    /// Tears the session down: stops the flush loop after a forced flush.
    pub async fn end(&self) {
        self.batch.shutdown().await;
        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(session_id = %self.id, error = %e, "flush task join failed");
            }
        }
    }
}

/// Live sessions by id. Owns the idle sweeper that force-flushes and evicts
/// abandoned sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<StudySession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<StudySession>) {
        self.sessions.write().await.insert(session.id, session);
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<StudySession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<StudySession>> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Flushes and drops every live session. Called on process shutdown so
    /// acknowledged outcomes never die with the process.
    pub async fn shutdown_all(&self) {
        let drained: Vec<Arc<StudySession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.end().await;
        }
    }

    /// Periodically evicts sessions idle past `idle_timeout`, forcing their
    /// flush first (the "session went to background" opportunistic flush).
    pub fn start_sweeper(
        self: Arc<Self>,
        idle_timeout: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let tick = idle_timeout.min(Duration::from_secs(30)).max(Duration::from_millis(100));
            loop {
                tokio::time::sleep(tick).await;
                let idle_ids: Vec<Uuid> = {
                    let sessions = self.sessions.read().await;
                    sessions
                        .values()
                        .filter(|s| s.idle_for() >= idle_timeout)
                        .map(|s| s.id)
                        .collect()
                };
                for id in idle_ids {
                    if let Some(session) = self.remove(id).await {
                        session.end().await;
                        let unflushed = session.batch().pending_len();
                        if unflushed > 0 {
                            // Acknowledged outcomes are never dropped: keep
                            // the session registered and retry next sweep.
                            warn!(
                                session_id = %id,
                                pending = unflushed,
                                "final flush incomplete, keeping idle session"
                            );
                            self.insert(session).await;
                        } else {
                            info!(session_id = %id, "evicted idle session after forced flush");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fresh_items_come_before_repeats_in_input_order() {
        let seen = RecentlySeen::from_history(10, ids(&["2", "4"]));
        let queue = compose(ids(&["1", "2", "3", "4", "5"]), &seen, 10);
        assert_eq!(queue, ids(&["1", "3", "5", "2", "4"]));
    }

    #[test]
    fn compose_dedupes_first_occurrence_wins() {
        let seen = RecentlySeen::new(10);
        let queue = compose(ids(&["1", "2", "1", "3", "2"]), &seen, 10);
        assert_eq!(queue, ids(&["1", "2", "3"]));
    }

    #[test]
    fn compose_truncates_to_session_cap() {
        let seen = RecentlySeen::from_history(10, ids(&["1"]));
        let queue = compose(ids(&["1", "2", "3", "4"]), &seen, 2);
        assert_eq!(queue, ids(&["2", "3"]));
    }

    #[test]
    fn recently_seen_evicts_oldest_beyond_capacity() {
        let mut seen = RecentlySeen::new(3);
        for id in ["a", "b", "c", "d"] {
            seen.record(id);
        }
        assert_eq!(seen.to_vec(), ids(&["b", "c", "d"]));
        assert!(!seen.contains("a"));

        seen.record("b");
        assert_eq!(seen.to_vec(), ids(&["c", "d", "b"]), "refresh moves to back");
    }

    fn test_session(pool: &[&str]) -> StudySession {
        let store = Arc::new(crate::store::MemStore::new());
        let batch = Arc::new(UpdateBatchQueue::new(
            "learner-1",
            store as Arc<dyn crate::store::RecordStore>,
            crate::srs::SchedulerParams::default(),
            crate::batch::BatchConfig::default(),
        ));
        StudySession::new("learner-1", None, ids(pool), RecentlySeen::new(10), 10, batch)
    }

    #[tokio::test]
    async fn submitting_head_outcome_advances_cursor() {
        let session = test_session(&["1", "2", "3"]);
        let remaining = session.submit_outcome("1", Outcome::Binary { retained: true });
        assert_eq!(remaining, 2);
        assert_eq!(session.batch().pending_len(), 1);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.cursor, 1);
        assert_eq!(snapshot.seen_history, ids(&["1"]));
        session.end().await;
    }

    #[tokio::test]
    async fn out_of_order_outcome_consumes_item_in_place() {
        let session = test_session(&["1", "2", "3"]);
        let remaining = session.submit_outcome("2", Outcome::Binary { retained: true });
        assert_eq!(remaining, 2);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.queue, ids(&["1", "3"]), "acted-on item is removed");
        assert_eq!(snapshot.cursor, 0, "head stays pending");
        assert_eq!(session.batch().pending_len(), 1);
        session.end().await;
    }

    #[tokio::test]
    async fn append_candidates_never_reorders_visible_queue() {
        let session = test_session(&["1", "2"]);
        session.submit_outcome("1", Outcome::Binary { retained: true });

        // "2" and the consumed "1" are already queued; only "9" is new.
        let appended = session.append_candidates(ids(&["2", "1", "9"]));
        assert_eq!(appended, 1);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.queue, ids(&["1", "2", "9"]));
        session.end().await;
    }

    #[tokio::test]
    async fn append_respects_session_cap() {
        let session = test_session(&["1", "2"]);
        let mut extra = Vec::new();
        for i in 0..20 {
            extra.push(format!("x{i}"));
        }
        let appended = session.append_candidates(extra);
        assert_eq!(appended, 8);
        assert_eq!(session.queue_len(), 10);
        session.end().await;
    }
}
