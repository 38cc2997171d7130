use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::srs::{self, MemoryRecord, Outcome, SchedulerParams};
use crate::store::RecordStore;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Pending count that triggers an immediate flush.
    pub flush_threshold: usize,
    /// Maximum age of the oldest pending outcome before a flush fires.
    pub flush_interval: Duration,
    /// Hard cap on outcomes drained per flush; the rest stays queued.
    pub flush_batch_cap: usize,
    /// Consecutive failed flushes before the queue reports itself degraded.
    pub retry_budget: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 8,
            flush_interval: Duration::from_secs(3),
            flush_batch_cap: 50,
            retry_budget: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    item_id: String,
    enqueued_at: Instant,
    outcome: Outcome,
}

/// Insertion-ordered pending set with per-item coalescing: one slot per item
/// id, last outcome wins, queue position and age stay with the first enqueue.
#[derive(Default)]
struct Pending {
    order: VecDeque<(String, Instant)>,
    outcomes: HashMap<String, Outcome>,
}

impl Pending {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn enqueue(&mut self, item_id: &str, outcome: Outcome) {
        if self.outcomes.insert(item_id.to_string(), outcome).is_none() {
            self.order.push_back((item_id.to_string(), Instant::now()));
        }
    }

    fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.order.front().map(|(_, at)| *at)
    }

    fn drain(&mut self, cap: usize) -> Vec<PendingEntry> {
        let take = self.order.len().min(cap);
        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            let Some((item_id, enqueued_at)) = self.order.pop_front() else {
                break;
            };
            let Some(outcome) = self.outcomes.remove(&item_id) else {
                continue;
            };
            batch.push(PendingEntry {
                item_id,
                enqueued_at,
                outcome,
            });
        }
        batch
    }

    /// Puts failed entries back at the head in their original order. An item
    /// re-enqueued while the flush was in flight already carries a newer
    /// outcome and keeps it.
    fn requeue_front(&mut self, entries: Vec<PendingEntry>) {
        for entry in entries.into_iter().rev() {
            if !self.outcomes.contains_key(&entry.item_id) {
                self.outcomes.insert(entry.item_id.clone(), entry.outcome);
                self.order.push_front((entry.item_id, entry.enqueued_at));
            }
        }
    }
}

enum FlushOutcome {
    Idle,
    Flushed(usize),
    Failed,
}

/// Local queue of pending outcome events for one learner session.
///
/// `enqueue` is non-blocking and always succeeds; a background task flushes
/// coalesced outcomes through the review update engine into the record store
/// on a size-or-time trigger. Only one flush is ever in flight; a trigger
/// that finds a flush outstanding is a no-op and the accumulated items are
/// picked up by the next cycle. A failed flush re-queues the failed items at
/// the front, so no acknowledged outcome is silently dropped.
pub struct UpdateBatchQueue {
    learner_id: String,
    config: BatchConfig,
    params: SchedulerParams,
    store: Arc<dyn RecordStore>,
    pending: Mutex<Pending>,
    wakeup: Notify,
    flush_gate: tokio::sync::Mutex<()>,
    shutdown_tx: broadcast::Sender<()>,
    /// Set after a failed flush: the background loop holds off until this
    /// instant, so a down store is retried once per interval, not spun on.
    retry_not_before: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    degraded: AtomicBool,
}

impl UpdateBatchQueue {
    pub fn new(
        learner_id: &str,
        store: Arc<dyn RecordStore>,
        params: SchedulerParams,
        config: BatchConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            learner_id: learner_id.to_string(),
            config,
            params,
            store,
            pending: Mutex::new(Pending::default()),
            wakeup: Notify::new(),
            flush_gate: tokio::sync::Mutex::new(()),
            shutdown_tx,
            retry_not_before: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// Spawns the background flush loop. Runs until `shutdown` is called and
    /// performs a final forced flush on the way out.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let deadline = queue.next_deadline();
                tokio::select! {
                    _ = queue.wakeup.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shutdown_rx.recv() => break,
                }
                if queue.should_flush() {
                    queue.try_flush().await;
                }
            }
            queue.flush_now().await;
            debug!(learner_id = %queue.learner_id, "update batch queue stopped");
        })
    }

    /// Records an outcome. Never blocks, never fails locally; duplicate ids
    /// coalesce to the latest outcome.
    pub fn enqueue(&self, item_id: &str, outcome: Outcome) {
        let should_wake = {
            let mut pending = self.pending.lock();
            pending.enqueue(item_id, outcome);
            pending.len() >= self.config.flush_threshold
        };
        if should_wake {
            self.wakeup.notify_one();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True once the retry budget has been exhausted by consecutive flush
    /// failures. Cleared by the next fully successful flush. Informational:
    /// surfaced as a non-blocking notification, never an error.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Forced drain: flushes until the queue is empty or a flush fails.
    /// Called at session teardown and process shutdown.
    pub async fn flush_now(&self) {
        let _gate = self.flush_gate.lock().await;
        loop {
            match self.flush_batch().await {
                FlushOutcome::Flushed(_) if self.pending_len() > 0 => continue,
                _ => break,
            }
        }
    }

    /// Signals the background task to stop, then drains whatever it can.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.flush_now().await;
    }

    fn next_deadline(&self) -> tokio::time::Instant {
        let due = self
            .pending
            .lock()
            .oldest_enqueued_at()
            .map(|oldest| oldest + self.config.flush_interval)
            .unwrap_or_else(|| Instant::now() + self.config.flush_interval);
        // Requeued entries keep their original age, so after a failure the
        // age-based deadline is already in the past; the hold-off wins.
        let at = match *self.retry_not_before.lock() {
            Some(not_before) => due.max(not_before),
            None => due,
        };
        tokio::time::Instant::from_std(at)
    }

    fn should_flush(&self) -> bool {
        if let Some(not_before) = *self.retry_not_before.lock() {
            if Instant::now() < not_before {
                return false;
            }
        }
        let pending = self.pending.lock();
        if pending.len() == 0 {
            return false;
        }
        if pending.len() >= self.config.flush_threshold {
            return true;
        }
        pending
            .oldest_enqueued_at()
            .map(|oldest| oldest.elapsed() >= self.config.flush_interval)
            .unwrap_or(false)
    }

    /// Flush unless one is already in flight, in which case this trigger is
    /// a no-op.
    async fn try_flush(&self) {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            debug!(learner_id = %self.learner_id, "flush already in flight, skipping trigger");
            return;
        };
        self.flush_batch().await;
    }

    async fn flush_batch(&self) -> FlushOutcome {
        let batch = self.pending.lock().drain(self.config.flush_batch_cap);
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let started = Instant::now();
        let now = Utc::now();
        let mut updates: Vec<MemoryRecord> = Vec::with_capacity(batch.len());

        for entry in &batch {
            let current = match self.store.get_record(&self.learner_id, &entry.item_id).await {
                Ok(Some(record)) => record,
                Ok(None) => MemoryRecord::unseen(&self.learner_id, &entry.item_id, now),
                Err(e) => {
                    warn!(learner_id = %self.learner_id, error = %e, "record load failed, re-queueing batch");
                    self.pending.lock().requeue_front(batch.clone());
                    self.record_failure();
                    return FlushOutcome::Failed;
                }
            };
            match srs::apply_healed(&current, entry.outcome, now, &self.params) {
                Ok(updated) => updates.push(updated),
                Err(e) => {
                    // Outcomes are validated at the submission boundary, so
                    // this only fires on a logic regression.
                    warn!(item_id = %entry.item_id, error = %e, "dropping unappliable outcome");
                }
            }
        }

        match self.store.upsert_records(&updates).await {
            Err(e) => {
                warn!(learner_id = %self.learner_id, error = %e, batch = batch.len(), "flush failed, re-queueing batch");
                self.pending.lock().requeue_front(batch);
                self.record_failure();
                FlushOutcome::Failed
            }
            Ok(report) if report.is_complete() => {
                self.record_success();
                info!(
                    learner_id = %self.learner_id,
                    applied = report.applied,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "flushed outcome batch"
                );
                FlushOutcome::Flushed(report.applied)
            }
            Ok(report) => {
                let failed: Vec<PendingEntry> = batch
                    .into_iter()
                    .filter(|entry| report.failed_ids.contains(&entry.item_id))
                    .collect();
                warn!(
                    learner_id = %self.learner_id,
                    applied = report.applied,
                    failed = failed.len(),
                    "partial flush, re-queueing failed items"
                );
                self.pending.lock().requeue_front(failed);
                self.record_failure();
                FlushOutcome::Failed
            }
        }
    }

    fn record_failure(&self) {
        *self.retry_not_before.lock() = Some(Instant::now() + self.config.flush_interval);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.retry_budget && !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                learner_id = %self.learner_id,
                failures,
                "flush retry budget exhausted, queue degraded"
            );
        }
    }

    fn record_success(&self) {
        *self.retry_not_before.lock() = None;
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.degraded.store(false, Ordering::Relaxed);
    }
}
