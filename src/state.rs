use std::sync::Arc;
use std::time::Instant;

use crate::batch::BatchConfig;
use crate::config::SchedulerTuning;
use crate::session::SessionRegistry;
use crate::srs::SchedulerParams;
use crate::store::{RecordStore, VocabSource};

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    store: Arc<dyn RecordStore>,
    vocab: Arc<dyn VocabSource>,
    params: SchedulerParams,
    tuning: SchedulerTuning,
    batch_config: BatchConfig,
    sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        vocab: Arc<dyn VocabSource>,
        params: SchedulerParams,
        tuning: SchedulerTuning,
        batch_config: BatchConfig,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            store,
            vocab,
            params,
            tuning,
            batch_config,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub fn vocab(&self) -> Arc<dyn VocabSource> {
        Arc::clone(&self.vocab)
    }

    pub fn params(&self) -> &SchedulerParams {
        &self.params
    }

    pub fn tuning(&self) -> &SchedulerTuning {
        &self.tuning
    }

    pub fn batch_config(&self) -> BatchConfig {
        self.batch_config.clone()
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }
}
