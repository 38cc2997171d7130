#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;

use lexikon_srs::batch::BatchConfig;
use lexikon_srs::config::SchedulerTuning;
use lexikon_srs::srs::SchedulerParams;
use lexikon_srs::state::AppState;
use lexikon_srs::store::{MemStore, RecordStore, VocabItem, VocabSource};

pub fn test_state() -> (AppState, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let state = AppState::new(
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::clone(&store) as Arc<dyn VocabSource>,
        SchedulerParams::default(),
        SchedulerTuning {
            session_cap: 20,
            low_water_mark: 2,
            prefetch_batch_size: 5,
            seen_history_limit: 50,
            session_idle_timeout: std::time::Duration::from_secs(300),
        },
        BatchConfig {
            // Large thresholds so tests drive flushes explicitly.
            flush_threshold: 100,
            flush_interval: std::time::Duration::from_secs(60),
            flush_batch_cap: 50,
            retry_budget: 3,
        },
    );
    (state, store)
}

pub fn create_test_app() -> (Router, Arc<MemStore>) {
    let (state, store) = test_state();
    (lexikon_srs::create_app(state), store)
}

pub fn vocab_item(id: &str, book: Option<&str>) -> VocabItem {
    VocabItem {
        item_id: id.to_string(),
        lemma: format!("lemma-{id}"),
        definition: None,
        book_id: book.map(|b| b.to_string()),
    }
}
