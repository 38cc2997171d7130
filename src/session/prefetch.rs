use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SchedulerTuning;
use crate::store::{StoreError, VocabSource};

use super::StudySession;

/// Tops the session queue up when the learner is close to draining it.
///
/// Fetches one page from the vocabulary source per invocation, appends the
/// deduplicated results (fresh-before-repeat ordering applied to the new
/// slice only), and stops once the session cap is reached or the source
/// reports exhaustion. Re-entrant calls while a fetch is in flight are
/// no-ops. Returns the number of items appended.
pub async fn ensure_supply(
    session: &Arc<StudySession>,
    source: &Arc<dyn VocabSource>,
    tuning: &SchedulerTuning,
) -> Result<usize, StoreError> {
    if session.remaining() > tuning.low_water_mark {
        return Ok(0);
    }
    if session.source_exhausted() || session.queue_len() >= session.session_cap() {
        return Ok(0);
    }
    if !session.try_begin_prefetch() {
        debug!(session_id = %session.id, "prefetch already in flight");
        return Ok(0);
    }

    let result = fetch_and_append(session, source, tuning).await;
    session.finish_prefetch();
    result
}

async fn fetch_and_append(
    session: &Arc<StudySession>,
    source: &Arc<dyn VocabSource>,
    tuning: &SchedulerTuning,
) -> Result<usize, StoreError> {
    let offset = session.prefetch_offset();
    let page = source
        .fetch_candidates(
            &session.learner_id,
            session.book_id.as_deref(),
            offset,
            tuning.prefetch_batch_size,
            None,
        )
        .await?;

    if page.is_empty() {
        session.mark_source_exhausted();
        debug!(session_id = %session.id, offset, "vocabulary source exhausted");
        return Ok(0);
    }

    session.advance_prefetch_offset(page.len() as i64);
    let candidates: Vec<String> = page.into_iter().map(|item| item.item_id).collect();
    let appended = session.append_candidates(candidates);
    if appended > 0 {
        info!(session_id = %session.id, appended, "prefetched session candidates");
    }
    Ok(appended)
}
