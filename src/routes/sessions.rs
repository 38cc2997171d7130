use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::batch::UpdateBatchQueue;
use crate::response::{json_ok, AppError};
use crate::session::{prefetch, RecentlySeen, StudySession};
use crate::srs::{select_due, Outcome};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    learner_id: String,
    book_id: Option<String>,
    /// Client-persisted recency history, oldest first.
    #[serde(default)]
    seen_history: Vec<String>,
}

/// Starts a study session: builds the initial queue (a book's vocabulary, or
/// the learner's due set), wires up the session's batching queue, and
/// registers the session.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Response {
    if payload.learner_id.trim().is_empty() {
        return AppError::validation("learnerId must not be empty").into_response();
    }

    let tuning = state.tuning().clone();
    let pool: Vec<String> = if let Some(ref book_id) = payload.book_id {
        let page = match state
            .vocab()
            .fetch_candidates(
                &payload.learner_id,
                Some(book_id),
                0,
                tuning.session_cap as i64,
                None,
            )
            .await
        {
            Ok(page) => page,
            Err(err) => return AppError::from(err).into_response(),
        };
        page.into_iter().map(|item| item.item_id).collect()
    } else {
        let records = match state
            .store()
            .due_records(&payload.learner_id, Utc::now())
            .await
        {
            Ok(records) => records,
            Err(err) => return AppError::from(err).into_response(),
        };
        select_due(records, tuning.session_cap)
            .into_iter()
            .map(|r| r.item_id)
            .collect()
    };

    let recently_seen =
        RecentlySeen::from_history(tuning.seen_history_limit, payload.seen_history);
    let batch = Arc::new(UpdateBatchQueue::new(
        &payload.learner_id,
        state.store(),
        state.params().clone(),
        state.batch_config(),
    ));
    let session = Arc::new(StudySession::new(
        &payload.learner_id,
        payload.book_id,
        pool,
        recently_seen,
        tuning.session_cap,
        batch,
    ));

    let snapshot = session.snapshot();
    state.sessions().insert(session).await;
    json_ok(snapshot)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    match state.sessions().get(session_id).await {
        Some(session) => json_ok(session.snapshot()),
        None => session_not_found(session_id),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcomeRequest {
    item_id: String,
    outcome: Outcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitOutcomeResponse {
    accepted: bool,
    remaining: usize,
    pending_flush: usize,
    flush_degraded: bool,
}

/// Sole outcome entry point for every study surface. Optimistic: the queue
/// advances and the call succeeds as long as the outcome itself is
/// well-formed; persistence happens asynchronously via the batching queue.
pub async fn submit_outcome(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SubmitOutcomeRequest>,
) -> Response {
    if let Err(err) = payload.outcome.canonical_quality() {
        return AppError::from(err).into_response();
    }
    let Some(session) = state.sessions().get(session_id).await else {
        return session_not_found(session_id);
    };

    let remaining = session.submit_outcome(&payload.item_id, payload.outcome);

    // Queue-low signal: top up in the background so the learner never stalls.
    if remaining <= state.tuning().low_water_mark && !session.source_exhausted() {
        let vocab = state.vocab();
        let tuning = state.tuning().clone();
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if let Err(e) = prefetch::ensure_supply(&session, &vocab, &tuning).await {
                warn!(session_id = %session.id, error = %e, "prefetch failed");
            }
        });
    }

    json_ok(SubmitOutcomeResponse {
        accepted: true,
        remaining,
        pending_flush: session.batch().pending_len(),
        flush_degraded: session.batch().is_degraded(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlushResponse {
    pending_flush: usize,
    flush_degraded: bool,
}

/// Explicit `flushNow`: invoked by clients when the session goes inactive.
pub async fn flush_now(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    let Some(session) = state.sessions().get(session_id).await else {
        return session_not_found(session_id);
    };
    session.batch().flush_now().await;
    json_ok(FlushResponse {
        pending_flush: session.batch().pending_len(),
        flush_degraded: session.batch().is_degraded(),
    })
}

/// Tears a session down: forced flush, then the session is dropped. The
/// response carries the final recency history for the client to persist.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    let Some(session) = state.sessions().remove(session_id).await else {
        return session_not_found(session_id);
    };
    session.end().await;
    json_ok(session.snapshot())
}

fn session_not_found(session_id: Uuid) -> Response {
    AppError::not_found(format!("session {session_id} not found")).into_response()
}
