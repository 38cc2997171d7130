use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::response::{json_ok, AppError};
use crate::srs::{self, select_due, MemoryRecord, Outcome, RecordState};
use crate::state::AppState;

const DEFAULT_DUE_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct DueQuery {
    limit: Option<usize>,
}

/// Due set for a learner: oldest-overdue first, hardest first on ties.
pub async fn due_list(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
    Query(query): Query<DueQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_DUE_LIMIT);
    let records = match state.store().due_records(&learner_id, Utc::now()).await {
        Ok(records) => records,
        Err(err) => return AppError::from(err).into_response(),
    };
    json_ok(select_due(records, limit))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    status: &'static str,
    record: MemoryRecord,
}

/// Lazily creates the memory record on first exposure of an item.
pub async fn start_item(
    State(state): State<AppState>,
    Path((learner_id, item_id)): Path<(String, String)>,
) -> Response {
    let store = state.store();
    match store.get_record(&learner_id, &item_id).await {
        Ok(Some(record)) => json_ok(StartResponse {
            status: "already_learning",
            record,
        }),
        Ok(None) => {
            let record = MemoryRecord::unseen(&learner_id, &item_id, Utc::now());
            match persist_one(&state, &record).await {
                Ok(()) => json_ok(StartResponse {
                    status: "learning_started",
                    record,
                }),
                Err(err) => err.into_response(),
            }
        }
        Err(err) => AppError::from(err).into_response(),
    }
}

/// Soft reset at the learner's request: parameters back to defaults, state
/// back to New, review counter untouched.
pub async fn reset_item(
    State(state): State<AppState>,
    Path((learner_id, item_id)): Path<(String, String)>,
) -> Response {
    let store = state.store();
    match store.get_record(&learner_id, &item_id).await {
        Ok(Some(record)) => {
            let reset = record.reset(Utc::now());
            match persist_one(&state, &reset).await {
                Ok(()) => json_ok(reset),
                Err(err) => err.into_response(),
            }
        }
        Ok(None) => AppError::not_found(format!("no record for item {item_id}")).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    quality: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewResponse {
    item_id: String,
    quality: u8,
    stability: f64,
    difficulty: f64,
    state: RecordState,
    next_due_at: DateTime<Utc>,
    review_count: i64,
}

/// Synchronous graded review used by the formal review surface. Applies the
/// engine and persists immediately, bypassing the session batching queue.
pub async fn review(
    State(state): State<AppState>,
    Path((learner_id, item_id)): Path<(String, String)>,
    Json(payload): Json<ReviewRequest>,
) -> Response {
    let outcome = Outcome::Graded {
        quality: payload.quality,
    };
    if let Err(err) = outcome.canonical_quality() {
        return AppError::from(err).into_response();
    }

    let store = state.store();
    let now = Utc::now();
    let current = match store.get_record(&learner_id, &item_id).await {
        Ok(Some(record)) => record,
        Ok(None) => MemoryRecord::unseen(&learner_id, &item_id, now),
        Err(err) => return AppError::from(err).into_response(),
    };

    let updated = match srs::apply_healed(&current, outcome, now, state.params()) {
        Ok(updated) => updated,
        Err(err) => return AppError::from(err).into_response(),
    };

    match persist_one(&state, &updated).await {
        Ok(()) => json_ok(ReviewResponse {
            item_id: updated.item_id.clone(),
            quality: payload.quality,
            stability: updated.stability,
            difficulty: updated.difficulty,
            state: updated.state,
            next_due_at: updated.due_at,
            review_count: updated.review_count,
        }),
        Err(err) => err.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    learner_id: String,
    total_items: usize,
    due_now: usize,
    reviewed_today: usize,
    new: usize,
    learning: usize,
    review: usize,
    mature: usize,
}

pub async fn stats(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
) -> Response {
    let records = match state.store().learner_records(&learner_id).await {
        Ok(records) => records,
        Err(err) => return AppError::from(err).into_response(),
    };

    let now = Utc::now();
    let today_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now - Duration::days(1));

    let count_state =
        |s: RecordState| records.iter().filter(|r| r.state == s).count();

    json_ok(StatsResponse {
        total_items: records.len(),
        due_now: records.iter().filter(|r| r.due_at <= now).count(),
        reviewed_today: records
            .iter()
            .filter(|r| r.last_reviewed_at.map(|at| at >= today_start).unwrap_or(false))
            .count(),
        new: count_state(RecordState::New),
        learning: count_state(RecordState::Learning),
        review: count_state(RecordState::Review),
        mature: count_state(RecordState::Mature),
        learner_id,
    })
}

async fn persist_one(state: &AppState, record: &MemoryRecord) -> Result<(), AppError> {
    let report = state
        .store()
        .upsert_records(std::slice::from_ref(record))
        .await?;
    if report.is_complete() {
        Ok(())
    } else {
        Err(AppError::service_unavailable(format!(
            "failed to persist record for item {}",
            record.item_id
        )))
    }
}
