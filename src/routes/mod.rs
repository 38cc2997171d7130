mod health;
mod sessions;
mod srs;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .route("/api/srs/:learner_id/due", get(srs::due_list))
        .route("/api/srs/:learner_id/stats", get(srs::stats))
        .route("/api/srs/:learner_id/items/:item_id/start", post(srs::start_item))
        .route("/api/srs/:learner_id/items/:item_id/reset", post(srs::reset_item))
        .route("/api/srs/:learner_id/review/:item_id", post(srs::review))
        .route("/api/sessions", post(sessions::create))
        .route("/api/sessions/:session_id", get(sessions::get_session))
        .route("/api/sessions/:session_id", delete(sessions::end_session))
        .route("/api/sessions/:session_id/outcomes", post(sessions::submit_outcome))
        .route("/api/sessions/:session_id/flush", post(sessions::flush_now))
        .with_state(state)
}
