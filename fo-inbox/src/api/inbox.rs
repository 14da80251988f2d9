//! Inbox status and control endpoints
//!
//! - GET  /inbox/stats           queue, media and record counters
//! - GET  /inbox/records         every ledger record
//! - GET  /inbox/records/errors  records with a failed step or `error` status
//! - GET  /inbox/records/:hash   one record
//! - POST /inbox/backlog         queue every file currently in the inbox
//! - POST /inbox/pause, /inbox/resume

use crate::inbox::InboxStats;
use crate::services::id_service::{validate_hash, FileHash};
use crate::services::record_ledger::FileRecord;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

/// Response for backlog processing
#[derive(Debug, Serialize)]
pub struct BacklogResponse {
    /// Files admitted to the queue
    pub queued: usize,
}

/// Response for queue control
#[derive(Debug, Serialize)]
pub struct QueueControlResponse {
    pub paused: bool,
}

/// GET /inbox/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<InboxStats> {
    Json(state.inbox.stats())
}

/// GET /inbox/records
pub async fn list_records(State(state): State<AppState>) -> Json<Vec<FileRecord>> {
    Json(state.inbox.ledger().all_records())
}

/// GET /inbox/records/errors
pub async fn list_error_records(State(state): State<AppState>) -> Json<Vec<FileRecord>> {
    Json(state.inbox.ledger().records_with_errors())
}

/// GET /inbox/records/:hash
///
/// **Errors:**
/// - 400 Bad Request: not a 12-character hex hash
/// - 404 Not Found: hash is not tracked
pub async fn get_record(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<FileRecord>> {
    if !validate_hash(&hash) {
        return Err(ApiError::BadRequest(format!("Invalid file hash: {}", hash)));
    }
    let record = FileHash::parse(&hash)
        .and_then(|h| state.inbox.ledger().get_record(&h))
        .ok_or_else(|| ApiError::NotFound(format!("No record for {}", hash)))?;
    Ok(Json(record))
}

/// POST /inbox/backlog
pub async fn process_backlog(State(state): State<AppState>) -> ApiResult<Json<BacklogResponse>> {
    match state.inbox.process_backlog().await {
        Ok(queued) => {
            info!(queued, "Backlog requested over HTTP");
            Ok(Json(BacklogResponse { queued }))
        }
        Err(e) => {
            error!("Backlog processing failed: {}", e);
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// POST /inbox/pause
pub async fn pause_queue(State(state): State<AppState>) -> Json<QueueControlResponse> {
    state.inbox.pause();
    Json(QueueControlResponse {
        paused: state.inbox.is_paused(),
    })
}

/// POST /inbox/resume
pub async fn resume_queue(State(state): State<AppState>) -> Json<QueueControlResponse> {
    state.inbox.resume();
    Json(QueueControlResponse {
        paused: state.inbox.is_paused(),
    })
}

/// Build inbox routes
pub fn inbox_routes() -> Router<AppState> {
    Router::new()
        .route("/inbox/stats", get(get_stats))
        .route("/inbox/records", get(list_records))
        .route("/inbox/records/errors", get(list_error_records))
        .route("/inbox/records/:hash", get(get_record))
        .route("/inbox/backlog", post(process_backlog))
        .route("/inbox/pause", post(pause_queue))
        .route("/inbox/resume", post(resume_queue))
}
