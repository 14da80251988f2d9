//! fo-inbox library interface
//!
//! Inbox ingestion pipeline: files dropped into a vault's inbox folder are
//! queued, run through the enrichment steps and filed, with every step
//! recorded in a durable ledger.

pub mod api;
pub mod config;
pub mod error;
pub mod inbox;
pub mod services;
pub mod storage;
pub mod types;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};
pub use crate::inbox::{Collaborators, Inbox, InboxStats};

use axum::Router;
use chrono::{DateTime, Utc};
use fo_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub inbox: Inbox,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(inbox: Inbox) -> Self {
        Self {
            event_bus: inbox.events().clone(),
            inbox,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::inbox_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
