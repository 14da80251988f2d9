//! HTTP API handlers for fo-inbox
//!
//! Read-only status surface over the inbox plus a backlog trigger, and an
//! SSE stream of inbox events.

pub mod health;
pub mod inbox;
pub mod sse;

pub use health::health_routes;
pub use inbox::inbox_routes;
pub use sse::event_stream;
