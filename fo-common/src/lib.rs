//! # File Organizer Common Library
//!
//! Shared code for the inbox services including:
//! - Error types
//! - Event types (InboxEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
