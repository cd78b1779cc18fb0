//! Parley - an embeddable meeting/chat engine
//!
//! This library creates ephemeral or container-bound meetings, admits session
//! participants, routes messages between them according to channel and
//! moderation rules, and produces durable transcripts. Transport, auth and
//! rendering belong to the embedding server.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
