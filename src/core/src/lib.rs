//! Watchz Core - Foundational Types and Abstractions
//!
//! This crate provides the types shared by every part of the watchz update
//! daemon: the error taxonomy, the process configuration, the per-scan event
//! and report model, and the retry policy for transient I/O.

pub mod config;
pub mod error;
pub mod report;
pub mod retry;

// Re-export commonly used types
pub use config::WatchConfig;
pub use error::{Result, WatchError};
pub use report::{
    EventLevel, SessionReport, SessionStatus, UpdateEvent, UpdateOutcome, UpdatePhase,
    UpdateResult,
};
pub use retry::RetryPolicy;

/// Watchz version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
