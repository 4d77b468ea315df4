//! Error types for the respond framework.
//!
//! [`RespondError`] reports misuse of the pipeline (attaching a scope twice,
//! triggering a processor twice, completing a future twice) and
//! configuration problems. Failures of the request itself never use this
//! type; they travel as [`Failure`](crate::failure::Failure) values.

use thiserror::Error;

/// Top-level error type for the respond framework.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RespondError {
    // ── Programming errors ───────────────────────────────────────────

    /// A scope instance was attached to a processor that already has one.
    #[error("request scope instance already attached")]
    ScopeAlreadyAttached,

    /// A processor was triggered before a scope instance was attached.
    #[error("request scope instance not attached")]
    ScopeNotAttached,

    /// A processor was triggered more than once.
    #[error("response processor already triggered")]
    AlreadyTriggered,

    /// A single-assignment future was completed a second time.
    #[error("future already completed ({state})")]
    AlreadyCompleted {
        /// The state the future was already in.
        state: &'static str,
    },

    // ── Configuration ────────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RespondError>;
