//! Error taxonomy for the feature engine.
//!
//! Structural failures (`InvalidArgument`, `NotFound`, `InvalidTransition`)
//! are returned to the caller as-is and never retried. `Conflict` is the only
//! retryable kind; the engine retries it a bounded number of times before it
//! surfaces. `InvariantViolation` is a hard failure: counters that disagree
//! with the ledger are never patched up silently.

use thiserror::Error;

use crate::model::FeatureId;
use crate::stage::Stage;

/// Engine result type.
pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("feature not found: {id}")]
    NotFound { id: FeatureId },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: FeatureId,
        from: Stage,
        to: Stage,
    },

    #[error("concurrent modification of {id} (gave up after {attempts} attempts)")]
    Conflict { id: FeatureId, attempts: usize },

    #[error("store unavailable: {reason}")]
    Unavailable {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invariant violated: {detail}")]
    InvariantViolation { detail: String },
}

impl FeatureError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation {
            detail: detail.into(),
        }
    }

    /// Machine-readable code for structured logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Conflict { .. } => "CONFLICT",
            Self::Unavailable { .. } => "UNAVAILABLE",
            Self::InvariantViolation { .. } => "INVARIANT_VIOLATION",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the whole operation may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable { .. })
    }
}
