//! Error kinds shared across the workspace.
//!
//! These are the eight named kinds; they are never thread panics — worker
//! threads report them to the coordinator over a status channel instead.

use thiserror::Error;

/// Errors surfaced by any component of the pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpectraError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("backpressure drop: {dropped} sample block(s) discarded")]
    BackpressureDrop { dropped: u64 },

    #[error("slow client: {0}")]
    SlowClient(String),

    #[error("storage exhausted: {used_bytes} bytes used against a budget of {budget_bytes}")]
    StorageExhausted { used_bytes: u64, budget_bytes: u64 },

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl SpectraError {
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    #[must_use]
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// True for errors that are local command rejections rather than
    /// terminal pipeline conditions.
    #[must_use]
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::InvalidConfig(_) | Self::ProtocolError(_)
        )
    }
}

pub type SpectraResult<T> = Result<T, SpectraError>;
