//! Accumulator error types.

use std::{fmt, sync::Arc};

use thiserror::Error;

/// Where a submission was when its context expired.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExpiryStage {
    /// Context was already done before the item was handed off.
    BeforeEnqueue,

    /// Context expired while waiting for room in the submission channel.
    Enqueue,

    /// Context expired while waiting for the batch to be flushed.
    AwaitingFlush,
}

impl fmt::Display for ExpiryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BeforeEnqueue => "check before enqueue",
            Self::Enqueue => "check on enqueue",
            Self::AwaitingFlush => "check awaiting flush",
        };
        f.write_str(s)
    }
}

/// Why a submission context is done.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExpiryReason {
    /// The context's cancellation token fired.
    Cancelled,

    /// The context's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("context cancelled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Errors returned to producers.
#[derive(Clone, Debug, Error)]
pub enum AccumulatorError {
    /// Submission attempted after shutdown was requested.
    #[error("send to closed accumulator")]
    SendToClosed,

    /// The caller's context expired.
    #[error("{stage}: {reason}")]
    ContextExpired {
        stage: ExpiryStage,
        reason: ExpiryReason,
    },

    /// The flusher failed on the batch holding this item.
    #[error("flush failed: {0}")]
    FlushFailed(Arc<anyhow::Error>),

    /// Flush engine went away without reporting an outcome.
    #[error("flush engine exited without a response")]
    EngineExited,
}

impl AccumulatorError {
    pub(crate) fn expired(stage: ExpiryStage, reason: ExpiryReason) -> Self {
        Self::ContextExpired { stage, reason }
    }

    /// Returns true if this is a context expiry at any stage.
    pub fn is_context_expired(&self) -> bool {
        matches!(self, Self::ContextExpired { .. })
    }
}

pub type AccumulatorResult<T> = Result<T, AccumulatorError>;
