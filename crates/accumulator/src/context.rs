//! Per-call submission context.
//!
//! Carries an optional deadline and an optional cancellation token. Producers
//! pass one to every submission; each suspension point races it.

use std::{future, time::Duration};

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::ExpiryReason;

/// Deadline and cancellation signal for a single submission.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl Context {
    /// Context that never expires.
    pub fn background() -> Self {
        Self::default()
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Context cancelled together with `token`.
    pub fn with_cancel(token: CancellationToken) -> Self {
        Self::background().cancel_on(token)
    }

    /// Sets the deadline, keeping the earlier one if already set.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(cur) => cur.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attaches a cancellation token, replacing any previous one.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-suspending check. Returns why the context is done, if it is.
    pub fn err(&self) -> Option<ExpiryReason> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Some(ExpiryReason::Cancelled);
        }

        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(ExpiryReason::DeadlineExceeded);
        }

        None
    }

    /// Resolves once the context is done. Never resolves for a background
    /// context.
    pub async fn done(&self) -> ExpiryReason {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => future::pending().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            _ = cancelled => ExpiryReason::Cancelled,
            _ = expired => ExpiryReason::DeadlineExceeded,
        }
    }
}
