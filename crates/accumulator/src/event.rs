//! Submission event wrapper.

use std::{fmt, sync::Arc};

use tokio::sync::oneshot;

/// Outcome of one flush, shared by every synchronous submitter in the batch.
pub(crate) type FlushOutcome = Result<(), Arc<anyhow::Error>>;

/// Sender half of a completion slot.
pub(crate) type CompletionSender = oneshot::Sender<FlushOutcome>;

/// A payload on its way to the flush engine.
pub(crate) struct Event<T> {
    pub(crate) payload: T,

    /// Only set for synchronous submissions.
    pub(crate) completion: Option<CompletionSender>,
}

impl<T> Event<T> {
    /// Fire-and-forget event.
    pub(crate) fn detached(payload: T) -> Self {
        Self {
            payload,
            completion: None,
        }
    }

    /// Event whose flush outcome is reported back through the returned
    /// receiver.
    pub(crate) fn with_completion(payload: T) -> (Self, oneshot::Receiver<FlushOutcome>) {
        let (tx, rx) = oneshot::channel();
        let ev = Self {
            payload,
            completion: Some(tx),
        };
        (ev, rx)
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("sync", &self.completion.is_some())
            .finish_non_exhaustive()
    }
}
