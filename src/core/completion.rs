use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::core::error::EngineError;

/// Resolves once the sequence has drained, or with the failure that halted it.
///
/// Dropping a `Completion` does not stop the sequence.
#[must_use = "a Completion carries the unhandled failure of its sequence"]
#[derive(Debug)]
pub struct Completion {
    sequence: String,
    receiver: oneshot::Receiver<Result<(), EngineError>>,
}

impl Completion {
    pub(crate) fn new(
        sequence: String,
        receiver: oneshot::Receiver<Result<(), EngineError>>,
    ) -> Self {
        Completion { sequence, receiver }
    }

    /// Label of the sequence this completion belongs to.
    pub fn sequence(&self) -> &str {
        &self.sequence
    }
}

impl Future for Completion {
    type Output = Result<(), EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => {
                Poll::Ready(Err(EngineError::Abandoned(self.sequence.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
