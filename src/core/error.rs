use std::any::Any;
use thiserror::Error;

/// Boxed error type carried by [`StepError::Other`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The failure an operation reports in the error slot of its reply.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Message(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error("parallel batch closed with no branches")]
    EmptyBatch,

    #[error(transparent)]
    Other(BoxError),
}

impl StepError {
    pub fn msg(message: impl Into<String>) -> Self {
        StepError::Message(message.into())
    }

    pub fn other(error: impl Into<BoxError>) -> Self {
        StepError::Other(error.into())
    }

    /// Converts a caught panic payload into a step failure.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        StepError::Panicked(message)
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        StepError::Message(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        StepError::Message(message.to_string())
    }
}

/// What the owner of a sequence learns through its [`Completion`](crate::Completion).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unhandled step failure in sequence {sequence}: {source}")]
    Unhandled {
        sequence: String,
        #[source]
        source: StepError,
    },

    #[error("sequence {0} was halted by an earlier unhandled failure")]
    Halted(String),

    #[error("sequence {0} was dropped before it drained")]
    Abandoned(String),
}

impl EngineError {
    /// The step failure behind an `Unhandled` error, if any.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            EngineError::Unhandled { source, .. } => Some(source),
            _ => None,
        }
    }
}
