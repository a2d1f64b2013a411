use std::fmt;

use crate::core::error::StepError;
use crate::core::{Value, Values};

/// One call of an error-first continuation: the error slot followed by the
/// positional result values.
///
/// Unlike a `Result`, a reply may carry an error *and* values. A parallel
/// batch whose branches partly failed produces exactly that.
#[derive(Debug, Default)]
pub struct Reply {
    pub error: Option<StepError>,
    pub values: Values,
}

impl Reply {
    /// A successful reply carrying `values`.
    pub fn ok(values: Values) -> Self {
        Reply {
            error: None,
            values,
        }
    }

    /// A successful reply with no values.
    pub fn done() -> Self {
        Reply::default()
    }

    /// A failed reply with no values.
    pub fn fail(error: impl Into<StepError>) -> Self {
        Reply {
            error: Some(error.into()),
            values: Values::new(),
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }

    /// The positional value at `idx`, if present.
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn into_result(self) -> Result<Values, StepError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.values),
        }
    }
}

impl<E: Into<StepError>> From<Result<Values, E>> for Reply {
    fn from(result: Result<Values, E>) -> Self {
        match result {
            Ok(values) => Reply::ok(values),
            Err(err) => Reply::fail(err),
        }
    }
}

/// The continuation handed to an operation.
///
/// Resuming consumes it, so an operation cannot report twice. Dropping it
/// without resuming leaves the owning sequence stalled; that is logged.
pub struct Continuation {
    resume: Option<Box<dyn FnOnce(Reply)>>,
}

impl Continuation {
    pub fn new(resume: impl FnOnce(Reply) + 'static) -> Self {
        Continuation {
            resume: Some(Box::new(resume)),
        }
    }

    pub fn resume(mut self, reply: Reply) {
        if let Some(resume) = self.resume.take() {
            resume(reply);
        }
    }

    /// Resumes with a successful reply carrying `values`.
    pub fn ok(self, values: Values) {
        self.resume(Reply::ok(values));
    }

    /// Resumes with an empty successful reply.
    pub fn done(self) {
        self.resume(Reply::done());
    }

    /// Resumes with a failure.
    pub fn fail(self, error: impl Into<StepError>) {
        self.resume(Reply::fail(error));
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if self.resume.is_some() {
            log::warn!("Continuation dropped without being resumed; its sequence will stall.");
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("pending", &self.resume.is_some())
            .finish()
    }
}

/// Anything a sequence can run as a step.
///
/// An operation receives its declared arguments plus exactly one continuation,
/// and must resume that continuation once, synchronously or later.
pub trait Operation: 'static {
    fn invoke(&self, args: Values, k: Continuation);
}

impl<F> Operation for F
where
    F: Fn(Values, Continuation) + 'static,
{
    fn invoke(&self, args: Values, k: Continuation) {
        self(args, k)
    }
}

/// The operation that does nothing and succeeds with no values.
pub fn noop(_args: Values, k: Continuation) {
    k.done();
}
