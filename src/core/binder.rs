use std::cell::RefCell;
use std::rc::Rc;

use crate::core::Values;
use crate::core::continuation::{Reply, noop};
use crate::core::error::StepError;
use crate::core::sequence::{BoundHandler, Sequence};

type SuccessHandler = Box<dyn FnOnce(&Sequence, Values)>;
type ErrorHandler = Box<dyn FnOnce(&Sequence, StepError)>;

impl Sequence {
    /// Attaches `handler` to the most recently declared step, replacing any
    /// earlier binding. With nothing declared yet, a no-op step is declared
    /// to carry it.
    ///
    /// The handler receives the whole reply, so a failure it sees counts as
    /// handled.
    pub fn bind<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Sequence, Reply) + 'static,
    {
        let handler: BoundHandler = Box::new(handler);
        if let Err(handler) = self.bind_last(handler) {
            self.append(noop, Values::new());
            if self.bind_last(handler).is_err() {
                log::warn!(
                    "Sequence {}: no statement to bind a handler to.",
                    self.id()
                );
            }
        }
        self
    }

    /// Binds a handler for the success values only. Failures go to the
    /// scoped handler, or halt the sequence.
    pub fn on_success<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Sequence, Values) + 'static,
    {
        self.split(Some(Box::new(handler)), None)
    }

    /// Binds a handler for failures only; success values are dropped.
    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Sequence, StepError) + 'static,
    {
        self.split(None, Some(Box::new(handler)))
    }

    pub fn either<S, E>(&self, on_success: S, on_error: E) -> &Self
    where
        S: FnOnce(&Sequence, Values) + 'static,
        E: FnOnce(&Sequence, StepError) + 'static,
    {
        self.split(Some(Box::new(on_success)), Some(Box::new(on_error)))
    }

    /// Installs the fallback for every failure without a per-step error
    /// handler. Replaces any handler installed before.
    ///
    /// Steps the handler appends run next, ahead of steps already queued.
    pub fn scope_errors<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&Sequence, StepError) + 'static,
    {
        self.set_scope(Rc::new(RefCell::new(handler)));
        self
    }

    fn split(&self, success: Option<SuccessHandler>, error: Option<ErrorHandler>) -> &Self {
        self.bind(move |sequence, reply| match reply.error {
            Some(err) => match error {
                Some(handler) => handler(sequence, err),
                None => sequence.unhandled(err),
            },
            None => {
                if let Some(handler) = success {
                    handler(sequence, reply.values);
                }
            }
        })
    }
}
