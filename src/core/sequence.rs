use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use futures::channel::oneshot;
use uuid::Uuid;

use crate::core::completion::Completion;
use crate::core::config::{FatalPolicy, Launch, SequenceConfig};
use crate::core::continuation::{Continuation, Operation, Reply, noop};
use crate::core::error::{EngineError, StepError};
use crate::core::lift::{Callback, lift_error_first, lift_sync};
use crate::core::{Value, Values};

pub(crate) type BoundHandler = Box<dyn FnOnce(&Sequence, Reply)>;
pub(crate) type ScopeHandler = Rc<RefCell<dyn FnMut(&Sequence, StepError)>>;
pub(crate) type Waiter = Box<dyn FnOnce(Result<(), EngineError>)>;

/// What runs when a statement's operation resumes its continuation.
pub(crate) enum Binding {
    /// Advance; a failure goes to the scoped handler or halts the sequence.
    Default,
    /// Run the handler with the cursor reset to the front, then advance.
    Bound(BoundHandler),
}

/// One declared step: an operation, its arguments and its binding.
pub(crate) struct Statement {
    op: Rc<dyn Operation>,
    args: Values,
    binding: Binding,
}

impl Statement {
    pub(crate) fn new(op: Rc<dyn Operation>, args: Values) -> Self {
        Statement {
            op,
            args,
            binding: Binding::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduled,
    Running,
}

struct State {
    queue: VecDeque<Statement>,
    /// Insertion point for the next appended statement.
    tail: usize,
    phase: Phase,
    dispatching: bool,
    resume_requested: bool,
    scope: Option<ScopeHandler>,
    halted: bool,
    fatal: Option<StepError>,
    waiters: Vec<Waiter>,
}

struct Inner {
    label: String,
    config: SequenceConfig,
    state: RefCell<State>,
}

/// An ordered queue of asynchronous steps executed one at a time.
///
/// `Sequence` is a cheap handle: clones share the same queue. All of its
/// methods must be called from the thread that created it, and with the
/// default [`Launch::Deferred`] from inside a tokio `LocalSet`.
///
/// ```rust,no_run
/// use begin::prelude::*;
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), EngineError> {
/// let seq = Sequence::new();
/// seq.append_sync(|_| Ok::<_, StepError>(json!(2)), vec![])
///     .on_success(|_, values| println!("got {:?}", values));
/// seq.finish().await
/// # }
/// ```
#[derive(Clone)]
pub struct Sequence {
    inner: Rc<Inner>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Sequence")
            .field("label", &self.inner.label)
            .field("pending", &state.queue.len())
            .field("tail", &state.tail)
            .field("phase", &state.phase)
            .field("halted", &state.halted)
            .finish()
    }
}

impl Sequence {
    pub fn new() -> Self {
        Self::with_config(SequenceConfig::default())
    }

    pub fn with_config(config: SequenceConfig) -> Self {
        let label = config
            .name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Sequence {
            inner: Rc::new(Inner {
                label,
                config,
                state: RefCell::new(State {
                    queue: VecDeque::new(),
                    tail: 0,
                    phase: Phase::Idle,
                    dispatching: false,
                    resume_requested: false,
                    scope: None,
                    halted: false,
                    fatal: None,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// The configured name, or a generated id.
    pub fn id(&self) -> &str {
        &self.inner.label
    }

    /// Number of statements waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// Whether a drain is scheduled or in progress.
    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().phase != Phase::Idle
    }

    pub fn is_halted(&self) -> bool {
        self.inner.state.borrow().halted
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.inner.state.borrow().tail
    }

    /// Declares a step. It is inserted at the cursor, so from inside a handler
    /// it lands right after the step being handled.
    pub fn append<O: Operation>(&self, op: O, args: Values) -> &Self {
        self.push(Statement::new(Rc::new(op), args));
        self
    }

    /// Declares a synchronous function as a step. See [`lift_sync`].
    pub fn append_sync<F, E>(&self, f: F, args: Values) -> &Self
    where
        F: Fn(Values) -> Result<Value, E> + 'static,
        E: Into<StepError> + 'static,
    {
        self.append(lift_sync(f), args)
    }

    /// Declares a callback-style function without an error slot as a step.
    /// See [`lift_error_first`].
    pub fn append_error_first<F>(&self, f: F, args: Values) -> &Self
    where
        F: Fn(Values, Callback) + 'static,
    {
        self.append(lift_error_first(f), args)
    }

    /// Returns the same handle. Reads as the start of a nested block when
    /// called from a handler.
    pub fn begin_nested(&self) -> &Self {
        self
    }

    /// Starts draining now and returns a future for the outcome.
    pub fn finish(&self) -> Completion {
        let completion = self.completion();
        self.start_now();
        completion
    }

    /// Appends a final step bound to `k`, then behaves like [`finish`](Self::finish).
    pub fn finish_with<F>(&self, k: F) -> Completion
    where
        F: FnOnce(&Sequence, Reply) + 'static,
    {
        self.append(noop, Values::new()).bind(k);
        self.finish()
    }

    pub(crate) fn push(&self, statement: Statement) {
        let schedule = {
            let mut state = self.inner.state.borrow_mut();
            if state.halted {
                log::warn!(
                    "Sequence {}: ignoring statement appended after an unhandled failure.",
                    self.inner.label
                );
                return;
            }
            let at = state.tail.min(state.queue.len());
            state.queue.insert(at, statement);
            state.tail = at + 1;
            log::trace!(
                "Sequence {}: statement queued at {} ({} pending).",
                self.inner.label,
                at,
                state.queue.len()
            );
            state.phase == Phase::Idle && self.inner.config.launch == Launch::Deferred
        };
        if schedule {
            self.start_later();
        }
    }

    /// Rebinds the statement just before the cursor. Hands the handler back
    /// when there is no such statement.
    pub(crate) fn bind_last(&self, handler: BoundHandler) -> Result<(), BoundHandler> {
        let mut state = self.inner.state.borrow_mut();
        let Some(idx) = state.tail.checked_sub(1) else {
            return Err(handler);
        };
        match state.queue.get_mut(idx) {
            Some(statement) => {
                statement.binding = Binding::Bound(handler);
                Ok(())
            }
            None => Err(handler),
        }
    }

    pub(crate) fn set_scope(&self, handler: ScopeHandler) {
        self.inner.state.borrow_mut().scope = Some(handler);
    }

    /// Registers a callback for the next drain or halt.
    pub(crate) fn on_settled(&self, waiter: Waiter) {
        let mut state = self.inner.state.borrow_mut();
        if state.halted {
            let error = match state.fatal.take() {
                Some(source) => EngineError::Unhandled {
                    sequence: self.inner.label.clone(),
                    source,
                },
                None => EngineError::Halted(self.inner.label.clone()),
            };
            drop(state);
            waiter(Err(error));
            return;
        }
        state.waiters.push(waiter);
    }

    fn completion(&self) -> Completion {
        let (sender, receiver) = oneshot::channel();
        self.on_settled(Box::new(move |outcome| {
            let _ = sender.send(outcome);
        }));
        Completion::new(self.inner.label.clone(), receiver)
    }

    fn start_later(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            log::error!(
                "Sequence {}: no tokio runtime to schedule the deferred start on; run it with finish().",
                self.inner.label
            );
            return;
        }
        log::trace!(
            "Sequence {}: scheduling deferred start on the current LocalSet.",
            self.inner.label
        );
        self.inner.state.borrow_mut().phase = Phase::Scheduled;
        let sequence = self.clone();
        tokio::task::spawn_local(async move {
            sequence.kick();
        });
    }

    fn kick(&self) {
        let go = {
            let mut state = self.inner.state.borrow_mut();
            if state.phase == Phase::Scheduled {
                state.phase = Phase::Running;
                true
            } else {
                false
            }
        };
        if go {
            self.advance();
        }
    }

    fn start_now(&self) {
        let go = {
            let mut state = self.inner.state.borrow_mut();
            if state.phase == Phase::Running {
                false
            } else {
                state.phase = Phase::Running;
                true
            }
        };
        if go {
            log::debug!("Sequence {}: starting.", self.inner.label);
            self.advance();
        }
    }

    /// The drain loop.
    ///
    /// A continuation resumed while its operation is still being dispatched
    /// only sets `resume_requested`; the dispatching frame then loops. So no
    /// more than one statement runs at a time and synchronous steps never
    /// nest on the stack.
    pub(crate) fn advance(&self) {
        loop {
            let statement = {
                let mut state = self.inner.state.borrow_mut();
                if state.halted {
                    state.phase = Phase::Idle;
                    return;
                }
                if state.dispatching {
                    state.resume_requested = true;
                    return;
                }
                let next = state.queue.pop_front();
                match next {
                    Some(statement) => {
                        state.tail = state.tail.saturating_sub(1);
                        state.dispatching = true;
                        statement
                    }
                    None => {
                        state.phase = Phase::Idle;
                        let waiters = mem::take(&mut state.waiters);
                        drop(state);
                        log::debug!("Sequence {}: drained.", self.inner.label);
                        for waiter in waiters {
                            waiter(Ok(()));
                        }
                        return;
                    }
                }
            };

            {
                let _dispatching = DispatchGuard(&self.inner.state);
                self.dispatch(statement);
            }

            let again = mem::take(&mut self.inner.state.borrow_mut().resume_requested);
            if !again {
                return;
            }
        }
    }

    fn dispatch(&self, statement: Statement) {
        let Statement { op, args, binding } = statement;
        log::debug!(
            "Sequence {}: dispatching statement with {} argument(s).",
            self.inner.label,
            args.len()
        );
        let sequence = self.clone();
        op.invoke(
            args,
            Continuation::new(move |reply| sequence.settle(binding, reply)),
        );
    }

    fn settle(&self, binding: Binding, reply: Reply) {
        match binding {
            Binding::Default => {
                if let Some(error) = reply.error {
                    self.unhandled(error);
                }
            }
            Binding::Bound(handler) => {
                let _cursor = CursorScope::enter(&self.inner.state);
                self.run_handler(|| handler(self, reply));
            }
        }
        self.advance();
    }

    /// Routes a failure that no per-step handler took.
    pub(crate) fn unhandled(&self, error: StepError) {
        let scope = self.inner.state.borrow().scope.clone();
        let Some(handler) = scope else {
            self.halt(error);
            return;
        };
        log::debug!(
            "Sequence {}: routing failure to scoped handler: {}",
            self.inner.label,
            error
        );
        let _cursor = CursorScope::enter(&self.inner.state);
        match handler.try_borrow_mut() {
            Ok(mut handler) => self.run_handler(|| (&mut *handler)(self, error)),
            Err(_) => self.halt(error),
        }
    }

    /// Runs a user handler. A panic inside it halts the sequence with
    /// [`StepError::Panicked`]. Under [`FatalPolicy::Panic`] the unwind
    /// continues once the waiters have been told.
    fn run_handler(&self, handler: impl FnOnce()) {
        let Err(payload) = panic::catch_unwind(AssertUnwindSafe(handler)) else {
            return;
        };
        let error = StepError::from_panic(&*payload);
        if self.inner.config.on_fatal == FatalPolicy::Panic {
            log::error!("Sequence {}: handler panicked: {}", self.inner.label, error);
            self.shut_down(error);
            panic::resume_unwind(payload);
        }
        self.halt(error);
    }

    fn halt(&self, error: StepError) {
        let label = &self.inner.label;
        log::error!("Sequence {}: unhandled step failure: {}", label, error);
        if self.inner.config.on_fatal == FatalPolicy::Panic {
            let message = format!("unhandled step failure in sequence {}: {}", label, error);
            self.shut_down(error);
            panic!("{message}");
        }
        self.shut_down(error);
    }

    /// Marks the sequence halted, discards what is queued and tells the
    /// waiters. Does nothing on a sequence that is already halted.
    fn shut_down(&self, error: StepError) {
        let label = &self.inner.label;
        let (waiters, discarded) = {
            let mut state = self.inner.state.borrow_mut();
            if state.halted {
                return;
            }
            state.halted = true;
            state.phase = Phase::Idle;
            (mem::take(&mut state.waiters), mem::take(&mut state.queue))
        };
        if !discarded.is_empty() {
            log::debug!(
                "Sequence {}: discarded {} pending statement(s).",
                label,
                discarded.len()
            );
        }
        drop(discarded);

        let mut error = Some(error);
        for waiter in waiters {
            let outcome = match error.take() {
                Some(source) => EngineError::Unhandled {
                    sequence: label.clone(),
                    source,
                },
                None => EngineError::Halted(label.clone()),
            };
            waiter(Err(outcome));
        }
        if let Some(error) = error {
            self.inner.state.borrow_mut().fatal = Some(error);
        }
    }
}

/// Clears `dispatching` however the dispatch exits.
struct DispatchGuard<'a>(&'a RefCell<State>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.try_borrow_mut() {
            state.dispatching = false;
        }
    }
}

/// Points the cursor at the front of the queue for the lifetime of a handler
/// call and restores it afterwards, including on unwind.
struct CursorScope<'a> {
    state: &'a RefCell<State>,
    saved: usize,
}

impl<'a> CursorScope<'a> {
    fn enter(state: &'a RefCell<State>) -> Self {
        let saved = mem::replace(&mut state.borrow_mut().tail, 0);
        CursorScope { state, saved }
    }
}

impl Drop for CursorScope<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.tail = self.saved;
        }
    }
}

/// A sequence used as a step: its remaining statements run, then the
/// enclosing continuation is resumed with the final reply. A halt inside fails
/// the enclosing step.
///
/// Build such a sequence with [`Launch::Manual`] so it does not start on its
/// own before it is dispatched.
///
/// Running drains the queue, so a prebuilt sequence is used up by its first
/// run: another use as a step only resumes the enclosing continuation. Use
/// [`subflow`] for a flow that runs in full each time.
impl Operation for Sequence {
    fn invoke(&self, _args: Values, k: Continuation) {
        let slot = Rc::new(Cell::new(Some(k)));

        let on_halt = Rc::clone(&slot);
        self.on_settled(Box::new(move |outcome| {
            if let Err(error) = outcome {
                if let Some(k) = on_halt.take() {
                    k.fail(StepError::other(error));
                }
            }
        }));

        self.append(noop, Values::new()).bind(move |_, reply| {
            if let Some(k) = slot.take() {
                k.resume(reply);
            }
        });
        self.start_now();
    }
}

/// Wraps a flow definition as an operation. Every invocation builds a fresh
/// [`Launch::Manual`] sequence with `build` and runs it as the step.
pub fn subflow<B>(build: B) -> impl Operation
where
    B: Fn(&Sequence, Values) + 'static,
{
    move |args: Values, k: Continuation| {
        let sequence = Sequence::with_config(SequenceConfig::new().launch(Launch::Manual));
        build(&sequence, args);
        Operation::invoke(&sequence, Values::new(), k);
    }
}
