use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use crate::core::completion::Completion;
use crate::core::continuation::{Continuation, Operation, Reply};
use crate::core::error::StepError;
use crate::core::lift::{Callback, lift_error_first, lift_sync};
use crate::core::sequence::Sequence;
use crate::core::{Value, Values};

struct Branch {
    op: Rc<dyn Operation>,
    args: Values,
}

/// Builder for a group of operations that run concurrently and join into a
/// single step of the owning sequence.
///
/// The batch becomes that step as soon as a sequence-level method is called
/// on the builder, on [`close`](Self::close), or when the builder is dropped.
pub struct Parallel {
    sequence: Sequence,
    branches: Vec<Branch>,
    closed: bool,
}

impl Sequence {
    /// Opens a parallel batch whose step lands at the current cursor.
    pub fn parallel(&self) -> Parallel {
        Parallel {
            sequence: self.clone(),
            branches: Vec::new(),
            closed: false,
        }
    }
}

/// Opens a parallel batch on a fresh sequence.
pub fn parallel() -> Parallel {
    Sequence::new().parallel()
}

impl Parallel {
    /// Records a branch. Branches get their continuations when the batch runs.
    pub fn append<O: Operation>(mut self, op: O, args: Values) -> Self {
        self.branches.push(Branch {
            op: Rc::new(op),
            args,
        });
        self
    }

    pub fn append_sync<F, E>(self, f: F, args: Values) -> Self
    where
        F: Fn(Values) -> Result<Value, E> + 'static,
        E: Into<StepError> + 'static,
    {
        self.append(lift_sync(f), args)
    }

    pub fn append_error_first<F>(self, f: F, args: Values) -> Self
    where
        F: Fn(Values, Callback) + 'static,
    {
        self.append(lift_error_first(f), args)
    }

    /// Number of branches recorded so far.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Compiles the batch into one statement and hands back the sequence.
    pub fn close(mut self) -> Sequence {
        self.seal();
        self.sequence.clone()
    }

    pub fn bind<F>(self, handler: F) -> Sequence
    where
        F: FnOnce(&Sequence, Reply) + 'static,
    {
        let sequence = self.close();
        sequence.bind(handler);
        sequence
    }

    pub fn on_success<F>(self, handler: F) -> Sequence
    where
        F: FnOnce(&Sequence, Values) + 'static,
    {
        let sequence = self.close();
        sequence.on_success(handler);
        sequence
    }

    pub fn on_error<F>(self, handler: F) -> Sequence
    where
        F: FnOnce(&Sequence, StepError) + 'static,
    {
        let sequence = self.close();
        sequence.on_error(handler);
        sequence
    }

    pub fn either<S, E>(self, on_success: S, on_error: E) -> Sequence
    where
        S: FnOnce(&Sequence, Values) + 'static,
        E: FnOnce(&Sequence, StepError) + 'static,
    {
        let sequence = self.close();
        sequence.either(on_success, on_error);
        sequence
    }

    pub fn scope_errors<F>(self, handler: F) -> Sequence
    where
        F: FnMut(&Sequence, StepError) + 'static,
    {
        let sequence = self.close();
        sequence.scope_errors(handler);
        sequence
    }

    /// Closes the batch and declares `op` as the next sequential step.
    pub fn then<O: Operation>(self, op: O, args: Values) -> Sequence {
        let sequence = self.close();
        sequence.append(op, args);
        sequence
    }

    pub fn begin_nested(self) -> Sequence {
        self.close()
    }

    /// Closes this batch and opens another one right after it.
    pub fn parallel(self) -> Parallel {
        self.close().parallel()
    }

    pub fn finish(self) -> Completion {
        self.close().finish()
    }

    pub fn finish_with<F>(self, k: F) -> Completion
    where
        F: FnOnce(&Sequence, Reply) + 'static,
    {
        self.close().finish_with(k)
    }

    fn seal(&mut self) {
        if mem::replace(&mut self.closed, true) {
            return;
        }
        let branches = mem::take(&mut self.branches);
        if branches.is_empty() {
            log::error!(
                "Sequence {}: parallel batch closed with no branches.",
                self.sequence.id()
            );
        } else {
            log::trace!(
                "Sequence {}: parallel batch closed with {} branches.",
                self.sequence.id(),
                branches.len()
            );
        }
        let batch = Batch {
            label: self.sequence.id().to_string(),
            branches,
        };
        self.sequence.append(batch, Values::new());
    }
}

impl Drop for Parallel {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.seal();
        }
    }
}

/// The compiled batch: one operation that fans out to every branch.
struct Batch {
    label: String,
    branches: Vec<Branch>,
}

impl Operation for Batch {
    fn invoke(&self, _args: Values, k: Continuation) {
        if self.branches.is_empty() {
            k.fail(StepError::EmptyBatch);
            return;
        }
        log::debug!(
            "Sequence {}: dispatching {} parallel branches.",
            self.label,
            self.branches.len()
        );

        let join = Rc::new(Join::new(self.branches.len(), k));
        for (idx, branch) in self.branches.iter().enumerate() {
            let join = Rc::clone(&join);
            branch.op.invoke(
                branch.args.clone(),
                Continuation::new(move |reply| join.record(idx, reply)),
            );
        }
        // Drop the dispatch hold: the join cannot fire before every branch
        // has been started, even when branches complete synchronously.
        join.release();
    }
}

/// Shared by the branches of one running batch.
struct Join {
    frames: RefCell<Vec<Option<Reply>>>,
    remaining: Cell<usize>,
    k: Cell<Option<Continuation>>,
}

impl Join {
    fn new(branches: usize, k: Continuation) -> Self {
        Join {
            frames: RefCell::new((0..branches).map(|_| None).collect()),
            remaining: Cell::new(branches + 1),
            k: Cell::new(Some(k)),
        }
    }

    fn record(&self, idx: usize, reply: Reply) {
        self.frames.borrow_mut()[idx] = Some(reply);
        self.release();
    }

    fn release(&self) {
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);
        if remaining == 0 {
            let frames = self.frames.take();
            if let Some(k) = self.k.take() {
                k.resume(merge(frames));
            }
        }
    }
}

/// Flattens branch frames into one reply: the first error in branch order
/// (later ones are dropped) and every branch's values in branch order.
fn merge(frames: Vec<Option<Reply>>) -> Reply {
    let mut merged = Reply::done();
    for frame in frames.into_iter().flatten() {
        if merged.error.is_none() {
            merged.error = frame.error;
        }
        merged.values.extend(frame.values);
    }
    merged
}
