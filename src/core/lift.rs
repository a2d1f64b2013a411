//! Adapters from foreign calling conventions to [`Operation`].
//!
//! - [`lift_error_first`] for callbacks that carry values but no error slot
//! - [`lift_sync`] for plain functions returning a `Result`
//! - [`lift_future`] and [`lift_async`] for futures, run on the current tokio `LocalSet`
//!
//! Panics raised by the wrapped code are reported as [`StepError::Panicked`].
//! `lift_sync` does not make the wrapped call non-blocking; it only gives it
//! the canonical shape.

use std::cell::Cell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::core::continuation::{Continuation, Operation, Reply};
use crate::core::error::StepError;
use crate::core::{Value, Values};

/// A callback without an error slot.
pub type Callback = Box<dyn FnOnce(Values)>;

/// Lifts a function whose callback receives only values.
///
/// A panic inside `foreign` fails the step if the callback has not fired yet.
/// Once it has fired the rest of the sequence ran inside that call, so a
/// later panic came from downstream code and is resumed unchanged.
pub fn lift_error_first<F>(foreign: F) -> impl Operation
where
    F: Fn(Values, Callback) + 'static,
{
    move |args: Values, k: Continuation| {
        let slot = Rc::new(Cell::new(Some(k)));

        let callback_slot = Rc::clone(&slot);
        let callback: Callback = Box::new(move |values| {
            if let Some(k) = callback_slot.take() {
                k.ok(values);
            }
        });

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| foreign(args, callback))) {
            match slot.take() {
                Some(k) => k.fail(StepError::from_panic(&*payload)),
                None => panic::resume_unwind(payload),
            }
        }
    }
}

/// Lifts a synchronous function. Its return value becomes the single result
/// value; its error becomes the step failure.
pub fn lift_sync<F, E>(f: F) -> impl Operation
where
    F: Fn(Values) -> Result<Value, E> + 'static,
    E: Into<StepError> + 'static,
{
    move |args: Values, k: Continuation| match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
        Ok(Ok(value)) => k.ok(vec![value]),
        Ok(Err(err)) => k.fail(err),
        Err(payload) => k.fail(StepError::from_panic(&*payload)),
    }
}

/// Lifts a function returning a future. The future is spawned with
/// `tokio::task::spawn_local` and its output resumes the continuation.
pub fn lift_future<F, Fut>(f: F) -> impl Operation
where
    F: Fn(Values) -> Fut + 'static,
    Fut: Future<Output = Result<Values, StepError>> + 'static,
{
    move |args: Values, k: Continuation| match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
        Ok(future) => spawn_reply(future, k),
        Err(payload) => k.fail(StepError::from_panic(&*payload)),
    }
}

/// An asynchronous operation written as a trait object, in the style of an
/// async node.
#[async_trait(?Send)]
pub trait AsyncOperation: 'static {
    async fn call(&self, args: Values) -> Result<Values, StepError>;
}

/// Lifts an [`AsyncOperation`]. See [`lift_future`].
pub fn lift_async<A: AsyncOperation>(op: A) -> impl Operation {
    let op = Rc::new(op);
    move |args: Values, k: Continuation| {
        let op = Rc::clone(&op);
        spawn_reply(async move { op.call(args).await }, k);
    }
}

fn spawn_reply<Fut>(future: Fut, k: Continuation)
where
    Fut: Future<Output = Result<Values, StepError>> + 'static,
{
    tokio::task::spawn_local(async move {
        let reply = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => Reply::from(result),
            Err(payload) => Reply::fail(StepError::from_panic(&*payload)),
        };
        k.resume(reply);
    });
}
