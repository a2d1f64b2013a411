//! End-to-end behaviour of the declaration API.
//!
//! Every step here resumes from a spawned local task, so each test runs
//! inside a `LocalSet`. Assertions inside handlers would be swallowed by the
//! task they run on, so handlers record what they saw and the test checks it
//! after the sequence drains.

use begin::prelude::*;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tokio::task::LocalSet;
use tokio::time::{Duration, sleep};

/// Shared increment used by the `inc`, `minc` and `set_inc` steps.
#[derive(Clone, Default)]
struct Counter(Rc<Cell<i64>>);

impl Counter {
    fn set_inc(&self) -> impl Operation + use<> {
        let increment = Rc::clone(&self.0);
        lift_future(move |args: Values| {
            let increment = Rc::clone(&increment);
            async move {
                sleep(Duration::from_millis(1)).await;
                increment.set(int(&args, 0)?);
                Ok::<Values, StepError>(vec![])
            }
        })
    }

    fn inc(&self) -> impl Operation + use<> {
        let increment = Rc::clone(&self.0);
        lift_future(move |args: Values| {
            let increment = Rc::clone(&increment);
            async move {
                sleep(Duration::from_millis(1)).await;
                Ok::<Values, StepError>(vec![json!(int(&args, 0)? + increment.get())])
            }
        })
    }

    fn minc(&self) -> impl Operation + use<> {
        let increment = Rc::clone(&self.0);
        lift_future(move |args: Values| {
            let increment = Rc::clone(&increment);
            async move {
                sleep(Duration::from_millis(1)).await;
                Ok::<Values, StepError>(vec![
                    json!(int(&args, 0)? + increment.get()),
                    json!(int(&args, 1)? + increment.get()),
                ])
            }
        })
    }
}

fn int(args: &Values, idx: usize) -> Result<i64, StepError> {
    args.get(idx)
        .and_then(Value::as_i64)
        .ok_or_else(|| StepError::msg(format!("argument {idx} is not an integer")))
}

fn fails(_args: Values, k: Continuation) {
    k.fail(StepError::msg("Always fails."));
}

type Log = Rc<RefCell<Vec<Value>>>;

fn record(log: &Log) -> impl FnOnce(&Sequence, Values) + use<> {
    let log = Rc::clone(log);
    move |_, values| log.borrow_mut().extend(values)
}

#[tokio::test]
async fn test_begin_runs_steps_in_order() {
    LocalSet::new()
        .run_until(async {
            let counter = Counter::default();
            let seen: Log = Rc::default();

            let seq = Sequence::new();
            seq.append(counter.set_inc(), vec![json!(2)])
                .append(counter.inc(), vec![json!(3)])
                .on_success(record(&seen));

            seq.finish().await.unwrap();
            assert_eq!(*seen.borrow(), vec![json!(5)]);
        })
        .await;
}

#[tokio::test]
async fn test_nested_statements_run_before_later_ones() {
    LocalSet::new()
        .run_until(async {
            let counter = Counter::default();
            let seen: Log = Rc::default();

            let seq = Sequence::new();
            let nested_counter = counter.clone();
            let nested_seen = Rc::clone(&seen);
            seq.append(counter.set_inc(), vec![json!(2)])
                .append(counter.inc(), vec![json!(1)])
                .on_success(move |seq, values| {
                    nested_seen.borrow_mut().extend(values.clone());
                    seq.begin_nested()
                        .append(nested_counter.set_inc(), values)
                        .append(nested_counter.inc(), vec![json!(4)])
                        .on_success(record(&nested_seen));
                })
                .append(counter.inc(), vec![json!(1)])
                .on_success(record(&seen));

            seq.finish().await.unwrap();
            assert_eq!(*seen.borrow(), vec![json!(3), json!(7), json!(4)]);
        })
        .await;
}

#[tokio::test]
async fn test_parallel_results_in_branch_order() {
    LocalSet::new()
        .run_until(async {
            let counter = Counter::default();
            let seen: Log = Rc::default();

            let seq = Sequence::new();
            seq.append(counter.set_inc(), vec![json!(1)])
                .parallel()
                .append(counter.inc(), vec![json!(1)])
                .append(counter.inc(), vec![json!(2)])
                .append(counter.minc(), vec![json!(3), json!(4)])
                .on_success(record(&seen));

            seq.finish().await.unwrap();
            assert_eq!(
                *seen.borrow(),
                vec![json!(2), json!(3), json!(4), json!(5)]
            );
        })
        .await;
}

#[tokio::test]
async fn test_success_and_error_specializations() {
    LocalSet::new()
        .run_until(async {
            let counter = Counter::default();
            let seen: Log = Rc::default();
            let errors = Rc::new(RefCell::new(Vec::new()));

            let seq = Sequence::new();
            let sink = Rc::clone(&errors);
            seq.append(counter.set_inc(), vec![json!(1)])
                .append(counter.inc(), vec![json!(2)])
                .on_success(record(&seen))
                .append(fails, vec![])
                .on_error(move |_, err| sink.borrow_mut().push(err.to_string()));

            seq.finish().await.unwrap();
            assert_eq!(*seen.borrow(), vec![json!(3)]);
            assert_eq!(*errors.borrow(), vec!["Always fails.".to_string()]);
        })
        .await;
}

#[tokio::test]
async fn test_scoped_handler_catches_and_sequence_continues() {
    LocalSet::new()
        .run_until(async {
            let counter = Counter::default();
            let seen: Log = Rc::default();
            let caught = Rc::new(RefCell::new(None));
            let ended = Rc::new(Cell::new(false));

            let seq = Sequence::new();
            let sink = Rc::clone(&caught);
            let end = Rc::clone(&ended);
            seq.scope_errors(move |_, err| *sink.borrow_mut() = Some(err.to_string()))
                .append(fails, vec![])
                .append(counter.set_inc(), vec![json!(2)])
                .append(counter.inc(), vec![json!(1)])
                .on_success(record(&seen));

            seq.finish_with(move |_, reply| {
                assert!(!reply.is_err());
                end.set(true);
            })
            .await
            .unwrap();

            assert_eq!(*seen.borrow(), vec![json!(3)]);
            assert_eq!(caught.borrow().as_deref(), Some("Always fails."));
            assert!(ended.get());
        })
        .await;
}

#[tokio::test]
async fn test_unhandled_failure_halts_and_is_reported() {
    LocalSet::new()
        .run_until(async {
            let counter = Counter::default();
            let seen: Log = Rc::default();

            let seq = Sequence::with_config(SequenceConfig::new().name("loud"));
            seq.append(fails, vec![])
                .append(counter.inc(), vec![json!(1)])
                .on_success(record(&seen));

            let outcome = seq.finish().await;
            match outcome {
                Err(EngineError::Unhandled { sequence, source }) => {
                    assert_eq!(sequence, "loud");
                    assert_eq!(source.to_string(), "Always fails.");
                }
                other => panic!("expected an unhandled failure, got {other:?}"),
            }
            assert!(seq.is_halted());
            assert_eq!(seq.pending(), 0);
            assert!(seen.borrow().is_empty());
        })
        .await;
}

#[tokio::test]
async fn test_deferred_launch_runs_without_finish() {
    LocalSet::new()
        .run_until(async {
            let seen: Log = Rc::default();

            let seq = Sequence::new();
            seq.append_sync(|_| Ok::<_, StepError>(json!("ran")), vec![])
                .on_success(record(&seen));

            assert!(seen.borrow().is_empty());
            sleep(Duration::from_millis(5)).await;
            assert_eq!(*seen.borrow(), vec![json!("ran")]);
            assert!(!seq.is_running());
        })
        .await;
}

#[tokio::test]
async fn test_error_first_steps_receive_success_slot() {
    LocalSet::new()
        .run_until(async {
            let replies = Rc::new(RefCell::new(Vec::new()));

            let seq = Sequence::new();
            let sink = Rc::clone(&replies);
            seq.append_error_first(
                |args: Values, callback: Callback| callback(args),
                vec![json!("a"), json!("b")],
            )
            .bind(move |_, reply| sink.borrow_mut().push(reply));

            seq.finish().await.unwrap();
            let replies = replies.borrow();
            assert_eq!(replies.len(), 1);
            assert!(replies[0].error.is_none());
            assert_eq!(replies[0].values, vec![json!("a"), json!("b")]);
        })
        .await;
}

fn staged(
    name: &'static str,
    millis: u64,
    events: &Rc<RefCell<Vec<String>>>,
) -> impl Operation + use<> {
    let events = Rc::clone(events);
    lift_future(move |_: Values| {
        let events = Rc::clone(&events);
        async move {
            events.borrow_mut().push(format!("{name} start"));
            sleep(Duration::from_millis(millis)).await;
            events.borrow_mut().push(format!("{name} end"));
            Ok::<Values, StepError>(vec![])
        }
    })
}

#[tokio::test]
async fn test_async_steps_never_overlap() {
    LocalSet::new()
        .run_until(async {
            let events = Rc::new(RefCell::new(Vec::new()));

            let seq = Sequence::new();
            seq.append(staged("a", 20, &events), vec![])
                .append(staged("b", 5, &events), vec![])
                .append(staged("c", 1, &events), vec![]);

            seq.finish().await.unwrap();
            assert_eq!(
                *events.borrow(),
                vec!["a start", "a end", "b start", "b end", "c start", "c end"]
            );
        })
        .await;
}
