//! Using a sequence to implement an operation.
//!
//! `touch` is built with [`subflow`]: from the outside it looks like any
//! other step, and a failure anywhere inside it fails that step. The error
//! handler on the outer sequence reports it.
//!
//! `exists` reports through a callback with no error slot, so it goes in with
//! `append_error_first`.

use begin::prelude::*;
use serde_json::json;
use std::path::PathBuf;

fn path_arg(args: &Values) -> Result<PathBuf, StepError> {
    args.first()
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| StepError::msg("expected a path"))
}

fn open() -> impl Operation {
    lift_future(|args: Values| async move {
        let path = path_arg(&args)?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok::<Values, StepError>(args)
    })
}

fn sync() -> impl Operation {
    lift_future(|args: Values| async move {
        let file = tokio::fs::File::open(path_arg(&args)?).await?;
        file.sync_all().await?;
        Ok::<Values, StepError>(vec![])
    })
}

fn unlink() -> impl Operation {
    lift_future(|args: Values| async move {
        tokio::fs::remove_file(path_arg(&args)?).await?;
        Ok::<Values, StepError>(vec![])
    })
}

/// Answers through a plain callback with no error slot.
fn exists(args: Values, callback: Callback) {
    let found = path_arg(&args).map(|path| path.exists()).unwrap_or(false);
    callback(vec![json!(found)]);
}

fn touch() -> impl Operation {
    subflow(|seq, args| {
        seq.append(open(), args).on_success(|seq, opened| {
            seq.begin_nested().append(sync(), opened);
        });
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), EngineError> {
    let tmp = std::env::temp_dir();
    let p1 = json!(tmp.join("begin-demo-t1").to_string_lossy());
    let p2 = json!(tmp.join("begin-demo-t2").to_string_lossy());

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let seq = Sequence::with_config(SequenceConfig::new().name("touch"));
            seq.scope_errors(|_, err| eprintln!("touch failed: {err}"));
            seq.parallel()
                .append(touch(), vec![p1.clone()])
                .append(touch(), vec![p2.clone()])
                .parallel()
                .append_error_first(exists, vec![p1.clone()])
                .append_error_first(exists, vec![p2.clone()])
                .on_success(|_, values| {
                    let both = values.iter().all(|v| v == &json!(true));
                    println!("Touch {}.", if both { "succeeded" } else { "failed" });
                })
                .parallel()
                .append(unlink(), vec![p1])
                .append(unlink(), vec![p2])
                .finish()
                .await
        })
        .await
}
