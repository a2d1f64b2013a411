//! Sequencing filesystem operations with `begin`.
//!
//! This example demonstrates:
//! - Running `tokio::fs` calls one after another as steps
//! - Inserting a step from a handler when a directory is missing
//! - Reading the result of a step with `on_success`

use begin::prelude::*;
use serde_json::json;
use std::path::PathBuf;

// ============================================================================
// Steps
// ============================================================================

fn path_arg(args: &Values, idx: usize) -> Result<PathBuf, StepError> {
    args.get(idx)
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| StepError::msg(format!("argument {idx} is not a path")))
}

/// Resolves with `true` when the path exists.
fn exists() -> impl Operation {
    lift_future(|args: Values| async move {
        let found = tokio::fs::try_exists(path_arg(&args, 0)?).await?;
        Ok::<Values, StepError>(vec![json!(found)])
    })
}

fn mkdir() -> impl Operation {
    lift_future(|args: Values| async move {
        tokio::fs::create_dir(path_arg(&args, 0)?).await?;
        Ok::<Values, StepError>(vec![])
    })
}

fn write_file() -> impl Operation {
    lift_future(|args: Values| async move {
        let path = path_arg(&args, 0)?;
        let contents = args.get(1).and_then(Value::as_str).unwrap_or_default();
        tokio::fs::write(&path, contents).await?;
        Ok::<Values, StepError>(vec![])
    })
}

fn read_file() -> impl Operation {
    lift_future(|args: Values| async move {
        let data = tokio::fs::read_to_string(path_arg(&args, 0)?).await?;
        Ok::<Values, StepError>(vec![json!(data)])
    })
}

fn unlink() -> impl Operation {
    lift_future(|args: Values| async move {
        tokio::fs::remove_file(path_arg(&args, 0)?).await?;
        Ok::<Values, StepError>(vec![])
    })
}

fn rmdir() -> impl Operation {
    lift_future(|args: Values| async move {
        tokio::fs::remove_dir(path_arg(&args, 0)?).await?;
        Ok::<Values, StepError>(vec![])
    })
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), EngineError> {
    let dir = std::env::temp_dir().join("begin-demo-a");
    let file = dir.join("b");
    let (dir, file) = (
        json!(dir.to_string_lossy()),
        json!(file.to_string_lossy()),
    );

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let seq = Sequence::with_config(SequenceConfig::new().name("filesystem"));
            let target = dir.clone();
            seq.append(exists(), vec![dir.clone()])
                .on_success(move |seq, values| {
                    if values.first() != Some(&json!(true)) {
                        seq.begin_nested().append(mkdir(), vec![target]);
                    }
                })
                .append(write_file(), vec![file.clone(), json!("Hello, world!")])
                .append(read_file(), vec![file.clone()])
                .on_success(|_, values| {
                    let data = values.first().and_then(Value::as_str).unwrap_or_default();
                    println!("DATA: {data}");
                })
                .append(unlink(), vec![file])
                .append(rmdir(), vec![dir.clone()])
                .append(exists(), vec![dir.clone()])
                .on_success(move |_, values| {
                    let still_there = values.first() == Some(&json!(true));
                    println!(
                        "RESULT: {} was{} removed.",
                        dir.as_str().unwrap_or_default(),
                        if still_there { " not" } else { "" }
                    );
                });

            seq.finish().await
        })
        .await
}
