//! Running batches of operations with `parallel()`.
//!
//! Two files are written together, read back together and removed together.
//! Each batch is one step, so the reads only start once both writes finished.

use begin::prelude::*;
use serde_json::json;
use std::path::PathBuf;

fn path_arg(args: &Values) -> Result<PathBuf, StepError> {
    args.first()
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| StepError::msg("expected a path"))
}

fn write_file() -> impl Operation {
    lift_future(|args: Values| async move {
        let contents = args.get(1).and_then(Value::as_str).unwrap_or_default();
        tokio::fs::write(path_arg(&args)?, contents).await?;
        Ok::<Values, StepError>(vec![])
    })
}

fn read_file() -> impl Operation {
    lift_future(|args: Values| async move {
        let data = tokio::fs::read_to_string(path_arg(&args)?).await?;
        Ok::<Values, StepError>(vec![json!(data)])
    })
}

fn unlink() -> impl Operation {
    lift_future(|args: Values| async move {
        tokio::fs::remove_file(path_arg(&args)?).await?;
        Ok::<Values, StepError>(vec![])
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), EngineError> {
    let tmp = std::env::temp_dir();
    let p1 = json!(tmp.join("begin-demo-p1").to_string_lossy());
    let p2 = json!(tmp.join("begin-demo-p2").to_string_lossy());

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            parallel()
                .append(write_file(), vec![p1.clone(), json!("File 1")])
                .append(write_file(), vec![p2.clone(), json!("File 2")])
                .parallel()
                .append(read_file(), vec![p1.clone()])
                .append(read_file(), vec![p2.clone()])
                .on_success(|_, values| {
                    for (idx, data) in values.iter().enumerate() {
                        println!("P{}: {}", idx + 1, data.as_str().unwrap_or_default());
                    }
                })
                .parallel()
                .append(unlink(), vec![p1])
                .append(unlink(), vec![p2])
                .finish()
                .await
        })
        .await
}
