pub mod binder;
pub mod completion;
pub mod config;
pub mod continuation;
pub mod error;
pub mod lift;
pub mod parallel;
pub mod sequence;

/// The value type of step arguments and results.
pub type Value = serde_json::Value;

/// Positional arguments or results of one step.
pub type Values = Vec<Value>;
