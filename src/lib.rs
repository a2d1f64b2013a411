//! # begin
//!
//! An asynchronous control construct: declare an ordered series of operations
//! that follow the error-first continuation convention and have them run one
//! at a time.
//!
//! ## Features
//!
//! - **Ordered steps**: a [`Sequence`] runs its statements strictly one after another
//! - **Nested declarations**: a handler can append steps that run right after the current one
//! - **Parallel batches**: [`Parallel`] dispatches a group together and joins it into one step
//! - **Error routing**: per-step handlers, one sequence-wide [`scope_errors`](Sequence::scope_errors)
//!   handler, and a loud [`EngineError::Unhandled`] for everything else
//! - **Lift adapters**: bring callbacks without an error slot, synchronous functions and
//!   futures into the canonical shape
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use begin::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), EngineError> {
//!     let local = tokio::task::LocalSet::new();
//!     local
//!         .run_until(async {
//!             let seq = Sequence::new();
//!             seq.append_sync(|_| Ok::<_, StepError>(json!(2)), vec![])
//!                 .append_sync(|_| Ok::<_, StepError>(json!(5)), vec![])
//!                 .on_success(|_, values| assert_eq!(values, vec![json!(5)]));
//!             seq.parallel()
//!                 .append_sync(|_| Ok::<_, StepError>(json!(2)), vec![])
//!                 .append_sync(|_| Ok::<_, StepError>(json!(3)), vec![])
//!                 .on_success(|_, values| assert_eq!(values, vec![json!(2), json!(3)]));
//!             seq.finish().await
//!         })
//!         .await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`prelude`]: Commonly used types and functions (import with `use begin::prelude::*`)
//! - [`lift`]: The lift adapters

// ============================================================================
// Core Module
// ============================================================================

mod core;

// ============================================================================
// Public Re-exports
// ============================================================================

pub use core::completion::Completion;
pub use core::config::{FatalPolicy, Launch, SequenceConfig};
pub use core::continuation::{Continuation, Operation, Reply, noop};
pub use core::error::{BoxError, EngineError, StepError};
pub use core::parallel::{Parallel, parallel};
pub use core::sequence::{Sequence, subflow};
pub use core::{Value, Values};

/// Adapters from foreign calling conventions to [`Operation`].
pub mod lift {
    pub use crate::core::lift::{
        AsyncOperation, Callback, lift_async, lift_error_first, lift_future, lift_sync,
    };
}

// ============================================================================
// Prelude
// ============================================================================

/// Everything needed to declare and run sequences.
///
/// # Example
/// ```rust
/// use begin::prelude::*;
/// ```
pub mod prelude {
    pub use super::lift::{
        AsyncOperation, Callback, lift_async, lift_error_first, lift_future, lift_sync,
    };
    pub use super::{
        Completion, Continuation, EngineError, FatalPolicy, Launch, Operation, Parallel, Reply,
        Sequence, SequenceConfig, StepError, Value, Values, noop, parallel, subflow,
    };
}

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
