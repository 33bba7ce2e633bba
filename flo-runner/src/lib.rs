//! Flo Runner Library
//!
//! A small cooperative callback runner. Callbacks take a shared
//! [`Environment`], do their work, and schedule further callbacks through the
//! environment's scheduler. The runner drains them last-in-first-out until
//! nothing is left or an iteration ceiling is exceeded.
//!
//! # Architecture
//!
//! - [`CallbackRunner`] owns the loop: pop, invoke, count, check the ceiling
//! - [`Environment`] carries variables and the installed [`Scheduler`]
//! - [`ErrorReporter`] is the host's diagnostic surface for overflow messages
//! - [`FlowGraph`] compiles start/logic/decision diagrams into callbacks
//!
//! Everything is single-threaded and synchronous: each callback runs to
//! completion before the next one is popped.
//!
//! The library does NOT:
//! - Load flow definitions from files
//! - Print reports
//!
//! Both live in the application layer (flo-cli).
//!
//! # Example Usage
//!
//! ```
//! use flo_runner::{Callback, CallbackRunner, CollectingReporter, Environment, RunnerConfig};
//!
//! fn tick(env: &mut Environment) {
//!     let ticks = env.get("ticks").and_then(|v| v.as_i64()).unwrap_or(0);
//!     env.set("ticks", ticks + 1);
//!     env.enqueue(Callback::new(tick));
//! }
//!
//! let reporter = CollectingReporter::new();
//! let runner = CallbackRunner::with_config(RunnerConfig::new().with_max_iterations(3))
//!     .with_reporter(reporter.clone());
//!
//! let mut env = Environment::new();
//! let report = runner.run(Callback::new(tick), &mut env);
//!
//! assert!(report.is_overflowed());
//! assert_eq!(report.invocations, 4);
//! assert_eq!(reporter.messages(), vec!["Stack overflow error. Stack depth is 3"]);
//! ```

// Public modules
pub mod config;
pub mod env;
pub mod flow;
pub mod reporter;
pub mod runner;
pub mod types;

// Re-export main types for convenience
pub use config::{RunnerConfig, DEFAULT_MAX_ITERATIONS};
pub use env::{Environment, Scheduler};
pub use flow::{ArrowCondition, CompiledFlow, FlowError, FlowGraph, NodeId, ENTRY_FUNCTION};
pub use reporter::{CollectingReporter, ErrorReporter, LogReporter};
pub use runner::{CallbackRunner, CallbackStack};
pub use types::{
    overflow_message, Callback, Result, RunOutcome, RunReport, RunnerError, Timestamp, Value,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: ensure we can create a runner
        let runner = CallbackRunner::new();
        assert_eq!(runner.config().max_iterations, DEFAULT_MAX_ITERATIONS);
    }
}
