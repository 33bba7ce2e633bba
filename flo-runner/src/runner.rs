//! Main runner API
//!
//! This module provides the [`CallbackRunner`], which drains a last-in-first-out
//! stack of callbacks against a shared [`Environment`]. Callbacks schedule more
//! work through the environment's scheduler; the runner stops when the stack is
//! empty or when the iteration ceiling is exceeded.

use crate::config::RunnerConfig;
use crate::env::{Environment, Scheduler};
use crate::reporter::{ErrorReporter, LogReporter};
use crate::types::{overflow_message, Callback, RunOutcome, RunReport};
use chrono::Utc;
use std::cell::RefCell;
use std::rc::Rc;

/// Last-in-first-out stack of pending callbacks
#[derive(Debug, Default)]
pub struct CallbackStack {
    entries: Vec<Callback>,
}

impl CallbackStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Callback) {
        self.entries.push(callback);
    }

    pub fn pop(&mut self) -> Option<Callback> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending callback, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        discarded
    }
}

/// Restores the environment's previous scheduler when dropped
///
/// Dropping also happens while unwinding, so a panicking callback cannot leak
/// the run's scheduler into the host's environment.
struct SchedulerGuard<'a> {
    env: &'a mut Environment,
    previous: Option<Scheduler>,
}

impl<'a> SchedulerGuard<'a> {
    fn install(env: &'a mut Environment, scheduler: Scheduler) -> Self {
        let previous = env.install_scheduler(Some(scheduler));
        Self { env, previous }
    }
}

impl Drop for SchedulerGuard<'_> {
    fn drop(&mut self) {
        self.env.install_scheduler(self.previous.take());
    }
}

/// Drains callbacks until the stack empties or the ceiling is exceeded
pub struct CallbackRunner {
    config: RunnerConfig,
    reporter: Box<dyn ErrorReporter>,
}

impl CallbackRunner {
    /// Create a runner with default settings that reports through `log`
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a runner with the given configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            reporter: Box::new(LogReporter),
        }
    }

    /// Builder method: replace the error reporter
    pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `entry` and everything it schedules, using the configured ceiling
    pub fn run(&self, entry: Callback, env: &mut Environment) -> RunReport {
        self.run_with_ceiling(entry, env, self.config.max_iterations)
    }

    /// Run `entry` and everything it schedules, bounded by `ceiling`
    ///
    /// Each cycle pops the most recently scheduled callback and invokes it with
    /// `env`. The run ends [`RunOutcome::Drained`] when the stack empties, or
    /// [`RunOutcome::Overflowed`] once more than `ceiling` callbacks have been
    /// invoked. On overflow the remaining callbacks are discarded and the
    /// reporter receives a message naming the ceiling.
    ///
    /// Whatever scheduler `env` carried before the call is back in place when
    /// this returns.
    ///
    /// # Example
    /// ```
    /// use flo_runner::{Callback, CallbackRunner, Environment};
    ///
    /// let runner = CallbackRunner::new();
    /// let mut env = Environment::new();
    /// let entry = Callback::new(|env| {
    ///     env.set("greeting", "hello");
    /// });
    ///
    /// let report = runner.run_with_ceiling(entry, &mut env, 10);
    /// assert!(report.is_drained());
    /// assert_eq!(report.invocations, 1);
    /// ```
    pub fn run_with_ceiling(
        &self,
        entry: Callback,
        env: &mut Environment,
        ceiling: usize,
    ) -> RunReport {
        let started_at = Utc::now();
        log::debug!("Starting run (ceiling: {})", ceiling);

        let stack = Rc::new(RefCell::new(CallbackStack::new()));
        let sink = Rc::clone(&stack);
        let scheduler = Scheduler::new(move |callback| sink.borrow_mut().push(callback));
        let guard = SchedulerGuard::install(env, scheduler);

        stack.borrow_mut().push(entry);

        let mut invocations: usize = 0;
        let mut discarded = 0;
        let outcome = loop {
            // The borrow must end before the callback runs, it may enqueue
            let next = stack.borrow_mut().pop();
            let Some(callback) = next else {
                break RunOutcome::Drained;
            };

            if self.config.trace_callbacks {
                log::trace!(
                    "Invoking callback {} ({})",
                    invocations + 1,
                    callback.label().unwrap_or("anonymous")
                );
            }

            callback.invoke(&mut *guard.env);
            invocations += 1;

            if invocations > ceiling {
                discarded = stack.borrow_mut().clear();
                log::warn!(
                    "Run exceeded ceiling of {} after {} invocations, discarding {} pending callbacks",
                    ceiling,
                    invocations,
                    discarded
                );
                self.reporter.error_message(&overflow_message(ceiling));
                break RunOutcome::Overflowed;
            }
        };

        drop(guard);

        log::debug!("Run {} after {} invocations", outcome, invocations);
        RunReport {
            outcome,
            invocations,
            ceiling,
            discarded,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Default for CallbackRunner {
    fn default() -> Self {
        Self::new()
    }
}
