//! Core types for the callback runner library
//!
//! This module defines the callback handle, the run outcome and report types,
//! and the error type returned when scheduling fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

use crate::env::Environment;

/// Timestamp type used throughout the runner
pub type Timestamp = DateTime<Utc>;

/// Values stored in an [`Environment`]
pub type Value = serde_json::Value;

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while scheduling work
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("No scheduler installed on environment")]
    NoScheduler,
}

/// A scheduled unit of work taking the environment as its only argument
///
/// Cloning a callback is cheap: clones share the same underlying closure, so a
/// callback can enqueue a copy of itself.
#[derive(Clone)]
pub struct Callback {
    label: Option<Rc<str>>,
    func: Rc<dyn Fn(&mut Environment)>,
}

impl Callback {
    /// Wrap a closure or function as a callback
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&mut Environment) + 'static,
    {
        Self {
            label: None,
            func: Rc::new(func),
        }
    }

    /// Wrap a closure and attach a label used in trace logging
    pub fn labeled<F>(label: impl Into<Rc<str>>, func: F) -> Self
    where
        F: Fn(&mut Environment) + 'static,
    {
        Self {
            label: Some(label.into()),
            func: Rc::new(func),
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Invoke the callback synchronously
    pub fn invoke(&self, env: &mut Environment) {
        (self.func)(env)
    }

    /// True if both handles share the same closure
    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("label", &self.label())
            .finish_non_exhaustive()
    }
}

impl<F> From<F> for Callback
where
    F: Fn(&mut Environment) + 'static,
{
    fn from(func: F) -> Self {
        Callback::new(func)
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// The callback stack emptied and the run ended normally
    Drained,
    /// The iteration ceiling was exceeded before the stack emptied
    Overflowed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Drained => write!(f, "drained"),
            RunOutcome::Overflowed => write!(f, "overflowed"),
        }
    }
}

/// Summary of a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Number of callbacks invoked
    pub invocations: usize,
    /// Ceiling in force for this run
    pub ceiling: usize,
    /// Callbacks left on the stack when the run overflowed
    pub discarded: usize,
    /// When the run started
    pub started_at: Timestamp,
    /// When the run finished
    pub finished_at: Timestamp,
}

impl RunReport {
    pub fn is_drained(&self) -> bool {
        self.outcome == RunOutcome::Drained
    }

    pub fn is_overflowed(&self) -> bool {
        self.outcome == RunOutcome::Overflowed
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Message reported when a run exceeds its ceiling
pub fn overflow_message(ceiling: usize) -> String {
    format!("Stack overflow error. Stack depth is {}", ceiling)
}
