//! Shared environment passed to every callback
//!
//! The environment carries the named variables callbacks read and write, plus
//! the scheduler handle callbacks use to enqueue further work. The scheduler is
//! an explicit field: the runner swaps its own in for the duration of a run and
//! puts the previous one back afterwards.

use crate::types::{Callback, Result, RunnerError, Value};
use serde_json::Map;
use std::fmt;
use std::rc::Rc;

/// Enqueue capability installed on an [`Environment`]
#[derive(Clone)]
pub struct Scheduler {
    enqueue: Rc<dyn Fn(Callback)>,
}

impl Scheduler {
    /// Create a scheduler from an enqueue function
    pub fn new<F>(enqueue: F) -> Self
    where
        F: Fn(Callback) + 'static,
    {
        Self {
            enqueue: Rc::new(enqueue),
        }
    }

    /// Hand a callback to the scheduler
    pub fn schedule(&self, callback: Callback) {
        (self.enqueue)(callback)
    }

    /// True if both handles share the same enqueue function
    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.enqueue, &other.enqueue)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

/// Mutable context shared by all callbacks of a run
///
/// Cloning copies the variables only. A clone starts without a scheduler, so a
/// copy taken during a run cannot enqueue onto that run's stack after it ends.
#[derive(Debug, Default)]
pub struct Environment {
    vars: Map<String, Value>,
    scheduler: Option<Scheduler>,
}

impl Clone for Environment {
    fn clone(&self) -> Self {
        Self::with_vars(self.vars.clone())
    }
}

impl Environment {
    /// Create an empty environment with no scheduler installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment seeded with variables
    pub fn with_vars(vars: Map<String, Value>) -> Self {
        Self {
            vars,
            scheduler: None,
        }
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.vars
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Set a variable, returning its previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// Replace the installed scheduler, returning the previous one
    pub fn install_scheduler(&mut self, scheduler: Option<Scheduler>) -> Option<Scheduler> {
        std::mem::replace(&mut self.scheduler, scheduler)
    }

    /// Enqueue a callback on the installed scheduler
    ///
    /// Without a scheduler the callback is dropped and a warning is logged.
    pub fn enqueue(&self, callback: impl Into<Callback>) {
        if let Err(e) = self.try_enqueue(callback) {
            log::warn!("Dropping callback: {}", e);
        }
    }

    /// Enqueue a callback, failing if no scheduler is installed
    pub fn try_enqueue(&self, callback: impl Into<Callback>) -> Result<()> {
        match &self.scheduler {
            Some(scheduler) => {
                scheduler.schedule(callback.into());
                Ok(())
            }
            None => Err(RunnerError::NoScheduler),
        }
    }
}
