//! Diagnostic surface for run failures
//!
//! The runner never fails hard. When a run exceeds its ceiling it hands a
//! message to the host's [`ErrorReporter`] and stops.

use std::cell::RefCell;
use std::rc::Rc;

/// Host-provided sink for diagnostic messages
pub trait ErrorReporter {
    fn error_message(&self, message: &str);
}

/// Reporter that forwards messages to the `log` facade at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn error_message(&self, message: &str) {
        log::error!("{}", message);
    }
}

/// Reporter that keeps every message in a shared buffer
///
/// Clones share the buffer, so the host can keep one handle and give another
/// to the runner.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    messages: Rc<RefCell<Vec<String>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the messages reported so far
    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }
}

impl ErrorReporter for CollectingReporter {
    fn error_message(&self, message: &str) {
        self.messages.borrow_mut().push(message.to_string());
    }
}
