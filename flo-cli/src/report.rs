//! Report generation
//!
//! Renders the outcome of a flow run as plain text or JSON.

use flo_runner::{Environment, RunReport};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Write;

/// Everything the report shows about one run
#[derive(Debug, Clone, Serialize)]
pub struct FlowReport<'a> {
    pub flow: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(flatten)]
    pub run: &'a RunReport,
    pub elapsed_ms: i64,
    pub messages: &'a [String],
    pub errors: &'a [String],
    pub vars: &'a Map<String, Value>,
}

impl<'a> FlowReport<'a> {
    pub fn new(flow: &'a str, run: &'a RunReport, env: &'a Environment) -> Self {
        Self {
            flow,
            description: None,
            run,
            elapsed_ms: run.elapsed().num_milliseconds(),
            messages: Default::default(),
            errors: Default::default(),
            vars: env.vars(),
        }
    }

    pub fn with_description(mut self, description: Option<&'a str>) -> Self {
        self.description = description;
        self
    }

    pub fn with_messages(mut self, messages: &'a [String]) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_errors(mut self, errors: &'a [String]) -> Self {
        self.errors = errors;
        self
    }

    /// Render as plain text
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "───────────────────────────────────────────────";

        // Writing to a String cannot fail
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "  Flow: {}", self.flow);
        if let Some(description) = self.description {
            let _ = writeln!(out, "  {}", description);
        }
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Outcome:     {}", self.run.outcome);
        let _ = writeln!(
            out,
            "Invocations: {} (ceiling {})",
            self.run.invocations, self.run.ceiling
        );
        if self.run.discarded > 0 {
            let _ = writeln!(out, "Discarded:   {}", self.run.discarded);
        }
        let _ = writeln!(
            out,
            "Started:     {}",
            self.run.started_at.format("%Y-%m-%d %H:%M:%S%.3f UTC")
        );
        let _ = writeln!(out, "Elapsed:     {} ms", self.elapsed_ms);

        if !self.errors.is_empty() {
            let _ = writeln!(out, "\nErrors:");
            for error in self.errors {
                let _ = writeln!(out, "  ✗ {}", error);
            }
        }

        if !self.messages.is_empty() {
            let _ = writeln!(out, "\nMessages:");
            for message in self.messages {
                let _ = writeln!(out, "  • {}", message);
            }
        }

        let _ = writeln!(out, "\nVariables:");
        if self.vars.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for (name, value) in self.vars {
            let _ = writeln!(out, "  {} = {}", name, value);
        }

        out
    }

    /// Render as a JSON value
    pub fn render_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
