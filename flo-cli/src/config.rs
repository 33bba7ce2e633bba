//! Flow definition loading and parsing
//!
//! A flow file is TOML: a name, optional runner settings, initial variables,
//! and the list of nodes with the arrows leaving them.

use anyhow::{bail, Context, Result};
use flo_runner::{RunnerConfig, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::callbacks::Condition;

/// Flow definition (loaded from a .toml file)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub vars: Map<String, Value>,
    pub nodes: Vec<NodeConfig>,
}

fn default_name() -> String {
    "unnamed flow".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Start,
    Logic,
    Decision,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    pub id: String,
    pub kind: NodeKind,
    /// Logic nodes only; a logic node without an action does nothing
    pub action: Option<ActionConfig>,
    /// Decision nodes only
    pub condition: Option<String>,
    /// Successor of start and logic nodes
    pub next: Option<String>,
    /// Branch taken when the condition holds
    pub yes: Option<String>,
    /// Branch taken when the condition fails
    pub no: Option<String>,
}

/// Declarative action run by a logic node
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionConfig {
    Set { var: String, value: Value },
    Add { var: String, value: Number },
    Remove { var: String },
    Message(String),
}

/// Load a flow definition from a TOML file
pub fn load_config(path: &Path) -> Result<FlowConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read flow file: {:?}", path))?;

    let config = parse_config(&content)
        .with_context(|| format!("Failed to load flow file: {:?}", path))?;

    Ok(config)
}

/// Parse and validate a flow definition
pub fn parse_config(content: &str) -> Result<FlowConfig> {
    let config: FlowConfig = toml::from_str(content).context("Invalid flow definition")?;
    validate(&config)?;
    Ok(config)
}

/// Check node references and per-kind fields
///
/// Graph shape (single entry, decision arity) is checked again when the flow
/// compiles; this pass catches mistakes that only make sense in the file
/// format, such as unknown ids or a `yes` on a logic node.
pub fn validate(config: &FlowConfig) -> Result<()> {
    let mut ids = HashSet::new();
    for node in &config.nodes {
        if !ids.insert(node.id.as_str()) {
            bail!("Duplicate node id '{}'", node.id);
        }
    }

    for node in &config.nodes {
        for target in [&node.next, &node.yes, &node.no].into_iter().flatten() {
            if !ids.contains(target.as_str()) {
                bail!("Node '{}' points to unknown node '{}'", node.id, target);
            }
        }

        match node.kind {
            NodeKind::Start | NodeKind::Logic => {
                if node.yes.is_some() || node.no.is_some() || node.condition.is_some() {
                    bail!("Node '{}' is not a decision and cannot branch", node.id);
                }
                if node.kind == NodeKind::Start && node.action.is_some() {
                    bail!("Start node '{}' cannot have an action", node.id);
                }
            }
            NodeKind::Decision => {
                if node.action.is_some() || node.next.is_some() {
                    bail!("Decision '{}' takes 'yes' and 'no', not 'next' or 'action'", node.id);
                }
                let condition = node
                    .condition
                    .as_deref()
                    .with_context(|| format!("Decision '{}' has no condition", node.id))?;
                Condition::parse(condition)
                    .with_context(|| format!("Decision '{}' has an invalid condition", node.id))?;
                if node.yes.is_none() || node.no.is_none() {
                    bail!("Decision '{}' needs both 'yes' and 'no'", node.id);
                }
            }
        }
    }

    Ok(())
}
