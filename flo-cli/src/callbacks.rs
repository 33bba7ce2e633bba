//! Declarative callbacks
//!
//! Turns the actions and conditions of a flow file into closures and wires
//! them into a [`FlowGraph`] ready to compile.

use anyhow::{Context, Result};
use flo_runner::{ArrowCondition, Environment, FlowGraph, NodeId, Value};
use serde_json::Number;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::config::{ActionConfig, FlowConfig, NodeKind};

/// Errors raised while parsing a condition expression
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("No comparison operator in '{0}'")]
    MissingOperator(String),

    #[error("Left side of '{0}' must be a variable name")]
    InvalidVariable(String),

    #[error("Right side of '{0}' must be a literal or a variable name")]
    InvalidOperand(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    // Two-character operators first so "<=" is not read as "<"
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    fn symbol(self) -> &'static str {
        Self::OPERATORS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(symbol, _)| *symbol)
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Var(String),
    Literal(Value),
}

impl Operand {
    fn resolve(&self, env: &Environment) -> Value {
        match self {
            Operand::Var(name) => env.get(name).cloned().unwrap_or(Value::Null),
            Operand::Literal(value) => value.clone(),
        }
    }
}

/// Comparison of a variable against a literal or another variable
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub var: String,
    pub op: Comparison,
    pub rhs: Operand,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl Condition {
    /// Parse `<var> <op> <literal-or-var>`
    ///
    /// The right side is read as JSON first (`3`, `"done"`, `true`, `null`)
    /// and as a variable name otherwise.
    pub fn parse(expr: &str) -> std::result::Result<Self, ConditionError> {
        let (index, symbol, op) = expr
            .char_indices()
            .find_map(|(i, _)| {
                Comparison::OPERATORS
                    .iter()
                    .find(|(symbol, _)| expr[i..].starts_with(symbol))
                    .map(|(symbol, op)| (i, *symbol, *op))
            })
            .ok_or_else(|| ConditionError::MissingOperator(expr.to_string()))?;

        let lhs = expr[..index].trim();
        let rhs = expr[index + symbol.len()..].trim();

        if !is_identifier(lhs) {
            return Err(ConditionError::InvalidVariable(expr.to_string()));
        }

        let rhs = match serde_json::from_str::<Value>(rhs) {
            Ok(value) => Operand::Literal(value),
            Err(_) if is_identifier(rhs) => Operand::Var(rhs.to_string()),
            Err(_) => return Err(ConditionError::InvalidOperand(expr.to_string())),
        };

        Ok(Self {
            var: lhs.to_string(),
            op,
            rhs,
        })
    }

    /// Evaluate against the environment
    ///
    /// Numbers compare numerically. Anything else only supports `==` and
    /// `!=`; ordering comparisons on non-numbers are false. Missing variables
    /// read as `null`.
    pub fn evaluate(&self, env: &Environment) -> bool {
        let lhs = env.get(&self.var).cloned().unwrap_or(Value::Null);
        let rhs = self.rhs.resolve(env);

        if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
            return match self.op {
                Comparison::Eq => a == b,
                Comparison::Ne => a != b,
                Comparison::Lt => a < b,
                Comparison::Le => a <= b,
                Comparison::Gt => a > b,
                Comparison::Ge => a >= b,
            };
        }

        match self.op {
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
            _ => false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rhs = match &self.rhs {
            Operand::Var(name) => name.clone(),
            Operand::Literal(value) => value.to_string(),
        };
        write!(f, "{} {} {}", self.var, self.op.symbol(), rhs)
    }
}

/// Messages emitted by `message` actions during a run
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Rc<RefCell<Vec<String>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: impl Into<String>) {
        self.messages.borrow_mut().push(message.into());
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.borrow().clone()
    }
}

fn add_numbers(current: &Value, delta: &Number) -> Value {
    let current = match current {
        Value::Number(n) => n.clone(),
        _ => Number::from(0),
    };

    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::from(sum);
        }
    }

    let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    // Non-finite sums have no JSON representation
    Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
}

/// Apply a declarative action to the environment
pub fn apply_action(action: &ActionConfig, env: &mut Environment, messages: &MessageLog) {
    match action {
        ActionConfig::Set { var, value } => {
            env.set(var.clone(), value.clone());
        }
        ActionConfig::Add { var, value } => {
            let current = env.get(var).cloned().unwrap_or(Value::Null);
            env.set(var.clone(), add_numbers(&current, value));
        }
        ActionConfig::Remove { var } => {
            env.remove(var);
        }
        ActionConfig::Message(text) => {
            log::info!("{}", text);
            messages.push(text.clone());
        }
    }
}

/// Build the flow graph described by a flow file
pub fn build_graph(config: &FlowConfig, messages: &MessageLog) -> Result<FlowGraph> {
    let mut graph = FlowGraph::new(config.name.clone());
    let mut ids: HashMap<&str, NodeId> = HashMap::new();

    for node in &config.nodes {
        let id = match node.kind {
            NodeKind::Start => graph.add_start(node.id.clone()),
            NodeKind::Logic => {
                let action = node.action.clone();
                let messages = messages.clone();
                graph.add_logic(node.id.clone(), move |env| {
                    if let Some(action) = &action {
                        apply_action(action, env, &messages);
                    }
                })
            }
            NodeKind::Decision => {
                let expr = node
                    .condition
                    .as_deref()
                    .with_context(|| format!("Decision '{}' has no condition", node.id))?;
                let condition = Condition::parse(expr)
                    .with_context(|| format!("Decision '{}' has an invalid condition", node.id))?;
                log::debug!("Decision '{}': {}", node.id, condition);
                graph.add_decision(node.id.clone(), move |env| condition.evaluate(env))
            }
        };
        ids.insert(node.id.as_str(), id);
    }

    let lookup = |from: &str, target: &str| {
        ids.get(target)
            .copied()
            .with_context(|| format!("Node '{}' points to unknown node '{}'", from, target))
    };

    for node in &config.nodes {
        let from = ids[node.id.as_str()];
        if let Some(next) = &node.next {
            graph.connect(from, lookup(node.id.as_str(), next.as_str())?);
        }
        if let Some(yes) = &node.yes {
            graph.connect_when(from, lookup(node.id.as_str(), yes.as_str())?, ArrowCondition::Yes);
        }
        if let Some(no) = &node.no {
            graph.connect_when(from, lookup(node.id.as_str(), no.as_str())?, ArrowCondition::No);
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use flo_runner::CallbackRunner;
    use serde_json::json;

    fn env_with(vars: Value) -> Environment {
        match vars {
            Value::Object(map) => Environment::with_vars(map),
            _ => Environment::new(),
        }
    }

    #[test]
    fn test_parse_condition() {
        let condition = Condition::parse("counter <= 10").unwrap();
        assert_eq!(condition.var, "counter");
        assert_eq!(condition.op, Comparison::Le);
        assert_eq!(condition.rhs, Operand::Literal(json!(10)));

        let condition = Condition::parse("state==\"done\"").unwrap();
        assert_eq!(condition.op, Comparison::Eq);
        assert_eq!(condition.rhs, Operand::Literal(json!("done")));

        let condition = Condition::parse("a != b").unwrap();
        assert_eq!(condition.rhs, Operand::Var("b".to_string()));
        assert_eq!(condition.to_string(), "a != b");
    }

    #[test]
    fn test_parse_condition_errors() {
        assert!(matches!(
            Condition::parse("counter"),
            Err(ConditionError::MissingOperator(_))
        ));
        assert!(matches!(
            Condition::parse("1 < counter"),
            Err(ConditionError::InvalidVariable(_))
        ));
        assert!(matches!(
            Condition::parse("counter < 1 2"),
            Err(ConditionError::InvalidOperand(_))
        ));
    }

    #[test]
    fn test_evaluate_numbers() {
        let env = env_with(json!({"counter": 3, "limit": 3.0}));
        assert!(Condition::parse("counter < 4").unwrap().evaluate(&env));
        assert!(!Condition::parse("counter > 3").unwrap().evaluate(&env));
        assert!(Condition::parse("counter >= limit").unwrap().evaluate(&env));
        assert!(Condition::parse("counter == 3.0").unwrap().evaluate(&env));
    }

    #[test]
    fn test_evaluate_non_numbers() {
        let env = env_with(json!({"state": "done", "flag": true}));
        assert!(Condition::parse("state == \"done\"").unwrap().evaluate(&env));
        assert!(Condition::parse("flag != false").unwrap().evaluate(&env));
        assert!(!Condition::parse("state < 1").unwrap().evaluate(&env));
        assert!(Condition::parse("missing == null").unwrap().evaluate(&env));
    }

    #[test]
    fn test_apply_actions() {
        let log = MessageLog::new();
        let mut env = Environment::new();

        apply_action(
            &ActionConfig::Add { var: "n".to_string(), value: Number::from(2) },
            &mut env,
            &log,
        );
        assert_eq!(env.get("n"), Some(&json!(2)));

        apply_action(
            &ActionConfig::Add {
                var: "n".to_string(),
                value: Number::from_f64(0.5).unwrap(),
            },
            &mut env,
            &log,
        );
        assert_eq!(env.get("n"), Some(&json!(2.5)));

        apply_action(
            &ActionConfig::Set { var: "s".to_string(), value: json!("x") },
            &mut env,
            &log,
        );
        assert_eq!(env.get("s"), Some(&json!("x")));

        apply_action(&ActionConfig::Remove { var: "s".to_string() }, &mut env, &log);
        assert!(env.get("s").is_none());

        apply_action(&ActionConfig::Message("hi".to_string()), &mut env, &log);
        assert_eq!(log.messages(), vec!["hi"]);
    }

    #[test]
    fn test_build_and_run_graph() {
        let config = parse_config(
            r#"
            name = "loop"

            [vars]
            counter = 0

            [[nodes]]
            id = "start"
            kind = "start"
            next = "check"

            [[nodes]]
            id = "check"
            kind = "decision"
            condition = "counter < 5"
            yes = "inc"
            no = "done"

            [[nodes]]
            id = "inc"
            kind = "logic"
            action = { add = { var = "counter", value = 1 } }
            next = "check"

            [[nodes]]
            id = "done"
            kind = "logic"
            action = { message = "finished" }
            "#,
        )
        .unwrap();

        let messages = MessageLog::new();
        let flow = build_graph(&config, &messages).unwrap().compile().unwrap();
        let mut env = Environment::with_vars(config.vars.clone());

        let report = flow.run(&CallbackRunner::new(), &mut env);

        assert!(report.is_drained());
        assert_eq!(env.get("counter"), Some(&json!(5)));
        assert_eq!(messages.messages(), vec!["finished"]);
    }
}
