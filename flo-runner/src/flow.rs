//! Flow diagrams compiled to callbacks
//!
//! A flow is a diagram of nodes joined by arrows: one start node, logic nodes
//! that act on the environment, and decision nodes that pick a `Yes` or `No`
//! branch. Compiling a flow turns every node into a [`Callback`] that
//! does its work and then enqueues its successor, so the whole diagram runs on
//! a [`CallbackRunner`] and loops in the diagram are bounded by the ceiling.

use crate::env::Environment;
use crate::runner::CallbackRunner;
use crate::types::{Callback, RunReport};
use std::fmt;
use std::rc::{Rc, Weak};

/// Name given to the compiled start node
pub const ENTRY_FUNCTION: &str = "entryFunction";

/// Identifier of a node within one [`FlowGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Branch label on an arrow leaving a decision node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowCondition {
    Yes,
    No,
}

/// Errors raised while compiling a flow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Flow must have an entry element")]
    MissingEntry,

    #[error("Flow has {0} entry elements, expected one")]
    MultipleEntries(usize),

    #[error("Entry element must have a single child, found {0}")]
    EntryMustHaveSingleChild(usize),

    #[error("Arrow references unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Decision '{0}' needs exactly one yes and one no arrow")]
    IncompleteDecision(String),

    #[error("Node '{0}' has more than one way to continue")]
    AmbiguousSuccessor(String),

    #[error("Node '{0}' has an arrow into the entry element")]
    ArrowIntoEntry(String),

    #[error("Node '{0}' cannot be reached from the entry element")]
    UnreachableNode(String),

    #[error("Logic node '{0}' loops back to itself without a decision")]
    AlwaysTrueLoop(String),
}

type Action = Rc<dyn Fn(&mut Environment)>;
type Predicate = Rc<dyn Fn(&Environment) -> bool>;

enum NodeKind {
    Start,
    Logic(Action),
    Decision(Predicate),
}

struct FlowNode {
    name: String,
    kind: NodeKind,
}

#[derive(Debug, Clone, Copy)]
struct Arrow {
    from: NodeId,
    to: NodeId,
    condition: Option<ArrowCondition>,
}

/// Where control goes after a node has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Successor {
    End,
    Next(NodeId),
    Branch { yes: NodeId, no: NodeId },
}

/// A diagram of nodes and arrows, not yet compiled
pub struct FlowGraph {
    name: String,
    nodes: Vec<FlowNode>,
    arrows: Vec<Arrow>,
}

impl FlowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            arrows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add the start node
    pub fn add_start(&mut self, name: impl Into<String>) -> NodeId {
        self.push_node(name.into(), NodeKind::Start)
    }

    /// Add a node that acts on the environment
    pub fn add_logic<F>(&mut self, name: impl Into<String>, action: F) -> NodeId
    where
        F: Fn(&mut Environment) + 'static,
    {
        self.push_node(name.into(), NodeKind::Logic(Rc::new(action)))
    }

    /// Add a node that branches on a predicate over the environment
    pub fn add_decision<F>(&mut self, name: impl Into<String>, predicate: F) -> NodeId
    where
        F: Fn(&Environment) -> bool + 'static,
    {
        self.push_node(name.into(), NodeKind::Decision(Rc::new(predicate)))
    }

    /// Add an unconditional arrow
    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        self.arrows.push(Arrow {
            from,
            to,
            condition: None,
        });
    }

    /// Add an arrow taken when a decision evaluates to `condition`
    pub fn connect_when(&mut self, from: NodeId, to: NodeId, condition: ArrowCondition) {
        self.arrows.push(Arrow {
            from,
            to,
            condition: Some(condition),
        });
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0).map(|node| node.name.as_str())
    }

    fn push_node(&mut self, name: String, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(FlowNode { name, kind });
        id
    }

    fn outgoing(&self, id: NodeId) -> Vec<&Arrow> {
        self.arrows.iter().filter(|arrow| arrow.from == id).collect()
    }

    /// Work out a node's successor, rejecting arrows that don't fit its kind
    fn successor(&self, id: NodeId) -> Result<Successor, FlowError> {
        let node = &self.nodes[id.0];
        let arrows = self.outgoing(id);

        match node.kind {
            NodeKind::Decision(_) => {
                let pick = |condition: ArrowCondition| {
                    let mut matching = arrows.iter().filter(|a| a.condition == Some(condition));
                    match (matching.next(), matching.next()) {
                        (Some(arrow), None) => Some(arrow.to),
                        _ => None,
                    }
                };
                match (pick(ArrowCondition::Yes), pick(ArrowCondition::No)) {
                    (Some(yes), Some(no)) if arrows.len() == 2 => Ok(Successor::Branch { yes, no }),
                    _ => Err(FlowError::IncompleteDecision(node.name.clone())),
                }
            }
            NodeKind::Start | NodeKind::Logic(_) => {
                if arrows.iter().any(|arrow| arrow.condition.is_some()) {
                    return Err(FlowError::AmbiguousSuccessor(node.name.clone()));
                }
                match arrows.as_slice() {
                    [] => Ok(Successor::End),
                    [arrow] => Ok(Successor::Next(arrow.to)),
                    _ => Err(FlowError::AmbiguousSuccessor(node.name.clone())),
                }
            }
        }
    }

    /// Compile the flow into callbacks
    ///
    /// Every node must be reachable from the start node, nothing may point
    /// back at the start node, and a loop must pass through at least one
    /// decision. The start node is named [`ENTRY_FUNCTION`]; the rest are named
    /// `function1`, `function2`, ... in the order they were added.
    pub fn compile(&self) -> Result<CompiledFlow, FlowError> {
        log::debug!("Compiling flow '{}' ({} nodes)", self.name, self.nodes.len());

        if let Some(arrow) = self
            .arrows
            .iter()
            .find(|arrow| arrow.from.0 >= self.nodes.len() || arrow.to.0 >= self.nodes.len())
        {
            let unknown = if arrow.from.0 >= self.nodes.len() {
                arrow.from
            } else {
                arrow.to
            };
            return Err(FlowError::UnknownNode(unknown));
        }

        let starts: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node.kind, NodeKind::Start))
            .map(|(index, _)| NodeId(index))
            .collect();
        let entry = match starts.as_slice() {
            [] => return Err(FlowError::MissingEntry),
            [entry] => *entry,
            _ => return Err(FlowError::MultipleEntries(starts.len())),
        };

        if let Some(arrow) = self.arrows.iter().find(|arrow| arrow.to == entry) {
            return Err(FlowError::ArrowIntoEntry(self.nodes[arrow.from.0].name.clone()));
        }

        let children = self.outgoing(entry).len();
        if children > 1 {
            return Err(FlowError::EntryMustHaveSingleChild(children));
        }

        // Depth-first walk from the entry resolving successors
        let mut resolved: Vec<Option<Successor>> = vec![None; self.nodes.len()];
        let mut pending = vec![entry];
        while let Some(id) = pending.pop() {
            if resolved[id.0].is_some() {
                continue;
            }
            let successor = self.successor(id)?;
            match successor {
                Successor::End => {}
                Successor::Next(next) => pending.push(next),
                Successor::Branch { yes, no } => {
                    pending.push(no);
                    pending.push(yes);
                }
            }
            resolved[id.0] = Some(successor);
        }

        let successors = resolved
            .into_iter()
            .zip(&self.nodes)
            .map(|(successor, node)| {
                successor.ok_or_else(|| FlowError::UnreachableNode(node.name.clone()))
            })
            .collect::<Result<Vec<Successor>, FlowError>>()?;

        if let Some(id) = self.logic_loop(&successors) {
            return Err(FlowError::AlwaysTrueLoop(self.nodes[id.0].name.clone()));
        }

        let mut counter = 0;
        let names: Vec<String> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let name = if NodeId(index) == entry {
                    ENTRY_FUNCTION.to_string()
                } else {
                    counter += 1;
                    format!("function{}", counter)
                };
                log::debug!("  {} -> {}", node.name, name);
                name
            })
            .collect();

        let table = Rc::new_cyclic(|weak: &Weak<FlowTable>| {
            let callbacks = self
                .nodes
                .iter()
                .zip(&successors)
                .zip(&names)
                .map(|((node, successor), name)| {
                    node_callback(name.as_str(), &node.kind, *successor, weak.clone())
                })
                .collect();
            FlowTable { callbacks }
        });
        let entry = table.callbacks[entry.0].clone();

        Ok(CompiledFlow {
            name: self.name.clone(),
            entry,
            names,
            table,
        })
    }

    /// Find a logic node that gets back to itself through logic nodes only
    ///
    /// Such a loop has no decision to leave it, so it can only end at the
    /// ceiling.
    fn logic_loop(&self, successors: &[Successor]) -> Option<NodeId> {
        let is_logic = |id: NodeId| matches!(self.nodes[id.0].kind, NodeKind::Logic(_));

        (0..self.nodes.len()).map(NodeId).filter(|id| is_logic(*id)).find(|&origin| {
            let mut current = origin;
            // Each logic node has at most one successor, so the path is a chain
            for _ in 0..self.nodes.len() {
                match successors[current.0] {
                    Successor::Next(next) if next == origin => return true,
                    Successor::Next(next) if is_logic(next) => current = next,
                    _ => return false,
                }
            }
            false
        })
    }
}

/// Compiled callbacks, indexed by node
struct FlowTable {
    callbacks: Vec<Callback>,
}

impl FlowTable {
    fn get(&self, id: NodeId) -> Option<&Callback> {
        self.callbacks.get(id.0)
    }
}

fn enqueue_node(env: &Environment, table: &Weak<FlowTable>, id: NodeId) {
    // A dropped flow stops scheduling further nodes
    if let Some(table) = table.upgrade() {
        if let Some(callback) = table.get(id) {
            env.enqueue(callback.clone());
        }
    }
}

fn node_callback(
    name: &str,
    kind: &NodeKind,
    successor: Successor,
    table: Weak<FlowTable>,
) -> Callback {
    match (kind, successor) {
        (NodeKind::Decision(predicate), Successor::Branch { yes, no }) => {
            let predicate = Rc::clone(predicate);
            Callback::labeled(name, move |env| {
                let next = if predicate(&*env) { yes } else { no };
                enqueue_node(env, &table, next);
            })
        }
        (kind, successor) => {
            let action = match kind {
                NodeKind::Logic(action) => Some(Rc::clone(action)),
                _ => None,
            };
            Callback::labeled(name, move |env| {
                if let Some(action) = &action {
                    action(env);
                }
                if let Successor::Next(next) = successor {
                    enqueue_node(env, &table, next);
                }
            })
        }
    }
}

/// A flow ready to run
pub struct CompiledFlow {
    name: String,
    entry: Callback,
    names: Vec<String>,
    table: Rc<FlowTable>,
}

impl CompiledFlow {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Callback for the start node
    pub fn entry(&self) -> Callback {
        self.entry.clone()
    }

    /// Compiled callback for a node of the source graph
    pub fn callback(&self, id: NodeId) -> Option<Callback> {
        self.table.get(id).cloned()
    }

    /// Generated function names, in node order
    pub fn function_names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    pub fn function_name(&self, id: NodeId) -> Option<&str> {
        self.names.get(id.0).map(String::as_str)
    }

    /// Run the flow from its start node
    ///
    /// The flow succeeded if the returned report is drained.
    pub fn run(&self, runner: &CallbackRunner, env: &mut Environment) -> RunReport {
        log::info!("Running flow '{}'", self.name);
        let report = runner.run(self.entry(), env);
        log::info!(
            "Flow '{}' {} after {} invocations",
            self.name,
            report.outcome,
            report.invocations
        );
        report
    }
}

impl fmt::Debug for CompiledFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFlow")
            .field("name", &self.name)
            .field("functions", &self.function_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use crate::reporter::CollectingReporter;
    use serde_json::json;

    fn counter(env: &Environment) -> i64 {
        env.get("counter").and_then(|v| v.as_i64()).unwrap_or(0)
    }

    fn counting_flow(limit: i64) -> FlowGraph {
        let mut graph = FlowGraph::new("count");
        let start = graph.add_start("start");
        let check = graph.add_decision("check", move |env| counter(env) < limit);
        let inc = graph.add_logic("inc", |env| {
            let next = counter(env) + 1;
            env.set("counter", next);
        });
        let done = graph.add_logic("done", |env| {
            env.set("done", true);
        });
        graph.connect(start, check);
        graph.connect_when(check, inc, ArrowCondition::Yes);
        graph.connect_when(check, done, ArrowCondition::No);
        graph.connect(inc, check);
        graph
    }

    #[test]
    fn test_compile_names() {
        let graph = counting_flow(3);
        let flow = graph.compile().unwrap();
        assert_eq!(
            flow.function_names(),
            vec!["entryFunction", "function1", "function2", "function3"]
        );
        assert_eq!(flow.function_name(NodeId(0)), Some("entryFunction"));
        assert_eq!(flow.function_name(NodeId(3)), Some("function3"));
        assert_eq!(flow.entry().label(), Some("entryFunction"));
    }

    #[test]
    fn test_counting_flow_drains() {
        let flow = counting_flow(3).compile().unwrap();
        let runner = CallbackRunner::new();
        let mut env = Environment::new();

        let report = flow.run(&runner, &mut env);

        assert!(report.is_drained());
        assert_eq!(env.get("counter"), Some(&json!(3)));
        assert_eq!(env.get("done"), Some(&json!(true)));
        // start + 4 checks + 3 incs + done
        assert_eq!(report.invocations, 9);
    }

    #[test]
    fn test_looping_flow_overflows() {
        let flow = counting_flow(1_000).compile().unwrap();
        let reporter = CollectingReporter::new();
        let runner = CallbackRunner::with_config(RunnerConfig::new().with_max_iterations(20))
            .with_reporter(reporter.clone());
        let mut env = Environment::new();

        let report = flow.run(&runner, &mut env);

        assert!(report.is_overflowed());
        assert_eq!(report.invocations, 21);
        assert!(env.get("done").is_none());
        assert_eq!(reporter.messages(), vec!["Stack overflow error. Stack depth is 20"]);
    }

    #[test]
    fn test_start_without_children() {
        let mut graph = FlowGraph::new("empty");
        graph.add_start("start");
        let flow = graph.compile().unwrap();

        assert_eq!(flow.function_names(), vec!["entryFunction"]);
        let report = flow.run(&CallbackRunner::new(), &mut Environment::new());
        assert!(report.is_drained());
        assert_eq!(report.invocations, 1);
    }

    #[test]
    fn test_names_follow_insertion_order() {
        let mut graph = FlowGraph::new("late start");
        let done = graph.add_logic("done", |_env| {});
        let check = graph.add_decision("check", |_env| true);
        let start = graph.add_start("start");
        let work = graph.add_logic("work", |_env| {});
        graph.connect(start, check);
        graph.connect_when(check, work, ArrowCondition::Yes);
        graph.connect_when(check, done, ArrowCondition::No);

        let flow = graph.compile().unwrap();
        assert_eq!(
            flow.function_names(),
            vec!["function1", "function2", "entryFunction", "function3"]
        );
        assert_eq!(flow.entry().label(), Some("entryFunction"));
    }

    #[test]
    fn test_unreachable_node() {
        let mut graph = FlowGraph::new("orphaned");
        let start = graph.add_start("start");
        let a = graph.add_logic("a", |_env| {});
        graph.add_logic("orphan", |_env| {});
        graph.connect(start, a);
        assert_eq!(
            graph.compile().unwrap_err(),
            FlowError::UnreachableNode("orphan".to_string())
        );
    }

    #[test]
    fn test_arrow_into_entry() {
        let mut graph = FlowGraph::new("back to start");
        let start = graph.add_start("start");
        let a = graph.add_logic("a", |_env| {});
        graph.connect(start, a);
        graph.connect(a, start);
        assert_eq!(
            graph.compile().unwrap_err(),
            FlowError::ArrowIntoEntry("a".to_string())
        );
    }

    #[test]
    fn test_logic_only_loop() {
        let mut graph = FlowGraph::new("spin");
        let start = graph.add_start("start");
        let a = graph.add_logic("a", |_env| {});
        let b = graph.add_logic("b", |_env| {});
        graph.connect(start, a);
        graph.connect(a, b);
        graph.connect(b, a);
        assert_eq!(
            graph.compile().unwrap_err(),
            FlowError::AlwaysTrueLoop("a".to_string())
        );

        let mut graph = FlowGraph::new("self loop");
        let start = graph.add_start("start");
        let a = graph.add_logic("a", |_env| {});
        graph.connect(start, a);
        graph.connect(a, a);
        assert_eq!(
            graph.compile().unwrap_err(),
            FlowError::AlwaysTrueLoop("a".to_string())
        );
    }

    #[test]
    fn test_loop_through_decision_is_allowed() {
        let mut graph = FlowGraph::new("guarded");
        let start = graph.add_start("start");
        let a = graph.add_logic("a", |_env| {});
        let b = graph.add_logic("b", |_env| {});
        let check = graph.add_decision("check", |_env| true);
        let done = graph.add_logic("done", |_env| {});
        graph.connect(start, a);
        graph.connect(a, b);
        graph.connect(b, check);
        graph.connect_when(check, a, ArrowCondition::Yes);
        graph.connect_when(check, done, ArrowCondition::No);
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn test_missing_entry() {
        let mut graph = FlowGraph::new("no start");
        graph.add_logic("a", |_env| {});
        assert_eq!(graph.compile().unwrap_err(), FlowError::MissingEntry);
    }

    #[test]
    fn test_multiple_entries() {
        let mut graph = FlowGraph::new("two starts");
        graph.add_start("a");
        graph.add_start("b");
        assert_eq!(graph.compile().unwrap_err(), FlowError::MultipleEntries(2));
    }

    #[test]
    fn test_entry_must_have_single_child() {
        let mut graph = FlowGraph::new("forked start");
        let start = graph.add_start("start");
        let a = graph.add_logic("a", |_env| {});
        let b = graph.add_logic("b", |_env| {});
        graph.connect(start, a);
        graph.connect(start, b);
        assert_eq!(
            graph.compile().unwrap_err(),
            FlowError::EntryMustHaveSingleChild(2)
        );
    }

    #[test]
    fn test_incomplete_decision() {
        let mut graph = FlowGraph::new("half decision");
        let start = graph.add_start("start");
        let check = graph.add_decision("check", |_env| true);
        let a = graph.add_logic("a", |_env| {});
        graph.connect(start, check);
        graph.connect_when(check, a, ArrowCondition::Yes);
        assert_eq!(
            graph.compile().unwrap_err(),
            FlowError::IncompleteDecision("check".to_string())
        );
    }

    #[test]
    fn test_logic_with_two_successors() {
        let mut graph = FlowGraph::new("fork");
        let start = graph.add_start("start");
        let a = graph.add_logic("a", |_env| {});
        let b = graph.add_logic("b", |_env| {});
        let c = graph.add_logic("c", |_env| {});
        graph.connect(start, a);
        graph.connect(a, b);
        graph.connect(a, c);
        assert_eq!(
            graph.compile().unwrap_err(),
            FlowError::AmbiguousSuccessor("a".to_string())
        );
    }

    #[test]
    fn test_unknown_node() {
        let mut graph = FlowGraph::new("dangling");
        let start = graph.add_start("start");
        graph.connect(start, NodeId(42));
        assert_eq!(graph.compile().unwrap_err(), FlowError::UnknownNode(NodeId(42)));
    }

    #[test]
    fn test_run_from_inner_node() {
        let graph = counting_flow(2);
        let flow = graph.compile().unwrap();

        let done = flow.callback(NodeId(3)).unwrap();
        let report = CallbackRunner::new().run(done, &mut Environment::new());
        assert_eq!(report.invocations, 1);
        assert!(flow.callback(NodeId(4)).is_none());
        assert_eq!(graph.node_name(NodeId(3)), Some("done"));
    }

    #[test]
    fn test_dropped_flow_stops_scheduling() {
        let entry = {
            let flow = counting_flow(3).compile().unwrap();
            flow.entry()
        };
        let report = CallbackRunner::new().run(entry, &mut Environment::new());
        assert!(report.is_drained());
        assert_eq!(report.invocations, 1);
    }
}
