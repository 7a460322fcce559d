// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::condition::{ConditionEvaluator, Predicate};
use crate::config::model::ConfigFile;
use crate::directives::Directives;
use crate::errors::{FlowError, Result};
use crate::job::JobView;
use crate::status::{Status, StatusTracker};

/// One named operation of a project.
#[derive(Debug, Clone)]
pub struct OperationDefinition {
    pub name: String,
    /// Shell command run in the job workspace. Without one, running the
    /// operation is a no-op.
    pub cmd: Option<String>,
    /// All must hold before the operation may start.
    pub pre: Vec<Predicate>,
    /// All must hold for the operation to count as complete.
    pub post: Vec<Predicate>,
    /// Prerequisite operations, in declaration order.
    pub after: Vec<String>,
    pub directives: Directives,
}

impl OperationDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: None,
            pre: Vec::new(),
            post: Vec::new(),
            after: Vec::new(),
            directives: Directives::default(),
        }
    }

    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    pub fn with_pre(mut self, predicate: Predicate) -> Self {
        self.pre.push(predicate);
        self
    }

    pub fn with_post(mut self, predicate: Predicate) -> Self {
        self.post.push(predicate);
        self
    }

    pub fn after(mut self, prerequisite: impl Into<String>) -> Self {
        self.after.push(prerequisite.into());
        self
    }

    pub fn with_directives(mut self, directives: Directives) -> Self {
        self.directives = directives;
        self
    }
}

/// Immutable set of operations and their prerequisite edges.
///
/// Construction validates the graph; once built it is known to be acyclic
/// with every prerequisite resolved.
#[derive(Debug, Clone)]
pub struct OperationGraph {
    operations: BTreeMap<String, OperationDefinition>,
    order: Vec<String>,
}

impl OperationGraph {
    pub fn new(definitions: impl IntoIterator<Item = OperationDefinition>) -> Result<Self> {
        let mut operations = BTreeMap::new();
        for mut def in definitions {
            let mut seen = HashSet::new();
            def.after.retain(|dep| seen.insert(dep.clone()));
            if operations.contains_key(&def.name) {
                return Err(FlowError::Config(format!(
                    "operation '{}' is defined more than once",
                    def.name
                )));
            }
            operations.insert(def.name.clone(), def);
        }

        if operations.is_empty() {
            return Err(FlowError::Config(
                "project must define at least one operation".to_string(),
            ));
        }

        validate_prerequisites(&operations)?;
        let order = check_acyclic_and_order(&operations)?;
        Ok(Self { operations, order })
    }

    /// Build the graph described by a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Self::new(cfg.operation_definitions())
    }

    /// Operation names, prerequisites first; ties broken lexicographically.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDefinition> {
        self.operations.get(name)
    }

    /// Like [`operation`](Self::operation), failing for unknown names.
    pub fn require(&self, name: &str) -> Result<&OperationDefinition> {
        self.operations
            .get(name)
            .ok_or_else(|| FlowError::Config(format!("unknown operation '{name}'")))
    }

    /// Definitions in topological order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationDefinition> {
        self.order.iter().filter_map(|name| self.operations.get(name))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Direct prerequisites of an operation (its `after` list).
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.operations
            .get(name)
            .map(|def| def.after.as_slice())
            .unwrap_or(&[])
    }

    /// Every prerequisite of `operation` is completed for this job and its
    /// post-conditions still hold (re-evaluated on every call).
    ///
    /// A prerequisite without post-conditions is satisfied by its completed
    /// record alone. One whose post-condition check fails to evaluate is
    /// unmet; the dependent stays blocked until the check evaluates again.
    pub fn prerequisites_satisfied(
        &self,
        view: &JobView<'_>,
        operation: &str,
        tracker: &StatusTracker,
        evaluator: &ConditionEvaluator,
    ) -> Result<bool> {
        for dep in self.dependencies_of(operation) {
            let record = tracker.get_status(view.id(), dep)?;
            if record.status != Status::Completed {
                return Ok(false);
            }
            let def = self.require(dep)?;
            if def.post.is_empty() {
                continue;
            }
            match evaluator.check_post(view, def) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(err @ FlowError::ConditionEvaluation { .. }) => {
                    warn!(job = %view.id(), op = operation, prerequisite = %dep, error = %err, "prerequisite check failed; treating it as unmet");
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }
}

fn validate_prerequisites(operations: &BTreeMap<String, OperationDefinition>) -> Result<()> {
    for (name, def) in operations {
        for dep in &def.after {
            if !operations.contains_key(dep) {
                return Err(FlowError::UnknownOperation {
                    operation: name.clone(),
                    missing: dep.clone(),
                });
            }
            if dep == name {
                return Err(FlowError::CyclicDependency {
                    cycle: vec![name.clone(), name.clone()],
                });
            }
        }
    }
    Ok(())
}

/// Fail on cycles, otherwise return Kahn's order with a lexicographic
/// tie-break.
fn check_acyclic_and_order(
    operations: &BTreeMap<String, OperationDefinition>,
) -> Result<Vec<String>> {
    // Edge direction: prerequisite -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in operations.keys() {
        graph.add_node(name.as_str());
    }
    for (name, def) in operations {
        for dep in &def.after {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        let path = find_cycle(&graph, cycle.node_id())
            .or_else(|| operations.keys().find_map(|n| find_cycle(&graph, n.as_str())))
            .unwrap_or_else(|| vec![cycle.node_id().to_string()]);
        return Err(FlowError::CyclicDependency { cycle: path });
    }

    let mut indegree: BTreeMap<&str, usize> = operations
        .iter()
        .map(|(name, def)| (name.as_str(), def.after.len()))
        .collect();
    let mut ready: BinaryHeap<Reverse<&str>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(name, _)| Reverse(*name))
        .collect();

    let mut order = Vec::with_capacity(operations.len());
    while let Some(Reverse(name)) = ready.pop() {
        order.push(name.to_string());
        for next in graph.neighbors(name) {
            if let Some(d) = indegree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
    }
    Ok(order)
}

/// A closed path `[a, b, ..., a]` reachable from `start`, if any.
fn find_cycle<'a>(graph: &DiGraphMap<&'a str, ()>, start: &'a str) -> Option<Vec<String>> {
    fn visit<'a>(
        graph: &DiGraphMap<&'a str, ()>,
        node: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        path.push(node);
        let mut next: Vec<&'a str> = graph.neighbors(node).collect();
        next.sort_unstable();
        for n in next {
            if let Some(pos) = path.iter().position(|p| *p == n) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(n.to_string());
                return Some(cycle);
            }
            if !done.contains(n) {
                if let Some(cycle) = visit(graph, n, path, done) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    visit(graph, start, &mut Vec::new(), &mut HashSet::new())
}
