//! Read-only dependency view of a scheduler's tasks, for diagnostics.
//!
//! The scheduler itself never consults this graph; blocked tasks are simply
//! requeued. It exists to answer "why is this task not running?".

use petgraph::algo::{is_cyclic_directed, kosaraju_scc};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::task::{Task, TaskStatus};

/// Node payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub name: String,
    pub status: TaskStatus,
}

/// Edges point from a dependency to the task waiting on it
pub struct DependencyGraph {
    graph: DiGraph<TaskNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build from a task set; dependencies outside the set are added as nodes too
    pub fn from_tasks(tasks: &[Arc<Task>]) -> Self {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut by_ptr: HashMap<*const Task, NodeIndex> = HashMap::new();

        let mut node_for = |graph: &mut DiGraph<TaskNode, ()>, task: &Arc<Task>| -> NodeIndex {
            *by_ptr.entry(Arc::as_ptr(task)).or_insert_with(|| {
                let name = task.name();
                let node = graph.add_node(TaskNode {
                    name: name.clone(),
                    status: task.status(),
                });
                index.entry(name).or_insert(node);
                node
            })
        };

        for task in tasks {
            let target = node_for(&mut graph, task);
            for dep in task.dependencies() {
                let source = node_for(&mut graph, &dep);
                graph.update_edge(source, target, ());
            }
        }

        Self { graph, index }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Names of tasks that sit on a dependency cycle
    pub fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<String> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .flatten()
            .map(|node| self.graph[node].name.clone())
            .collect();
        members.sort();
        members
    }

    /// Direct dependencies of `name`
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Tasks directly waiting on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Pending tasks that can never become ready: some transitive dependency
    /// failed or was cancelled, or the task waits on a cycle.
    pub fn blocked_tasks(&self) -> Vec<String> {
        let mut doomed: HashSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&n| {
                matches!(
                    self.graph[n].status,
                    TaskStatus::Failed | TaskStatus::Cancelled
                )
            })
            .collect();

        for component in kosaraju_scc(&self.graph) {
            if component.len() > 1 {
                doomed.extend(component);
            }
        }

        // Propagate along edges to everything downstream
        let mut stack: Vec<NodeIndex> = doomed.iter().copied().collect();
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if doomed.insert(next) {
                    stack.push(next);
                }
            }
        }

        let mut blocked: Vec<String> = doomed
            .into_iter()
            .filter(|&n| self.graph[n].status == TaskStatus::Pending)
            .map(|n| self.graph[n].name.clone())
            .collect();
        blocked.sort();
        blocked
    }

    /// Graphviz rendering, nodes labelled `name (STATUS)`
    pub fn to_dot(&self) -> String {
        let labelled = self
            .graph
            .map(|_, node| format!("{} ({})", node.name, node.status), |_, _| ());
        format!("{:?}", Dot::with_config(&labelled, &[Config::EdgeNoLabel]))
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ExecutionContext, Priority};
    use serde_json::json;

    fn task(name: &str) -> Arc<Task> {
        Arc::new(Task::from_fn(name, Priority::Normal, |_| Ok(json!(null))))
    }

    #[test]
    fn test_edges_and_neighbors() {
        let login = task("login");
        let open_menu = Arc::new(
            Task::from_fn("open_menu", Priority::Normal, |_| Ok(json!(null))).with_dependency(&login),
        );
        let buy = Arc::new(
            Task::from_fn("buy", Priority::Normal, |_| Ok(json!(null)))
                .with_dependency(&open_menu)
                .with_dependency(&login),
        );

        let graph = DependencyGraph::from_tasks(&[login, open_menu, buy]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert!(!graph.has_cycle());
        assert_eq!(graph.dependencies_of("buy"), vec!["login", "open_menu"]);
        assert_eq!(graph.dependents_of("login"), vec!["buy", "open_menu"]);
        assert!(graph.dependencies_of("unknown").is_empty());
        assert!(graph.blocked_tasks().is_empty());

        let dot = graph.to_dot();
        assert!(dot.contains("digraph"));
        assert!(dot.contains("buy (PENDING)"));
    }

    #[test]
    fn test_cycle_detection() {
        let a = task("a");
        let b = task("b");
        a.add_dependency(b.clone());
        b.add_dependency(a.clone());
        let c = Arc::new(Task::from_fn("c", Priority::Low, |_| Ok(json!(null))).with_dependency(&a));

        let graph = DependencyGraph::from_tasks(&[a, b, c]);
        assert!(graph.has_cycle());
        assert_eq!(graph.cycle_members(), vec!["a", "b"]);
        assert_eq!(graph.blocked_tasks(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failed_dependency_blocks_downstream() {
        let fetch = Arc::new(Task::from_fn("fetch", Priority::High, |_| {
            Err(anyhow::anyhow!("offline"))
        }));
        fetch.run(&ExecutionContext::new());
        let parse = Arc::new(Task::from_fn("parse", Priority::Normal, |_| Ok(json!(null))).with_dependency(&fetch));
        let store = Arc::new(Task::from_fn("store", Priority::Normal, |_| Ok(json!(null))).with_dependency(&parse));
        let other = task("other");

        let graph = DependencyGraph::from_tasks(&[fetch, parse, store, other]);
        assert_eq!(graph.blocked_tasks(), vec!["parse", "store"]);
    }
}
