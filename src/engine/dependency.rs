// ABOUTME: Dependency graph over a workflow's tasks
// ABOUTME: Resolves edges, rejects cycles and answers ordering and dependency queries

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use std::collections::HashMap;

use super::error::{ExecutionError, Result};
use crate::parser::{ValidationError, Workflow};

pub struct DependencyGraph {
    graph: Graph<String, ()>,
    task_indices: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// Create a dependency graph from a workflow.
    ///
    /// Edges point from a dependency to the task that waits on it. Unknown
    /// dependencies and cycles are rejected.
    pub fn from_workflow(workflow: &Workflow) -> Result<Self> {
        let mut graph = Graph::new();
        let mut task_indices = HashMap::new();

        for task in &workflow.tasks {
            let node_index = graph.add_node(task.task_id.clone());
            task_indices.insert(task.task_id.clone(), node_index);
        }

        for task in &workflow.tasks {
            let task_node = task_indices[&task.task_id];

            for dependency in &task.depends_on {
                match task_indices.get(dependency) {
                    Some(&dep_node) => {
                        graph.update_edge(dep_node, task_node, ());
                    }
                    None => {
                        return Err(ExecutionError::Validation(
                            ValidationError::UnknownDependency {
                                task: task.task_id.clone(),
                                dependency: dependency.clone(),
                            },
                        ))
                    }
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            ExecutionError::Validation(ValidationError::CircularDependency {
                tasks: vec![graph[cycle.node_id()].clone()],
            })
        })?;

        Ok(Self {
            graph,
            task_indices,
            order,
        })
    }

    /// Task ids in an order where every task follows all of its dependencies
    pub fn topological_order(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|&node| self.graph[node].clone())
            .collect()
    }

    /// Get all tasks that the given task directly depends on
    pub fn get_dependencies(&self, task_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = match self.task_indices.get(task_id) {
            Some(&node_idx) => self
                .graph
                .neighbors_directed(node_idx, Direction::Incoming)
                .map(|node| self.graph[node].clone())
                .collect(),
            None => Vec::new(),
        };
        ids.sort();
        ids
    }
}
