//! Dependency graph construction, cycle detection, and stage computation.
//!
//! Uses `petgraph` to model task dependencies as a directed graph. The
//! scheduler itself never walks this graph (it re-derives the ready set on
//! every settle); the graph exists to reject cycles up front and to show
//! operators which tasks can run side by side.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::definition::{EngineError, TaskShape};

/// Build a `DiGraph` with an edge from each dependency to its dependent.
fn build_graph<'a>(tasks: &[TaskShape<'a>]) -> Result<DiGraph<&'a str, ()>, EngineError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, NodeIndex> = tasks
        .iter()
        .map(|t| (t.id, graph.add_node(t.id)))
        .collect();

    for task in tasks {
        let to = nodes[task.id];
        for dep in task.dependencies {
            let from = nodes.get(dep.as_str()).ok_or_else(|| {
                EngineError::Validation(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                ))
            })?;
            graph.add_edge(*from, to, ());
        }
    }
    Ok(graph)
}

/// Validate that the tasks form a DAG (no cycles, all references exist).
pub fn validate_dag(tasks: &[TaskShape<'_>]) -> Result<(), EngineError> {
    let graph = build_graph(tasks)?;
    toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        EngineError::Validation(format!("cycle detected involving task '{node_id}'"))
    })?;
    Ok(())
}

/// Group task ids into stages: every task of stage `n` depends only on
/// tasks of earlier stages. Index 0 holds the root tasks.
///
/// Ids inside a stage keep the order of `tasks`.
pub fn execution_stages<'a>(tasks: &[TaskShape<'a>]) -> Result<Vec<Vec<&'a str>>, EngineError> {
    if tasks.is_empty() {
        return Ok(vec![]);
    }

    let graph = build_graph(tasks)?;
    let sorted = toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        EngineError::Validation(format!("cycle detected involving task '{node_id}'"))
    })?;

    let by_id: HashMap<&str, &TaskShape<'a>> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut depths: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let id = graph[node];
        let depth = by_id[id]
            .dependencies
            .iter()
            .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(id, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut stages: Vec<Vec<&'a str>> = vec![vec![]; max_depth + 1];
    for task in tasks {
        stages[depths[task.id]].push(task.id);
    }
    Ok(stages)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
