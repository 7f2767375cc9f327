//! Topological ordering and parallel level assignment.
//!
//! Both run over the dependency graph where edges point from a task to its
//! dependencies. Kahn's algorithm yields the execution order; a fixed-point
//! pass yields the level partition. When either detects a cycle, a DFS
//! produces a concrete witness walk for the error.

use std::collections::{HashMap, HashSet, VecDeque};

use cockpit_task_id::TaskId;
use petgraph::{graph::NodeIndex, Direction, Graph};

use crate::Error;

/// Kahn's algorithm. Nodes are seeded and popped in FIFO order, so the
/// result is stable for a given insertion order.
pub(crate) fn topological_order(graph: &Graph<TaskId, ()>) -> Result<Vec<TaskId>, Error> {
    // Remaining dependency count per node
    let mut pending: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|node| (node, graph.neighbors_directed(node, Direction::Outgoing).count()))
        .collect();

    let mut queue: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|node| pending[node] == 0)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(node) = queue.pop_front() {
        order.push(
            graph
                .node_weight(node)
                .expect("queued node exists in graph")
                .clone(),
        );
        for dependent in graph.neighbors_directed(node, Direction::Incoming) {
            let remaining = pending
                .get_mut(&dependent)
                .expect("neighbor exists in pending map");
            *remaining -= 1;
            if *remaining == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != graph.node_count() {
        return Err(Error::CyclicDependency {
            cycle: find_cycle(graph),
        });
    }
    Ok(order)
}

/// Group tasks into levels where level `k` depends only on levels `< k`.
/// Iterates to a fixed point; an iteration that makes no progress while
/// nodes remain means a cycle.
pub(crate) fn parallel_levels(graph: &Graph<TaskId, ()>) -> Result<Vec<Vec<TaskId>>, Error> {
    let mut remaining: Vec<NodeIndex> = graph.node_indices().collect();
    let mut completed: HashSet<NodeIndex> = HashSet::new();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<NodeIndex>, Vec<NodeIndex>) =
            remaining.into_iter().partition(|&node| {
                graph
                    .neighbors_directed(node, Direction::Outgoing)
                    .all(|dependency| completed.contains(&dependency))
            });

        if ready.is_empty() {
            return Err(Error::CyclicDependency {
                cycle: find_cycle(graph),
            });
        }

        completed.extend(ready.iter().copied());
        levels.push(
            ready
                .into_iter()
                .map(|node| {
                    graph
                        .node_weight(node)
                        .expect("level node exists in graph")
                        .clone()
                })
                .collect(),
        );
        remaining = blocked;
    }

    Ok(levels)
}

/// DFS cycle witness: the walk from the first revisited node back to itself.
fn find_cycle(graph: &Graph<TaskId, ()>) -> Vec<TaskId> {
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();

    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        if let Some(cycle) = dfs(graph, start, &mut visited, &mut on_stack, &mut path) {
            return cycle;
        }
    }
    // Callers only ask for a witness after detecting a cycle
    Vec::new()
}

fn dfs(
    graph: &Graph<TaskId, ()>,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    on_stack: &mut HashSet<NodeIndex>,
    path: &mut Vec<NodeIndex>,
) -> Option<Vec<TaskId>> {
    visited.insert(node);
    on_stack.insert(node);
    path.push(node);

    for next in graph.neighbors_directed(node, Direction::Outgoing) {
        if on_stack.contains(&next) {
            // Slice of the current path from the revisited node onward,
            // closed by repeating it
            let start = path
                .iter()
                .position(|&seen| seen == next)
                .expect("node on the recursion stack is on the path");
            let mut cycle: Vec<TaskId> = path[start..]
                .iter()
                .map(|&index| {
                    graph
                        .node_weight(index)
                        .expect("path node exists in graph")
                        .clone()
                })
                .collect();
            cycle.push(
                graph
                    .node_weight(next)
                    .expect("cycle target exists in graph")
                    .clone(),
            );
            return Some(cycle);
        }
        if !visited.contains(&next) {
            if let Some(cycle) = dfs(graph, next, visited, on_stack, path) {
                return Some(cycle);
            }
        }
    }

    on_stack.remove(&node);
    path.pop();
    None
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn id(raw: &str) -> TaskId {
        TaskId::from_raw(raw)
    }

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> Graph<TaskId, ()> {
        let mut graph = Graph::new();
        let mut indices = HashMap::new();
        for node in nodes {
            indices.insert(*node, graph.add_node(id(node)));
        }
        for (from, to) in edges {
            graph.add_edge(indices[from], indices[to], ());
        }
        graph
    }

    #[test]
    fn test_chain_orders_dependencies_first() {
        // web depends on utils depends on core
        let graph = graph(
            &["web:build", "utils:build", "core:build"],
            &[
                ("web:build", "utils:build"),
                ("utils:build", "core:build"),
            ],
        );
        let order = topological_order(&graph).unwrap();
        assert_eq!(
            order,
            vec![id("core:build"), id("utils:build"), id("web:build")]
        );
    }

    #[test]
    fn test_diamond_levels() {
        let graph = graph(
            &["app:build", "lib-a:build", "lib-b:build", "base:build"],
            &[
                ("app:build", "lib-a:build"),
                ("app:build", "lib-b:build"),
                ("lib-a:build", "base:build"),
                ("lib-b:build", "base:build"),
            ],
        );
        let levels = parallel_levels(&graph).unwrap();
        assert_eq!(
            levels,
            vec![
                vec![id("base:build")],
                vec![id("lib-a:build"), id("lib-b:build")],
                vec![id("app:build")],
            ]
        );
    }

    #[test]
    fn test_independent_tasks_form_one_level() {
        let graph = graph(&["a:x", "b:x", "c:x"], &[]);
        let order = topological_order(&graph).unwrap();
        assert_eq!(order.len(), 3);
        let levels = parallel_levels(&graph).unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].len(), 3);
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = graph(&["a:x", "b:x"], &[("a:x", "b:x"), ("b:x", "a:x")]);
        let err = topological_order(&graph).unwrap_err();
        let Error::CyclicDependency { cycle } = err else {
            panic!("expected cycle error");
        };
        // a closed walk of length >= 2
        assert!(cycle.len() >= 3);
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&id("a:x")));
        assert!(cycle.contains(&id("b:x")));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = graph(&["a:x"], &[("a:x", "a:x")]);
        let err = parallel_levels(&graph).unwrap_err();
        let Error::CyclicDependency { cycle } = err else {
            panic!("expected cycle error");
        };
        assert_eq!(cycle, vec![id("a:x"), id("a:x")]);
    }

    #[test]
    fn test_cycle_reached_through_prefix() {
        // entry -> a -> b -> c -> a: witness must exclude the entry node
        let graph = graph(
            &["entry:x", "a:x", "b:x", "c:x"],
            &[
                ("entry:x", "a:x"),
                ("a:x", "b:x"),
                ("b:x", "c:x"),
                ("c:x", "a:x"),
            ],
        );
        let err = topological_order(&graph).unwrap_err();
        let Error::CyclicDependency { cycle } = err else {
            panic!("expected cycle error");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert!(!cycle.contains(&id("entry:x")));
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_levels_detect_cycle_below_valid_nodes() {
        let graph = graph(
            &["ok:x", "a:x", "b:x"],
            &[("a:x", "b:x"), ("b:x", "a:x")],
        );
        // the independent node forms a level, then progress stalls
        let err = parallel_levels(&graph).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
    }
}
