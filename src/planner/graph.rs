// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Graph helpers shared by rule validation and invocation ordering.
//!
//! # Ordering
//!
//! Ready invocations are released in ascending order of:
//! 1. **Priority** (rule override, else the recipe's own)
//! 2. **Night** (lexicographic, which is chronological for `YYYY-MM-DD`)
//! 3. **Recipe name**
//! 4. **Discovery sequence** (stable tie-break for deterministic plans)

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

/// Sort key of one invocation in the ready heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub priority: i32,
    pub night: String,
    pub recipe: String,
    pub seq: usize,
}

impl OrderKey {
    fn tuple(&self) -> (i32, &str, &str, usize) {
        (self.priority, &self.night, &self.recipe, self.seq)
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the smallest key pops first.
        other.tuple().cmp(&self.tuple())
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Find one cycle in a directed graph.
///
/// Three-state depth-first search: a node on the current recursion stack that
/// is reached again closes a cycle. The returned path repeats its first node
/// at the end, e.g. `[a, b, a]`. Nodes are visited in `nodes` order so the
/// reported cycle is deterministic.
pub fn find_cycle<N>(nodes: &[N], edges: &HashMap<N, Vec<N>>) -> Option<Vec<N>>
where
    N: Clone + Eq + Hash,
{
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in nodes {
        if visited.contains(node) {
            continue;
        }
        if let Some(cycle) = dfs_cycle_detection(node, edges, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}

fn dfs_cycle_detection<N>(
    node: &N,
    edges: &HashMap<N, Vec<N>>,
    visited: &mut HashSet<N>,
    rec_stack: &mut HashSet<N>,
    path: &mut Vec<N>,
) -> Option<Vec<N>>
where
    N: Clone + Eq + Hash,
{
    visited.insert(node.clone());
    rec_stack.insert(node.clone());
    path.push(node.clone());

    if let Some(neighbors) = edges.get(node) {
        for neighbor in neighbors {
            if !visited.contains(neighbor) {
                if let Some(cycle) = dfs_cycle_detection(neighbor, edges, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(neighbor) {
                let start = path.iter().position(|n| n == neighbor).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(neighbor.clone());
                return Some(cycle);
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    None
}

/// Kahn's algorithm over node indices.
///
/// `upstream[i]` lists the nodes `i` waits for. Among ready nodes the one
/// with the smallest [`OrderKey`] is released first. Returns the order, or
/// the nodes left over when the graph has a cycle.
pub fn topological_order(
    keys: &[OrderKey],
    upstream: &[BTreeSet<usize>],
) -> Result<Vec<usize>, Vec<usize>> {
    let n = keys.len();
    let mut in_degree: Vec<usize> = upstream.iter().map(BTreeSet::len).collect();
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, deps) in upstream.iter().enumerate() {
        for &dep in deps {
            downstream[dep].push(node);
        }
    }

    let mut ready: BinaryHeap<(OrderKey, usize)> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(|i| (keys[i].clone(), i))
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some((_, node)) = ready.pop() {
        order.push(node);
        for &next in &downstream[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push((keys[next].clone(), next));
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        let placed: HashSet<usize> = order.into_iter().collect();
        Err((0..n).filter(|i| !placed.contains(i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(priority: i32, night: &str, recipe: &str, seq: usize) -> OrderKey {
        OrderKey {
            priority,
            night: night.to_string(),
            recipe: recipe.to_string(),
            seq,
        }
    }

    fn graph(pairs: &[(&'static str, &[&'static str])]) -> HashMap<&'static str, Vec<&'static str>> {
        pairs.iter().map(|(n, e)| (*n, e.to_vec())).collect()
    }

    #[test]
    fn test_find_cycle_closes_the_path() {
        let edges = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let cycle = find_cycle(&["a", "b", "c"], &edges).unwrap();
        assert_eq!(cycle, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_find_cycle_none_for_dag() {
        let edges = graph(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &[])]);
        assert!(find_cycle(&["a", "b", "c"], &edges).is_none());
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let edges = graph(&[("a", &["a"])]);
        assert_eq!(find_cycle(&["a"], &edges).unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_ready_nodes_follow_key_order() {
        let keys = vec![
            key(5, "2021-07-01", "apero_flat", 0),
            key(2, "2021-07-02", "apero_dark", 1),
            key(2, "2021-07-01", "apero_dark", 2),
            key(2, "2021-07-01", "apero_badpix", 3),
        ];
        let upstream = vec![BTreeSet::new(); 4];
        assert_eq!(topological_order(&keys, &upstream).unwrap(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_dependencies_override_priority() {
        let keys = vec![key(9, "n", "a", 0), key(0, "n", "b", 1)];
        let upstream = vec![BTreeSet::new(), BTreeSet::from([0])];
        assert_eq!(topological_order(&keys, &upstream).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_cycle_leaves_nodes_over() {
        let keys = vec![key(0, "n", "a", 0), key(0, "n", "b", 1), key(0, "n", "c", 2)];
        let upstream = vec![BTreeSet::from([1]), BTreeSet::from([0]), BTreeSet::new()];
        assert_eq!(topological_order(&keys, &upstream).unwrap_err(), vec![0, 1]);
    }
}
