//! Topological sort over a task dependency list (spec §4.6.7).
//!
//! Kahn's algorithm. No example repo's own dependency tree carries a
//! graph crate (the teacher's `children_of` is a fixed tree, not a
//! dependency DAG over a flat list) so this is hand-rolled, matching the
//! `wfe-context::expr` precedent of a small hand-written algorithm over
//! reaching for a crate.

use std::collections::{BTreeSet, HashMap};
use wfe_core::{Error, Result};

/// A minimal view over a task needed to order it: its ID and the IDs it
/// depends on. Dependencies referencing unknown IDs are ignored (spec
/// §3 `TaskDefinition` invariant).
pub trait TaskLike {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

/// Orders `tasks` so that for every edge `u -> v` (`u` a dependency of
/// `v`), `u` precedes `v`. Ties among independent tasks break in input
/// order (stable). A true cycle fails with a message containing
/// `"Circular dependency"`.
pub fn topological_sort<T: TaskLike>(tasks: &[T]) -> Result<Vec<usize>> {
    let n = tasks.len();
    let index_of: HashMap<&str, usize> = tasks.iter().enumerate().map(|(i, t)| (t.id(), i)).collect();

    let mut indegree = vec![0usize; n];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (v, task) in tasks.iter().enumerate() {
        for dep in task.dependencies() {
            if let Some(&u) = index_of.get(dep.as_str()) {
                adjacency[u].push(v);
                indegree[v] += 1;
            }
            // Unknown dependency IDs are silently ignored.
        }
    }

    // A BTreeSet of ready indices always yields the smallest original
    // index first, which is exactly "ties break in input order" for
    // Kahn's algorithm.
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for &v in &adjacency[next] {
            indegree[v] -= 1;
            if indegree[v] == 0 {
                ready.insert(v);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| tasks[i].id())
            .collect();
        return Err(Error::CircularDependency(stuck.join(", ")));
    }

    Ok(order)
}
