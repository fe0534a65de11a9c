// src/resolver.rs

//! Dependency closure and installation ordering
//!
//! The planner closes the requested set over repository manifests, builds a
//! dependency graph, and orders it so dependencies come first. Packaging
//! cycles exist in the wild, so the topological sort is cycle-tolerant:
//! when Kahn's algorithm stalls, the remaining nodes are appended in
//! lexicographic order and installation proceeds.

use crate::db::InstalledDb;
use crate::error::{Error, Result};
use crate::manifest::{canonical_name, PackageSources};
use crate::version::{split_dependency, Constraint};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Compute the transitive dependency closure of the requested names.
///
/// A name present in no manifest is tolerated when it is already installed
/// (a satisfied leaf we do not descend into); otherwise resolution fails.
pub fn close_dependency_set(
    requested: &[String],
    sources: &PackageSources,
    db: &InstalledDb,
) -> Result<Vec<String>> {
    let mut required = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<String> = requested
        .iter()
        .map(|n| canonical_name(n).to_string())
        .collect();

    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        required.push(current.clone());

        match sources.get(&current) {
            Some((_, entry)) => {
                for dep in &entry.dependencies {
                    let (dep_name, constraint) = split_dependency(dep);
                    let dep_name = canonical_name(dep_name).to_string();
                    if dep_name.is_empty() {
                        continue;
                    }

                    if !constraint.is_empty() {
                        validate_constraint(&dep_name, constraint, sources)?;
                    }
                    if !visited.contains(&dep_name) {
                        stack.push(dep_name);
                    }
                }
            }
            None => {
                if !db.is_installed(&current)? {
                    return Err(Error::Dependency(format!(
                        "'{}' not found in any repository and not installed",
                        current
                    )));
                }
                debug!("Dependency {} satisfied by installed package", current);
            }
        }
    }

    Ok(required)
}

/// Check a version constraint against the first-wins manifest entry for the
/// dependency. Violations are fatal resolver errors.
fn validate_constraint(
    dep_name: &str,
    constraint: &str,
    sources: &PackageSources,
) -> Result<()> {
    let Some((_, entry)) = sources.get(dep_name) else {
        // Constraint against a package only available as an installed leaf
        // cannot be checked here; the closure walk decides its fate.
        return Ok(());
    };

    if !Constraint::parse(constraint).matches(&entry.version) {
        return Err(Error::Dependency(format!(
            "dependency '{}' requires '{}' but repository offers {}",
            dep_name, constraint, entry.version
        )));
    }
    Ok(())
}

/// Dependency graph: package -> packages that depend on it is derived from
/// this map of package -> its dependencies within the closed set.
pub type DependencyGraph = HashMap<String, Vec<String>>;

/// Build the graph restricted to the closed set
pub fn build_graph(closed: &[String], sources: &PackageSources) -> DependencyGraph {
    let members: HashSet<&String> = closed.iter().collect();
    let mut graph: DependencyGraph = HashMap::new();

    for name in closed {
        graph.entry(name.clone()).or_default();
    }
    for name in closed {
        let Some((_, entry)) = sources.get(name) else {
            continue;
        };
        for dep in &entry.dependencies {
            let (dep_name, _) = split_dependency(dep);
            let dep_name = canonical_name(dep_name).to_string();
            if members.contains(&dep_name) && dep_name != *name {
                // Edge dep -> dependent, so the sort emits deps first
                graph.entry(dep_name).or_default().push(name.clone());
            }
        }
    }
    graph
}

/// Cycle-tolerant topological order over `nodes` (closure insertion
/// order). Zero-in-degree nodes are emitted in that order; once the queue
/// runs dry with nodes left over, the cycle participants are appended
/// sorted lexicographically so the result is always a total order over the
/// input.
pub fn installation_order(nodes: &[String], graph: &DependencyGraph) -> Vec<String> {
    let mut in_degree: HashMap<&String, usize> = nodes.iter().map(|n| (n, 0)).collect();

    for dependents in graph.values() {
        for dependent in dependents {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<&String> = nodes.iter().filter(|n| in_degree[*n] == 0).collect();
    let mut order: Vec<String> = Vec::with_capacity(nodes.len());

    while let Some(current) = queue.pop_front() {
        order.push(current.clone());
        if let Some(dependents) = graph.get(current) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let mut cycle_nodes: Vec<String> = nodes
            .iter()
            .filter(|n| !order.contains(*n))
            .cloned()
            .collect();
        cycle_nodes.sort();
        warn!(
            "Dependency cycle detected; appending {} package(s) in name order",
            cycle_nodes.len()
        );
        order.extend(cycle_nodes);
    }

    order
}

/// The full plan: close, order, then drop what is already installed while
/// preserving order.
pub fn plan_installation(
    requested: &[String],
    sources: &PackageSources,
    db: &InstalledDb,
) -> Result<Vec<String>> {
    let closed = close_dependency_set(requested, sources, db)?;
    let graph = build_graph(&closed, sources);
    let ordered = installation_order(&closed, &graph);

    let mut plan = Vec::new();
    for name in ordered {
        if !db.is_installed(&name)? {
            plan.push(name);
        }
    }
    Ok(plan)
}
