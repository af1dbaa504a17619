//! Dependency-graph utilities for the agent engine.
//!
//! Graphs are maps in the `dependents` orientation: an edge `a -> b` means
//! `b` consumes `a`'s output. `reverse_dependency` flips that into the
//! `depends_on` orientation.

use std::collections::BTreeMap;

use crate::error::{PlaitError, Result};

pub type Graph = BTreeMap<String, Vec<String>>;

/// Layered topological sort. Each layer holds the nodes whose in-degree is
/// zero at that step, sorted by name. Fails with `CycleDetected` when any
/// residual in-degree remains.
pub fn topological_sort(graph: &Graph) -> Result<Vec<Vec<String>>> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    for (node, deps) in graph {
        in_degree.entry(node).or_insert(0);
        for dep in deps {
            *in_degree.entry(dep).or_insert(0) += 1;
        }
    }

    let mut zero: Vec<String> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| n.to_string())
        .collect();
    zero.sort();

    let mut result = Vec::new();
    while !zero.is_empty() {
        let mut next_zero = Vec::new();
        for node in &zero {
            if let Some(neighbors) = graph.get(node) {
                for neighbor in neighbors {
                    if let Some(d) = in_degree.get_mut(neighbor.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            next_zero.push(neighbor.clone());
                        }
                    }
                }
            }
        }
        next_zero.sort();
        result.push(std::mem::replace(&mut zero, next_zero));
    }

    if in_degree.values().any(|d| *d != 0) {
        return Err(PlaitError::CycleDetected);
    }
    Ok(result)
}

/// Partition the node universe into maximal weakly-connected DAGs, largest
/// first. A cyclic partition is returned whole.
pub fn find_dags(dependents: &Graph) -> Vec<Graph> {
    let mut visited: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut result = Vec::new();
    for node in dependents.keys() {
        if visited.contains(node) {
            continue;
        }
        let sub = explore_dag(node, dependents);
        visited.extend(sub.keys().cloned());
        visited.insert(node.clone());
        result.push(sub);
    }
    result.sort_by_key(|g| std::cmp::Reverse(g.len()));
    result
}

/// The DAG containing `target`, if any.
pub fn pickup_dag(target: &str, dependents: &Graph) -> Option<Graph> {
    find_dags(dependents)
        .into_iter()
        .find(|dag| dag.contains_key(target))
}

fn explore_dag(target: &str, dependents: &Graph) -> Graph {
    let upstream = extract_downstream_subgraph(&reverse_dependency(dependents), target);
    let sources: Vec<&String> = upstream
        .iter()
        .filter(|(_, neighbors)| neighbors.is_empty())
        .map(|(node, _)| node)
        .collect();
    if sources.is_empty() {
        // no source node found, maybe a cycle graph
        return dependents.clone();
    }
    let mut graph = Graph::new();
    for source in sources {
        for (node, neighbors) in extract_downstream_subgraph(dependents, source) {
            graph.insert(node, neighbors);
        }
    }
    graph
}

/// Forward-reachable closure from `start`.
pub fn extract_downstream_subgraph(graph: &Graph, start: &str) -> Graph {
    if start.is_empty() {
        return graph.clone();
    }
    let mut sub = Graph::new();
    let mut stack = vec![start.to_string()];
    while let Some(node) = stack.pop() {
        if sub.contains_key(&node) {
            continue;
        }
        let neighbors = graph.get(&node).cloned().unwrap_or_default();
        for neighbor in &neighbors {
            stack.push(neighbor.clone());
        }
        sub.insert(node, neighbors);
    }
    sub
}

/// Backward-reachable closure from `start`.
pub fn extract_upstream_subgraph(graph: &Graph, start: &str) -> Graph {
    reverse_dependency(&extract_downstream_subgraph(
        &reverse_dependency(graph),
        start,
    ))
}

/// Nodes with no outgoing edges, sorted. A node whose only edge is a
/// self-loop still has an outgoing edge and is not a sink.
pub fn find_sink_nodes(graph: &Graph) -> Vec<String> {
    let mut sinks: Vec<String> = graph
        .iter()
        .filter(|(_, neighbors)| neighbors.is_empty())
        .map(|(node, _)| node.clone())
        .collect();
    sinks.sort();
    sinks.dedup();
    sinks
}

/// Nodes with no incoming edges (excluding isolated sink-only entries that
/// merely appear as targets).
pub fn find_source_nodes(graph: &Graph) -> Vec<String> {
    let mut reversed = reverse_dependency(graph);
    for (node, deps) in graph {
        if deps.is_empty() {
            reversed.remove(node);
        }
    }
    find_sink_nodes(&reversed)
}

/// Flip a `dependents` graph into `depends_on` orientation (or back).
pub fn reverse_dependency(dependents: &Graph) -> Graph {
    let mut depends_on = Graph::new();
    for (name, deps) in dependents {
        depends_on.entry(name.clone()).or_default();
        for dep in deps {
            depends_on.entry(dep.clone()).or_default().push(name.clone());
        }
    }
    depends_on
}

/// Expand `*` wildcards and collect the matching names.
pub fn wildcard_matches(pattern: &str, names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| wildcard_match(pattern, name))
        .cloned()
        .collect()
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> Graph {
        edges
            .iter()
            .map(|(n, deps)| (n.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    #[test]
    fn topological_sort_layers_respect_edges() {
        let g = graph(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("d", &[]),
        ]);
        let layers = topological_sort(&g).unwrap();
        assert_eq!(
            layers,
            vec![
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn topological_sort_detects_cycles() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let err = topological_sort(&g).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn layers_sorted_by_name() {
        let g = graph(&[("z", &[]), ("a", &[]), ("m", &[])]);
        let layers = topological_sort(&g).unwrap();
        assert_eq!(layers, vec![vec!["a".to_string(), "m".into(), "z".into()]]);
    }

    #[test]
    fn find_dags_partitions_and_sorts_by_size() {
        let g = graph(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &[]),
            ("x", &["y"]),
            ("y", &[]),
        ]);
        let dags = find_dags(&g);
        assert_eq!(dags.len(), 2);
        assert_eq!(dags[0].len(), 3);
        assert_eq!(dags[1].len(), 2);
        assert!(dags[0].contains_key("a"));
        assert!(dags[1].contains_key("x"));
    }

    #[test]
    fn pickup_dag_finds_the_containing_partition() {
        let g = graph(&[("a", &["b"]), ("b", &[]), ("x", &[])]);
        let dag = pickup_dag("b", &g).unwrap();
        assert!(dag.contains_key("a"));
        assert!(dag.contains_key("b"));
        assert!(!dag.contains_key("x"));
        assert!(pickup_dag("missing", &g).is_none());
    }

    #[test]
    fn downstream_subgraph_is_forward_closure() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[]), ("d", &["a"])]);
        let sub = extract_downstream_subgraph(&g, "b");
        assert_eq!(sub.len(), 2);
        assert!(sub.contains_key("b"));
        assert!(sub.contains_key("c"));
    }

    #[test]
    fn upstream_subgraph_is_backward_closure() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[]), ("d", &["b"])]);
        let sub = extract_upstream_subgraph(&g, "b");
        assert!(sub.contains_key("a"));
        assert!(sub.contains_key("b"));
        assert!(sub.contains_key("d"));
        assert!(!sub.contains_key("c"));
    }

    #[test]
    fn both_trims_yield_single_node() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let down = extract_downstream_subgraph(&g, "b");
        let single = extract_upstream_subgraph(&down, "b");
        assert_eq!(single.len(), 1);
        assert!(single.contains_key("b"));
    }

    #[test]
    fn sink_and_source_nodes() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[]), ("d", &["c"])]);
        assert_eq!(find_sink_nodes(&g), vec!["c"]);
        assert_eq!(find_source_nodes(&g), vec!["a", "d"]);
    }

    #[test]
    fn self_loop_is_not_a_sink() {
        let g = graph(&[("a", &["a"]), ("b", &[])]);
        assert_eq!(find_sink_nodes(&g), vec!["b"]);
    }

    #[test]
    fn reverse_dependency_round_trips() {
        let g = graph(&[("a", &["b"]), ("b", &[])]);
        let rev = reverse_dependency(&g);
        assert_eq!(rev.get("b").unwrap(), &vec!["a".to_string()]);
        assert!(rev.get("a").unwrap().is_empty());
    }

    #[test]
    fn wildcard_matching() {
        let names: Vec<String> = ["alpha", "beta", "alpha_two"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(wildcard_matches("alpha*", &names), vec!["alpha", "alpha_two"]);
        assert_eq!(wildcard_matches("beta", &names), vec!["beta"]);
        assert_eq!(wildcard_matches("*a", &names), vec!["alpha", "beta"]);
    }
}
