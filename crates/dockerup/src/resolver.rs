//! Dependency Resolver — builds a DAG from links/volumes-from/network
//! sharing and yields a topological order plus a `downstream` query
//! (spec.md §4.D). No direct teacher analogue; built as an arena of node
//! records with index-based edges per Design Notes §9.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::spec::{ContainerSpec, Volume};

#[derive(Error, Debug, PartialEq, Eq)]
#[error("dependency cycle detected between '{a}' and '{b}'")]
pub struct CycleError {
    pub a: String,
    pub b: String,
}

#[derive(Debug)]
struct Node {
    spec: ContainerSpec,
    /// Indices of specs this node depends on (must start first).
    depends_on: Vec<usize>,
}

/// A resolved dependency graph: a topological order and a `downstream`
/// query, both index-backed.
#[derive(Debug)]
pub struct Resolver {
    nodes: Vec<Node>,
    /// `downstream[i]` holds the indices of nodes that transitively depend
    /// on node `i`, in post-order.
    downstream: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl Resolver {
    /// Builds the graph from `specs` and computes its topological order.
    /// Cycles are a fatal error naming both nodes by image, per spec.md
    /// §4.D.
    pub fn resolve(specs: Vec<ContainerSpec>) -> Result<Self, CycleError> {
        let by_name: HashMap<&str, usize> = specs
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.name.as_deref().map(|n| (n, i)))
            .collect();

        let nodes: Vec<Node> = specs
            .iter()
            .map(|s| Node {
                spec: s.clone(),
                depends_on: dependency_indices(s, &by_name),
            })
            .collect();

        let mut resolved: Vec<usize> = Vec::new();
        let mut in_resolved: Vec<bool> = vec![false; nodes.len()];
        let mut seen: HashSet<usize> = HashSet::new();

        // Synthetic root depends on every spec; walking from it in
        // inventory order gives inventory-order tie-breaking within a
        // dependency level (spec.md §4.D).
        for root_child in 0..nodes.len() {
            visit(root_child, &nodes, &mut seen, &mut in_resolved, &mut resolved)?;
        }

        let downstream = compute_downstream(&nodes, &resolved);

        Ok(Self {
            nodes,
            downstream,
            order: resolved,
        })
    }

    /// The dependency-first topological order.
    pub fn order(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.order.iter().map(move |&i| &self.nodes[i].spec)
    }

    /// All specs that transitively depend on the spec named `name`,
    /// excluding that spec itself, in post-order. Returns an empty list if
    /// `name` is absent from the graph (there is no way to reference it).
    pub fn downstream(&self, name: &str) -> Vec<&ContainerSpec> {
        let Some(idx) = self
            .nodes
            .iter()
            .position(|n| n.spec.name.as_deref() == Some(name))
        else {
            return Vec::new();
        };
        self.downstream[idx].iter().map(|&i| &self.nodes[i].spec).collect()
    }
}

fn dependency_indices(spec: &ContainerSpec, by_name: &HashMap<&str, usize>) -> Vec<usize> {
    let mut deps = Vec::new();
    for target in spec.links.keys() {
        if let Some(&idx) = by_name.get(target.as_str()) {
            deps.push(idx);
        }
    }
    for vol in &spec.volumes {
        if let Volume::VolumesFrom { from } = vol {
            if let Some(&idx) = by_name.get(from.as_str()) {
                deps.push(idx);
            }
        }
    }
    if let Some(network) = &spec.network {
        if let Some(shared) = network.strip_prefix("container:") {
            if let Some(&idx) = by_name.get(shared) {
                deps.push(idx);
            }
        }
    }
    deps
}

fn visit(
    idx: usize,
    nodes: &[Node],
    seen: &mut HashSet<usize>,
    in_resolved: &mut [bool],
    resolved: &mut Vec<usize>,
) -> Result<(), CycleError> {
    if in_resolved[idx] {
        return Ok(());
    }
    if seen.contains(&idx) {
        return Err(CycleError {
            a: nodes[idx].spec.image.clone(),
            b: nodes[idx].spec.image.clone(),
        });
    }
    seen.insert(idx);
    for &dep in &nodes[idx].depends_on {
        if seen.contains(&dep) && !in_resolved[dep] {
            return Err(CycleError {
                a: nodes[idx].spec.image.clone(),
                b: nodes[dep].spec.image.clone(),
            });
        }
        visit(dep, nodes, seen, in_resolved, resolved)?;
    }
    seen.remove(&idx);
    in_resolved[idx] = true;
    resolved.push(idx);
    Ok(())
}

fn compute_downstream(nodes: &[Node], order: &[usize]) -> Vec<Vec<usize>> {
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    // `ancestors[i]` accumulates every node `i` transitively depends on.
    // `order` is dependency-first, so by the time we process `idx` each of
    // its direct dependencies already has a complete ancestor set.
    let mut ancestors: Vec<HashSet<usize>> = vec![HashSet::new(); nodes.len()];

    for &idx in order {
        for &dep in &nodes[idx].depends_on {
            ancestors[idx].insert(dep);
            let dep_ancestors: Vec<usize> = ancestors[dep].iter().copied().collect();
            ancestors[idx].extend(dep_ancestors);
        }
        for &ancestor in &ancestors[idx] {
            downstream[ancestor].push(idx);
        }
    }
    downstream
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(image: &str, name: &str) -> ContainerSpec {
        ContainerSpec {
            image: image.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    #[test]
    fn independent_specs_preserve_inventory_order() {
        let specs = vec![spec("a", "a"), spec("b", "b")];
        let r = Resolver::resolve(specs).unwrap();
        let order: Vec<&str> = r.order().map(|s| s.name.as_deref().unwrap()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn linked_spec_starts_after_its_target_regardless_of_input_order() {
        let mut web = spec("web", "web");
        web.links.insert("db".into(), "db".into());
        let specs = vec![web, spec("db", "db")];
        let r = Resolver::resolve(specs).unwrap();
        let order: Vec<&str> = r.order().map(|s| s.name.as_deref().unwrap()).collect();
        assert_eq!(order, vec!["db", "web"]);
    }

    #[test]
    fn downstream_returns_transitive_dependents() {
        let mut web = spec("web", "web");
        web.links.insert("db".into(), "db".into());
        let specs = vec![spec("db", "db"), web];
        let r = Resolver::resolve(specs).unwrap();
        let down: Vec<&str> = r
            .downstream("db")
            .into_iter()
            .map(|s| s.name.as_deref().unwrap())
            .collect();
        assert_eq!(down, vec!["web"]);
    }

    #[test]
    fn downstream_of_unreferenced_name_is_empty() {
        let specs = vec![spec("a", "a")];
        let r = Resolver::resolve(specs).unwrap();
        assert!(r.downstream("nonexistent").is_empty());
    }

    #[test]
    fn mutual_links_are_a_fatal_cycle() {
        let mut a = spec("a", "a");
        a.links.insert("b".into(), "b".into());
        let mut b = spec("b", "b");
        b.links.insert("a".into(), "a".into());
        let err = Resolver::resolve(vec![a, b]).unwrap_err();
        assert!(err.a == "a" || err.a == "b");
    }

    #[test]
    fn target_referenced_but_absent_is_not_an_edge() {
        let mut web = spec("web", "web");
        web.links.insert("missing".into(), "missing".into());
        let r = Resolver::resolve(vec![web]).unwrap();
        assert_eq!(r.order().count(), 1);
    }

    #[test]
    fn volumes_from_creates_an_edge() {
        let mut app = spec("app", "app");
        app.volumes.push(Volume::VolumesFrom { from: "data".into() });
        let specs = vec![app, spec("data", "data")];
        let r = Resolver::resolve(specs).unwrap();
        let order: Vec<&str> = r.order().map(|s| s.name.as_deref().unwrap()).collect();
        assert_eq!(order, vec!["data", "app"]);
    }

    #[test]
    fn shared_network_namespace_creates_an_edge() {
        let mut sidecar = spec("sidecar", "sidecar");
        sidecar.network = Some("container:main".into());
        let specs = vec![sidecar, spec("main", "main")];
        let r = Resolver::resolve(specs).unwrap();
        let order: Vec<&str> = r.order().map(|s| s.name.as_deref().unwrap()).collect();
        assert_eq!(order, vec!["main", "sidecar"]);
    }
}
