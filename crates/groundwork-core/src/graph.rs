use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use crate::document::Document;
use crate::error::ValidationError;
use crate::value::PropValue;

/// A typed resource node. Immutable once the graph is built.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub id: String,
    pub resource_type: String,
    pub properties: BTreeMap<String, PropValue>,
    /// Explicit `depends_on` entries plus nodes named by `$ref` values.
    pub depends_on: BTreeSet<String>,
}

/// The dependency graph over a document's resources.
///
/// Building the graph validates every reference target and rejects cycles,
/// so downstream code can assume a DAG.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, ResourceNode>,
}

impl ResourceGraph {
    pub fn build(document: &Document) -> Result<Self, ValidationError> {
        let mut nodes = BTreeMap::new();

        for (id, decl) in &document.resources {
            let mut depends_on: BTreeSet<String> = decl.depends_on.iter().cloned().collect();

            let mut refs = Vec::new();
            for value in decl.properties.values() {
                value.references(&mut refs);
            }
            for r in refs {
                depends_on.insert(r.node);
            }

            for dep in &depends_on {
                if !document.resources.contains_key(dep) {
                    return Err(ValidationError::UnresolvedReference {
                        from: id.clone(),
                        target: dep.clone(),
                    });
                }
            }

            nodes.insert(
                id.clone(),
                ResourceNode {
                    id: id.clone(),
                    resource_type: decl.resource_type.clone(),
                    properties: decl.properties.clone(),
                    depends_on,
                },
            );
        }

        // Outputs may only reference declared resources.
        for (name, value) in &document.outputs {
            let mut refs = Vec::new();
            value.references(&mut refs);
            for r in refs {
                if !document.resources.contains_key(&r.node) {
                    return Err(ValidationError::UnresolvedReference {
                        from: format!("outputs.{name}"),
                        target: r.node,
                    });
                }
            }
        }

        let graph = ResourceGraph { nodes };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies_of(&self, id: &str) -> BTreeSet<String> {
        self.nodes
            .get(id)
            .map(|n| n.depends_on.clone())
            .unwrap_or_default()
    }

    /// Nodes that directly depend on `id`.
    pub fn dependents_of(&self, id: &str) -> BTreeSet<String> {
        self.nodes
            .values()
            .filter(|n| n.depends_on.contains(id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Transitive closure of dependencies of `id`, excluding `id` itself.
    pub fn transitive_dependencies_of(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = self.dependencies_of(id).into_iter().collect();
        while let Some(dep) = stack.pop() {
            if seen.insert(dep.clone()) {
                stack.extend(self.dependencies_of(&dep));
            }
        }
        seen
    }

    /// Transitive closure of dependents of `id`, excluding `id` itself.
    pub fn transitive_dependents_of(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = self.dependents_of(id).into_iter().collect();
        while let Some(dep) = stack.pop() {
            if seen.insert(dep.clone()) {
                stack.extend(self.dependents_of(&dep));
            }
        }
        seen
    }

    /// Deterministic topological order: Kahn's algorithm, with lexical id
    /// order breaking ties among simultaneously-ready nodes.
    pub fn topo_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.id.as_str(), n.depends_on.len()))
            .collect();

        let mut ready: BinaryHeap<Reverse<&str>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id.to_string());
            for dependent in self.dependents_of(id) {
                let d = in_degree
                    .get_mut(self.nodes[&dependent].id.as_str())
                    .expect("dependent is a known node");
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(self.nodes[&dependent].id.as_str()));
                }
            }
        }
        order
    }

    /// Depth-first search with a recursion stack; reports the cycle path.
    fn check_acyclic(&self) -> Result<(), ValidationError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();

        for start in self.nodes.keys() {
            if marks.contains_key(start.as_str()) {
                continue;
            }
            // Iterative DFS: (node, next child index) frames plus a path stack.
            let mut path: Vec<&str> = Vec::new();
            let mut frames: Vec<(&str, Vec<&str>)> = vec![(
                start.as_str(),
                self.child_list(start),
            )];
            marks.insert(start.as_str(), Mark::InProgress);
            path.push(start.as_str());

            while let Some((node, children)) = frames.last_mut() {
                match children.pop() {
                    Some(child) => match marks.get(child) {
                        Some(Mark::InProgress) => {
                            let from = path
                                .iter()
                                .position(|n| *n == child)
                                .unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[from..].iter().map(|s| s.to_string()).collect();
                            cycle.push(child.to_string());
                            return Err(ValidationError::Cycle { path: cycle });
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::InProgress);
                            path.push(child);
                            frames.push((child, self.child_list(child)));
                        }
                    },
                    None => {
                        marks.insert(*node, Mark::Done);
                        path.pop();
                        frames.pop();
                    }
                }
            }
        }
        Ok(())
    }

    fn child_list(&self, id: &str) -> Vec<&str> {
        self.nodes
            .get(id)
            .map(|n| n.depends_on.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
