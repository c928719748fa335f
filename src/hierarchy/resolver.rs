//! BFS over child -> parent edges, built once per snapshot.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use super::{TypeHierarchyEdge, ValidTypeRelation};

/// An ancestor type reached `depth` hops above the start type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ancestor {
    pub type_name: String,
    pub depth: usize,
}

/// In-memory adjacency of the type hierarchy plus the valid-relation table.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchyResolver {
    parents: HashMap<String, Vec<String>>,
    /// (from_type, relation_name) -> permitted to_types
    valid: HashMap<(String, String), HashSet<String>>,
    max_depth: usize,
}

impl TypeHierarchyResolver {
    pub fn new(edges: &[TypeHierarchyEdge], valid_relations: &[ValidTypeRelation], max_depth: usize) -> Self {
        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        for edge in edges {
            let entry = parents.entry(edge.child_type.clone()).or_default();
            if !entry.contains(&edge.parent_type) {
                entry.push(edge.parent_type.clone());
            }
        }

        let mut valid: HashMap<(String, String), HashSet<String>> = HashMap::new();
        for rel in valid_relations {
            valid
                .entry((rel.from_type.clone(), rel.relation_name.clone()))
                .or_default()
                .insert(rel.to_type.clone());
        }

        Self {
            parents,
            valid,
            max_depth,
        }
    }

    /// Depth bound used by [`relation_permitted`](Self::relation_permitted)
    /// and for ancestor chains outside inference.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Ancestors of `type_name` in breadth-first order, at most `max_depth` hops up.
    ///
    /// Each type appears once, at its shallowest depth. The start type is
    /// never reported as its own ancestor, even through a cycle.
    pub fn ancestors(&self, type_name: &str, max_depth: usize) -> Vec<Ancestor> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        let mut result = Vec::new();

        visited.insert(type_name);
        queue.push_back((type_name, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(parents) = self.parents.get(current) else {
                continue;
            };
            for parent in parents {
                if visited.insert(parent.as_str()) {
                    queue.push_back((parent.as_str(), depth + 1));
                    result.push(Ancestor {
                        type_name: parent.clone(),
                        depth: depth + 1,
                    });
                }
            }
        }

        result
    }

    /// `type_name` followed by its ancestors, nearest first.
    pub fn lineage(&self, type_name: &str, max_depth: usize) -> Vec<String> {
        std::iter::once(type_name.to_string())
            .chain(self.ancestors(type_name, max_depth).into_iter().map(|a| a.type_name))
            .collect()
    }

    /// The nearest type in `from_type`'s lineage licensed for `relation_name -> to_type`.
    ///
    /// Only the source side is generalised; `to_type` must match exactly.
    pub fn permitting_type(&self, from_type: &str, relation_name: &str, to_type: &str) -> Option<String> {
        self.lineage(from_type, self.max_depth).into_iter().find(|candidate| {
            self.valid
                .get(&(candidate.clone(), relation_name.to_string()))
                .is_some_and(|targets| targets.contains(to_type))
        })
    }

    pub fn relation_permitted(&self, from_type: &str, relation_name: &str, to_type: &str) -> bool {
        self.permitting_type(from_type, relation_name, to_type).is_some()
    }

    pub fn type_count(&self) -> usize {
        let mut types: HashSet<&str> = HashSet::new();
        for (child, parents) in &self.parents {
            types.insert(child);
            types.extend(parents.iter().map(String::as_str));
        }
        types.len()
    }
}
