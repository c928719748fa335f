use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{HierarchyStore, PatternStore, RuleStore};
use crate::error::Result;
use crate::hierarchy::{RelationType, TypeHierarchyEdge, TypeHierarchyResolver, ValidTypeRelation};
use crate::pattern::Pattern;
use crate::rules::{sort_by_priority, SemanticRule};

/// Immutable view of patterns, rules and hierarchy facts.
///
/// Every engine call runs against one snapshot; refreshing the store builds
/// a new snapshot rather than mutating this one.
#[derive(Debug)]
pub struct Snapshot {
    patterns: Vec<Pattern>,
    rules: Vec<SemanticRule>,
    hierarchy: TypeHierarchyResolver,
    relation_types: HashMap<String, RelationType>,
    valid_relation_count: usize,
    loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub patterns: usize,
    pub rules: usize,
    pub types: usize,
    pub valid_relations: usize,
    pub relation_types: usize,
    pub loaded_at: String,
}

impl Snapshot {
    /// Assemble a snapshot, dropping patterns that fail validation.
    pub fn new(
        patterns: Vec<Pattern>,
        mut rules: Vec<SemanticRule>,
        edges: &[TypeHierarchyEdge],
        valid_relations: &[ValidTypeRelation],
        relation_types: Vec<RelationType>,
        hierarchy_max_depth: usize,
    ) -> Self {
        let patterns = patterns
            .into_iter()
            .filter(|pattern| match pattern.validate() {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Dropping pattern from snapshot: {}", e);
                    false
                }
            })
            .collect();

        sort_by_priority(&mut rules);

        Self {
            patterns,
            rules,
            hierarchy: TypeHierarchyResolver::new(edges, valid_relations, hierarchy_max_depth),
            relation_types: relation_types.into_iter().map(|rt| (rt.name.clone(), rt)).collect(),
            valid_relation_count: valid_relations.len(),
            loaded_at: Utc::now(),
        }
    }

    /// Read everything once from `store`. Only store failures propagate.
    pub async fn load<S>(store: &S, hierarchy_max_depth: usize) -> Result<Self>
    where
        S: PatternStore + RuleStore + HierarchyStore + ?Sized,
    {
        let patterns = store.get_patterns(None).await?;
        let rules = store.get_rules(None).await?;
        let edges = store.get_edges().await?;
        let valid_relations = store.get_valid_relations().await?;
        let relation_types = store.get_relation_types().await?;

        let snapshot = Self::new(
            patterns,
            rules,
            &edges,
            &valid_relations,
            relation_types,
            hierarchy_max_depth,
        );
        log::info!(
            "Snapshot loaded: {} patterns, {} rules, {} hierarchy edges, {} valid relations",
            snapshot.patterns.len(),
            snapshot.rules.len(),
            edges.len(),
            valid_relations.len()
        );
        Ok(snapshot)
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// All rules, highest priority first.
    pub fn rules(&self) -> &[SemanticRule] {
        &self.rules
    }

    pub fn hierarchy(&self) -> &TypeHierarchyResolver {
        &self.hierarchy
    }

    pub fn relation_type(&self, name: &str) -> Option<&RelationType> {
        self.relation_types.get(name)
    }

    /// Rules whose target type is one of `types`, in priority order.
    pub fn rules_targeting<'a>(&'a self, types: &'a [String]) -> impl Iterator<Item = &'a SemanticRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| types.iter().any(|t| rule.targets_type(t)))
    }

    /// Rules validating `relation_type`, in priority order.
    pub fn rules_for_relation<'a>(&'a self, relation_type: &'a str) -> impl Iterator<Item = &'a SemanticRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.validates_relation(relation_type))
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            patterns: self.patterns.len(),
            rules: self.rules.len(),
            types: self.hierarchy.type_count(),
            valid_relations: self.valid_relation_count,
            relation_types: self.relation_types.len(),
            loaded_at: self.loaded_at.to_rfc3339(),
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new(), &[], &[], Vec::new(), 10)
    }
}
