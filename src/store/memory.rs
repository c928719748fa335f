use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{HierarchyStore, MetadataSink, PatternStore, RuleStore};
use crate::error::Result;
use crate::hierarchy::{RelationType, TypeHierarchyEdge, ValidTypeRelation};
use crate::pattern::{Pattern, TypeScores};
use crate::rules::{sort_by_priority, SemanticRule};

/// Last recorded type-inference outcome for an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub scores: TypeScores,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    patterns: Vec<Pattern>,
    rules: Vec<SemanticRule>,
    edges: Vec<TypeHierarchyEdge>,
    valid_relations: Vec<ValidTypeRelation>,
    relation_types: Vec<RelationType>,
    metadata: BTreeMap<String, MetadataRecord>,
}

/// In-process store for embedding callers and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self, entity_id: &str) -> Option<MetadataRecord> {
        self.read().metadata.get(entity_id).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PatternStore for MemoryStore {
    async fn get_patterns(&self, semantic_type: Option<&str>) -> Result<Vec<Pattern>> {
        Ok(self
            .read()
            .patterns
            .iter()
            .filter(|p| semantic_type.map_or(true, |t| p.semantic_type == t))
            .cloned()
            .collect())
    }

    async fn put_pattern(&self, pattern: &Pattern) -> Result<()> {
        let mut state = self.write();
        match state.patterns.iter_mut().find(|p| p.id == pattern.id) {
            Some(existing) => *existing = pattern.clone(),
            None => state.patterns.push(pattern.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn get_rules(&self, target_type: Option<&str>) -> Result<Vec<SemanticRule>> {
        let mut rules: Vec<SemanticRule> = self
            .read()
            .rules
            .iter()
            .filter(|r| target_type.map_or(true, |t| r.targets_type(t)))
            .cloned()
            .collect();
        sort_by_priority(&mut rules);
        Ok(rules)
    }

    async fn put_rule(&self, rule: &SemanticRule) -> Result<()> {
        let mut state = self.write();
        match state.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule.clone(),
            None => state.rules.push(rule.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl HierarchyStore for MemoryStore {
    async fn get_edges(&self) -> Result<Vec<TypeHierarchyEdge>> {
        Ok(self.read().edges.clone())
    }

    async fn get_valid_relations(&self) -> Result<Vec<ValidTypeRelation>> {
        Ok(self.read().valid_relations.clone())
    }

    async fn get_relation_types(&self) -> Result<Vec<RelationType>> {
        Ok(self.read().relation_types.clone())
    }

    async fn put_edge(&self, edge: &TypeHierarchyEdge) -> Result<()> {
        let mut state = self.write();
        if !state.edges.contains(edge) {
            state.edges.push(edge.clone());
        }
        Ok(())
    }

    async fn put_valid_relation(&self, relation: &ValidTypeRelation) -> Result<()> {
        let mut state = self.write();
        if !state.valid_relations.contains(relation) {
            state.valid_relations.push(relation.clone());
        }
        Ok(())
    }

    async fn put_relation_type(&self, relation_type: &RelationType) -> Result<()> {
        let mut state = self.write();
        match state.relation_types.iter_mut().find(|rt| rt.name == relation_type.name) {
            Some(existing) => *existing = relation_type.clone(),
            None => state.relation_types.push(relation_type.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataSink for MemoryStore {
    async fn put_inference_metadata(
        &self,
        entity_id: &str,
        scores: &TypeScores,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.write().metadata.insert(
            entity_id.to_string(),
            MetadataRecord {
                scores: scores.clone(),
                timestamp,
            },
        );
        Ok(())
    }
}
