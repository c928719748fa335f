//! Store collaborators: the narrow read/write interfaces the engines pull
//! their snapshot from, plus the SQLite and in-memory implementations.

mod memory;
mod snapshot;
mod sqlite;

pub use memory::{MemoryStore, MetadataRecord};
pub use snapshot::{Snapshot, SnapshotStats};
pub use sqlite::{SqliteStore, StoredMetadata};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hierarchy::{RelationType, TypeHierarchyEdge, ValidTypeRelation};
use crate::pattern::{Pattern, TypeScores};
use crate::rules::SemanticRule;

#[async_trait]
pub trait PatternStore: Send + Sync {
    /// All patterns, or only those for one semantic type.
    async fn get_patterns(&self, semantic_type: Option<&str>) -> Result<Vec<Pattern>>;
    /// Upsert by pattern id.
    async fn put_pattern(&self, pattern: &Pattern) -> Result<()>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Rules ordered by descending priority; ties keep insertion order.
    async fn get_rules(&self, target_type: Option<&str>) -> Result<Vec<SemanticRule>>;
    /// Upsert by rule name.
    async fn put_rule(&self, rule: &SemanticRule) -> Result<()>;
}

#[async_trait]
pub trait HierarchyStore: Send + Sync {
    async fn get_edges(&self) -> Result<Vec<TypeHierarchyEdge>>;
    async fn get_valid_relations(&self) -> Result<Vec<ValidTypeRelation>>;
    async fn get_relation_types(&self) -> Result<Vec<RelationType>>;
    async fn put_edge(&self, edge: &TypeHierarchyEdge) -> Result<()>;
    async fn put_valid_relation(&self, relation: &ValidTypeRelation) -> Result<()>;
    /// Upsert by relation name.
    async fn put_relation_type(&self, relation_type: &RelationType) -> Result<()>;
}

/// Receives the outcome of type-inference calls. Writes are best-effort.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn put_inference_metadata(&self, entity_id: &str, scores: &TypeScores, timestamp: DateTime<Utc>)
        -> Result<()>;
}

/// Everything the semantic service needs from one backend.
pub trait SemanticStore: PatternStore + RuleStore + HierarchyStore + MetadataSink {}

impl<T> SemanticStore for T where T: PatternStore + RuleStore + HierarchyStore + MetadataSink {}

/// Portable set of patterns, rules and hierarchy facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub rules: Vec<SemanticRule>,
    #[serde(default)]
    pub hierarchy: Vec<TypeHierarchyEdge>,
    #[serde(default)]
    pub valid_relations: Vec<ValidTypeRelation>,
    #[serde(default)]
    pub relation_types: Vec<RelationType>,
}

/// Records written by [`import_bundle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub patterns: usize,
    pub rules: usize,
    pub edges: usize,
    pub valid_relations: usize,
    pub relation_types: usize,
    pub skipped: usize,
}

/// Write a bundle into `store`. Invalid patterns are skipped, store errors abort.
pub async fn import_bundle<S>(store: &S, bundle: &Bundle) -> Result<ImportStats>
where
    S: PatternStore + RuleStore + HierarchyStore,
{
    let mut stats = ImportStats::default();

    for pattern in &bundle.patterns {
        if let Err(e) = pattern.validate() {
            log::warn!("Skipping pattern on import: {}", e);
            stats.skipped += 1;
            continue;
        }
        store.put_pattern(pattern).await?;
        stats.patterns += 1;
    }
    for rule in &bundle.rules {
        store.put_rule(rule).await?;
        stats.rules += 1;
    }
    for relation_type in &bundle.relation_types {
        store.put_relation_type(relation_type).await?;
        stats.relation_types += 1;
    }
    for edge in &bundle.hierarchy {
        store.put_edge(edge).await?;
        stats.edges += 1;
    }
    for relation in &bundle.valid_relations {
        store.put_valid_relation(relation).await?;
        stats.valid_relations += 1;
    }

    log::info!(
        "Imported {} patterns, {} rules, {} edges, {} valid relations, {} relation types ({} skipped)",
        stats.patterns,
        stats.rules,
        stats.edges,
        stats.valid_relations,
        stats.relation_types,
        stats.skipped
    );
    Ok(stats)
}
