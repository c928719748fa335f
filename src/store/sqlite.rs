//! SQLite-backed store over the migrated semantic tables.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{HierarchyStore, MetadataSink, PatternStore, RuleStore};
use crate::db::{migrate, Db};
use crate::error::{Result, SemlayerError};
use crate::hierarchy::{RelationType, TypeHierarchyEdge, ValidTypeRelation};
use crate::pattern::{default_patterns, Pattern, TypeScores};
use crate::rules::SemanticRule;

/// Row of `semantic_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMetadata {
    pub entity_id: String,
    pub inferred_types: BTreeMap<String, f64>,
    pub confidence_score: Option<f64>,
    pub last_updated: String,
    pub run_id: String,
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Db,
}

struct PatternRow {
    id: String,
    semantic_type: String,
    pattern_data: String,
    confidence: f64,
    examples: String,
    success_rate: f64,
}

impl PatternRow {
    fn into_pattern(self) -> Result<Pattern> {
        let malformed = |what: &str, e: serde_json::Error| SemlayerError::MalformedPattern {
            id: self.id.clone(),
            reason: format!("{}: {}", what, e),
        };
        let attribute_patterns =
            serde_json::from_str(&self.pattern_data).map_err(|e| malformed("pattern_data", e))?;
        let examples = serde_json::from_str(&self.examples).map_err(|e| malformed("examples", e))?;
        let pattern = Pattern {
            id: self.id.clone(),
            semantic_type: self.semantic_type.clone(),
            attribute_patterns,
            confidence: self.confidence,
            examples,
            success_rate: self.success_rate,
        };
        pattern.validate()?;
        Ok(pattern)
    }
}

fn query_relation_types(conn: &Connection) -> Result<Vec<RelationType>> {
    let mut stmt = conn.prepare(
        "SELECT relation_name, semantic_category, description, transitive, symmetric, validation_rules
         FROM relation_types ORDER BY relation_name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    Ok(rows
        .into_iter()
        .map(|(name, semantic_category, description, transitive, symmetric, rules)| {
            let validation_rules = rules.and_then(|raw| match serde_json::from_str::<Value>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::warn!("Relation type {}: unreadable validation_rules: {}", name, e);
                    None
                }
            });
            RelationType {
                name,
                semantic_category,
                description,
                transitive,
                symmetric,
                validation_rules,
            }
        })
        .collect())
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Apply pending migrations from `migrations_dir`.
    pub async fn migrate(&self, migrations_dir: &Path) -> Result<()> {
        let dir = migrations_dir.to_path_buf();
        let missing = self
            .db
            .with_connection(move |conn| {
                migrate::run_migrations(conn, &dir)?;
                migrate::missing_tables(conn)
            })
            .await?;
        if !missing.is_empty() {
            return Err(SemlayerError::StoreUnavailable(format!(
                "{} is missing tables after migration: {}",
                self.db.path().display(),
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Install the built-in Document and User patterns.
    pub async fn seed_default_patterns(&self) -> Result<usize> {
        let patterns = default_patterns();
        for pattern in &patterns {
            self.put_pattern(pattern).await?;
        }
        log::info!("Seeded {} default patterns", patterns.len());
        Ok(patterns.len())
    }

    pub async fn inference_metadata(&self, entity_id: &str) -> Result<Option<StoredMetadata>> {
        let entity_id = entity_id.to_string();
        let row = self
            .db
            .with_connection(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT entity_id, inferred_types, confidence_score, last_updated, run_id
                         FROM semantic_metadata WHERE entity_id = ?1",
                        params![entity_id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, Option<f64>>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok::<_, SemlayerError>(row)
            })
            .await?;

        row.map(|(entity_id, types, confidence_score, last_updated, run_id)| {
            Ok::<_, SemlayerError>(StoredMetadata {
                entity_id,
                inferred_types: serde_json::from_str(&types)?,
                confidence_score,
                last_updated,
                run_id,
            })
        })
        .transpose()
    }

    /// Number of recorded inference runs for `entity_id`.
    pub async fn inference_run_count(&self, entity_id: &str) -> Result<usize> {
        let entity_id = entity_id.to_string();
        self.db
            .with_connection(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM inference_runs WHERE entity_id = ?1",
                    params![entity_id],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }
}

#[async_trait]
impl PatternStore for SqliteStore {
    async fn get_patterns(&self, semantic_type: Option<&str>) -> Result<Vec<Pattern>> {
        let semantic_type = semantic_type.map(String::from);
        let rows = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, semantic_type, pattern_data, confidence, examples, success_rate
                     FROM semantic_patterns
                     WHERE ?1 IS NULL OR semantic_type = ?1
                     ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(params![semantic_type], |row| {
                        Ok(PatternRow {
                            id: row.get(0)?,
                            semantic_type: row.get(1)?,
                            pattern_data: row.get(2)?,
                            confidence: row.get(3)?,
                            examples: row.get(4)?,
                            success_rate: row.get(5)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok::<_, SemlayerError>(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.into_pattern() {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    log::warn!("Skipping stored pattern: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn put_pattern(&self, pattern: &Pattern) -> Result<()> {
        let pattern_data = serde_json::to_string(&pattern.attribute_patterns)?;
        let examples = serde_json::to_string(&pattern.examples)?;
        let id = pattern.id.clone();
        let semantic_type = pattern.semantic_type.clone();
        let confidence = pattern.confidence;
        let success_rate = pattern.success_rate;

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO semantic_patterns (
                        id, semantic_type, pattern_data, confidence, examples, success_rate
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(id) DO UPDATE SET
                        semantic_type = excluded.semantic_type,
                        pattern_data = excluded.pattern_data,
                        confidence = excluded.confidence,
                        examples = excluded.examples,
                        success_rate = excluded.success_rate
                    "#,
                    params![id, semantic_type, pattern_data, confidence, examples, success_rate],
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn get_rules(&self, target_type: Option<&str>) -> Result<Vec<SemanticRule>> {
        let rows = self
            .db
            .with_connection(|conn| {
                // rowid keeps insertion order among equal priorities
                let mut stmt = conn.prepare(
                    "SELECT rule_name, pattern, actions, priority
                     FROM semantic_rules ORDER BY priority DESC, rowid",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok::<_, SemlayerError>(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(name, pattern, actions, priority)| {
                match SemanticRule::from_stored(&name, &pattern, &actions, priority) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        log::warn!("Skipping stored rule: {}", e);
                        None
                    }
                }
            })
            .filter(|rule| target_type.map_or(true, |t| rule.targets_type(t)))
            .collect())
    }

    async fn put_rule(&self, rule: &SemanticRule) -> Result<()> {
        let name = rule.name.clone();
        let pattern = serde_json::to_string(&rule.pattern)?;
        let actions = serde_json::to_string(&rule.actions)?;
        let priority = rule.priority;

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO semantic_rules (rule_name, pattern, actions, priority)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(rule_name) DO UPDATE SET
                        pattern = excluded.pattern,
                        actions = excluded.actions,
                        priority = excluded.priority
                    "#,
                    params![name, pattern, actions, priority],
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl HierarchyStore for SqliteStore {
    async fn get_edges(&self) -> Result<Vec<TypeHierarchyEdge>> {
        self.db
            .with_connection(|conn| {
                let mut stmt =
                    conn.prepare("SELECT parent_type, child_type FROM entity_type_hierarchy ORDER BY id")?;
                let edges = stmt
                    .query_map([], |row| Ok(TypeHierarchyEdge::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(edges)
            })
            .await
    }

    async fn get_valid_relations(&self) -> Result<Vec<ValidTypeRelation>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn
                    .prepare("SELECT from_type, relation_name, to_type FROM valid_type_relations ORDER BY id")?;
                let relations = stmt
                    .query_map([], |row| {
                        Ok(ValidTypeRelation::new(
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(relations)
            })
            .await
    }

    async fn get_relation_types(&self) -> Result<Vec<RelationType>> {
        self.db.with_connection(|conn| query_relation_types(conn)).await
    }

    async fn put_edge(&self, edge: &TypeHierarchyEdge) -> Result<()> {
        let edge = edge.clone();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO entity_type_hierarchy (parent_type, child_type) VALUES (?1, ?2)",
                    params![edge.parent_type, edge.child_type],
                )?;
                Ok(())
            })
            .await
    }

    async fn put_valid_relation(&self, relation: &ValidTypeRelation) -> Result<()> {
        let relation = relation.clone();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO valid_type_relations (from_type, relation_name, to_type)
                     VALUES (?1, ?2, ?3)",
                    params![relation.from_type, relation.relation_name, relation.to_type],
                )?;
                Ok(())
            })
            .await
    }

    async fn put_relation_type(&self, relation_type: &RelationType) -> Result<()> {
        let rt = relation_type.clone();
        let validation_rules = rt.validation_rules.as_ref().map(serde_json::to_string).transpose()?;
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO relation_types (
                        relation_name, semantic_category, description, transitive, symmetric, validation_rules
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(relation_name) DO UPDATE SET
                        semantic_category = excluded.semantic_category,
                        description = excluded.description,
                        transitive = excluded.transitive,
                        symmetric = excluded.symmetric,
                        validation_rules = excluded.validation_rules
                    "#,
                    params![
                        rt.name,
                        rt.semantic_category,
                        rt.description,
                        rt.transitive,
                        rt.symmetric,
                        validation_rules
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl MetadataSink for SqliteStore {
    /// Upsert the latest scores and append an `inference_runs` audit row.
    async fn put_inference_metadata(
        &self,
        entity_id: &str,
        scores: &TypeScores,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let run_id = Uuid::new_v4().to_string();
        let inferred_types = serde_json::to_string(&scores.scores)?;
        let confidence_score = scores.best().map(|(_, score)| score);
        let type_count = scores.scores.len() as i64;
        let timestamp = timestamp.to_rfc3339();
        let entity_id = entity_id.to_string();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    r#"
                    INSERT INTO semantic_metadata (
                        entity_id, inferred_types, confidence_score, last_updated, run_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(entity_id) DO UPDATE SET
                        inferred_types = excluded.inferred_types,
                        confidence_score = excluded.confidence_score,
                        last_updated = excluded.last_updated,
                        run_id = excluded.run_id
                    "#,
                    params![entity_id, inferred_types, confidence_score, timestamp, run_id],
                )?;
                tx.execute(
                    "INSERT INTO inference_runs (run_id, entity_id, timestamp, type_count)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![run_id, entity_id, timestamp, type_count],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}
