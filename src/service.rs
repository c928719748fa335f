//! Store-backed entry points combining the engines over a cached snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::SnapshotCache;
use crate::config::Config;
use crate::entity::{Context, Entity};
use crate::error::{Result, SemlayerError};
use crate::hierarchy::Ancestor;
use crate::inference::{InferenceEngine, InferenceResult};
use crate::pattern::Pattern;
use crate::store::{SemanticStore, Snapshot};
use crate::type_inference::{TypeInference, TypeInferenceService};
use crate::validation::{RelationValidator, ValidationResult};

/// A primary result plus the outcome of its best-effort side write.
///
/// `recorded` never changes `value`; a failed write is only reported.
#[derive(Debug)]
pub struct Recorded<T> {
    pub value: T,
    pub recorded: std::result::Result<(), SemlayerError>,
}

impl<T> Recorded<T> {
    pub fn is_recorded(&self) -> bool {
        self.recorded.is_ok()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// What an enrichment was computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentBasis {
    pub attributes_analyzed: usize,
    pub existing_relations: usize,
    pub entity_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticProfile {
    pub entity_id: String,
    pub inferred_types: TypeInference,
    /// Ancestors of the declared type, or of the best inferred type.
    pub hierarchy: Vec<Ancestor>,
    pub relations: InferenceResult,
    pub basis: EnrichmentBasis,
}

pub struct SemanticService<S> {
    store: S,
    snapshots: SnapshotCache,
    types: TypeInferenceService,
    inference: InferenceEngine,
    validator: RelationValidator,
}

impl<S: SemanticStore> SemanticService<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            snapshots: SnapshotCache::new(config.hierarchy.max_depth),
            types: TypeInferenceService::new(&config.matching),
            inference: InferenceEngine::new(&config.inference),
            validator: RelationValidator::new(config.inference.default_action_confidence),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The snapshot calls run against, loaded on first use.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.snapshots.load_if_needed(&self.store).await
    }

    pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
        self.snapshots.refresh(&self.store).await
    }

    /// Infer types and record them through the metadata sink.
    pub async fn infer_types(&self, entity: &Entity) -> Result<Recorded<TypeInference>> {
        let snapshot = self.snapshot().await?;
        let inference = self.types.infer_types(&snapshot, entity);
        let recorded = self.record(&inference).await;
        Ok(Recorded {
            value: inference,
            recorded,
        })
    }

    pub async fn infer_relations(&self, entity: &Entity, context: Option<&Context>) -> Result<InferenceResult> {
        let snapshot = self.snapshot().await?;
        Ok(self.inference.infer_relations(&snapshot, entity, context))
    }

    pub async fn validate_relation(
        &self,
        from: &Entity,
        to: &Entity,
        relation_type: &str,
        context: Option<&Context>,
    ) -> Result<ValidationResult> {
        let snapshot = self.snapshot().await?;
        Ok(self
            .validator
            .validate_relation(&snapshot, from, to, relation_type, context))
    }

    /// Types, ancestor chain and inferred relations of one entity.
    ///
    /// An untyped entity is enriched under its best inferred type.
    pub async fn enrich_entity(&self, entity: &Entity, context: Option<&Context>) -> Result<Recorded<SemanticProfile>> {
        let snapshot = self.snapshot().await?;
        let inferred_types = self.types.infer_types(&snapshot, entity);
        let recorded = self.record(&inferred_types).await;

        let effective_type = entity
            .entity_type
            .clone()
            .or_else(|| inferred_types.best_type.clone());

        let hierarchy = effective_type
            .as_deref()
            .map(|t| snapshot.hierarchy().ancestors(t, snapshot.hierarchy().max_depth()))
            .unwrap_or_default();

        let relations = match (&entity.entity_type, &effective_type) {
            (None, Some(best)) => {
                let typed = entity.clone().with_type(best.clone());
                self.inference.infer_relations(&snapshot, &typed, context)
            }
            _ => self.inference.infer_relations(&snapshot, entity, context),
        };

        let profile = SemanticProfile {
            entity_id: entity.id.clone(),
            inferred_types,
            hierarchy,
            relations,
            basis: EnrichmentBasis {
                attributes_analyzed: entity.attributes.len(),
                existing_relations: entity.relations.len(),
                entity_type: effective_type,
                timestamp: Utc::now(),
            },
        };
        Ok(Recorded {
            value: profile,
            recorded,
        })
    }

    /// Upsert a pattern and drop the cached snapshot so the next call sees it.
    pub async fn put_pattern(&self, pattern: &Pattern) -> Result<()> {
        pattern.validate()?;
        self.store.put_pattern(pattern).await?;
        self.snapshots.clear();
        Ok(())
    }

    async fn record(&self, inference: &TypeInference) -> std::result::Result<(), SemlayerError> {
        let recorded = self
            .store
            .put_inference_metadata(&inference.entity_id, &inference.types, Utc::now())
            .await;
        if let Err(e) = &recorded {
            log::warn!("Failed to record inference metadata for {}: {}", inference.entity_id, e);
        }
        recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{RelationType, TypeHierarchyEdge, ValidTypeRelation};
    use crate::pattern::{default_patterns, TypeScores};
    use crate::rules::SemanticRule;
    use crate::store::{
        import_bundle, Bundle, HierarchyStore, MemoryStore, MetadataSink, PatternStore, RuleStore,
    };
    use async_trait::async_trait;
    use serde_json::json;

    /// Memory store with switchable failures.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        metadata_offline: bool,
        rules_offline: bool,
    }

    #[async_trait]
    impl PatternStore for FlakyStore {
        async fn get_patterns(&self, semantic_type: Option<&str>) -> Result<Vec<Pattern>> {
            self.inner.get_patterns(semantic_type).await
        }
        async fn put_pattern(&self, pattern: &Pattern) -> Result<()> {
            self.inner.put_pattern(pattern).await
        }
    }

    #[async_trait]
    impl RuleStore for FlakyStore {
        async fn get_rules(&self, target_type: Option<&str>) -> Result<Vec<SemanticRule>> {
            if self.rules_offline {
                return Err(SemlayerError::StoreUnavailable("rule store offline".to_string()));
            }
            self.inner.get_rules(target_type).await
        }
        async fn put_rule(&self, rule: &SemanticRule) -> Result<()> {
            self.inner.put_rule(rule).await
        }
    }

    #[async_trait]
    impl HierarchyStore for FlakyStore {
        async fn get_edges(&self) -> Result<Vec<TypeHierarchyEdge>> {
            self.inner.get_edges().await
        }
        async fn get_valid_relations(&self) -> Result<Vec<ValidTypeRelation>> {
            self.inner.get_valid_relations().await
        }
        async fn get_relation_types(&self) -> Result<Vec<RelationType>> {
            self.inner.get_relation_types().await
        }
        async fn put_edge(&self, edge: &TypeHierarchyEdge) -> Result<()> {
            self.inner.put_edge(edge).await
        }
        async fn put_valid_relation(&self, relation: &ValidTypeRelation) -> Result<()> {
            self.inner.put_valid_relation(relation).await
        }
        async fn put_relation_type(&self, relation_type: &RelationType) -> Result<()> {
            self.inner.put_relation_type(relation_type).await
        }
    }

    #[async_trait]
    impl MetadataSink for FlakyStore {
        async fn put_inference_metadata(&self, entity_id: &str, scores: &TypeScores, at: DateTime<Utc>) -> Result<()> {
            if self.metadata_offline {
                return Err(SemlayerError::StoreUnavailable("metadata sink offline".to_string()));
            }
            self.inner.put_inference_metadata(entity_id, scores, at).await
        }
    }

    fn bundle() -> Bundle {
        serde_json::from_value(json!({
            "hierarchy": [{"parent_type": "Artifact", "child_type": "Document"}],
            "valid_relations": [{"from_type": "Artifact", "relation_name": "authored_by", "to_type": "User"}],
            "rules": [{
                "name": "owner",
                "priority": 1,
                "pattern": {"target_type": "Artifact"},
                "actions": [{"type": "infer_relation", "relation_type": "owned_by", "target": {"attribute": "owner"}}]
            }]
        }))
        .unwrap()
    }

    async fn service<S: SemanticStore>(store: S) -> SemanticService<S> {
        for pattern in default_patterns() {
            store.put_pattern(&pattern).await.unwrap();
        }
        import_bundle(&store, &bundle()).await.unwrap();
        SemanticService::new(store, &Config::default())
    }

    fn document() -> Entity {
        Entity::new("d1")
            .with_attribute("title", "Annual Report")
            .with_attribute("format", "pdf")
            .with_attribute("owner", "u1")
    }

    #[tokio::test]
    async fn test_infer_types_records_metadata() {
        let service = service(MemoryStore::new()).await;
        let inferred = service.infer_types(&document()).await.unwrap();

        assert!(inferred.is_recorded());
        assert_eq!(inferred.value.best_type.as_deref(), Some("Document"));
        let stored = service.store().metadata("d1").unwrap();
        assert_eq!(stored.scores, inferred.value.types);
    }

    #[tokio::test]
    async fn test_metadata_failure_does_not_change_result() {
        let healthy = service(MemoryStore::new()).await;
        let broken = service(FlakyStore {
            metadata_offline: true,
            ..FlakyStore::default()
        })
        .await;

        let expected = healthy.infer_types(&document()).await.unwrap();
        let inferred = broken.infer_types(&document()).await.unwrap();

        assert!(!inferred.is_recorded());
        assert!(matches!(inferred.recorded, Err(SemlayerError::StoreUnavailable(_))));
        assert_eq!(inferred.value, expected.value);
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_the_call() {
        let service = service(FlakyStore {
            rules_offline: true,
            ..FlakyStore::default()
        })
        .await;
        let from = document().with_type("Document");
        let to = Entity::new("u1").with_type("User");

        let err = service.infer_relations(&from, None).await.unwrap_err();
        assert!(err.is_store_failure());
        let err = service
            .validate_relation(&from, &to, "authored_by", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SemlayerError::StoreUnavailable(_)));
        assert!(err.is_store_failure());
        assert!(service.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn test_enrich_untyped_entity_uses_best_type() {
        let service = service(MemoryStore::new()).await;
        let profile = service.enrich_entity(&document(), None).await.unwrap().into_value();

        assert_eq!(profile.basis.entity_type.as_deref(), Some("Document"));
        assert_eq!(profile.basis.attributes_analyzed, 3);
        assert_eq!(profile.basis.existing_relations, 0);
        assert_eq!(profile.hierarchy, vec![Ancestor { type_name: "Artifact".to_string(), depth: 1 }]);
        assert_eq!(profile.relations.inference_path, vec!["owner".to_string()]);
        assert_eq!(profile.relations.inferred_relations[0].key.to_id, "u1");
    }

    #[tokio::test]
    async fn test_validate_through_service() {
        let service = service(MemoryStore::new()).await;
        let from = document().with_type("Document");
        let to = Entity::new("u1").with_type("User");
        let context: Context = serde_json::from_value(json!({
            "hierarchy": {"types": ["Document"], "relationships": ["authored_by"]},
            "constraints": [],
            "inference_rules": []
        }))
        .unwrap();

        let result = service
            .validate_relation(&from, &to, "authored_by", Some(&context))
            .await
            .unwrap();
        assert!(result.is_valid, "{:?}", result.violations);
    }

    #[tokio::test]
    async fn test_put_pattern_invalidates_snapshot() {
        let service = service(MemoryStore::new()).await;
        let before = service.snapshot().await.unwrap();
        assert_eq!(before.patterns().len(), 2);

        service.put_pattern(&Pattern::new("extra", "Note", 0.4)).await.unwrap();
        let after = service.snapshot().await.unwrap();
        assert_eq!(after.patterns().len(), 3);
        assert_eq!(before.patterns().len(), 2);

        let err = service.put_pattern(&Pattern::new("", "Note", 0.4)).await.unwrap_err();
        assert!(matches!(err, SemlayerError::MalformedPattern { .. }));
    }
}
