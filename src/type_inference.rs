use serde::Serialize;

use crate::config::MatchingConfig;
use crate::entity::Entity;
use crate::pattern::{PatternMatcher, TypeScores};
use crate::store::Snapshot;

/// Inferred types of one entity, with the best match broken out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeInference {
    pub entity_id: String,
    pub types: TypeScores,
    pub best_type: Option<String>,
    pub confidence: f64,
}

/// Assigns semantic types to entities from the snapshot's patterns.
pub struct TypeInferenceService {
    matcher: PatternMatcher,
}

impl TypeInferenceService {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            matcher: PatternMatcher::new(config.regex_cache_capacity),
        }
    }

    pub fn infer_types(&self, snapshot: &Snapshot, entity: &Entity) -> TypeInference {
        let types = self.matcher.infer_types(entity, snapshot.patterns());
        let best_type = types.best().map(|(t, _)| t.to_string());
        let confidence = types.confidence();

        log::debug!(
            "Entity {}: {} candidate types, best {:?} ({:.3})",
            entity.id,
            types.scores.len(),
            best_type,
            confidence
        );

        TypeInference {
            entity_id: entity.id.clone(),
            types,
            best_type,
            confidence,
        }
    }
}

impl Default for TypeInferenceService {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}
