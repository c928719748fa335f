use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::{AttributePattern, Pattern, ValueType};
use crate::cache::RegexCache;
use crate::entity::Entity;
use crate::scoring::clamp_unit;

const MISMATCH_PENALTY: f64 = 0.5;
const KEYWORD_BOOST: f64 = 1.2;

/// Type scores from [`PatternMatcher::infer_types`], keyed by semantic type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeScores {
    pub scores: BTreeMap<String, f64>,
}

impl TypeScores {
    /// Highest scoring type; ties resolve to the lexicographically first type.
    pub fn best(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (ty, score) in &self.scores {
            if best.map_or(true, |(_, s)| *score > s) {
                best = Some((ty.as_str(), *score));
            }
        }
        best
    }

    /// Overall confidence of the inference (score of the best type, or 0).
    pub fn confidence(&self) -> f64 {
        self.best().map_or(0.0, |(_, s)| s)
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Scores entity attributes against declarative patterns.
pub struct PatternMatcher {
    regexes: RegexCache,
}

impl PatternMatcher {
    pub fn new(regex_cache_capacity: usize) -> Self {
        Self {
            regexes: RegexCache::new(regex_cache_capacity),
        }
    }

    /// How well `entity` fits `pattern`, in [0, 1].
    ///
    /// Required attributes weigh 2, optional ones 1. A missing required
    /// attribute fails the whole pattern with exactly 0.
    pub fn score(&self, entity: &Entity, pattern: &Pattern) -> f64 {
        let mut matches = 0.0;
        let mut total_weight = 0.0;

        for (name, attr) in &pattern.attribute_patterns {
            let weight = attr.weight();
            total_weight += weight;

            match entity.attribute(name) {
                Some(value) => matches += self.score_value(value, attr) * weight,
                None if attr.required => {
                    log::debug!(
                        "Pattern {} rejects entity {}: missing required attribute {}",
                        pattern.id,
                        entity.id,
                        name
                    );
                    return 0.0;
                }
                None => {}
            }
        }

        if total_weight == 0.0 {
            return 0.0;
        }
        clamp_unit(matches / total_weight)
    }

    fn score_value(&self, value: &Value, attr: &AttributePattern) -> f64 {
        match (attr.value_type, value) {
            (ValueType::String, Value::String(s)) => self.score_string(s, attr),
            (ValueType::Number, Value::Number(_)) | (ValueType::Boolean, Value::Bool(_)) => 1.0,
            _ => 0.0,
        }
    }

    fn score_string(&self, value: &str, attr: &AttributePattern) -> f64 {
        let mut score = 1.0;

        if let Some(allowed) = &attr.allowed_values {
            if !allowed.contains(value) {
                score *= MISMATCH_PENALTY;
            }
        }

        if let Some(pattern) = &attr.regex {
            let matched = self.regexes.get(pattern).is_some_and(|re| re.is_match(value));
            if !matched {
                score *= MISMATCH_PENALTY;
            }
        }

        if let Some(keywords) = &attr.keywords {
            let lowered = value.to_lowercase();
            if keywords.iter().any(|kw| lowered.contains(kw.as_str())) {
                score *= KEYWORD_BOOST;
            }
        }

        score.min(1.0)
    }

    /// Score the entity against every pattern, weighted by pattern confidence.
    ///
    /// Only types with a positive score are kept. When several patterns
    /// share a semantic type the highest weighted score wins.
    pub fn infer_types<'a, I>(&self, entity: &Entity, patterns: I) -> TypeScores
    where
        I: IntoIterator<Item = &'a Pattern>,
    {
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for pattern in patterns {
            let weighted = clamp_unit(self.score(entity, pattern) * pattern.confidence);
            if weighted <= 0.0 {
                continue;
            }
            let entry = scores.entry(pattern.semantic_type.clone()).or_insert(0.0);
            if weighted > *entry {
                *entry = weighted;
            }
        }
        TypeScores { scores }
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
