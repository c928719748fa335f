//! Rule-driven relation and property inference for a single entity.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::config::InferenceConfig;
use crate::entity::{Context, Entity, RelationKey};
use crate::rules::{Proposal, RuleEngine, RuleSubject};
use crate::store::Snapshot;

/// Accepted proposals plus the bookkeeping that explains them.
///
/// Score and evidence maps are keyed by the proposal's relation key
/// rendered as `from-relation-to`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InferenceResult {
    pub inferred_relations: Vec<Proposal>,
    pub confidence_scores: BTreeMap<String, f64>,
    pub supporting_evidence: BTreeMap<String, Vec<String>>,
    pub inference_path: Vec<String>,
}

impl InferenceResult {
    pub fn confidence_of(&self, key: &RelationKey) -> Option<f64> {
        self.confidence_scores.get(&key.to_string()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.inferred_relations.is_empty()
    }
}

pub struct InferenceEngine {
    rules: RuleEngine,
    min_confidence: f64,
    max_depth: usize,
}

impl InferenceEngine {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            rules: RuleEngine::new(config.default_action_confidence),
            min_confidence: config.min_confidence,
            max_depth: config.max_depth,
        }
    }

    /// Propose relations and properties for `entity` from the rules that
    /// target its type or one of its ancestors.
    ///
    /// All matching rules fire in priority order. The first proposal of a
    /// relation key claims it, whatever later rules would score it; a
    /// claimed key whose confidence is under the threshold is dropped
    /// rather than handed to the next proposer.
    pub fn infer_relations(&self, snapshot: &Snapshot, entity: &Entity, context: Option<&Context>) -> InferenceResult {
        let empty = Context::new();
        let context = context.unwrap_or(&empty);

        let Some(entity_type) = entity.entity_type.as_deref() else {
            log::debug!("Entity {} has no declared type, nothing to infer", entity.id);
            return InferenceResult::default();
        };

        let types = snapshot.hierarchy().lineage(entity_type, self.max_depth);
        let subject = RuleSubject::single(entity);

        let mut claimed: HashSet<RelationKey> = HashSet::new();
        let mut result = InferenceResult::default();

        for rule in snapshot.rules_targeting(&types) {
            if !self.rules.matches(&subject, &rule.pattern, context) {
                continue;
            }

            let outcome = self.rules.apply(rule, &subject, context);
            let mut contributed = false;
            for proposal in outcome.proposals {
                if !claimed.insert(proposal.key.clone()) {
                    log::debug!("Rule {}: {} already proposed, ignoring", rule.name, proposal.key);
                    continue;
                }
                if proposal.confidence < self.min_confidence {
                    log::debug!(
                        "Rule {}: {} below threshold ({:.2} < {:.2})",
                        rule.name,
                        proposal.key,
                        proposal.confidence,
                        self.min_confidence
                    );
                    continue;
                }

                let key = proposal.key.to_string();
                result.confidence_scores.insert(key.clone(), proposal.confidence);
                result.supporting_evidence.insert(key, proposal.evidence.clone());
                result.inferred_relations.push(proposal);
                contributed = true;
            }

            if contributed {
                result.inference_path.push(rule.name.clone());
            }
        }

        log::debug!(
            "Inferred {} proposals for {} via {} rules",
            result.inferred_relations.len(),
            entity.id,
            result.inference_path.len()
        );
        result
    }
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(&InferenceConfig::default())
    }
}
