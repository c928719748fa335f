//! Declarative condition -> action rules driving validation and inference.
//!
//! Rules are stored as JSON documents. Parsing is lenient at the action
//! level: an action with an unknown `type` tag is dropped with a debug log,
//! while a rule whose pattern cannot be parsed is rejected as a whole.

mod engine;
mod matching;

pub use engine::{Proposal, ProposalKind, RuleEngine, RuleOutcome, RuleSubject};
pub use matching::{json_subset, values_equal};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SemlayerError};

/// Comparison used by an operator-style property clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "contains")]
    Contains,
}

/// A `properties` clause entry: a bare value means exact equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyConstraint {
    Compare { operator: Operator, value: Value },
    Exact(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

/// Bounds on the number of existing outgoing relations of the subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardinalityBounds {
    /// Relation type to count; defaults to the relation under evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cardinality {
    Named(CardinalityKind),
    Bounds(CardinalityBounds),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<Cardinality>,
}

/// Match condition of a rule. Absent clauses are vacuously true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePattern {
    /// Relation type the rule validates.
    #[serde(rename = "type", alias = "relation_type", default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<String>,
    /// Entity type the rule infers for (matched against the type's lineage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipPattern>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
}

/// Which entity of the pair a check reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    From,
    To,
}

/// Condition evaluated by a `validate` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ValidationCheck {
    RequiresAttribute {
        attribute: String,
        #[serde(default)]
        side: Side,
    },
    AttributeEquals {
        attribute: String,
        value: Value,
        #[serde(default)]
        side: Side,
    },
    /// Both entities carry the attribute with equal values.
    MatchingAttribute { attribute: String },
    /// The target entity (or the subject, when alone) has one of these types.
    TargetTypeIn { types: Vec<String> },
    ContextPresent { key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateAction {
    #[serde(flatten)]
    pub check: ValidationCheck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Message template; `{from}`, `{to}` and `{relation}` are substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestAction {
    pub message: String,
}

/// Where an inferred relation points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRef {
    Id(String),
    /// Entity attribute holding one id or a list of ids.
    Attribute(String),
    /// Context key holding one id or a list of ids.
    Context(String),
    SecondEntity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferRelationAction {
    pub relation_type: String,
    pub target: TargetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_context: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferPropertyAction {
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Copy the value of this attribute when `value` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_context: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    Validate(ValidateAction),
    Suggest(SuggestAction),
    InferRelation(InferRelationAction),
    InferProperty(InferPropertyAction),
}

const ACTION_TAGS: &[&str] = &["validate", "suggest", "infer_relation", "infer_property"];

/// Parse raw action documents, dropping unknown or malformed ones.
pub fn parse_actions(rule_name: &str, raw: Vec<Value>) -> Vec<RuleAction> {
    let mut actions = Vec::with_capacity(raw.len());
    for value in raw {
        let tag = value.get("type").and_then(Value::as_str).map(str::to_string);
        match serde_json::from_value::<RuleAction>(value) {
            Ok(action) => actions.push(action),
            Err(e) => match tag.as_deref() {
                Some(t) if ACTION_TAGS.contains(&t) => {
                    log::warn!("Rule {}: dropping malformed {} action: {}", rule_name, t, e);
                }
                other => {
                    log::debug!("Rule {}: ignoring unknown action type {:?}", rule_name, other);
                }
            },
        }
    }
    actions
}

/// A named, prioritised condition/action rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct SemanticRule {
    pub name: String,
    pub pattern: RulePattern,
    pub actions: Vec<RuleAction>,
    pub priority: i64,
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(alias = "rule_name")]
    name: String,
    pattern: Value,
    #[serde(default)]
    actions: Vec<Value>,
    #[serde(default)]
    priority: i64,
}

impl TryFrom<RawRule> for SemanticRule {
    type Error = SemlayerError;

    fn try_from(raw: RawRule) -> Result<Self> {
        let pattern = serde_json::from_value(raw.pattern).map_err(|e| SemlayerError::MalformedRule {
            name: raw.name.clone(),
            reason: format!("pattern: {}", e),
        })?;
        let actions = parse_actions(&raw.name, raw.actions);
        Ok(Self {
            name: raw.name,
            pattern,
            actions,
            priority: raw.priority,
        })
    }
}

impl SemanticRule {
    pub fn new(name: impl Into<String>, pattern: RulePattern, priority: i64) -> Self {
        Self {
            name: name.into(),
            pattern,
            actions: Vec::new(),
            priority,
        }
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Build a rule from its stored JSON columns.
    pub fn from_stored(name: &str, pattern_json: &str, actions_json: &str, priority: i64) -> Result<Self> {
        let malformed = |what: &str, e: serde_json::Error| SemlayerError::MalformedRule {
            name: name.to_string(),
            reason: format!("{}: {}", what, e),
        };
        let pattern: Value = serde_json::from_str(pattern_json).map_err(|e| malformed("pattern", e))?;
        let actions: Vec<Value> = serde_json::from_str(actions_json).map_err(|e| malformed("actions", e))?;
        SemanticRule::try_from(RawRule {
            name: name.to_string(),
            pattern,
            actions,
            priority,
        })
    }

    pub fn targets_type(&self, type_name: &str) -> bool {
        self.pattern.target_type.as_deref() == Some(type_name)
    }

    pub fn validates_relation(&self, relation_type: &str) -> bool {
        self.pattern.relation_type.as_deref() == Some(relation_type)
    }
}

/// Order rules by descending priority, keeping encounter order for ties.
pub fn sort_by_priority(rules: &mut [SemanticRule]) {
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_deserialize_full() {
        let rule: SemanticRule = serde_json::from_value(json!({
            "rule_name": "authorship",
            "priority": 5,
            "pattern": {
                "type": "authored_by",
                "target_type": "Document",
                "properties": {"status": "final", "pages": {"operator": ">", "value": 3}},
                "relationship": {"cardinality": "many_to_one"},
                "context": {"project": {"active": true}}
            },
            "actions": [
                {"type": "validate", "check": "requires_attribute", "attribute": "title"},
                {"type": "suggest", "message": "Link {from} to a reviewer"},
                {"type": "infer_relation", "relation_type": "owned_by", "target": {"attribute": "owner"}},
                {"type": "infer_property", "property": "reviewed", "value": true, "confidence": 0.9}
            ]
        }))
        .unwrap();

        assert_eq!(rule.name, "authorship");
        assert_eq!(rule.priority, 5);
        assert!(rule.validates_relation("authored_by"));
        assert!(rule.targets_type("Document"));
        assert_eq!(
            rule.pattern.properties["status"],
            PropertyConstraint::Exact(json!("final"))
        );
        assert_eq!(
            rule.pattern.properties["pages"],
            PropertyConstraint::Compare {
                operator: Operator::Gt,
                value: json!(3)
            }
        );
        assert_eq!(
            rule.pattern.relationship.as_ref().unwrap().cardinality,
            Some(Cardinality::Named(CardinalityKind::ManyToOne))
        );
        assert_eq!(rule.actions.len(), 4);
        assert!(matches!(
            &rule.actions[0],
            RuleAction::Validate(ValidateAction {
                check: ValidationCheck::RequiresAttribute { side: Side::From, .. },
                message: None
            })
        ));
    }

    #[test]
    fn test_unknown_action_type_is_dropped() {
        let actions = parse_actions(
            "r",
            vec![
                json!({"type": "teleport", "where": "mars"}),
                json!({"type": "suggest", "message": "ok"}),
                json!({"no_type": true}),
            ],
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], RuleAction::Suggest(_)));
    }

    #[test]
    fn test_malformed_known_action_is_dropped() {
        let actions = parse_actions("r", vec![json!({"type": "infer_relation"})]);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_malformed_pattern_rejects_rule() {
        let err = SemanticRule::from_stored("bad", r#"{"properties": 12}"#, "[]", 0).unwrap_err();
        assert!(matches!(err, SemlayerError::MalformedRule { .. }));

        let err = SemanticRule::from_stored("bad", "not json", "[]", 0).unwrap_err();
        assert!(matches!(err, SemlayerError::MalformedRule { .. }));
    }

    #[test]
    fn test_from_stored_round_trips_serialized_rule() {
        let rule = SemanticRule::new(
            "r",
            RulePattern {
                target_type: Some("User".to_string()),
                ..Default::default()
            },
            3,
        )
        .with_action(RuleAction::Suggest(SuggestAction {
            message: "hi".to_string(),
        }));
        let pattern = serde_json::to_string(&rule.pattern).unwrap();
        let actions = serde_json::to_string(&rule.actions).unwrap();
        let parsed = SemanticRule::from_stored("r", &pattern, &actions, 3).unwrap();
        assert_eq!(parsed, rule);
    }

    #[test]
    fn test_sort_by_priority_is_stable() {
        let mut rules = vec![
            SemanticRule::new("low", RulePattern::default(), 1),
            SemanticRule::new("high-a", RulePattern::default(), 9),
            SemanticRule::new("high-b", RulePattern::default(), 9),
        ];
        sort_by_priority(&mut rules);
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["high-a", "high-b", "low"]);
    }

    #[test]
    fn test_cardinality_bounds_deserialize() {
        let card: Cardinality = serde_json::from_value(json!({"max": 2})).unwrap();
        assert_eq!(
            card,
            Cardinality::Bounds(CardinalityBounds {
                relation_type: None,
                min: None,
                max: Some(2)
            })
        );
    }
}
