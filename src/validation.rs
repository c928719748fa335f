//! Four-stage validation of a proposed relation between two entities.
//!
//! Stages: type hierarchy, semantic rules, relation-type constraints and
//! context quality. Validity is the conjunction of all four; only the
//! context stage moves the confidence, and it can only lower it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{display_value, Context, Entity};
use crate::rules::{values_equal, Cardinality, CardinalityBounds, CardinalityKind, RuleEngine, RuleSubject, Side};
use crate::scoring::{consistency, hierarchy_completeness, ContextQuality, HierarchyShape};
use crate::store::Snapshot;

/// Context keys every validation call is expected to carry.
pub const REQUIRED_CONTEXT_KEYS: [&str; 3] = ["hierarchy", "constraints", "inference_rules"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
    pub confidence: f64,
    pub context: Context,
}

/// Constraint kinds declared in a relation type's `validation_rules`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ConstraintKind {
    Attribute {
        attribute: String,
        #[serde(default)]
        side: Side,
        #[serde(default)]
        value: Option<Value>,
    },
    /// Limits on the source's relations of this type, counting the new one.
    Cardinality(CardinalityConstraint),
    Context {
        key: String,
        #[serde(default)]
        value: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Constraint {
    #[serde(flatten)]
    kind: ConstraintKind,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawCardinalityConstraint")]
struct CardinalityConstraint(Cardinality);

/// `{"cardinality": "one_to_one"}` or `{"min": 1, "max": 3}`, never both.
#[derive(Deserialize)]
struct RawCardinalityConstraint {
    #[serde(default)]
    cardinality: Option<CardinalityKind>,
    #[serde(flatten)]
    bounds: CardinalityBounds,
}

impl TryFrom<RawCardinalityConstraint> for CardinalityConstraint {
    type Error = String;

    fn try_from(raw: RawCardinalityConstraint) -> Result<Self, Self::Error> {
        let has_bounds = raw.bounds.min.is_some() || raw.bounds.max.is_some();
        match (raw.cardinality, has_bounds) {
            (Some(_), true) => Err("declare a cardinality kind or min/max bounds, not both".to_string()),
            (Some(kind), false) => Ok(Self(Cardinality::Named(kind))),
            (None, true) => Ok(Self(Cardinality::Bounds(raw.bounds))),
            (None, false) => Err("cardinality constraint declares no kind and no bounds".to_string()),
        }
    }
}

/// Describe how adding one relation breaks `cardinality`, or `None` when it fits.
fn cardinality_failure(cardinality: &Cardinality, subject: &RuleSubject<'_>) -> Option<String> {
    let (counted, min, max) = match cardinality {
        Cardinality::Named(CardinalityKind::OneToOne | CardinalityKind::ManyToOne) => {
            (subject.relation_type, None, Some(1))
        }
        Cardinality::Named(CardinalityKind::OneToMany | CardinalityKind::ManyToMany) => return None,
        Cardinality::Bounds(bounds) => (
            bounds.relation_type.as_deref().or(subject.relation_type),
            bounds.min,
            bounds.max,
        ),
    };
    let existing = subject.from.relation_count(counted);
    let relation = counted.unwrap_or("such");

    if let Some(max) = max.filter(|max| existing + 1 > *max) {
        return Some(format!(
            "{} already has {} {} relation(s), at most {} allowed",
            subject.from.id, existing, relation, max
        ));
    }
    if let Some(min) = min.filter(|min| existing + 1 < *min) {
        return Some(format!(
            "{} would have {} {} relation(s), at least {} required",
            subject.from.id,
            existing + 1,
            relation,
            min
        ));
    }
    None
}

const CONSTRAINT_TAGS: &[&str] = &["attribute", "cardinality", "context"];

fn parse_constraints(relation_type: &str, blob: &Value) -> Vec<Constraint> {
    let Value::Array(items) = blob else {
        log::warn!("Relation type {}: validation_rules is not a list, ignoring", relation_type);
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Constraint>(item.clone()) {
            Ok(constraint) => Some(constraint),
            Err(e) => {
                match item.get("type").and_then(Value::as_str) {
                    Some(t) if CONSTRAINT_TAGS.contains(&t) => {
                        log::warn!("Relation type {}: malformed {} constraint: {}", relation_type, t, e)
                    }
                    other => log::debug!("Relation type {}: ignoring constraint type {:?}", relation_type, other),
                }
                None
            }
        })
        .collect()
}

/// Describe how `constraint` fails, or `None` when it holds.
fn constraint_failure(constraint: &ConstraintKind, subject: &RuleSubject<'_>, context: &Context) -> Option<String> {
    match constraint {
        ConstraintKind::Attribute { attribute, side, value } => {
            let entity = match side {
                Side::From => subject.from,
                Side::To => subject.to?,
            };
            match (entity.attribute(attribute), value) {
                (None, _) => Some(format!("{} must have attribute {}", entity.id, attribute)),
                (Some(actual), Some(expected)) if !values_equal(actual, expected) => Some(format!(
                    "{}.{} must be {}",
                    entity.id,
                    attribute,
                    display_value(expected)
                )),
                _ => None,
            }
        }
        ConstraintKind::Cardinality(CardinalityConstraint(cardinality)) => cardinality_failure(cardinality, subject),
        ConstraintKind::Context { key, value } => match (context.get(key), value) {
            (None, _) => Some(format!("context must contain {}", key)),
            (Some(actual), Some(expected)) if !values_equal(actual, expected) => {
                Some(format!("context {} must be {}", key, display_value(expected)))
            }
            _ => None,
        },
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

fn hierarchy_shape(hierarchy: &Value) -> HierarchyShape {
    let types = hierarchy.get("types");
    HierarchyShape {
        is_empty: is_empty_value(hierarchy),
        has_types: types.is_some(),
        has_relationships: hierarchy.get("relationships").is_some(),
        types_empty: types.is_some_and(is_empty_value),
    }
}

fn as_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Relations forbidden by the context's `constraints` entry.
fn forbidden_relations(constraints: &Value) -> Vec<&str> {
    as_items(constraints)
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => s.strip_prefix('!'),
            Value::Object(map) => map.get("forbids").and_then(Value::as_str),
            _ => None,
        })
        .collect()
}

/// Number of declared inference rules that name a forbidden relation.
fn rule_conflicts(context: &Context) -> usize {
    let (Some(rules), Some(constraints)) = (context.get("inference_rules"), context.get("constraints")) else {
        return 0;
    };
    let forbidden = forbidden_relations(constraints);
    as_items(rules)
        .into_iter()
        .filter_map(|rule| match rule {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("relation_type").and_then(Value::as_str),
            _ => None,
        })
        .filter(|relation| forbidden.contains(relation))
        .count()
}

/// Score the context bag; returns (valid, violations, confidence).
fn context_quality(context: &Context) -> (bool, Vec<String>, f64) {
    let violations: Vec<String> = REQUIRED_CONTEXT_KEYS
        .iter()
        .filter(|key| !context.contains_key(**key))
        .map(|key| format!("Missing required context: {}", key))
        .collect();

    let quality = ContextQuality {
        missing_required: violations.len(),
        hierarchy_completeness: context.get("hierarchy").map(|h| hierarchy_completeness(hierarchy_shape(h))),
        consistency: (!context.is_empty()).then(|| consistency(rule_conflicts(context))),
    };
    let confidence = quality.confidence();
    (violations.is_empty() && confidence > 0.5, violations, confidence)
}

pub struct RelationValidator {
    rules: RuleEngine,
}

impl RelationValidator {
    pub fn new(default_action_confidence: f64) -> Self {
        Self {
            rules: RuleEngine::new(default_action_confidence),
        }
    }

    /// Validate `from -[relation_type]-> to` against `snapshot`.
    ///
    /// Never fails: every problem becomes a violation or lower confidence.
    pub fn validate_relation(
        &self,
        snapshot: &Snapshot,
        from: &Entity,
        to: &Entity,
        relation_type: &str,
        context: Option<&Context>,
    ) -> ValidationResult {
        let context = context.cloned().unwrap_or_default();
        let subject = RuleSubject::pair(from, to, relation_type);
        let mut violations = Vec::new();
        let mut suggestions = Vec::new();

        // 1. type hierarchy
        let from_type = from.entity_type.as_deref();
        let to_type = to.entity_type.as_deref();
        let hierarchy_ok = match (from_type, to_type) {
            (Some(f), Some(t)) => snapshot.hierarchy().relation_permitted(f, relation_type, t),
            _ => false,
        };
        if !hierarchy_ok {
            violations.push(format!(
                "Invalid type hierarchy: {} -> {} -> {}",
                from_type.unwrap_or("<untyped>"),
                relation_type,
                to_type.unwrap_or("<untyped>")
            ));
        }

        // 2. semantic rules
        let mut rules_ok = true;
        for outcome in self
            .rules
            .evaluate(snapshot.rules_for_relation(relation_type), &subject, &context)
        {
            rules_ok &= outcome.is_valid;
            violations.extend(outcome.violations);
            suggestions.extend(outcome.suggestions);
        }

        // 3. relation-type constraints
        let mut constraints_ok = true;
        if let Some(blob) = snapshot
            .relation_type(relation_type)
            .and_then(|rt| rt.validation_rules.as_ref())
        {
            for constraint in parse_constraints(relation_type, blob) {
                if let Some(failure) = constraint_failure(&constraint.kind, &subject, &context) {
                    constraints_ok = false;
                    violations.push(format!(
                        "Constraint violation: {}",
                        constraint.description.unwrap_or(failure)
                    ));
                }
            }
        }

        // 4. context quality
        let (context_ok, context_violations, confidence) = context_quality(&context);
        violations.extend(context_violations);

        let is_valid = hierarchy_ok && rules_ok && constraints_ok && context_ok;
        log::debug!(
            "Validated {} -{}-> {}: valid={} confidence={:.3} violations={}",
            from.id,
            relation_type,
            to.id,
            is_valid,
            confidence,
            violations.len()
        );

        ValidationResult {
            is_valid,
            violations,
            suggestions,
            confidence,
            context,
        }
    }
}

impl Default for RelationValidator {
    fn default() -> Self {
        Self::new(0.8)
    }
}
