use serde::Serialize;
use serde_json::Value;

use super::matching::{cardinality_satisfied, entity_field, json_subset, property_satisfied, values_equal};
use super::{
    InferPropertyAction, InferRelationAction, RuleAction, RulePattern, SemanticRule, Side, TargetRef, ValidateAction,
    ValidationCheck,
};
use crate::entity::{display_value, Context, Entity, RelationKey};
use crate::scoring::evidence_adjusted;

const SUPPORTING_EVIDENCE_KEY: &str = "supporting_evidence";
const CONTRADICTING_EVIDENCE_KEY: &str = "contradicting_evidence";

/// What a rule is evaluated against: one entity, or a proposed relation.
#[derive(Debug, Clone, Copy)]
pub struct RuleSubject<'a> {
    pub from: &'a Entity,
    pub to: Option<&'a Entity>,
    pub relation_type: Option<&'a str>,
}

impl<'a> RuleSubject<'a> {
    pub fn single(entity: &'a Entity) -> Self {
        Self {
            from: entity,
            to: None,
            relation_type: None,
        }
    }

    pub fn pair(from: &'a Entity, to: &'a Entity, relation_type: &'a str) -> Self {
        Self {
            from,
            to: Some(to),
            relation_type: Some(relation_type),
        }
    }

    fn side(&self, side: Side) -> Option<&'a Entity> {
        match side {
            Side::From => Some(self.from),
            Side::To => self.to,
        }
    }

    fn render(&self, template: &str) -> String {
        template
            .replace("{from}", &self.from.id)
            .replace("{to}", self.to.map_or("", |e| e.id.as_str()))
            .replace("{relation}", self.relation_type.unwrap_or(""))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalKind {
    Relation,
    Property { property: String, value: Value },
}

/// A relation or property inferred by one rule action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub key: RelationKey,
    #[serde(flatten)]
    pub kind: ProposalKind,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub rule: String,
}

/// Accumulated effect of running one rule's actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub is_valid: bool,
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
    pub proposals: Vec<Proposal>,
}

impl RuleOutcome {
    fn new(rule: &str) -> Self {
        Self {
            rule: rule.to_string(),
            is_valid: true,
            violations: Vec::new(),
            suggestions: Vec::new(),
            proposals: Vec::new(),
        }
    }
}

/// Evaluates rule patterns and runs rule actions. Holds no snapshot state.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    default_confidence: f64,
}

impl RuleEngine {
    pub fn new(default_action_confidence: f64) -> Self {
        Self {
            default_confidence: default_action_confidence,
        }
    }

    /// Conjunction of the pattern's declared clauses; absent clauses pass.
    pub fn matches(&self, subject: &RuleSubject<'_>, pattern: &RulePattern, context: &Context) -> bool {
        for (name, constraint) in &pattern.properties {
            if !property_satisfied(entity_field(subject.from, name).as_ref(), constraint) {
                return false;
            }
        }

        if let Some(cardinality) = pattern.relationship.as_ref().and_then(|r| r.cardinality.as_ref()) {
            let relation_type = subject.relation_type.or(pattern.relation_type.as_deref());
            if !cardinality_satisfied(cardinality, subject.from, relation_type) {
                return false;
            }
        }

        pattern
            .context
            .iter()
            .all(|(key, expected)| context.get(key).is_some_and(|actual| json_subset(actual, expected)))
    }

    /// Run every action of `rule` in order. Failed validations do not stop later actions.
    pub fn apply(&self, rule: &SemanticRule, subject: &RuleSubject<'_>, context: &Context) -> RuleOutcome {
        let mut outcome = RuleOutcome::new(&rule.name);

        for action in &rule.actions {
            match action {
                RuleAction::Validate(validate) => {
                    if let Some(violation) = self.run_validate(rule, validate, subject, context) {
                        outcome.is_valid = false;
                        outcome.violations.push(violation);
                    }
                }
                RuleAction::Suggest(suggest) => outcome.suggestions.push(subject.render(&suggest.message)),
                RuleAction::InferRelation(infer) => {
                    outcome
                        .proposals
                        .extend(self.infer_relation(rule, infer, subject, context));
                }
                RuleAction::InferProperty(infer) => {
                    outcome
                        .proposals
                        .extend(self.infer_property(rule, infer, subject, context));
                }
            }
        }

        log::debug!(
            "Rule {} fired: valid={} violations={} proposals={}",
            rule.name,
            outcome.is_valid,
            outcome.violations.len(),
            outcome.proposals.len()
        );
        outcome
    }

    /// Apply each matching rule in the given order; non-matching rules are skipped.
    pub fn evaluate<'r, I>(&self, rules: I, subject: &RuleSubject<'_>, context: &Context) -> Vec<RuleOutcome>
    where
        I: IntoIterator<Item = &'r SemanticRule>,
    {
        rules
            .into_iter()
            .filter(|rule| self.matches(subject, &rule.pattern, context))
            .map(|rule| self.apply(rule, subject, context))
            .collect()
    }

    fn run_validate(
        &self,
        rule: &SemanticRule,
        validate: &ValidateAction,
        subject: &RuleSubject<'_>,
        context: &Context,
    ) -> Option<String> {
        let failure = check_failure(&validate.check, subject, context)?;
        Some(match &validate.message {
            Some(message) => subject.render(message),
            None => format!("Rule {}: {}", rule.name, failure),
        })
    }

    fn confidence(&self, base: Option<f64>, context: &Context) -> f64 {
        evidence_adjusted(
            base.unwrap_or(self.default_confidence),
            evidence_count(context, SUPPORTING_EVIDENCE_KEY),
            evidence_count(context, CONTRADICTING_EVIDENCE_KEY),
        )
    }

    fn infer_relation(
        &self,
        rule: &SemanticRule,
        infer: &InferRelationAction,
        subject: &RuleSubject<'_>,
        context: &Context,
    ) -> Vec<Proposal> {
        let targets = resolve_targets(&infer.target, subject, context);
        if targets.is_empty() {
            log::debug!(
                "Rule {}: no target for {} from {}",
                rule.name,
                infer.relation_type,
                subject.from.id
            );
            return Vec::new();
        }

        let confidence = self.confidence(infer.confidence, context);
        let evidence = collect_evidence(&infer.evidence_properties, &infer.evidence_context, subject.from, context);
        targets
            .into_iter()
            .map(|target| Proposal {
                key: RelationKey::new(&subject.from.id, &infer.relation_type, target),
                kind: ProposalKind::Relation,
                confidence,
                evidence: evidence.clone(),
                rule: rule.name.clone(),
            })
            .collect()
    }

    fn infer_property(
        &self,
        rule: &SemanticRule,
        infer: &InferPropertyAction,
        subject: &RuleSubject<'_>,
        context: &Context,
    ) -> Option<Proposal> {
        let value = match (&infer.value, &infer.from_attribute) {
            (Some(value), _) => value.clone(),
            (None, Some(attribute)) => subject.from.attribute(attribute)?.clone(),
            (None, None) => {
                log::debug!("Rule {}: property {} has no value source", rule.name, infer.property);
                return None;
            }
        };

        Some(Proposal {
            key: RelationKey::new(
                &subject.from.id,
                format!("property:{}", infer.property),
                &subject.from.id,
            ),
            kind: ProposalKind::Property {
                property: infer.property.clone(),
                value,
            },
            confidence: self.confidence(infer.confidence, context),
            evidence: collect_evidence(&infer.evidence_properties, &infer.evidence_context, subject.from, context),
            rule: rule.name.clone(),
        })
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(0.8)
    }
}

/// Reason a check fails, or `None` when it holds.
fn check_failure(check: &ValidationCheck, subject: &RuleSubject<'_>, context: &Context) -> Option<String> {
    match check {
        ValidationCheck::RequiresAttribute { attribute, side } => match subject.side(*side) {
            Some(entity) if entity.attribute(attribute).is_some() => None,
            Some(entity) => Some(format!("{} is missing attribute {}", entity.id, attribute)),
            None => Some(format!("no target entity to check attribute {}", attribute)),
        },
        ValidationCheck::AttributeEquals { attribute, value, side } => {
            let Some(entity) = subject.side(*side) else {
                return Some(format!("no target entity to check attribute {}", attribute));
            };
            match entity.attribute(attribute) {
                Some(actual) if values_equal(actual, value) => None,
                Some(actual) => Some(format!(
                    "{}.{} is {} (expected {})",
                    entity.id,
                    attribute,
                    display_value(actual),
                    display_value(value)
                )),
                None => Some(format!("{} is missing attribute {}", entity.id, attribute)),
            }
        }
        ValidationCheck::MatchingAttribute { attribute } => {
            let from = subject.from.attribute(attribute);
            let to = subject.to.and_then(|e| e.attribute(attribute));
            match (from, to) {
                (Some(a), Some(b)) if values_equal(a, b) => None,
                _ => Some(format!("{} does not match between entities", attribute)),
            }
        }
        ValidationCheck::TargetTypeIn { types } => {
            let entity = subject.to.unwrap_or(subject.from);
            match entity.entity_type.as_deref() {
                Some(t) if types.iter().any(|allowed| allowed == t) => None,
                other => Some(format!(
                    "{} has type {} (expected one of {})",
                    entity.id,
                    other.unwrap_or("<none>"),
                    types.join(", ")
                )),
            }
        }
        ValidationCheck::ContextPresent { key } => {
            if context.contains_key(key) {
                None
            } else {
                Some(format!("context is missing {}", key))
            }
        }
    }
}

fn evidence_count(context: &Context, key: &str) -> usize {
    match context.get(key) {
        None | Some(Value::Null) => 0,
        Some(Value::Array(items)) => items.len(),
        Some(_) => 1,
    }
}

fn resolve_targets(target: &TargetRef, subject: &RuleSubject<'_>, context: &Context) -> Vec<String> {
    match target {
        TargetRef::Id(id) => vec![id.clone()],
        TargetRef::Attribute(name) => ids_from(subject.from.attribute(name)),
        TargetRef::Context(key) => ids_from(context.get(key)),
        TargetRef::SecondEntity => subject.to.map(|e| vec![e.id.clone()]).unwrap_or_default(),
    }
}

fn ids_from(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Number(n)) => vec![n.to_string()],
        Some(Value::Array(items)) => items.iter().flat_map(|item| ids_from(Some(item))).collect(),
        _ => Vec::new(),
    }
}

fn collect_evidence(properties: &[String], context_keys: &[String], entity: &Entity, context: &Context) -> Vec<String> {
    let mut evidence = Vec::new();
    for name in properties {
        if let Some(value) = entity.attribute(name) {
            evidence.push(format!("Property: {}={}", name, display_value(value)));
        }
    }
    for key in context_keys {
        if context.contains_key(key) {
            evidence.push(format!("Context: {} present", key));
        }
    }
    evidence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{PropertyConstraint, SuggestAction};
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn rule(value: serde_json::Value) -> SemanticRule {
        serde_json::from_value(value).unwrap()
    }

    fn ctx(value: serde_json::Value) -> Context {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_matches_properties_and_context() {
        let engine = RuleEngine::default();
        let entity = Entity::new("d1").with_type("Document").with_attribute("status", "final");
        let subject = RuleSubject::single(&entity);

        let mut pattern = RulePattern::default();
        assert!(engine.matches(&subject, &pattern, &Context::new()));

        pattern
            .properties
            .insert("status".to_string(), PropertyConstraint::Exact(json!("final")));
        assert!(engine.matches(&subject, &pattern, &Context::new()));

        pattern.context.insert("project".to_string(), json!({"active": true}));
        assert!(!engine.matches(&subject, &pattern, &Context::new()));
        assert!(engine.matches(&subject, &pattern, &ctx(json!({"project": {"active": true, "name": "x"}}))));
        assert!(!engine.matches(&subject, &pattern, &ctx(json!({"project": {"active": false}}))));
    }

    #[test]
    fn test_matches_cardinality_uses_relation_under_evaluation() {
        let engine = RuleEngine::default();
        let from = Entity::new("d1").with_relation("authored_by", "u0");
        let to = Entity::new("u1");
        let rule = rule(json!({
            "name": "single-author",
            "pattern": {"type": "authored_by", "relationship": {"cardinality": "many_to_one"}},
            "actions": []
        }));
        let subject = RuleSubject::pair(&from, &to, "authored_by");
        assert!(!engine.matches(&subject, &rule.pattern, &Context::new()));

        let other = RuleSubject::pair(&from, &to, "reviewed_by");
        assert!(engine.matches(&other, &rule.pattern, &Context::new()));
    }

    #[test]
    fn test_apply_validate_failure_does_not_stop_later_actions() {
        let engine = RuleEngine::default();
        let rule = rule(json!({
            "name": "needs-title",
            "pattern": {},
            "actions": [
                {"type": "validate", "check": "requires_attribute", "attribute": "title"},
                {"type": "validate", "check": "context_present", "key": "project",
                 "message": "{from} needs a project for {relation}"},
                {"type": "suggest", "message": "Consider linking {from} to {to}"}
            ]
        }));
        let from = Entity::new("d1");
        let to = Entity::new("u1");
        let outcome = engine.apply(&rule, &RuleSubject::pair(&from, &to, "authored_by"), &Context::new());

        assert!(!outcome.is_valid);
        assert_eq!(
            outcome.violations,
            vec![
                "Rule needs-title: d1 is missing attribute title".to_string(),
                "d1 needs a project for authored_by".to_string(),
            ]
        );
        assert_eq!(outcome.suggestions, vec!["Consider linking d1 to u1".to_string()]);
    }

    #[test]
    fn test_apply_checks_pass() {
        let engine = RuleEngine::default();
        let rule = rule(json!({
            "name": "same-org",
            "pattern": {},
            "actions": [
                {"type": "validate", "check": "matching_attribute", "attribute": "org"},
                {"type": "validate", "check": "target_type_in", "types": ["User", "Team"]},
                {"type": "validate", "check": "attribute_equals", "attribute": "active", "value": true, "side": "to"}
            ]
        }));
        let from = Entity::new("d1").with_attribute("org", "acme");
        let to = Entity::new("u1")
            .with_type("User")
            .with_attribute("org", "acme")
            .with_attribute("active", true);
        let outcome = engine.apply(&rule, &RuleSubject::pair(&from, &to, "authored_by"), &Context::new());
        assert!(outcome.is_valid, "{:?}", outcome.violations);

        let stranger = Entity::new("u2").with_type("Bot").with_attribute("org", "other");
        let outcome = engine.apply(&rule, &RuleSubject::pair(&from, &stranger, "authored_by"), &Context::new());
        assert_eq!(outcome.violations.len(), 3);
    }

    #[test]
    fn test_infer_relation_confidence_and_evidence() {
        let engine = RuleEngine::default();
        let rule = rule(json!({
            "name": "owner",
            "pattern": {"target_type": "Document"},
            "actions": [{
                "type": "infer_relation",
                "relation_type": "owned_by",
                "target": {"attribute": "owner"},
                "evidence_properties": ["owner", "missing"],
                "evidence_context": ["project"]
            }]
        }));
        let entity = Entity::new("d1").with_attribute("owner", "u1");
        let context = ctx(json!({
            "project": "p1",
            "supporting_evidence": ["a", "b"],
            "contradicting_evidence": ["c"]
        }));
        let outcome = engine.apply(&rule, &RuleSubject::single(&entity), &context);

        assert_eq!(outcome.proposals.len(), 1);
        let proposal = &outcome.proposals[0];
        assert_eq!(proposal.key, RelationKey::new("d1", "owned_by", "u1"));
        assert_eq!(proposal.kind, ProposalKind::Relation);
        // 0.8 + 0.2 = 1.0, then -0.2
        assert!(approx(proposal.confidence, 0.8));
        assert_eq!(
            proposal.evidence,
            vec!["Property: owner=u1".to_string(), "Context: project present".to_string()]
        );
        assert_eq!(proposal.rule, "owner");
    }

    #[test]
    fn test_infer_relation_targets() {
        let engine = RuleEngine::default();
        let entity = Entity::new("d1").with_attribute("tags", json!(["t1", "t2"]));
        let context = ctx(json!({"reviewer": "u9"}));
        let subject = RuleSubject::single(&entity);

        let by_attribute = rule(json!({"name": "a", "pattern": {}, "actions": [
            {"type": "infer_relation", "relation_type": "tagged", "target": {"attribute": "tags"}}
        ]}));
        let keys: Vec<_> = engine
            .apply(&by_attribute, &subject, &context)
            .proposals
            .into_iter()
            .map(|p| p.key.to_id)
            .collect();
        assert_eq!(keys, vec!["t1", "t2"]);

        let by_context = rule(json!({"name": "c", "pattern": {}, "actions": [
            {"type": "infer_relation", "relation_type": "reviewed_by", "target": {"context": "reviewer"}, "confidence": 0.75}
        ]}));
        let proposals = engine.apply(&by_context, &subject, &context).proposals;
        assert_eq!(proposals[0].key.to_id, "u9");
        assert!(approx(proposals[0].confidence, 0.75));

        let by_second = rule(json!({"name": "s", "pattern": {}, "actions": [
            {"type": "infer_relation", "relation_type": "x", "target": "second_entity"}
        ]}));
        assert!(engine.apply(&by_second, &subject, &context).proposals.is_empty());

        let literal = rule(json!({"name": "l", "pattern": {}, "actions": [
            {"type": "infer_relation", "relation_type": "in", "target": {"id": "root"}}
        ]}));
        assert_eq!(engine.apply(&literal, &subject, &context).proposals[0].key.to_id, "root");
    }

    #[test]
    fn test_infer_property_key_and_value() {
        let engine = RuleEngine::new(0.6);
        let rule = rule(json!({"name": "p", "pattern": {}, "actions": [
            {"type": "infer_property", "property": "language", "from_attribute": "lang"},
            {"type": "infer_property", "property": "reviewed", "value": true},
            {"type": "infer_property", "property": "nothing"}
        ]}));
        let entity = Entity::new("d1").with_attribute("lang", "en");
        let proposals = engine.apply(&rule, &RuleSubject::single(&entity), &Context::new()).proposals;

        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].key, RelationKey::new("d1", "property:language", "d1"));
        assert_eq!(
            proposals[0].kind,
            ProposalKind::Property {
                property: "language".to_string(),
                value: json!("en")
            }
        );
        assert!(approx(proposals[0].confidence, 0.6));
    }

    #[test]
    fn test_evaluate_skips_non_matching() {
        let engine = RuleEngine::default();
        let mut pattern = RulePattern::default();
        pattern.context.insert("flag".to_string(), json!(true));
        let gated = SemanticRule::new("gated", pattern, 1).with_action(RuleAction::Suggest(SuggestAction {
            message: "gated".to_string(),
        }));
        let open = SemanticRule::new("open", RulePattern::default(), 0);
        let entity = Entity::new("e");

        let outcomes = engine.evaluate([&gated, &open], &RuleSubject::single(&entity), &Context::new());
        let names: Vec<_> = outcomes.iter().map(|o| o.rule.as_str()).collect();
        assert_eq!(names, vec!["open"]);
    }

    #[test]
    fn test_proposal_serializes_flat() {
        let proposal = Proposal {
            key: RelationKey::new("a", "property:x", "a"),
            kind: ProposalKind::Property {
                property: "x".to_string(),
                value: json!(1),
            },
            confidence: 0.9,
            evidence: vec![],
            rule: "r".to_string(),
        };
        let value = serde_json::to_value(&proposal).unwrap();
        assert_eq!(value["kind"], "property");
        assert_eq!(value["property"], "x");
        assert_eq!(value["key"]["from_id"], "a");
    }
}
