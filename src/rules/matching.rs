use serde_json::Value;

use super::{Cardinality, CardinalityKind, Operator, PropertyConstraint};
use crate::entity::Entity;

/// JSON equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Whether `value` contains everything `pattern` asks for.
///
/// Objects match key by key (recursively), arrays require every pattern
/// element to appear in the value, scalars compare by equality.
pub fn json_subset(value: &Value, pattern: &Value) -> bool {
    match (value, pattern) {
        (Value::Object(v), Value::Object(p)) => p
            .iter()
            .all(|(key, sub)| v.get(key).is_some_and(|inner| json_subset(inner, sub))),
        (Value::Array(v), Value::Array(p)) => p
            .iter()
            .all(|sub| v.iter().any(|inner| json_subset(inner, sub))),
        _ => values_equal(value, pattern),
    }
}

/// Entity field a property clause reads: attributes first, then `id`/`type`.
pub(crate) fn entity_field(entity: &Entity, name: &str) -> Option<Value> {
    if let Some(value) = entity.attribute(name) {
        return Some(value.clone());
    }
    match name {
        "id" => Some(Value::String(entity.id.clone())),
        "type" | "entity_type" => entity.entity_type.clone().map(Value::String),
        _ => None,
    }
}

pub(crate) fn property_satisfied(actual: Option<&Value>, constraint: &PropertyConstraint) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match constraint {
        PropertyConstraint::Exact(expected) => values_equal(actual, expected),
        PropertyConstraint::Compare { operator, value } => compare(*operator, actual, value),
    }
}

fn compare(operator: Operator, actual: &Value, expected: &Value) -> bool {
    match operator {
        Operator::Eq => values_equal(actual, expected),
        Operator::Ne => !values_equal(actual, expected),
        Operator::Gt => ordering(actual, expected).is_some_and(|o| o.is_gt()),
        Operator::Ge => ordering(actual, expected).is_some_and(|o| o.is_ge()),
        Operator::Lt => ordering(actual, expected).is_some_and(|o| o.is_lt()),
        Operator::Le => ordering(actual, expected).is_some_and(|o| o.is_le()),
        Operator::In => match expected {
            Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
            Value::String(haystack) => actual.as_str().is_some_and(|s| haystack.contains(s)),
            _ => false,
        },
        Operator::Contains => match actual {
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            Value::String(haystack) => expected.as_str().is_some_and(|s| haystack.contains(s)),
            _ => false,
        },
    }
}

fn ordering(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Cardinality is checked on the source side only: the count of the
/// subject's existing outgoing relations of the relevant type.
pub(crate) fn cardinality_satisfied(cardinality: &Cardinality, from: &Entity, relation_type: Option<&str>) -> bool {
    match cardinality {
        Cardinality::Named(kind) => match kind {
            CardinalityKind::OneToOne | CardinalityKind::ManyToOne => from.relation_count(relation_type) == 0,
            CardinalityKind::OneToMany | CardinalityKind::ManyToMany => true,
        },
        Cardinality::Bounds(bounds) => {
            let counted = bounds.relation_type.as_deref().or(relation_type);
            let count = from.relation_count(counted);
            bounds.min.map_or(true, |min| count >= min) && bounds.max.map_or(true, |max| count <= max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::CardinalityBounds;
    use serde_json::json;

    #[test]
    fn test_values_equal_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(values_equal(&json!("a"), &json!("a")));
    }

    #[test]
    fn test_json_subset() {
        let value = json!({"project": {"active": true, "tags": ["a", "b"]}, "x": 1});
        assert!(json_subset(&value, &json!({"project": {"active": true}})));
        assert!(json_subset(&value, &json!({"project": {"tags": ["b"]}})));
        assert!(!json_subset(&value, &json!({"project": {"tags": ["c"]}})));
        assert!(!json_subset(&value, &json!({"missing": 1})));
        assert!(json_subset(&value, &json!({})));
    }

    #[test]
    fn test_operators() {
        let ten = json!(10);
        let gt = |v| PropertyConstraint::Compare {
            operator: Operator::Gt,
            value: v,
        };
        assert!(property_satisfied(Some(&ten), &gt(json!(3))));
        assert!(!property_satisfied(Some(&ten), &gt(json!(10))));
        assert!(!property_satisfied(Some(&json!("x")), &gt(json!(3))));

        let within = PropertyConstraint::Compare {
            operator: Operator::In,
            value: json!(["draft", "final"]),
        };
        assert!(property_satisfied(Some(&json!("final")), &within));
        assert!(!property_satisfied(Some(&json!("lost")), &within));

        let contains = PropertyConstraint::Compare {
            operator: Operator::Contains,
            value: json!("port"),
        };
        assert!(property_satisfied(Some(&json!("Report")), &contains));

        let ne = PropertyConstraint::Compare {
            operator: Operator::Ne,
            value: json!("x"),
        };
        assert!(property_satisfied(Some(&json!("y")), &ne));
    }

    #[test]
    fn test_missing_property_never_satisfies() {
        let ne = PropertyConstraint::Compare {
            operator: Operator::Ne,
            value: json!("x"),
        };
        assert!(!property_satisfied(None, &ne));
        assert!(!property_satisfied(None, &PropertyConstraint::Exact(json!(null))));
    }

    #[test]
    fn test_entity_field_fallbacks() {
        let entity = Entity::new("e1").with_type("Doc").with_attribute("id", "shadow");
        assert_eq!(entity_field(&entity, "id"), Some(json!("shadow")));
        assert_eq!(entity_field(&entity, "type"), Some(json!("Doc")));
        assert_eq!(entity_field(&entity, "nope"), None);
    }

    #[test]
    fn test_cardinality() {
        let lonely = Entity::new("a");
        let taken = Entity::new("a").with_relation("owned_by", "b");
        let one = Cardinality::Named(CardinalityKind::OneToOne);
        assert!(cardinality_satisfied(&one, &lonely, Some("owned_by")));
        assert!(!cardinality_satisfied(&one, &taken, Some("owned_by")));
        assert!(cardinality_satisfied(&one, &taken, Some("likes")));
        assert!(cardinality_satisfied(
            &Cardinality::Named(CardinalityKind::ManyToMany),
            &taken,
            Some("owned_by")
        ));

        let bounds = Cardinality::Bounds(CardinalityBounds {
            relation_type: Some("owned_by".to_string()),
            min: Some(1),
            max: Some(1),
        });
        assert!(cardinality_satisfied(&bounds, &taken, None));
        assert!(!cardinality_satisfied(&bounds, &lonely, None));
    }
}
