//! Entity snapshots handed to the engines per call.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute name -> value mapping of an entity.
pub type Attributes = BTreeMap<String, Value>;

/// Caller-supplied context bag for inference and validation.
pub type Context = BTreeMap<String, Value>;

/// An existing outgoing relation of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRef {
    #[serde(alias = "type")]
    pub relation_type: String,
    #[serde(alias = "to_id")]
    pub target_id: String,
}

/// Immutable entity snapshot, the subject of inference and validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type", alias = "entity_type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relations: Vec<RelationRef>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_relation(mut self, relation_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        self.relations.push(RelationRef {
            relation_type: relation_type.into(),
            target_id: target_id.into(),
        });
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Number of existing outgoing relations, optionally of one type.
    pub fn relation_count(&self, relation_type: Option<&str>) -> usize {
        match relation_type {
            Some(t) => self.relations.iter().filter(|r| r.relation_type == t).count(),
            None => self.relations.len(),
        }
    }
}

/// Deduplication identity of an inferred relation or property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    pub from_id: String,
    pub relation_type: String,
    pub to_id: String,
}

impl RelationKey {
    pub fn new(from_id: impl Into<String>, relation_type: impl Into<String>, to_id: impl Into<String>) -> Self {
        Self {
            from_id: from_id.into(),
            relation_type: relation_type.into(),
            to_id: to_id.into(),
        }
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.from_id, self.relation_type, self.to_id)
    }
}

/// Render a JSON value the way it reads in messages (strings unquoted).
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
