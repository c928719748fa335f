//! Type hierarchy: parent/child type graph and the valid-relation table.
//!
//! The store does not guarantee the edge set is acyclic; traversal in
//! [`TypeHierarchyResolver`] bounds depth and tracks visited types.

mod resolver;

pub use resolver::{Ancestor, TypeHierarchyResolver};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `child_type` specialises `parent_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeHierarchyEdge {
    pub parent_type: String,
    pub child_type: String,
}

impl TypeHierarchyEdge {
    pub fn new(parent_type: impl Into<String>, child_type: impl Into<String>) -> Self {
        Self {
            parent_type: parent_type.into(),
            child_type: child_type.into(),
        }
    }
}

/// A permissible (type, relation, type) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidTypeRelation {
    pub from_type: String,
    #[serde(alias = "relation_type")]
    pub relation_name: String,
    pub to_type: String,
}

impl ValidTypeRelation {
    pub fn new(from_type: impl Into<String>, relation_name: impl Into<String>, to_type: impl Into<String>) -> Self {
        Self {
            from_type: from_type.into(),
            relation_name: relation_name.into(),
            to_type: to_type.into(),
        }
    }
}

/// A declared relation type and its constraint blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationType {
    #[serde(alias = "relation_name")]
    pub name: String,
    #[serde(default = "default_category")]
    pub semantic_category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transitive: bool,
    #[serde(default)]
    pub symmetric: bool,
    /// Raw constraint list, parsed leniently at validation time.
    #[serde(default)]
    pub validation_rules: Option<Value>,
}

fn default_category() -> String {
    "general".to_string()
}

impl RelationType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semantic_category: default_category(),
            description: None,
            transitive: false,
            symmetric: false,
            validation_rules: None,
        }
    }

    pub fn with_validation_rules(mut self, rules: Value) -> Self {
        self.validation_rules = Some(rules);
        self
    }
}
