//! Declarative attribute patterns tied to semantic types.
//!
//! Patterns are produced by a learning step outside this crate and are
//! read-only here; [`PatternMatcher`] scores entities against them.

mod matcher;

pub use matcher::{PatternMatcher, TypeScores};

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{Result, SemlayerError};

/// Declared runtime type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

/// Per-attribute descriptor inside a [`Pattern`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePattern {
    #[serde(rename = "type", alias = "value_type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "values", alias = "allowed_values", default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<BTreeSet<String>>,
    /// Matched from the start of the value.
    #[serde(rename = "pattern", alias = "regex", default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<BTreeSet<String>>,
}

impl AttributePattern {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            required: false,
            allowed_values: None,
            regex: None,
            keywords: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    /// Weight of this attribute in the overall score.
    pub fn weight(&self) -> f64 {
        if self.required {
            2.0
        } else {
            1.0
        }
    }
}

fn default_success_rate() -> f64 {
    1.0
}

/// A learned attribute-matching template for one semantic type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    #[serde(alias = "type")]
    pub semantic_type: String,
    pub attribute_patterns: BTreeMap<String, AttributePattern>,
    pub confidence: f64,
    #[serde(default)]
    pub examples: Vec<Entity>,
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
}

impl Pattern {
    pub fn new(id: impl Into<String>, semantic_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            semantic_type: semantic_type.into(),
            attribute_patterns: BTreeMap::new(),
            confidence,
            examples: Vec::new(),
            success_rate: 1.0,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, pattern: AttributePattern) -> Self {
        self.attribute_patterns.insert(name.into(), pattern);
        self
    }

    /// Reject patterns the matcher cannot evaluate.
    pub fn validate(&self) -> Result<()> {
        let malformed = |reason: String| SemlayerError::MalformedPattern {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(malformed("empty id".to_string()));
        }
        if self.semantic_type.trim().is_empty() {
            return Err(malformed("empty semantic type".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(malformed(format!("confidence {} outside [0, 1]", self.confidence)));
        }
        for (name, attr) in &self.attribute_patterns {
            if let Some(re) = &attr.regex {
                anchored_regex(re).map_err(|e| malformed(format!("attribute {}: {}", name, e)))?;
            }
        }
        Ok(())
    }
}

/// Compile a pattern anchored at the start of the input.
pub(crate) fn anchored_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

/// The two built-in patterns installed by `seed`.
pub fn default_patterns() -> Vec<Pattern> {
    vec![
        Pattern::new("document_pattern", "Document", 0.8)
            .with_attribute(
                "title",
                AttributePattern::new(ValueType::String)
                    .required()
                    .with_keywords(["report", "doc", "specification"]),
            )
            .with_attribute(
                "format",
                AttributePattern::new(ValueType::String).with_values(["pdf", "doc", "txt"]),
            ),
        Pattern::new("user_pattern", "User", 0.9)
            .with_attribute("name", AttributePattern::new(ValueType::String).required())
            .with_attribute(
                "email",
                AttributePattern::new(ValueType::String)
                    .required()
                    .with_regex(r"[^@]+@[^@]+\.[^@]+$"),
            ),
    ]
}
