pub mod cache;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod hierarchy;
pub mod inference;
pub mod pattern;
pub mod rules;
pub mod scoring;
pub mod service;
pub mod store;
pub mod type_inference;
pub mod validation;

pub use config::Config;
pub use entity::{Context, Entity, RelationKey};
pub use error::{Result, SemlayerError};
pub use hierarchy::TypeHierarchyResolver;
pub use inference::{InferenceEngine, InferenceResult};
pub use pattern::{Pattern, PatternMatcher, TypeScores};
pub use rules::{RuleEngine, SemanticRule};
pub use service::{Recorded, SemanticProfile, SemanticService};
pub use store::{MemoryStore, Snapshot, SqliteStore};
pub use type_inference::{TypeInference, TypeInferenceService};
pub use validation::{RelationValidator, ValidationResult};
