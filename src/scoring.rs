//! Confidence arithmetic shared by the engines.
//!
//! Validation stages compose multiplicatively, so each stage can only lower
//! confidence. Inference evidence adjusts a base confidence additively.

/// Multiplier applied per missing required context key.
pub const MISSING_CONTEXT_FACTOR: f64 = 0.8;
/// Multiplier per missing hierarchy aspect (`types`, `relationships`).
pub const MISSING_HIERARCHY_ASPECT_FACTOR: f64 = 0.8;
/// Multiplier when the hierarchy declares an empty `types` list.
pub const EMPTY_TYPES_FACTOR: f64 = 0.7;
/// Completeness of a hierarchy context that is present but empty.
pub const EMPTY_HIERARCHY_SCORE: f64 = 0.5;
/// Consistency lost per inference-rule/constraint conflict.
pub const CONFLICT_PENALTY: f64 = 0.1;
/// Consistency never drops below this.
pub const MIN_CONSISTENCY: f64 = 0.1;
/// Confidence added per supporting evidence item.
pub const SUPPORT_BONUS: f64 = 0.1;
/// Confidence removed per contradicting evidence item.
pub const CONTRADICTION_PENALTY: f64 = 0.2;

/// Clamp to [0, 1]; NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Product of independent weakening factors.
pub fn compose<I>(factors: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    clamp_unit(factors.into_iter().map(clamp_unit).product())
}

/// Base confidence raised by supporting evidence (capped at 1.0), then lowered
/// by contradicting evidence (floored at 0.0).
pub fn evidence_adjusted(base: f64, supporting: usize, contradicting: usize) -> f64 {
    let boosted = (clamp_unit(base) + SUPPORT_BONUS * supporting as f64).min(1.0);
    (boosted - CONTRADICTION_PENALTY * contradicting as f64).max(0.0)
}

/// Shape of the `hierarchy` entry in a validation context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyShape {
    pub is_empty: bool,
    pub has_types: bool,
    pub has_relationships: bool,
    pub types_empty: bool,
}

/// Completeness score of a hierarchy context entry.
pub fn hierarchy_completeness(shape: HierarchyShape) -> f64 {
    if shape.is_empty {
        return EMPTY_HIERARCHY_SCORE;
    }
    let mut score = 1.0;
    if !shape.has_types {
        score *= MISSING_HIERARCHY_ASPECT_FACTOR;
    }
    if !shape.has_relationships {
        score *= MISSING_HIERARCHY_ASPECT_FACTOR;
    }
    if shape.has_types && shape.types_empty {
        score *= EMPTY_TYPES_FACTOR;
    }
    score
}

/// Consistency score given the number of rule/constraint conflicts.
pub fn consistency(conflicts: usize) -> f64 {
    (1.0 - conflicts as f64 * CONFLICT_PENALTY).max(MIN_CONSISTENCY)
}

/// Named components of the context-quality stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextQuality {
    pub missing_required: usize,
    /// `None` when the context carries no hierarchy entry.
    pub hierarchy_completeness: Option<f64>,
    /// `None` when the context is empty.
    pub consistency: Option<f64>,
}

impl ContextQuality {
    pub fn confidence(&self) -> f64 {
        let missing = MISSING_CONTEXT_FACTOR.powi(self.missing_required as i32);
        compose([
            missing,
            self.hierarchy_completeness.unwrap_or(1.0),
            self.consistency.unwrap_or(1.0),
        ])
    }
}
