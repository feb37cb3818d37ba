//! Distance metric as a validated, enumerated type.
//!
//! The metric is a deployment-time constant: the HNSW index is built for
//! one operator class, and searches must use the matching operator. Both
//! come from exhaustive lookups on this enum, never from interpolated
//! strings.

use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::vector::math;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    L2,
    InnerProduct,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

impl DistanceMetric {
    /// pgvector comparison operator for ORDER BY clauses.
    pub fn pg_operator(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::L2 => "<->",
            DistanceMetric::InnerProduct => "<#>",
        }
    }

    /// Operator class the HNSW index must be built with.
    pub fn hnsw_opclass(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "vector_cosine_ops",
            DistanceMetric::L2 => "vector_l2_ops",
            DistanceMetric::InnerProduct => "vector_ip_ops",
        }
    }

    /// Distance between two vectors under this metric, matching the
    /// corresponding pgvector operator (inner product is negated so that
    /// smaller is always closer).
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - math::cosine_similarity(a, b, None, None),
            DistanceMetric::L2 => math::l2_distance(a, b),
            DistanceMetric::InnerProduct => -math::dot(a, b),
        }
    }

    /// Monotonic conversion from this metric's distance to a similarity
    /// score where larger means closer.
    pub fn similarity_from_distance(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance),
            DistanceMetric::InnerProduct => -distance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" => Ok(DistanceMetric::L2),
            "inner_product" => Ok(DistanceMetric::InnerProduct),
            other => Err(RagError::Config(format!("unsupported distance metric: {other}"))),
        }
    }
}
