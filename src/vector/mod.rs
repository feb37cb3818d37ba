// Vector math, metric selection, and MMR reranking.

pub mod math;
pub mod metric;
pub mod mmr;

pub use metric::DistanceMetric;
pub use mmr::mmr_select;
