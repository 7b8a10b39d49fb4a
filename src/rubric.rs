use crate::error::{GraderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Allowed deviation of the weight sum from 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Named scoring dimensions and their weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RubricWeights(BTreeMap<String, f64>);

impl Default for RubricWeights {
    fn default() -> Self {
        Self::from_pairs([
            ("completeness", 0.4),
            ("correctness", 0.4),
            ("originality", 0.2),
        ])
    }
}

impl RubricWeights {
    /// Build weights from `(dimension, weight)` pairs without validating them
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Check that every weight is in [0, 1] and that they sum to 1.0
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(GraderError::InvalidRubric(
                "at least one dimension is required".to_string(),
            ));
        }

        for (dimension, weight) in &self.0 {
            if !(0.0..=1.0).contains(weight) {
                return Err(GraderError::InvalidRubric(format!(
                    "weight for {dimension} must be within [0, 1], got {weight}"
                )));
            }
        }

        let sum = self.total();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(GraderError::InvalidRubric(format!(
                "weights must sum to 1.0, got {sum}"
            )));
        }

        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn weight(&self, dimension: &str) -> Option<f64> {
        self.0.get(dimension).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Weighted sum of per-dimension scores.
    ///
    /// Returns `None` unless a score is present for every dimension.
    pub fn combine(&self, scores: &BTreeMap<String, f64>) -> Option<f64> {
        let mut total = 0.0;
        for (dimension, weight) in &self.0 {
            total += weight * scores.get(dimension)?;
        }
        Some(total.clamp(0.0, 100.0))
    }
}
