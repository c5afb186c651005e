//! Immutable dataset-plus-weights context threaded through share computations.

use crate::data::Dataset;
use crate::error::{Result, ShareError};
use crate::weighting::{compute_weights, PopulationReference, SurveyWeights};

/// Survey data and, once computed, its expansion weights.
///
/// Every share computation receives the context explicitly; nothing reads
/// dataset or weights from shared state.
#[derive(Clone, Debug)]
pub struct SurveyContext {
    dataset: Dataset,
    weights: Option<SurveyWeights>,
}

impl SurveyContext {
    /// Context without weights. Share computations fail with `MissingWeights` until weights are attached.
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            weights: None,
        }
    }

    /// Computes post-stratification weights and attaches them.
    pub fn weighted(dataset: Dataset, reference: &PopulationReference) -> Result<Self> {
        let weights = compute_weights(reference, &dataset)?;
        Self::new(dataset).with_weights(weights)
    }

    /// Attaches weights computed elsewhere; their length must match the dataset.
    pub fn with_weights(mut self, weights: SurveyWeights) -> Result<Self> {
        if weights.len() != self.dataset.observation_count() {
            return Err(ShareError::dimension_mismatch(
                "survey weights",
                self.dataset.observation_count(),
                weights.len(),
            ));
        }
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Attached weights, or `MissingWeights`.
    pub fn weights(&self) -> Result<&SurveyWeights> {
        self.weights.as_ref().ok_or(ShareError::MissingWeights)
    }

    pub fn has_weights(&self) -> bool {
        self.weights.is_some()
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{DMatrix, DVector};

    use super::*;

    fn dataset() -> Dataset {
        Dataset::new(
            vec!["x".to_string()],
            DMatrix::from_row_slice(2, 1, &[1.0, 2.0]),
            vec![1, 1],
        )
        .unwrap()
    }

    #[test]
    fn missing_weights_are_reported() {
        let context = SurveyContext::new(dataset());
        assert!(!context.has_weights());
        assert!(matches!(context.weights(), Err(ShareError::MissingWeights)));
    }

    #[test]
    fn weight_length_must_match() {
        let weights = SurveyWeights::from_values(DVector::from_vec(vec![1.0, 1.0, 1.0])).unwrap();
        let result = SurveyContext::new(dataset()).with_weights(weights);
        assert!(matches!(result, Err(ShareError::DimensionMismatch { .. })));
    }
}
