//! Survey observation table and validation utilities.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, ShareError};
use crate::expression::Covariates;
use crate::specification::AlternativeId;

/// Immutable table of survey observations with named covariate columns.
#[derive(Clone, Debug)]
pub struct Dataset {
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    covariates: DMatrix<f64>,
    choices: Vec<AlternativeId>,
    sample_weights: DVector<f64>,
}

impl Dataset {
    /// Creates a `Dataset` with unit sample weights.
    pub fn new(
        columns: Vec<String>,
        covariates: DMatrix<f64>,
        choices: Vec<AlternativeId>,
    ) -> Result<Self> {
        DatasetBuilder::new(columns, covariates)
            .choices(choices)
            .build()
    }

    /// Number of observations.
    pub fn observation_count(&self) -> usize {
        self.covariates.nrows()
    }

    /// Covariate column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns `true` if the dataset carries the named covariate.
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    /// Returns a read-only view of the covariate matrix (observations × columns).
    pub fn covariates(&self) -> &DMatrix<f64> {
        &self.covariates
    }

    /// Chosen alternative of every observation.
    pub fn choices(&self) -> &[AlternativeId] {
        &self.choices
    }

    /// Raw sample weight of every observation (1 unless supplied).
    pub fn sample_weights(&self) -> &DVector<f64> {
        &self.sample_weights
    }

    /// Returns a view of observation `index`.
    pub fn observation(&self, index: usize) -> Observation<'_> {
        Observation {
            dataset: self,
            index,
        }
    }

    /// Iterates over all observations in row order.
    pub fn observations(&self) -> impl ExactSizeIterator<Item = Observation<'_>> + '_ {
        (0..self.observation_count()).map(move |index| self.observation(index))
    }

    /// Builds a new dataset from the given rows, repeating rows as often as they appear.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        let n = self.observation_count();
        if let Some(&bad) = rows.iter().find(|&&row| row >= n) {
            return Err(ShareError::dimension_mismatch("row selection", n, bad + 1));
        }
        let covariates = self.covariates.select_rows(rows.iter());
        let choices = rows.iter().map(|&row| self.choices[row]).collect();
        let sample_weights = DVector::from_iterator(
            rows.len(),
            rows.iter().map(|&row| self.sample_weights[row]),
        );
        Ok(Self {
            columns: self.columns.clone(),
            column_index: self.column_index.clone(),
            covariates,
            choices,
            sample_weights,
        })
    }
}

/// Borrowed view of one row of a [`Dataset`].
#[derive(Clone, Copy, Debug)]
pub struct Observation<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> Observation<'a> {
    /// Row number inside the dataset.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Alternative the respondent actually chose.
    pub fn chosen(&self) -> AlternativeId {
        self.dataset.choices[self.index]
    }

    pub fn sample_weight(&self) -> f64 {
        self.dataset.sample_weights[self.index]
    }
}

impl Covariates for Observation<'_> {
    fn covariate(&self, name: &str) -> Option<f64> {
        self.dataset
            .column_index
            .get(name)
            .map(|&column| self.dataset.covariates[(self.index, column)])
    }
}

/// Builder that validates dimensions before constructing a [`Dataset`].
#[derive(Debug)]
pub struct DatasetBuilder {
    columns: Vec<String>,
    covariates: DMatrix<f64>,
    choices: Option<Vec<AlternativeId>>,
    sample_weights: Option<DVector<f64>>,
}

impl DatasetBuilder {
    /// Start building a dataset from column names and a covariate matrix.
    pub fn new(columns: Vec<String>, covariates: DMatrix<f64>) -> Self {
        Self {
            columns,
            covariates,
            choices: None,
            sample_weights: None,
        }
    }

    /// Sets the chosen alternative of every observation.
    pub fn choices(mut self, choices: Vec<AlternativeId>) -> Self {
        self.choices = Some(choices);
        self
    }

    /// Sets raw sample weights. Defaults to one per observation.
    pub fn sample_weights(mut self, weights: DVector<f64>) -> Self {
        self.sample_weights = Some(weights);
        self
    }

    /// Finalizes construction after validating shapes and values.
    pub fn build(self) -> Result<Dataset> {
        let n = self.covariates.nrows();
        if self.columns.len() != self.covariates.ncols() {
            return Err(ShareError::dimension_mismatch(
                "covariate columns",
                self.columns.len(),
                self.covariates.ncols(),
            ));
        }

        let mut column_index = HashMap::with_capacity(self.columns.len());
        for (slot, name) in self.columns.iter().enumerate() {
            if column_index.insert(name.clone(), slot).is_some() {
                return Err(ShareError::DuplicateColumn { name: name.clone() });
            }
        }

        if self.covariates.iter().any(|value| !value.is_finite()) {
            return Err(ShareError::numerical("covariate validation"));
        }

        let choices = self
            .choices
            .ok_or_else(|| ShareError::dimension_mismatch("choices", n, 0))?;
        if choices.len() != n {
            return Err(ShareError::dimension_mismatch("choices", n, choices.len()));
        }

        let sample_weights = self
            .sample_weights
            .unwrap_or_else(|| DVector::from_element(n, 1.0));
        if sample_weights.len() != n {
            return Err(ShareError::dimension_mismatch(
                "sample weights",
                n,
                sample_weights.len(),
            ));
        }
        if sample_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ShareError::numerical("sample weight validation"));
        }

        Ok(Dataset {
            columns: self.columns,
            column_index,
            covariates: self.covariates,
            choices,
            sample_weights,
        })
    }
}
