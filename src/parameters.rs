//! Fitted parameter sets produced by an estimator and the value lookups used during evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareError};

/// Name to value lookup consumed by [`Expression::evaluate`](crate::expression::Expression::evaluate).
///
/// The name index is shared, so building values for a new draw only copies the numbers.
#[derive(Clone, Debug)]
pub struct ParameterValues {
    index: Arc<HashMap<String, usize>>,
    values: Vec<f64>,
}

impl ParameterValues {
    /// Builds a lookup from `(name, value)` pairs. Later duplicates overwrite earlier ones.
    pub fn from_pairs<I: IntoIterator<Item = (String, f64)>>(pairs: I) -> Self {
        let mut index = HashMap::new();
        let mut values = Vec::new();
        for (name, value) in pairs {
            match index.get(&name) {
                Some(&slot) => values[slot] = value,
                None => {
                    index.insert(name, values.len());
                    values.push(value);
                }
            }
        }
        Self {
            index: Arc::new(index),
            values,
        }
    }

    /// Value of the named parameter, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.index.get(name).map(|&slot| self.values[slot])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in declaration order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Output of an estimator: point estimates and their sampling uncertainty.
///
/// A `FittedParameters` is immutable once built. Downstream stages only ever
/// borrow it, and each draw of an uncertainty ensemble gets its own
/// [`ParameterValues`] rather than a modified copy of the estimates.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "FittedParametersRecord", into = "FittedParametersRecord")]
pub struct FittedParameters {
    names: Vec<String>,
    index: Arc<HashMap<String, usize>>,
    estimates: DVector<f64>,
    covariance: Option<DMatrix<f64>>,
    bootstrap: Option<DMatrix<f64>>,
}

impl FittedParameters {
    /// Starts building a parameter set from names and point estimates.
    pub fn builder(names: Vec<String>, estimates: DVector<f64>) -> FittedParametersBuilder {
        FittedParametersBuilder::new(names, estimates)
    }

    /// Number of estimated parameters.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parameter names in estimation order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Point estimates in estimation order.
    pub fn estimates(&self) -> &DVector<f64> {
        &self.estimates
    }

    /// Point estimate of a single parameter.
    pub fn estimate(&self, name: &str) -> Option<f64> {
        self.index.get(name).map(|&slot| self.estimates[slot])
    }

    /// Position of a parameter in the estimate vector.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Estimated covariance of the estimates, if the estimator produced one.
    pub fn covariance(&self) -> Option<&DMatrix<f64>> {
        self.covariance.as_ref()
    }

    /// Bootstrap replications of the estimates, one row per replication.
    pub fn bootstrap_estimates(&self) -> Option<&DMatrix<f64>> {
        self.bootstrap.as_ref()
    }

    /// Standard errors from the diagonal of the covariance.
    pub fn standard_errors(&self) -> Option<DVector<f64>> {
        self.covariance
            .as_ref()
            .map(|cov| cov.diagonal().map(|variance| variance.max(0.0).sqrt()))
    }

    /// Lookup holding the point estimates.
    pub fn point_values(&self) -> ParameterValues {
        ParameterValues {
            index: Arc::clone(&self.index),
            values: self.estimates.iter().copied().collect(),
        }
    }

    /// Lookup holding an alternative parameter vector, e.g. one draw of an ensemble.
    pub fn values_at(&self, theta: &[f64]) -> Result<ParameterValues> {
        if theta.len() != self.names.len() {
            return Err(ShareError::dimension_mismatch(
                "parameter vector",
                self.names.len(),
                theta.len(),
            ));
        }
        Ok(ParameterValues {
            index: Arc::clone(&self.index),
            values: theta.to_vec(),
        })
    }
}

/// Builder that validates dimensions before constructing [`FittedParameters`].
#[derive(Debug)]
pub struct FittedParametersBuilder {
    names: Vec<String>,
    estimates: DVector<f64>,
    covariance: Option<DMatrix<f64>>,
    bootstrap: Option<DMatrix<f64>>,
}

impl FittedParametersBuilder {
    pub fn new(names: Vec<String>, estimates: DVector<f64>) -> Self {
        Self {
            names,
            estimates,
            covariance: None,
            bootstrap: None,
        }
    }

    /// Sets the full covariance matrix of the estimates.
    pub fn covariance(mut self, covariance: DMatrix<f64>) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Sets a diagonal covariance from standard errors.
    pub fn standard_errors(mut self, standard_errors: DVector<f64>) -> Self {
        let variances = standard_errors.map(|se| se * se);
        self.covariance = Some(DMatrix::from_diagonal(&variances));
        self
    }

    /// Attaches bootstrap replications, one row per replication.
    pub fn bootstrap(mut self, replications: DMatrix<f64>) -> Self {
        self.bootstrap = Some(replications);
        self
    }

    pub fn build(self) -> Result<FittedParameters> {
        let k = self.names.len();
        if self.estimates.len() != k {
            return Err(ShareError::dimension_mismatch(
                "parameter estimates",
                k,
                self.estimates.len(),
            ));
        }
        if self.estimates.iter().any(|value| !value.is_finite()) {
            return Err(ShareError::numerical("parameter estimates"));
        }

        let mut index = HashMap::with_capacity(k);
        for (slot, name) in self.names.iter().enumerate() {
            if index.insert(name.clone(), slot).is_some() {
                return Err(ShareError::DuplicateParameter { name: name.clone() });
            }
        }

        if let Some(cov) = &self.covariance {
            if cov.nrows() != k || cov.ncols() != k {
                return Err(ShareError::dimension_mismatch(
                    "covariance dimension",
                    k,
                    if cov.nrows() != k { cov.nrows() } else { cov.ncols() },
                ));
            }
        }
        if let Some(boot) = &self.bootstrap {
            if boot.ncols() != k {
                return Err(ShareError::dimension_mismatch(
                    "bootstrap columns",
                    k,
                    boot.ncols(),
                ));
            }
        }

        Ok(FittedParameters {
            names: self.names,
            index: Arc::new(index),
            estimates: self.estimates,
            covariance: self.covariance,
            bootstrap: self.bootstrap,
        })
    }
}

/// Serialized form of [`FittedParameters`]; deserialization re-runs the builder checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct FittedParametersRecord {
    names: Vec<String>,
    estimates: Vec<f64>,
    #[serde(default)]
    covariance: Option<DMatrix<f64>>,
    #[serde(default)]
    bootstrap: Option<DMatrix<f64>>,
}

impl TryFrom<FittedParametersRecord> for FittedParameters {
    type Error = ShareError;

    fn try_from(record: FittedParametersRecord) -> Result<Self> {
        let mut builder =
            FittedParametersBuilder::new(record.names, DVector::from_vec(record.estimates));
        builder.covariance = record.covariance;
        builder.bootstrap = record.bootstrap;
        builder.build()
    }
}

impl From<FittedParameters> for FittedParametersRecord {
    fn from(params: FittedParameters) -> Self {
        Self {
            names: params.names,
            estimates: params.estimates.iter().copied().collect(),
            covariance: params.covariance,
            bootstrap: params.bootstrap,
        }
    }
}
