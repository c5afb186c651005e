//! Ensembles of parameter vectors representing the sampling distribution of the estimates.

use log::debug;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareError};
use crate::parameters::FittedParameters;

/// Where the parameter draws behind a confidence interval come from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawStrategy {
    /// Multivariate normal around the estimates using their covariance.
    AsymptoticNormal { draws: usize, seed: u64 },
    /// Bootstrap replications carried by the fitted parameters.
    Bootstrap,
}

impl Default for DrawStrategy {
    fn default() -> Self {
        DrawStrategy::AsymptoticNormal {
            draws: 100,
            seed: 1234,
        }
    }
}

/// Parameter draws, one row per draw and one column per parameter.
#[derive(Clone, Debug)]
pub struct ParameterDraws {
    draws: DMatrix<f64>,
}

impl ParameterDraws {
    /// Wraps a caller-supplied ensemble whose columns follow `parameters`' order.
    pub fn from_matrix(draws: DMatrix<f64>, parameters: &FittedParameters) -> Result<Self> {
        if draws.ncols() != parameters.len() {
            return Err(ShareError::dimension_mismatch(
                "draw columns",
                parameters.len(),
                draws.ncols(),
            ));
        }
        if draws.iter().any(|value| !value.is_finite()) {
            return Err(ShareError::numerical("parameter draws"));
        }
        Ok(Self { draws })
    }

    /// Produces draws according to `strategy`.
    pub fn generate(parameters: &FittedParameters, strategy: &DrawStrategy) -> Result<Self> {
        match strategy {
            DrawStrategy::AsymptoticNormal { draws, seed } => {
                Self::asymptotic_normal(parameters, *draws, *seed)
            }
            DrawStrategy::Bootstrap => Self::bootstrap(parameters),
        }
    }

    /// Samples `θ̂ + L·z` with `L` the Cholesky factor of the covariance and `z` standard normal.
    pub fn asymptotic_normal(parameters: &FittedParameters, draws: usize, seed: u64) -> Result<Self> {
        let covariance = parameters
            .covariance()
            .ok_or_else(|| ShareError::singular("asymptotic normal draws"))?;
        let cholesky = nalgebra::linalg::Cholesky::new(covariance.clone())
            .ok_or_else(|| ShareError::singular("asymptotic normal draws"))?;
        let factor = cholesky.l();

        let k = parameters.len();
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut matrix = DMatrix::zeros(draws, k);
        for draw in 0..draws {
            let z = DVector::<f64>::from_fn(k, |_, _| StandardNormal.sample(&mut rng));
            let theta = parameters.estimates() + &factor * z;
            matrix.row_mut(draw).copy_from(&theta.transpose());
        }
        debug!("generated {draws} asymptotic normal draws of {k} parameters (seed {seed})");
        Self::from_matrix(matrix, parameters)
    }

    /// Uses the bootstrap replications stored with the estimates.
    pub fn bootstrap(parameters: &FittedParameters) -> Result<Self> {
        let replications = parameters
            .bootstrap_estimates()
            .ok_or(ShareError::InsufficientDraws {
                available: 0,
                required: 2,
            })?;
        debug!("using {} bootstrap replications", replications.nrows());
        Self::from_matrix(replications.clone(), parameters)
    }

    /// Number of draws.
    pub fn draw_count(&self) -> usize {
        self.draws.nrows()
    }

    /// Number of parameters per draw.
    pub fn dimension(&self) -> usize {
        self.draws.ncols()
    }

    /// Returns a view of the draw matrix.
    pub fn draws(&self) -> &DMatrix<f64> {
        &self.draws
    }

    /// Parameter vector of draw `index`.
    pub fn draw(&self, index: usize) -> Vec<f64> {
        self.draws.row(index).iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn fitted(covariance: Option<DMatrix<f64>>) -> FittedParameters {
        let builder = FittedParameters::builder(
            vec!["a".to_string(), "b".to_string()],
            DVector::from_vec(vec![1.0, -2.0]),
        );
        match covariance {
            Some(cov) => builder.covariance(cov),
            None => builder,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn asymptotic_draws_reproduce_moments() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]);
        let params = fitted(Some(cov));
        let draws = ParameterDraws::asymptotic_normal(&params, 20_000, 7).unwrap();
        assert_eq!(draws.draw_count(), 20_000);
        assert_eq!(draws.dimension(), 2);

        let means = draws.draws().row_mean();
        assert_relative_eq!(means[0], 1.0, epsilon = 1e-2);
        assert_relative_eq!(means[1], -2.0, epsilon = 1e-2);

        let centered = draws.draws() - DMatrix::from_fn(20_000, 2, |_, j| means[j]);
        let sample_cov = centered.transpose() * &centered / 19_999.0;
        assert_relative_eq!(sample_cov[(0, 0)], 0.04, epsilon = 5e-3);
        assert_relative_eq!(sample_cov[(0, 1)], 0.01, epsilon = 5e-3);
        assert_relative_eq!(sample_cov[(1, 1)], 0.09, epsilon = 5e-3);
    }

    #[test]
    fn same_seed_gives_same_draws() {
        let params = fitted(Some(DMatrix::identity(2, 2)));
        let first = ParameterDraws::asymptotic_normal(&params, 10, 99).unwrap();
        let second = ParameterDraws::asymptotic_normal(&params, 10, 99).unwrap();
        assert_eq!(first.draws(), second.draws());
    }

    #[test]
    fn singular_or_missing_covariance_is_reported() {
        let missing = ParameterDraws::asymptotic_normal(&fitted(None), 10, 1);
        assert!(matches!(missing, Err(ShareError::SingularCovariance { .. })));

        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let result = ParameterDraws::asymptotic_normal(&fitted(Some(singular)), 10, 1);
        assert!(matches!(result, Err(ShareError::SingularCovariance { .. })));
    }

    #[test]
    fn bootstrap_requires_replications() {
        let result = ParameterDraws::generate(&fitted(None), &DrawStrategy::Bootstrap);
        assert!(matches!(
            result,
            Err(ShareError::InsufficientDraws { available: 0, required: 2 })
        ));
    }
}
