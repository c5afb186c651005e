//! Estimation seam and bootstrap replications of fitted parameters.
//!
//! Fitting a choice model is delegated to an [`Estimator`]; this crate only
//! consumes its output. [`bootstrap_estimates`] re-runs an estimator on
//! resampled data so that intervals can be built from the empirical
//! distribution of the estimates instead of the asymptotic one.

use log::{debug, info};
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{Result, ShareError};
use crate::parameters::FittedParameters;
use crate::probability::ChoiceModel;

/// Anything that can fit a choice model to a dataset.
///
/// Implementations may fail with `ConvergenceFailure` or `SingularCovariance`.
pub trait Estimator: Sync {
    fn estimate(&self, model: &ChoiceModel, data: &Dataset) -> Result<FittedParameters>;
}

impl<F> Estimator for F
where
    F: Fn(&ChoiceModel, &Dataset) -> Result<FittedParameters> + Sync,
{
    fn estimate(&self, model: &ChoiceModel, data: &Dataset) -> Result<FittedParameters> {
        self(model, data)
    }
}

/// Number of replications and seed of the resampling generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    pub replications: usize,
    pub seed: u64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            replications: 100,
            seed: 1234,
        }
    }
}

impl BootstrapOptions {
    pub fn with_replications(mut self, replications: usize) -> Self {
        self.replications = replications;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Fits the model on `data`, then once per replication on rows resampled with
/// replacement, and attaches the replicated estimates to the full-sample fit.
///
/// Row indices are drawn up front from a single seeded generator, so the
/// result does not depend on how rayon schedules the replications. The first
/// failing replication aborts the whole run.
pub fn bootstrap_estimates<E: Estimator + ?Sized>(
    estimator: &E,
    model: &ChoiceModel,
    data: &Dataset,
    options: &BootstrapOptions,
) -> Result<FittedParameters> {
    if options.replications < 2 {
        return Err(ShareError::InsufficientDraws {
            available: options.replications,
            required: 2,
        });
    }
    let fit = estimator.estimate(model, data)?;

    let n = data.observation_count();
    let mut rng = SmallRng::seed_from_u64(options.seed);
    let samples: Vec<Vec<usize>> = (0..options.replications)
        .map(|_| (0..n).map(|_| rng.gen_range(0..n)).collect())
        .collect();
    debug!(
        "drew {} bootstrap samples of {n} observations (seed {})",
        samples.len(),
        options.seed
    );

    let replicated = samples
        .par_iter()
        .map(|rows| {
            let resampled = data.select_rows(rows)?;
            let replicate = estimator.estimate(model, &resampled)?;
            fit.names()
                .iter()
                .map(|name| {
                    replicate
                        .estimate(name)
                        .ok_or_else(|| ShareError::UnknownParameter { name: name.clone() })
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    let k = fit.len();
    let matrix = DMatrix::from_fn(replicated.len(), k, |r, c| replicated[r][c]);
    info!("completed {} bootstrap replications", replicated.len());

    let mut builder = FittedParameters::builder(fit.names().to_vec(), fit.estimates().clone())
        .bootstrap(matrix);
    if let Some(covariance) = fit.covariance() {
        builder = builder.covariance(covariance.clone());
    }
    builder.build()
}
