//! Post-stratification weights that expand the survey sample to the population.
//!
//! Each observation belongs to exactly one [`PopulationStratum`]. With `n_s`
//! sampled observations and a census count `N_s` in stratum `s`, the weight is
//!
//! ```text
//! w_s = N_s · n / (n_s · N)      n = Σ n_s,  N = Σ N_s
//! ```
//!
//! i.e. the ratio of the stratum's population share to its sample share. The
//! weights sum to the sample size `n`, not to the population size.

use log::{debug, info};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{Result, ShareError};
use crate::expression::Expression;
use crate::parameters::ParameterValues;

/// Segment of the population with a known census count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationStratum {
    pub name: String,
    pub population: f64,
    /// Membership predicate over observation covariates; nonzero means member.
    pub filter: Expression,
}

impl PopulationStratum {
    pub fn new<S: Into<String>>(name: S, population: f64, filter: Expression) -> Self {
        Self {
            name: name.into(),
            population,
            filter,
        }
    }
}

/// Static table of population strata, typically loaded from configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationReference {
    pub strata: Vec<PopulationStratum>,
}

impl PopulationReference {
    pub fn new(strata: Vec<PopulationStratum>) -> Self {
        Self { strata }
    }

    /// Sum of the census counts of every stratum.
    pub fn total_population(&self) -> f64 {
        self.strata.iter().map(|stratum| stratum.population).sum()
    }
}

/// Sample size and resulting weight of one stratum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StratumSummary {
    pub name: String,
    pub population: f64,
    pub sample_size: usize,
    pub weight: f64,
}

/// Expansion weight of every observation of a dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct SurveyWeights {
    values: DVector<f64>,
    strata: Vec<StratumSummary>,
}

impl SurveyWeights {
    /// Wraps externally computed weights.
    pub fn from_values(values: DVector<f64>) -> Result<Self> {
        if values.iter().any(|w| !w.is_finite() || *w < 0.0) || values.sum() <= 0.0 {
            return Err(ShareError::numerical("survey weight validation"));
        }
        Ok(Self {
            values,
            strata: Vec::new(),
        })
    }

    /// Weight per observation, in row order.
    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of all weights.
    pub fn sum(&self) -> f64 {
        self.values.sum()
    }

    /// Per-stratum breakdown; empty for externally supplied weights.
    pub fn strata(&self) -> &[StratumSummary] {
        &self.strata
    }

    /// Multiplies every weight by a positive constant.
    pub fn scaled(&self, factor: f64) -> Result<Self> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(ShareError::numerical("weight scaling"));
        }
        Ok(Self {
            values: &self.values * factor,
            strata: self
                .strata
                .iter()
                .map(|summary| StratumSummary {
                    weight: summary.weight * factor,
                    ..summary.clone()
                })
                .collect(),
        })
    }
}

/// Assigns every observation to its stratum and computes its expansion weight.
pub fn compute_weights(reference: &PopulationReference, dataset: &Dataset) -> Result<SurveyWeights> {
    for stratum in &reference.strata {
        if !(stratum.population.is_finite() && stratum.population > 0.0) {
            return Err(ShareError::NonPositivePopulation {
                stratum: stratum.name.clone(),
                population: stratum.population,
            });
        }
    }

    let no_parameters = ParameterValues::from_pairs(Vec::new());
    let mut assignment = Vec::with_capacity(dataset.observation_count());
    let mut sample_sizes = vec![0usize; reference.strata.len()];
    for observation in dataset.observations() {
        let mut member_of: Option<usize> = None;
        for (slot, stratum) in reference.strata.iter().enumerate() {
            if stratum.filter.evaluate(&no_parameters, &observation)? == 0.0 {
                continue;
            }
            if let Some(first) = member_of {
                return Err(ShareError::OverlappingStrata {
                    observation: observation.index(),
                    first: reference.strata[first].name.clone(),
                    second: stratum.name.clone(),
                });
            }
            member_of = Some(slot);
        }
        let slot = member_of.ok_or(ShareError::UnassignedObservation {
            observation: observation.index(),
        })?;
        sample_sizes[slot] += 1;
        assignment.push(slot);
    }

    let total_sample = dataset.observation_count() as f64;
    let total_population = reference.total_population();
    let mut strata = Vec::with_capacity(reference.strata.len());
    for (stratum, &sample_size) in reference.strata.iter().zip(&sample_sizes) {
        if sample_size == 0 {
            return Err(ShareError::EmptyStratum {
                stratum: stratum.name.clone(),
            });
        }
        let weight =
            stratum.population * total_sample / (sample_size as f64 * total_population);
        debug!(
            "stratum `{}`: {} observations, population {}, weight {}",
            stratum.name, sample_size, stratum.population, weight
        );
        strata.push(StratumSummary {
            name: stratum.name.clone(),
            population: stratum.population,
            sample_size,
            weight,
        });
    }

    let values = DVector::from_iterator(
        assignment.len(),
        assignment.iter().map(|&slot| strata[slot].weight),
    );
    info!(
        "computed survey weights for {} observations in {} strata; sum of weights {}",
        values.len(),
        strata.len(),
        values.sum()
    );
    Ok(SurveyWeights { values, strata })
}
