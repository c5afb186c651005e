//! Survey-weighted market shares and their confidence intervals.
//!
//! The point estimate of alternative `i` is the weighted mean choice
//! probability at the fitted parameters,
//!
//! ```text
//! s_i(θ) = Σ_o w_o P(i | o, θ) / Σ_o w_o
//! ```
//!
//! The interval re-evaluates `s_i(θ_k)` for every parameter draw `θ_k` with
//! the same probability routine and reports the requested quantiles across
//! draws, separately for each alternative.

use std::fmt;

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::context::SurveyContext;
use crate::draws::ParameterDraws;
use crate::error::{Result, ShareError};
use crate::options::{IntervalAggregation, IntervalOptions, ProbabilityOptions, ShareOptions};
use crate::parameters::FittedParameters;
use crate::probability::ChoiceModel;
use crate::specification::AlternativeId;

/// Value of an indicator and the bounds of its confidence interval.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndicatorTuple {
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

impl fmt::Display for IndicatorTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} [{:.4}, {:.4}]", self.value, self.lower, self.upper)
    }
}

/// Market share of one alternative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlternativeShare {
    pub id: AlternativeId,
    pub name: String,
    #[serde(flatten)]
    pub share: IndicatorTuple,
}

/// Market shares of every alternative, in choice-set order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketShareResult {
    pub confidence_level: f64,
    pub draw_count: usize,
    pub shares: Vec<AlternativeShare>,
}

impl MarketShareResult {
    /// Share of the alternative with the given name.
    pub fn get(&self, name: &str) -> Option<&IndicatorTuple> {
        self.shares
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.share)
    }

    /// Share of the alternative with the given id.
    pub fn by_id(&self, id: AlternativeId) -> Option<&IndicatorTuple> {
        self.shares
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.share)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndicatorTuple)> {
        self.shares
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.share))
    }
}

/// Weighted column means `wᵀP / Σw` of a probability matrix (observations × alternatives).
pub fn weighted_shares(probabilities: &DMatrix<f64>, weights: &DVector<f64>) -> Result<DVector<f64>> {
    if probabilities.nrows() != weights.len() {
        return Err(ShareError::dimension_mismatch(
            "weights length",
            probabilities.nrows(),
            weights.len(),
        ));
    }
    let total = weights.sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(ShareError::numerical("weight normalisation"));
    }
    Ok(probabilities.tr_mul(weights) / total)
}

/// Checks a model and its estimates against the survey before any share is computed.
///
/// Every referenced parameter and covariate must resolve, nest scales must
/// pass [`check_scale_bounds`](crate::nesting::NestingStructure::check_scale_bounds)
/// at the point estimates, and every observed choice must belong to the
/// choice set and be available.
pub fn validate_inputs(
    model: &ChoiceModel,
    parameters: &FittedParameters,
    context: &SurveyContext,
    options: &ProbabilityOptions,
) -> Result<()> {
    let dataset = context.dataset();
    model.check_inputs(parameters, dataset)?;
    let point_values = parameters.point_values();
    model.nesting().check_scale_bounds(&point_values, options)?;
    model.validate_observations(&point_values, dataset)
}

/// Weighted market share of every alternative at the point estimates.
///
/// Needs weights but no covariance, so it succeeds even when intervals cannot
/// be computed. Inconsistent observations are rejected as in
/// [`validate_inputs`].
pub fn point_estimates(
    model: &ChoiceModel,
    parameters: &FittedParameters,
    context: &SurveyContext,
    options: &ProbabilityOptions,
) -> Result<DVector<f64>> {
    let weights = context.weights()?;
    validate_inputs(model, parameters, context, options)?;
    let probabilities =
        model.probability_matrix(&parameters.point_values(), context.dataset(), options)?;
    weighted_shares(&probabilities, weights.values())
}

/// Weighted market shares for every draw (rows) and alternative (columns).
pub fn draw_shares(
    model: &ChoiceModel,
    parameters: &FittedParameters,
    draws: &ParameterDraws,
    context: &SurveyContext,
    options: &ProbabilityOptions,
) -> Result<DMatrix<f64>> {
    let weights = context.weights()?;
    check_draw_dimension(parameters, draws)?;
    let per_draw = (0..draws.draw_count())
        .into_par_iter()
        .map(|index| {
            let values = parameters.values_at(&draws.draw(index))?;
            let probabilities = model.probability_matrix(&values, context.dataset(), options)?;
            weighted_shares(&probabilities, weights.values())
        })
        .collect::<Result<Vec<_>>>()?;

    let mut shares = DMatrix::zeros(per_draw.len(), model.specification().len());
    for (row, values) in per_draw.iter().enumerate() {
        shares.row_mut(row).copy_from(&values.transpose());
    }
    Ok(shares)
}

fn check_draw_dimension(parameters: &FittedParameters, draws: &ParameterDraws) -> Result<()> {
    if draws.dimension() != parameters.len() {
        return Err(ShareError::dimension_mismatch(
            "draw dimension",
            parameters.len(),
            draws.dimension(),
        ));
    }
    Ok(())
}

/// Full probability matrix per draw, for observation-level intervals only.
fn draw_probability_matrices(
    model: &ChoiceModel,
    parameters: &FittedParameters,
    draws: &ParameterDraws,
    context: &SurveyContext,
    options: &ProbabilityOptions,
) -> Result<Vec<DMatrix<f64>>> {
    check_draw_dimension(parameters, draws)?;
    (0..draws.draw_count())
        .into_par_iter()
        .map(|index| {
            let values = parameters.values_at(&draws.draw(index))?;
            model.probability_matrix(&values, context.dataset(), options)
        })
        .collect()
}

/// Quantile of sorted data with linear interpolation between order statistics.
pub fn quantile(sorted: &[f64], level: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = level.clamp(0.0, 1.0) * (n - 1) as f64;
            let below = position.floor() as usize;
            let above = (below + 1).min(n - 1);
            let fraction = position - below as f64;
            sorted[below] + fraction * (sorted[above] - sorted[below])
        }
    }
}

/// Lower and upper quantiles of `values` for a two-sided interval.
pub fn percentile_interval(values: &[f64], options: &IntervalOptions) -> Result<(f64, f64)> {
    check_interval_options(values.len(), options)?;
    if values.iter().any(|value| !value.is_finite()) {
        return Err(ShareError::numerical("interval quantiles"));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let (low, high) = options.quantile_levels();
    Ok((quantile(&sorted, low), quantile(&sorted, high)))
}

fn check_interval_options(draw_count: usize, options: &IntervalOptions) -> Result<()> {
    let level = options.confidence_level;
    if !(level > 0.0 && level < 1.0) {
        return Err(ShareError::InvalidConfidenceLevel { level });
    }
    let required = options.minimum_draws.max(2);
    if draw_count < required {
        return Err(ShareError::InsufficientDraws {
            available: draw_count,
            required,
        });
    }
    Ok(())
}

/// Market shares with intervals from a caller-supplied parameter ensemble.
pub fn market_shares_with_draws(
    model: &ChoiceModel,
    parameters: &FittedParameters,
    draws: &ParameterDraws,
    context: &SurveyContext,
    options: &ShareOptions,
) -> Result<MarketShareResult> {
    check_interval_options(draws.draw_count(), &options.interval)?;
    let weights = context.weights()?;
    let values = point_estimates(model, parameters, context, &options.probability)?;
    debug!("point estimates of the market shares: {values:?}");

    let bounds: Vec<(f64, f64)> = match options.interval.aggregation {
        IntervalAggregation::DrawLevel => {
            let shares = draw_shares(model, parameters, draws, context, &options.probability)?;
            shares
                .column_iter()
                .map(|column| {
                    let values: Vec<f64> = column.iter().copied().collect();
                    percentile_interval(&values, &options.interval)
                })
                .collect::<Result<_>>()?
        }
        IntervalAggregation::ObservationLevel => {
            let matrices =
                draw_probability_matrices(model, parameters, draws, context, &options.probability)?;
            observation_level_bounds(&matrices, weights.values(), &options.interval)?
        }
    };

    let shares = model
        .specification()
        .alternatives()
        .iter()
        .zip(values.iter())
        .zip(bounds)
        .map(|((alternative, &value), (lower, upper))| AlternativeShare {
            id: alternative.id,
            name: alternative.name.clone(),
            share: IndicatorTuple {
                value,
                lower,
                upper,
            },
        })
        .collect::<Vec<_>>();

    for entry in &shares {
        info!("market share of {}: {}", entry.name, entry.share);
    }

    Ok(MarketShareResult {
        confidence_level: options.interval.confidence_level,
        draw_count: draws.draw_count(),
        shares,
    })
}

/// Per observation and alternative, quantiles of the probability across draws;
/// then the weighted means of the lower and of the upper quantiles.
fn observation_level_bounds(
    matrices: &[DMatrix<f64>],
    weights: &DVector<f64>,
    options: &IntervalOptions,
) -> Result<Vec<(f64, f64)>> {
    let (rows, columns) = match matrices.first() {
        Some(first) => first.shape(),
        None => {
            return Err(ShareError::InsufficientDraws {
                available: 0,
                required: options.minimum_draws.max(2),
            })
        }
    };
    let mut lower = DMatrix::zeros(rows, columns);
    let mut upper = DMatrix::zeros(rows, columns);
    let mut across_draws = Vec::with_capacity(matrices.len());
    for row in 0..rows {
        for column in 0..columns {
            across_draws.clear();
            across_draws.extend(matrices.iter().map(|m| m[(row, column)]));
            let (low, high) = percentile_interval(&across_draws, options)?;
            lower[(row, column)] = low;
            upper[(row, column)] = high;
        }
    }
    let lower = weighted_shares(&lower, weights)?;
    let upper = weighted_shares(&upper, weights)?;
    Ok(lower.iter().copied().zip(upper.iter().copied()).collect())
}

/// Computes the market share of every alternative with a confidence interval.
///
/// The parameter ensemble is generated according to `options.draws`. Fails
/// with `MissingWeights` when the context carries no survey weights,
/// `InsufficientDraws` when the ensemble is smaller than
/// `options.interval.minimum_draws`, and `SingularCovariance` when asymptotic
/// draws are requested without a usable covariance. Use [`point_estimates`]
/// when only the point values are needed.
pub fn compute_market_shares(
    model: &ChoiceModel,
    parameters: &FittedParameters,
    context: &SurveyContext,
    options: &ShareOptions,
) -> Result<MarketShareResult> {
    context.weights()?;
    let draws = ParameterDraws::generate(parameters, &options.draws)?;
    market_shares_with_draws(model, parameters, &draws, context, options)
}
