//! Configuration structures for probability evaluation and interval estimation.

use serde::{Deserialize, Serialize};

use crate::draws::DrawStrategy;

/// How a cross-nested allocation parameter enters a nest's inclusive value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationForm {
    /// Contribution `α·exp(μV)`.
    #[default]
    Linear,
    /// Contribution `α^μ·exp(μV)`.
    Powered,
}

/// Controls how choice probabilities are evaluated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbabilityOptions {
    /// Allowed deviation from one of the summed cross-nested allocations of an alternative.
    pub allocation_tolerance: f64,
    /// Reject nest scales below one instead of logging a warning.
    pub strict_nest_bounds: bool,
    /// Functional form of cross-nested allocations.
    pub allocation_form: AllocationForm,
}

impl Default for ProbabilityOptions {
    fn default() -> Self {
        Self {
            allocation_tolerance: 1e-6,
            strict_nest_bounds: false,
            allocation_form: AllocationForm::Linear,
        }
    }
}

impl ProbabilityOptions {
    pub fn with_allocation_tolerance(mut self, tolerance: f64) -> Self {
        self.allocation_tolerance = tolerance;
        self
    }

    pub fn with_strict_nest_bounds(mut self, strict: bool) -> Self {
        self.strict_nest_bounds = strict;
        self
    }

    pub fn with_allocation_form(mut self, form: AllocationForm) -> Self {
        self.allocation_form = form;
        self
    }
}

/// How per-draw results are turned into interval bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalAggregation {
    /// Weighted share per draw, then quantiles of the shares across draws.
    #[default]
    DrawLevel,
    /// Quantiles of each observation's probability across draws, then the
    /// weighted mean of the lower and upper quantiles.
    ObservationLevel,
}

/// Controls the confidence interval of the market shares.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalOptions {
    /// Coverage of the two-sided interval, e.g. 0.9 for the 5th/95th percentiles.
    pub confidence_level: f64,
    /// Fewest parameter draws accepted for a quantile interval.
    pub minimum_draws: usize,
    pub aggregation: IntervalAggregation,
}

impl Default for IntervalOptions {
    fn default() -> Self {
        Self {
            confidence_level: 0.9,
            minimum_draws: 2,
            aggregation: IntervalAggregation::DrawLevel,
        }
    }
}

impl IntervalOptions {
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_minimum_draws(mut self, minimum: usize) -> Self {
        self.minimum_draws = minimum;
        self
    }

    pub fn with_aggregation(mut self, aggregation: IntervalAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Lower and upper quantile levels of the interval.
    pub fn quantile_levels(&self) -> (f64, f64) {
        let tail = (1.0 - self.confidence_level) / 2.0;
        (tail, 1.0 - tail)
    }
}

/// Aggregated configuration used by [`compute_market_shares`](crate::shares::compute_market_shares).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareOptions {
    pub probability: ProbabilityOptions,
    pub interval: IntervalOptions,
    /// Source of the parameter ensemble behind the interval.
    pub draws: DrawStrategy,
}

impl ShareOptions {
    /// Override the probability settings while preserving other defaults.
    pub fn with_probability(mut self, probability: ProbabilityOptions) -> Self {
        self.probability = probability;
        self
    }

    /// Override the interval settings while preserving other defaults.
    pub fn with_interval(mut self, interval: IntervalOptions) -> Self {
        self.interval = interval;
        self
    }

    /// Set the confidence level of the reported interval.
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.interval.confidence_level = level;
        self
    }

    /// Choose how parameter draws are produced.
    pub fn with_draws(mut self, draws: DrawStrategy) -> Self {
        self.draws = draws;
        self
    }
}
