//! Survey-weighted market shares for logit-family travel mode choice models.
//!
//! Given a choice model whose coefficients were fitted elsewhere, this crate
//!
//! - evaluates per-observation choice probabilities under flat, nested and
//!   cross-nested logit (`probability`, `nesting`),
//! - expands the survey sample to the population with post-stratification
//!   weights (`weighting`),
//! - aggregates weighted probabilities into market shares and propagates
//!   parameter uncertainty into confidence intervals (`draws`, `shares`).
//!
//! Utilities, availability conditions, nest parameters and stratum filters
//! are all [`expression::Expression`] trees over named parameters and
//! dataset columns, so a model can be described in code or loaded from JSON.
//!
//! # Quick start
//!
//! ```no_run
//! use modeshare::context::SurveyContext;
//! use modeshare::data::Dataset;
//! use modeshare::expression::Expression;
//! use modeshare::nesting::{Nest, NestingStructure};
//! use modeshare::options::ShareOptions;
//! use modeshare::parameters::FittedParameters;
//! use modeshare::probability::ChoiceModel;
//! use modeshare::shares::compute_market_shares;
//! use modeshare::specification::UtilitySpecification;
//! use modeshare::weighting::{PopulationReference, PopulationStratum};
//! use nalgebra::{DMatrix, DVector};
//!
//! let spec = UtilitySpecification::builder()
//!     .alternative(1, "Walking", Expression::param("beta_time") * Expression::var("time_walk"))
//!     .alternative(2, "PT", Expression::param("asc_pt") + Expression::param("beta_time") * Expression::var("time_pt"))
//!     .alternative(3, "Car", Expression::param("asc_car") + Expression::param("beta_time") * Expression::var("time_car"))
//!     .availability(3, Expression::var("car_available"))
//!     .build()
//!     .expect("valid choice set");
//! let nesting = NestingStructure::Nested(vec![Nest::new("motorized", Expression::param("mu_motorized"), vec![2, 3])]);
//! let model = ChoiceModel::new(spec, nesting).expect("consistent nests");
//!
//! let columns = ["time_walk", "time_pt", "time_car", "car_available", "female"].map(String::from).to_vec();
//! let covariates = DMatrix::from_row_slice(2, 5, &[
//!     0.5, 0.3, 0.2, 1.0, 1.0,
//!     0.9, 0.4, 0.3, 0.0, 0.0,
//! ]);
//! let data = Dataset::new(columns, covariates, vec![1, 2]).expect("aligned rows");
//!
//! let census = PopulationReference::new(vec![
//!     PopulationStratum::new("female", 4_361_324.0, Expression::var("female").equals(1.0)),
//!     PopulationStratum::new("male", 4_305_606.0, Expression::var("female").equals(0.0)),
//! ]);
//! let context = SurveyContext::weighted(data, &census).expect("every stratum sampled");
//!
//! let names = ["asc_pt", "asc_car", "beta_time", "mu_motorized"].map(String::from).to_vec();
//! let params = FittedParameters::builder(names, DVector::from_vec(vec![-0.4, 0.2, -2.5, 1.6]))
//!     .standard_errors(DVector::from_vec(vec![0.1, 0.1, 0.3, 0.2]))
//!     .build()
//!     .expect("aligned estimates");
//!
//! let result = compute_market_shares(&model, &params, &context, &ShareOptions::default())
//!     .expect("market shares");
//! for (name, share) in result.iter() {
//!     println!("{name}: {share}");
//! }
//! ```

pub mod context;
pub mod data;
pub mod draws;
pub mod error;
pub mod estimation;
pub mod expression;
pub mod nesting;
pub mod options;
pub mod parameters;
pub mod probability;
pub mod shares;
pub mod specification;
pub mod weighting;

pub use context::SurveyContext;
pub use data::{Dataset, DatasetBuilder};
pub use draws::{DrawStrategy, ParameterDraws};
pub use error::{Result, ShareError};
pub use estimation::{bootstrap_estimates, BootstrapOptions, Estimator};
pub use expression::Expression;
pub use nesting::{CrossNest, Nest, NestingStructure};
pub use options::{IntervalAggregation, IntervalOptions, ProbabilityOptions, ShareOptions};
pub use parameters::{FittedParameters, ParameterValues};
pub use probability::ChoiceModel;
pub use shares::{compute_market_shares, validate_inputs, IndicatorTuple, MarketShareResult};
pub use specification::{AlternativeId, UtilitySpecification};
pub use weighting::{compute_weights, PopulationReference, PopulationStratum, SurveyWeights};
