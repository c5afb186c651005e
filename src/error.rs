use thiserror::Error;

/// Unified error type for `modeshare` operations.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Raised when provided vectors or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, often the model-implied value.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a nest scale parameter is outside its admissible range.
    #[error("nest `{nest}` has invalid scale parameter {value}")]
    InvalidNestParameter { nest: String, value: f64 },

    /// Raised when cross-nested allocations of an alternative do not sum to one.
    #[error(
        "allocations of alternative {alternative} sum to {total}, expected 1 within {tolerance}"
    )]
    InconsistentAllocation {
        alternative: i64,
        total: f64,
        tolerance: f64,
    },

    /// Raised when a single allocation parameter leaves the unit interval.
    #[error("allocation of alternative {alternative} to nest `{nest}` must lie in [0, 1], found {value}")]
    InvalidAllocation {
        alternative: i64,
        nest: String,
        value: f64,
    },

    /// Raised when a nested-logit alternative is placed in more than one nest.
    #[error("alternative {alternative} appears in nests `{first}` and `{second}`")]
    OverlappingNests {
        alternative: i64,
        first: String,
        second: String,
    },

    /// Raised when an entry references an alternative outside the declared choice set.
    #[error("alternative {alternative} referenced in {context} is not part of the choice set")]
    UnknownAlternative {
        alternative: i64,
        context: &'static str,
    },

    /// Raised when the same alternative id is declared twice.
    #[error("alternative {alternative} is declared more than once")]
    DuplicateAlternative { alternative: i64 },

    /// Raised when a model is built without any alternative.
    #[error("the choice set must contain at least one alternative")]
    EmptyChoiceSet,

    /// Raised when an observation chose an alternative that was not available to it.
    #[error("observation {observation} chose alternative {alternative}, which is unavailable")]
    UnavailableChoice { observation: usize, alternative: i64 },

    /// Raised when an observation has no available alternative at all.
    #[error("no alternative is available to the observation")]
    NoAvailableAlternative,

    /// Raised when an expression references a parameter that has no value.
    #[error("parameter `{name}` has no value")]
    UnknownParameter { name: String },

    /// Raised when a parameter name is declared more than once.
    #[error("parameter `{name}` is declared more than once")]
    DuplicateParameter { name: String },

    /// Raised when a dataset declares the same covariate column twice.
    #[error("covariate column `{name}` appears more than once")]
    DuplicateColumn { name: String },

    /// Raised when an expression references a covariate the dataset does not carry.
    #[error("covariate `{name}` is not a column of the dataset")]
    UnknownVariable { name: String },

    /// Raised when a population stratum contains no observation.
    #[error("stratum `{stratum}` contains no observation")]
    EmptyStratum { stratum: String },

    /// Raised when an observation does not belong to any stratum.
    #[error("observation {observation} does not belong to any stratum")]
    UnassignedObservation { observation: usize },

    /// Raised when an observation matches several strata.
    #[error("observation {observation} belongs to both `{first}` and `{second}`")]
    OverlappingStrata {
        observation: usize,
        first: String,
        second: String,
    },

    /// Raised when a stratum population count is not strictly positive.
    #[error("population of stratum `{stratum}` must be positive, found {population}")]
    NonPositivePopulation { stratum: String, population: f64 },

    /// Raised when too few parameter draws are available for a quantile interval.
    #[error("{available} parameter draws available, at least {required} required")]
    InsufficientDraws { available: usize, required: usize },

    /// Raised when market shares are requested before survey weights were attached.
    #[error("survey weights must be computed before market shares")]
    MissingWeights,

    /// Raised when the requested confidence level is not in (0, 1).
    #[error("confidence level must lie strictly between 0 and 1, found {level}")]
    InvalidConfidenceLevel { level: f64 },

    /// Surfaced from an estimator that failed to converge.
    #[error("estimation did not converge after {iterations} iterations: {message}")]
    ConvergenceFailure { iterations: usize, message: String },

    /// Raised when a covariance matrix cannot be factorized.
    #[error("covariance matrix in {context} is singular or not positive definite")]
    SingularCovariance { context: &'static str },

    /// Raised when numerical routines produce NaN or infinite values.
    #[error("encountered a non-finite value during {context}")]
    NumericalError { context: &'static str },
}

impl ShareError {
    /// Helper to format a [`DimensionMismatch`](ShareError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper to raise when a covariance factorization fails.
    pub fn singular(context: &'static str) -> Self {
        Self::SingularCovariance { context }
    }

    /// Helper for alternatives referenced outside the choice set.
    pub fn unknown_alternative(alternative: i64, context: &'static str) -> Self {
        Self::UnknownAlternative {
            alternative,
            context,
        }
    }

    /// Helper for non-finite intermediate values.
    pub fn numerical(context: &'static str) -> Self {
        Self::NumericalError { context }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, ShareError>;
