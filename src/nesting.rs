//! Nest structures for nested and cross-nested logit models.
//!
//! Nest scales and cross-nested allocations are expressions over parameters
//! only. They are resolved to numbers once per parameter vector, so a whole
//! dataset can be evaluated against the same [`ResolvedNesting`].

use std::collections::{BTreeSet, HashMap};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareError};
use crate::expression::Expression;
use crate::options::{AllocationForm, ProbabilityOptions};
use crate::parameters::ParameterValues;
use crate::specification::{AlternativeId, UtilitySpecification};

/// A group of alternatives of a nested logit model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Nest {
    pub name: String,
    /// Scale parameter `μ`, expected to be at least one.
    pub scale: Expression,
    pub alternatives: Vec<AlternativeId>,
}

impl Nest {
    pub fn new<S: Into<String>>(name: S, scale: Expression, alternatives: Vec<AlternativeId>) -> Self {
        Self {
            name: name.into(),
            scale,
            alternatives,
        }
    }
}

/// A nest of a cross-nested logit model with per-alternative allocation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrossNest {
    pub name: String,
    pub scale: Expression,
    /// Allocation `α` of each alternative to this nest, in [0, 1].
    pub allocations: Vec<(AlternativeId, Expression)>,
}

impl CrossNest {
    pub fn new<S: Into<String>>(
        name: S,
        scale: Expression,
        allocations: Vec<(AlternativeId, Expression)>,
    ) -> Self {
        Self {
            name: name.into(),
            scale,
            allocations,
        }
    }
}

/// Correlation structure among the alternatives of a choice model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NestingStructure {
    /// Multinomial logit, no nests.
    #[default]
    Flat,
    /// Disjoint nests. Alternatives left out of every nest form singleton nests with scale 1.
    Nested(Vec<Nest>),
    /// Overlapping nests with allocation parameters.
    CrossNested(Vec<CrossNest>),
}

impl NestingStructure {
    /// Checks the structure against the choice set.
    pub fn validate(&self, specification: &UtilitySpecification) -> Result<()> {
        match self {
            NestingStructure::Flat => Ok(()),
            NestingStructure::Nested(nests) => {
                let mut owner: HashMap<AlternativeId, &str> = HashMap::new();
                for nest in nests {
                    for &alternative in &nest.alternatives {
                        specification.require_position(alternative, "nest definition")?;
                        if let Some(first) = owner.insert(alternative, &nest.name) {
                            return Err(ShareError::OverlappingNests {
                                alternative,
                                first: first.to_string(),
                                second: nest.name.clone(),
                            });
                        }
                    }
                }
                Ok(())
            }
            NestingStructure::CrossNested(nests) => {
                for nest in nests {
                    for (alternative, _) in &nest.allocations {
                        specification.require_position(*alternative, "cross-nest allocation")?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Names of all parameters referenced by scales and allocations.
    pub fn parameters(&self) -> BTreeSet<&str> {
        match self {
            NestingStructure::Flat => BTreeSet::new(),
            NestingStructure::Nested(nests) => {
                nests.iter().flat_map(|nest| nest.scale.parameters()).collect()
            }
            NestingStructure::CrossNested(nests) => nests
                .iter()
                .flat_map(|nest| {
                    nest.scale.parameters().into_iter().chain(
                        nest.allocations
                            .iter()
                            .flat_map(|(_, alpha)| alpha.parameters()),
                    )
                })
                .collect(),
        }
    }

    /// Evaluates scales and allocations for one parameter vector.
    pub fn resolve(
        &self,
        specification: &UtilitySpecification,
        parameters: &ParameterValues,
        options: &ProbabilityOptions,
    ) -> Result<ResolvedNesting> {
        match self {
            NestingStructure::Flat => Ok(ResolvedNesting::Flat),
            NestingStructure::Nested(nests) => {
                let mut resolved = Vec::with_capacity(nests.len());
                let mut covered = vec![false; specification.len()];
                for nest in nests {
                    let scale = resolve_scale(&nest.name, &nest.scale, parameters)?;
                    let mut members = Vec::with_capacity(nest.alternatives.len());
                    for &alternative in &nest.alternatives {
                        let slot = specification.require_position(alternative, "nest definition")?;
                        covered[slot] = true;
                        members.push((slot, 1.0));
                    }
                    resolved.push(ResolvedNest {
                        name: nest.name.clone(),
                        scale,
                        members,
                    });
                }
                for (slot, alternative) in specification.alternatives().iter().enumerate() {
                    if !covered[slot] {
                        resolved.push(ResolvedNest {
                            name: alternative.name.clone(),
                            scale: 1.0,
                            members: vec![(slot, 1.0)],
                        });
                    }
                }
                Ok(ResolvedNesting::Nests(resolved))
            }
            NestingStructure::CrossNested(nests) => {
                let mut resolved = Vec::with_capacity(nests.len());
                let mut totals = vec![0.0_f64; specification.len()];
                for nest in nests {
                    let scale = resolve_scale(&nest.name, &nest.scale, parameters)?;
                    let mut members = Vec::with_capacity(nest.allocations.len());
                    for (alternative, allocation) in &nest.allocations {
                        let slot =
                            specification.require_position(*alternative, "cross-nest allocation")?;
                        let alpha = allocation.evaluate_parameters(parameters)?;
                        if !(0.0..=1.0).contains(&alpha) {
                            return Err(ShareError::InvalidAllocation {
                                alternative: *alternative,
                                nest: nest.name.clone(),
                                value: alpha,
                            });
                        }
                        totals[slot] += alpha;
                        if alpha > 0.0 {
                            members.push((slot, allocation_weight(alpha, scale, options)));
                        }
                    }
                    resolved.push(ResolvedNest {
                        name: nest.name.clone(),
                        scale,
                        members,
                    });
                }
                for (slot, total) in totals.iter().enumerate() {
                    if (total - 1.0).abs() > options.allocation_tolerance {
                        return Err(ShareError::InconsistentAllocation {
                            alternative: specification.alternatives()[slot].id,
                            total: *total,
                            tolerance: options.allocation_tolerance,
                        });
                    }
                }
                Ok(ResolvedNesting::Nests(resolved))
            }
        }
    }

    /// Flags nest scales below one, which break consistency with random utility
    /// maximisation. Scales at or below zero are always rejected.
    pub fn check_scale_bounds(
        &self,
        parameters: &ParameterValues,
        options: &ProbabilityOptions,
    ) -> Result<()> {
        let scales: Vec<(&str, &Expression)> = match self {
            NestingStructure::Flat => Vec::new(),
            NestingStructure::Nested(nests) => nests
                .iter()
                .map(|nest| (nest.name.as_str(), &nest.scale))
                .collect(),
            NestingStructure::CrossNested(nests) => nests
                .iter()
                .map(|nest| (nest.name.as_str(), &nest.scale))
                .collect(),
        };
        for (name, expression) in scales {
            let scale = resolve_scale(name, expression, parameters)?;
            if scale < 1.0 {
                if options.strict_nest_bounds {
                    return Err(ShareError::InvalidNestParameter {
                        nest: name.to_string(),
                        value: scale,
                    });
                }
                warn!("nest `{name}` has scale {scale} < 1; the model is not consistent with utility maximisation");
            }
        }
        Ok(())
    }
}

fn resolve_scale(name: &str, scale: &Expression, parameters: &ParameterValues) -> Result<f64> {
    let value = scale.evaluate_parameters(parameters)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ShareError::InvalidNestParameter {
            nest: name.to_string(),
            value,
        });
    }
    Ok(value)
}

fn allocation_weight(alpha: f64, scale: f64, options: &ProbabilityOptions) -> f64 {
    match options.allocation_form {
        AllocationForm::Linear => alpha,
        AllocationForm::Powered => alpha.powf(scale),
    }
}

/// Nest with numeric scale and member weights.
#[derive(Clone, Debug)]
pub struct ResolvedNest {
    pub name: String,
    pub scale: f64,
    /// `(position in the choice set, allocation weight)` of every member with a positive allocation.
    pub members: Vec<(usize, f64)>,
}

/// Nesting structure evaluated at one parameter vector.
#[derive(Clone, Debug)]
pub enum ResolvedNesting {
    Flat,
    Nests(Vec<ResolvedNest>),
}
