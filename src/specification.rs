//! Choice sets and the utility specification attached to each alternative.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareError};
use crate::expression::{Covariates, Expression};
use crate::parameters::ParameterValues;

/// Identifier of an alternative, as coded in the survey choice column.
pub type AlternativeId = i64;

/// One discrete option of the choice set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alternative {
    pub id: AlternativeId,
    pub name: String,
}

/// Whether an alternative is feasible for an observation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityCondition {
    #[default]
    Always,
    /// Available when the expression evaluates to a nonzero value.
    When(Expression),
}

impl AvailabilityCondition {
    pub fn is_available(&self, parameters: &ParameterValues, row: &dyn Covariates) -> Result<bool> {
        match self {
            AvailabilityCondition::Always => Ok(true),
            AvailabilityCondition::When(condition) => {
                Ok(condition.evaluate(parameters, row)? != 0.0)
            }
        }
    }
}

/// Utility function and availability condition for every alternative of a choice set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "UtilitySpecificationRecord", into = "UtilitySpecificationRecord")]
pub struct UtilitySpecification {
    alternatives: Vec<Alternative>,
    utilities: Vec<Expression>,
    availability: Vec<AvailabilityCondition>,
    position: HashMap<AlternativeId, usize>,
}

impl UtilitySpecification {
    pub fn builder() -> UtilitySpecificationBuilder {
        UtilitySpecificationBuilder::default()
    }

    /// Alternatives in declaration order.
    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Number of alternatives in the choice set.
    pub fn len(&self) -> usize {
        self.alternatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// Position of an alternative in declaration order.
    pub fn position(&self, id: AlternativeId) -> Option<usize> {
        self.position.get(&id).copied()
    }

    /// Like [`position`](Self::position) but fails with `UnknownAlternative`.
    pub fn require_position(&self, id: AlternativeId, context: &'static str) -> Result<usize> {
        self.position(id)
            .ok_or_else(|| ShareError::unknown_alternative(id, context))
    }

    /// Utility expression of an alternative.
    pub fn utility(&self, id: AlternativeId) -> Option<&Expression> {
        self.position(id).map(|slot| &self.utilities[slot])
    }

    /// Evaluates every utility for one observation, in declaration order.
    pub fn utilities(&self, parameters: &ParameterValues, row: &dyn Covariates) -> Result<Vec<f64>> {
        self.utilities
            .iter()
            .map(|utility| utility.evaluate(parameters, row))
            .collect()
    }

    /// Evaluates every availability condition for one observation, in declaration order.
    pub fn availability(
        &self,
        parameters: &ParameterValues,
        row: &dyn Covariates,
    ) -> Result<Vec<bool>> {
        self.availability
            .iter()
            .map(|condition| condition.is_available(parameters, row))
            .collect()
    }

    /// Names of all parameters referenced by utilities and availability conditions.
    pub fn parameters(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self.utilities.iter().flat_map(|u| u.parameters()).collect();
        for condition in &self.availability {
            if let AvailabilityCondition::When(expr) = condition {
                names.extend(expr.parameters());
            }
        }
        names
    }

    /// Names of all covariates referenced by utilities and availability conditions.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self.utilities.iter().flat_map(|u| u.variables()).collect();
        for condition in &self.availability {
            if let AvailabilityCondition::When(expr) = condition {
                names.extend(expr.variables());
            }
        }
        names
    }
}

/// Collects alternatives and availability conditions, then validates them together.
#[derive(Debug, Default)]
pub struct UtilitySpecificationBuilder {
    entries: Vec<(Alternative, Expression)>,
    availability: Vec<(AlternativeId, AvailabilityCondition)>,
}

impl UtilitySpecificationBuilder {
    /// Declares an alternative with its utility function.
    pub fn alternative<S: Into<String>>(
        mut self,
        id: AlternativeId,
        name: S,
        utility: Expression,
    ) -> Self {
        self.entries.push((
            Alternative {
                id,
                name: name.into(),
            },
            utility,
        ));
        self
    }

    /// Restricts when an alternative is available. Omitted alternatives are always available.
    pub fn availability(mut self, id: AlternativeId, condition: Expression) -> Self {
        self.availability
            .push((id, AvailabilityCondition::When(condition)));
        self
    }

    pub fn build(self) -> Result<UtilitySpecification> {
        if self.entries.is_empty() {
            return Err(ShareError::EmptyChoiceSet);
        }

        let mut position = HashMap::with_capacity(self.entries.len());
        let mut alternatives = Vec::with_capacity(self.entries.len());
        let mut utilities = Vec::with_capacity(self.entries.len());
        for (slot, (alternative, utility)) in self.entries.into_iter().enumerate() {
            if position.insert(alternative.id, slot).is_some() {
                return Err(ShareError::DuplicateAlternative {
                    alternative: alternative.id,
                });
            }
            alternatives.push(alternative);
            utilities.push(utility);
        }

        let mut availability = vec![AvailabilityCondition::Always; alternatives.len()];
        for (id, condition) in self.availability {
            let slot = position
                .get(&id)
                .copied()
                .ok_or_else(|| ShareError::unknown_alternative(id, "availability conditions"))?;
            availability[slot] = condition;
        }

        Ok(UtilitySpecification {
            alternatives,
            utilities,
            availability,
            position,
        })
    }
}

/// Serialized form of [`UtilitySpecification`]; deserialization re-runs the builder checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct UtilitySpecificationRecord {
    alternatives: Vec<AlternativeRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AlternativeRecord {
    id: AlternativeId,
    name: String,
    utility: Expression,
    #[serde(default)]
    availability: AvailabilityCondition,
}

impl TryFrom<UtilitySpecificationRecord> for UtilitySpecification {
    type Error = ShareError;

    fn try_from(record: UtilitySpecificationRecord) -> Result<Self> {
        let mut builder = UtilitySpecification::builder();
        for entry in record.alternatives {
            builder = builder.alternative(entry.id, entry.name, entry.utility);
            builder.availability.push((entry.id, entry.availability));
        }
        builder.build()
    }
}

impl From<UtilitySpecification> for UtilitySpecificationRecord {
    fn from(spec: UtilitySpecification) -> Self {
        let alternatives = spec
            .alternatives
            .into_iter()
            .zip(spec.utilities)
            .zip(spec.availability)
            .map(|((alternative, utility), availability)| AlternativeRecord {
                id: alternative.id,
                name: alternative.name,
                utility,
                availability,
            })
            .collect();
        Self { alternatives }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::NoCovariates;

    fn mode_choice() -> UtilitySpecificationBuilder {
        UtilitySpecification::builder()
            .alternative(1, "Walking", Expression::param("b_time") * Expression::var("dur_walking"))
            .alternative(
                4,
                "Car",
                Expression::param("asc_car") + Expression::param("b_time") * Expression::var("dur_driving"),
            )
    }

    #[test]
    fn builder_assigns_default_availability() {
        let spec = mode_choice()
            .availability(4, Expression::var("car_ownership").greater_than(0.0))
            .build()
            .unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.position(4), Some(1));
        let params = ParameterValues::from_pairs(Vec::new());
        let walk_avail = spec.availability.first().unwrap();
        assert!(walk_avail.is_available(&params, &NoCovariates).unwrap());
        assert_eq!(
            spec.variables().into_iter().collect::<Vec<_>>(),
            vec!["car_ownership", "dur_driving", "dur_walking"]
        );
        assert_eq!(spec.parameters().into_iter().collect::<Vec<_>>(), vec!["asc_car", "b_time"]);
    }

    #[test]
    fn builder_rejects_unknown_and_duplicate_alternatives() {
        let unknown = mode_choice().availability(7, Expression::lit(1.0)).build();
        assert!(matches!(
            unknown,
            Err(ShareError::UnknownAlternative { alternative: 7, .. })
        ));

        let duplicate = mode_choice().alternative(1, "Walking again", Expression::lit(0.0)).build();
        assert!(matches!(
            duplicate,
            Err(ShareError::DuplicateAlternative { alternative: 1 })
        ));

        assert!(matches!(
            UtilitySpecification::builder().build(),
            Err(ShareError::EmptyChoiceSet)
        ));
    }

    #[test]
    fn loads_from_json_with_builder_checks() {
        let json = r#"{ "alternatives": [
            { "id": 1, "name": "Walking",
              "utility": { "binary": { "op": "mul", "lhs": { "parameter": "b_time" }, "rhs": { "variable": "dur_walking" } } } },
            { "id": 4, "name": "Car",
              "utility": { "parameter": "asc_car" },
              "availability": { "when": { "variable": "car_ownership" } } }
        ] }"#;
        let spec: UtilitySpecification = serde_json::from_str(json).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.availability[0], AvailabilityCondition::Always);
        assert_eq!(
            spec.availability[1],
            AvailabilityCondition::When(Expression::var("car_ownership"))
        );

        let round_trip: UtilitySpecification =
            serde_json::from_value(serde_json::to_value(&spec).unwrap()).unwrap();
        assert_eq!(round_trip.alternatives(), spec.alternatives());

        let duplicate = r#"{ "alternatives": [
            { "id": 1, "name": "A", "utility": { "literal": 0.0 } },
            { "id": 1, "name": "B", "utility": { "literal": 0.0 } }
        ] }"#;
        assert!(serde_json::from_str::<UtilitySpecification>(duplicate).is_err());
    }
}
