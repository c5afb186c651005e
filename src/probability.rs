//! Choice probabilities of flat, nested and cross-nested logit models.
//!
//! All three structures share one evaluation path. A flat logit normalises
//! `exp(V)` over the available alternatives. Nested and cross-nested logits
//! are handled as a set of nests with member weights `w_{i,n}` (1 for nested
//! logit, the allocation `α` or `α^μ` for cross-nested logit):
//!
//! ```text
//! S_n    = Σ_{i∈n} w_{i,n} exp(μ_n V_i)
//! P(n)   = S_n^{1/μ_n} / Σ_m S_m^{1/μ_m}
//! P(i|n) = w_{i,n} exp(μ_n V_i) / S_n
//! P(i)   = Σ_n P(n) P(i|n)
//! ```
//!
//! Every normalisation is evaluated in the log domain with the maximum
//! subtracted before exponentiating.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{Result, ShareError};
use crate::expression::Covariates;
use crate::nesting::{NestingStructure, ResolvedNesting};
use crate::options::ProbabilityOptions;
use crate::parameters::{FittedParameters, ParameterValues};
use crate::specification::UtilitySpecification;

/// Utility specification together with its nesting structure.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "ChoiceModelRecord", into = "ChoiceModelRecord")]
pub struct ChoiceModel {
    specification: UtilitySpecification,
    nesting: NestingStructure,
}

impl ChoiceModel {
    /// Builds a model after checking the nesting structure against the choice set.
    pub fn new(specification: UtilitySpecification, nesting: NestingStructure) -> Result<Self> {
        nesting.validate(&specification)?;
        Ok(Self {
            specification,
            nesting,
        })
    }

    /// Multinomial logit over `specification`.
    pub fn flat(specification: UtilitySpecification) -> Self {
        Self {
            specification,
            nesting: NestingStructure::Flat,
        }
    }

    pub fn specification(&self) -> &UtilitySpecification {
        &self.specification
    }

    pub fn nesting(&self) -> &NestingStructure {
        &self.nesting
    }

    /// Names of every parameter the model references.
    pub fn parameters(&self) -> BTreeSet<&str> {
        let mut names = self.specification.parameters();
        names.extend(self.nesting.parameters());
        names
    }

    /// Resolves the nesting structure for one parameter vector.
    pub fn evaluator(
        &self,
        parameters: ParameterValues,
        options: &ProbabilityOptions,
    ) -> Result<ProbabilityEvaluator<'_>> {
        let nesting = self
            .nesting
            .resolve(&self.specification, &parameters, options)?;
        Ok(ProbabilityEvaluator {
            specification: &self.specification,
            nesting,
            parameters,
        })
    }

    /// Probabilities of every alternative for a single observation.
    pub fn probabilities(
        &self,
        parameters: &ParameterValues,
        row: &dyn Covariates,
        options: &ProbabilityOptions,
    ) -> Result<DVector<f64>> {
        self.evaluator(parameters.clone(), options)?.probabilities(row)
    }

    /// Probabilities for every observation (rows) and alternative (columns).
    pub fn probability_matrix(
        &self,
        parameters: &ParameterValues,
        dataset: &Dataset,
        options: &ProbabilityOptions,
    ) -> Result<DMatrix<f64>> {
        self.evaluator(parameters.clone(), options)?
            .probability_matrix(dataset)
    }

    /// Checks that every parameter and covariate referenced by the model can be resolved.
    pub fn check_inputs(&self, parameters: &FittedParameters, dataset: &Dataset) -> Result<()> {
        if let Some(name) = self
            .parameters()
            .into_iter()
            .find(|name| parameters.index_of(name).is_none())
        {
            return Err(ShareError::UnknownParameter {
                name: name.to_string(),
            });
        }
        if let Some(name) = self
            .specification
            .variables()
            .into_iter()
            .find(|name| !dataset.has_column(name))
        {
            return Err(ShareError::UnknownVariable {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Checks that every observed choice belongs to the choice set and was available.
    pub fn validate_observations(&self, parameters: &ParameterValues, dataset: &Dataset) -> Result<()> {
        for observation in dataset.observations() {
            let chosen = observation.chosen();
            let slot = self
                .specification
                .require_position(chosen, "observed choice")?;
            let available = self.specification.availability(parameters, &observation)?;
            if !available[slot] {
                return Err(ShareError::UnavailableChoice {
                    observation: observation.index(),
                    alternative: chosen,
                });
            }
        }
        Ok(())
    }

    /// Weighted log likelihood `Σ_o w_o ln P(chosen_o | o)`.
    ///
    /// Uses the dataset's raw sample weights when `weights` is `None`.
    pub fn log_likelihood(
        &self,
        parameters: &ParameterValues,
        dataset: &Dataset,
        weights: Option<&DVector<f64>>,
        options: &ProbabilityOptions,
    ) -> Result<f64> {
        let weights = weights.unwrap_or_else(|| dataset.sample_weights());
        if weights.len() != dataset.observation_count() {
            return Err(ShareError::dimension_mismatch(
                "log-likelihood weights",
                dataset.observation_count(),
                weights.len(),
            ));
        }
        let evaluator = self.evaluator(parameters.clone(), options)?;
        let mut total = 0.0;
        for observation in dataset.observations() {
            let slot = self
                .specification
                .require_position(observation.chosen(), "observed choice")?;
            let probabilities = evaluator.probabilities(&observation)?;
            total += weights[observation.index()] * probabilities[slot].ln();
        }
        if !total.is_finite() {
            return Err(ShareError::numerical("log-likelihood"));
        }
        Ok(total)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChoiceModelRecord {
    specification: UtilitySpecification,
    #[serde(default)]
    nesting: NestingStructure,
}

impl TryFrom<ChoiceModelRecord> for ChoiceModel {
    type Error = ShareError;

    fn try_from(record: ChoiceModelRecord) -> Result<Self> {
        ChoiceModel::new(record.specification, record.nesting)
    }
}

impl From<ChoiceModel> for ChoiceModelRecord {
    fn from(model: ChoiceModel) -> Self {
        Self {
            specification: model.specification,
            nesting: model.nesting,
        }
    }
}

/// Choice model bound to one parameter vector with its nests already resolved.
#[derive(Clone, Debug)]
pub struct ProbabilityEvaluator<'a> {
    specification: &'a UtilitySpecification,
    nesting: ResolvedNesting,
    parameters: ParameterValues,
}

impl ProbabilityEvaluator<'_> {
    /// Probabilities of every alternative for one observation, in choice-set order.
    /// Unavailable alternatives get probability zero.
    pub fn probabilities(&self, row: &dyn Covariates) -> Result<DVector<f64>> {
        let utilities = self.specification.utilities(&self.parameters, row)?;
        let available = self.specification.availability(&self.parameters, row)?;
        if !available.iter().any(|&flag| flag) {
            return Err(ShareError::NoAvailableAlternative);
        }
        for (utility, &flag) in utilities.iter().zip(&available) {
            if flag && !utility.is_finite() {
                return Err(ShareError::numerical("utility evaluation"));
            }
        }

        match &self.nesting {
            ResolvedNesting::Flat => Ok(flat_logit(&utilities, &available)),
            ResolvedNesting::Nests(nests) => {
                let groups: Vec<(f64, &[(usize, f64)])> = nests
                    .iter()
                    .map(|nest| (nest.scale, nest.members.as_slice()))
                    .collect();
                nested_logit(&utilities, &available, &groups)
            }
        }
    }

    /// Probabilities for every observation (rows) and alternative (columns).
    pub fn probability_matrix(&self, dataset: &Dataset) -> Result<DMatrix<f64>> {
        let mut matrix = DMatrix::zeros(dataset.observation_count(), self.specification.len());
        for observation in dataset.observations() {
            let probabilities = self.probabilities(&observation)?;
            matrix
                .row_mut(observation.index())
                .copy_from(&probabilities.transpose());
        }
        Ok(matrix)
    }
}

fn flat_logit(utilities: &[f64], available: &[bool]) -> DVector<f64> {
    let max = utilities
        .iter()
        .zip(available)
        .filter(|(_, flag)| **flag)
        .map(|(v, _)| *v)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut probabilities = DVector::zeros(utilities.len());
    let mut denominator = 0.0;
    for (slot, (&v, &flag)) in utilities.iter().zip(available).enumerate() {
        if flag {
            let e = (v - max).exp();
            probabilities[slot] = e;
            denominator += e;
        }
    }
    probabilities / denominator
}

/// `groups` holds `(μ_n, [(alternative slot, w_{i,n})])` for every nest.
fn nested_logit(
    utilities: &[f64],
    available: &[bool],
    groups: &[(f64, &[(usize, f64)])],
) -> Result<DVector<f64>> {
    // Per nest: log of each available member's term and the log inclusive value I_n = ln(S_n)/μ_n.
    let mut member_logs: Vec<Vec<(usize, f64)>> = Vec::with_capacity(groups.len());
    let mut inclusive: Vec<f64> = Vec::with_capacity(groups.len());
    for &(scale, members) in groups {
        let logs: Vec<(usize, f64)> = members
            .iter()
            .filter(|(slot, weight)| available[*slot] && *weight > 0.0)
            .map(|&(slot, weight)| (slot, weight.ln() + scale * utilities[slot]))
            .collect();
        let log_sum = log_sum_exp(logs.iter().map(|(_, a)| *a));
        inclusive.push(log_sum / scale);
        member_logs.push(logs);
    }

    let log_total = log_sum_exp(inclusive.iter().copied());
    if !log_total.is_finite() {
        return Err(ShareError::numerical("nest normalisation"));
    }

    let mut probabilities = DVector::zeros(utilities.len());
    for ((&(scale, _), logs), &log_inclusive) in groups.iter().zip(&member_logs).zip(&inclusive) {
        if logs.is_empty() {
            continue;
        }
        let nest_probability = (log_inclusive - log_total).exp();
        let log_sum = log_inclusive * scale;
        for &(slot, a) in logs {
            probabilities[slot] += nest_probability * (a - log_sum).exp();
        }
    }
    Ok(probabilities)
}

/// `ln Σ exp(x)`, `-inf` for an empty sequence.
fn log_sum_exp<I: Iterator<Item = f64> + Clone>(values: I) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.map(|x| (x - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use approx::assert_relative_eq;

    use super::*;
    use crate::expression::{Expression, NoCovariates};
    use crate::nesting::{CrossNest, Nest};
    use crate::options::AllocationForm;

    struct MapRow(HashMap<&'static str, f64>);

    impl Covariates for MapRow {
        fn covariate(&self, name: &str) -> Option<f64> {
            self.0.get(name).copied()
        }
    }

    fn values(pairs: &[(&str, f64)]) -> ParameterValues {
        ParameterValues::from_pairs(pairs.iter().map(|(n, v)| (n.to_string(), *v)))
    }

    /// Alternatives whose utilities are the parameters `v1`, `v2`, ...
    fn parametric(n: i64) -> UtilitySpecification {
        (1..=n)
            .fold(UtilitySpecification::builder(), |builder, id| {
                builder.alternative(id, format!("alt{id}"), Expression::param(format!("v{id}")))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn flat_logit_matches_closed_form() {
        let model = ChoiceModel::flat(parametric(2));
        let params = values(&[("v1", 0.0), ("v2", 2.0_f64.ln())]);
        let p = model
            .probabilities(&params, &NoCovariates, &ProbabilityOptions::default())
            .unwrap();
        assert_relative_eq!(p[0], 1.0 / 3.0, epsilon = 1e-15);
        assert_relative_eq!(p[1], 2.0 / 3.0, epsilon = 1e-15);
    }

    #[test]
    fn flat_logit_sums_to_one_and_survives_large_utilities() {
        let model = ChoiceModel::flat(parametric(4));
        for utilities in [
            [0.3, -1.2, 4.0, 0.0],
            [800.0, 799.0, -800.0, 10.0],
            [-1000.0, -1001.0, -999.5, -1000.0],
        ] {
            let params = values(&[
                ("v1", utilities[0]),
                ("v2", utilities[1]),
                ("v3", utilities[2]),
                ("v4", utilities[3]),
            ]);
            let p = model
                .probabilities(&params, &NoCovariates, &ProbabilityOptions::default())
                .unwrap();
            assert!(p.iter().all(|x| x.is_finite() && *x >= 0.0));
            assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn unavailable_alternatives_get_zero_probability() {
        let spec = UtilitySpecification::builder()
            .alternative(1, "walk", Expression::lit(0.0))
            .alternative(2, "car", Expression::lit(5.0))
            .alternative(3, "pt", Expression::lit(0.0))
            .availability(2, Expression::var("car_ownership").greater_than(0.0))
            .build()
            .unwrap();
        let model = ChoiceModel::flat(spec);
        let row = MapRow(HashMap::from([("car_ownership", 0.0)]));
        let p = model
            .probabilities(&values(&[]), &row, &ProbabilityOptions::default())
            .unwrap();
        assert_eq!(p[1], 0.0);
        assert_relative_eq!(p[0], 0.5, epsilon = 1e-15);
        assert_relative_eq!(p[2], 0.5, epsilon = 1e-15);
    }

    #[test]
    fn no_available_alternative_is_an_error() {
        let spec = UtilitySpecification::builder()
            .alternative(1, "walk", Expression::lit(0.0))
            .availability(1, Expression::lit(0.0))
            .build()
            .unwrap();
        let result = ChoiceModel::flat(spec).probabilities(
            &values(&[]),
            &NoCovariates,
            &ProbabilityOptions::default(),
        );
        assert!(matches!(result, Err(ShareError::NoAvailableAlternative)));
    }

    #[test]
    fn nested_logit_matches_hand_computation() {
        let nesting = NestingStructure::Nested(vec![Nest::new("slow", Expression::lit(2.0), vec![1, 2])]);
        let model = ChoiceModel::new(parametric(3), nesting).unwrap();
        let params = values(&[("v1", 0.0), ("v2", 0.0), ("v3", 0.0)]);
        let p = model
            .probabilities(&params, &NoCovariates, &ProbabilityOptions::default())
            .unwrap();
        let root2 = 2.0_f64.sqrt();
        assert_relative_eq!(p[0], root2 / (2.0 * (1.0 + root2)), epsilon = 1e-14);
        assert_relative_eq!(p[1], root2 / (2.0 * (1.0 + root2)), epsilon = 1e-14);
        assert_relative_eq!(p[2], 1.0 / (1.0 + root2), epsilon = 1e-14);
    }

    #[test]
    fn nested_logit_with_unit_scales_equals_flat_logit() {
        let nesting = NestingStructure::Nested(vec![
            Nest::new("slow", Expression::param("mu_slow"), vec![1, 2]),
            Nest::new("motorized", Expression::param("mu_motorized"), vec![3, 4]),
        ]);
        let nested = ChoiceModel::new(parametric(4), nesting).unwrap();
        let flat = ChoiceModel::flat(parametric(4));
        for utilities in [[0.1, -0.4, 1.3, 2.2], [-5.0, 3.0, 0.0, 40.0], [0.0; 4]] {
            let params = values(&[
                ("v1", utilities[0]),
                ("v2", utilities[1]),
                ("v3", utilities[2]),
                ("v4", utilities[3]),
                ("mu_slow", 1.0),
                ("mu_motorized", 1.0),
            ]);
            let options = ProbabilityOptions::default();
            let p_nested = nested.probabilities(&params, &NoCovariates, &options).unwrap();
            let p_flat = flat.probabilities(&params, &NoCovariates, &options).unwrap();
            assert_relative_eq!(p_nested, p_flat, epsilon = 1e-12);
        }
    }

    fn cross_nested_model() -> ChoiceModel {
        let nesting = NestingStructure::CrossNested(vec![
            CrossNest::new(
                "a",
                Expression::param("mu_a"),
                vec![(1, Expression::lit(1.0)), (3, Expression::lit(0.0))],
            ),
            CrossNest::new(
                "b",
                Expression::param("mu_b"),
                vec![(2, Expression::lit(1.0)), (3, Expression::lit(1.0))],
            ),
        ]);
        ChoiceModel::new(parametric(3), nesting).unwrap()
    }

    #[test]
    fn non_allocated_alternative_ignores_nest_scale() {
        let model = cross_nested_model();
        let options = ProbabilityOptions::default();
        let base = [("v1", 0.4), ("v2", -0.3), ("v3", 1.1), ("mu_b", 2.5)];
        let mut low = base.to_vec();
        low.push(("mu_a", 1.5));
        let mut high = base.to_vec();
        high.push(("mu_a", 6.0));

        let p_low = model.probabilities(&values(&low), &NoCovariates, &options).unwrap();
        let p_high = model.probabilities(&values(&high), &NoCovariates, &options).unwrap();
        assert_relative_eq!(p_low[2], p_high[2], epsilon = 1e-12);
        assert_relative_eq!(p_low.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_allocation_only_acts_through_other_nests() {
        let nesting = |with_zero: bool| {
            let mut a = vec![(1, Expression::lit(1.0)), (2, Expression::lit(1.0))];
            if with_zero {
                a.push((4, Expression::lit(0.0)));
            }
            NestingStructure::CrossNested(vec![
                CrossNest::new("a", Expression::param("mu_a"), a),
                CrossNest::new(
                    "b",
                    Expression::param("mu_b"),
                    vec![(3, Expression::lit(1.0)), (4, Expression::lit(1.0))],
                ),
            ])
        };
        let listed = ChoiceModel::new(parametric(4), nesting(true)).unwrap();
        let omitted = ChoiceModel::new(parametric(4), nesting(false)).unwrap();
        let options = ProbabilityOptions::default();

        let (v3, v4, mu_b) = (0.2, 0.9, 2.5);
        for mu_a in [1.5, 6.0] {
            let params = values(&[
                ("v1", 0.4),
                ("v2", -0.8),
                ("v3", v3),
                ("v4", v4),
                ("mu_a", mu_a),
                ("mu_b", mu_b),
            ]);
            let p = listed.probabilities(&params, &NoCovariates, &options).unwrap();
            let q = omitted.probabilities(&params, &NoCovariates, &options).unwrap();
            assert_relative_eq!(p, q, epsilon = 1e-12);
            assert_relative_eq!(p[3] / p[2], (mu_b * (v4 - v3)).exp(), epsilon = 1e-10);
            assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cross_nested_probabilities_sum_to_one() {
        let nesting = NestingStructure::CrossNested(vec![
            CrossNest::new(
                "motorized",
                Expression::param("mu_motorized"),
                vec![(3, Expression::lit(1.0)), (4, Expression::param("alpha"))],
            ),
            CrossNest::new(
                "private",
                Expression::param("mu_private"),
                vec![
                    (1, Expression::lit(1.0)),
                    (2, Expression::lit(1.0)),
                    (4, 1.0 - Expression::param("alpha")),
                ],
            ),
        ]);
        let model = ChoiceModel::new(parametric(4), nesting).unwrap();
        let params = values(&[
            ("v1", -0.5),
            ("v2", -1.0),
            ("v3", 0.2),
            ("v4", 0.8),
            ("mu_motorized", 3.0),
            ("mu_private", 1.7),
            ("alpha", 0.35),
        ]);
        for form in [AllocationForm::Linear, AllocationForm::Powered] {
            let options = ProbabilityOptions::default().with_allocation_form(form);
            let p = model.probabilities(&params, &NoCovariates, &options).unwrap();
            assert!(p.iter().all(|x| *x > 0.0));
            assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn validates_observed_choices() {
        let spec = UtilitySpecification::builder()
            .alternative(1, "walk", Expression::lit(0.0))
            .alternative(4, "car", Expression::lit(0.0))
            .availability(4, Expression::var("car_ownership").greater_than(0.0))
            .build()
            .unwrap();
        let model = ChoiceModel::flat(spec);
        let columns = vec!["car_ownership".to_string()];
        let covariates = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);

        let ok = Dataset::new(columns.clone(), covariates.clone(), vec![4, 1]).unwrap();
        assert!(model.validate_observations(&values(&[]), &ok).is_ok());

        let unavailable = Dataset::new(columns.clone(), covariates.clone(), vec![4, 4]).unwrap();
        assert!(matches!(
            model.validate_observations(&values(&[]), &unavailable),
            Err(ShareError::UnavailableChoice {
                observation: 1,
                alternative: 4
            })
        ));

        let unknown = Dataset::new(columns, covariates, vec![4, 2]).unwrap();
        assert!(matches!(
            model.validate_observations(&values(&[]), &unknown),
            Err(ShareError::UnknownAlternative { alternative: 2, .. })
        ));
    }

    #[test]
    fn log_likelihood_of_equal_utilities() {
        let model = ChoiceModel::flat(parametric(2));
        let data = Dataset::new(
            vec!["x".to_string()],
            DMatrix::from_row_slice(3, 1, &[0.0, 1.0, 2.0]),
            vec![1, 2, 2],
        )
        .unwrap();
        let params = values(&[("v1", 0.0), ("v2", 0.0)]);
        let ll = model
            .log_likelihood(&params, &data, None, &ProbabilityOptions::default())
            .unwrap();
        assert_relative_eq!(ll, 3.0 * 0.5_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn check_inputs_reports_missing_names() {
        let spec = UtilitySpecification::builder()
            .alternative(1, "walk", Expression::param("b_time") * Expression::var("dur_walking"))
            .build()
            .unwrap();
        let model = ChoiceModel::flat(spec);
        let data = Dataset::new(
            vec!["dur_walking".to_string()],
            DMatrix::from_row_slice(1, 1, &[10.0]),
            vec![1],
        )
        .unwrap();
        let wrong = FittedParameters::builder(vec!["b_cost".to_string()], DVector::from_vec(vec![0.0]))
            .build()
            .unwrap();
        assert!(matches!(
            model.check_inputs(&wrong, &data),
            Err(ShareError::UnknownParameter { name }) if name == "b_time"
        ));
        let right = FittedParameters::builder(vec!["b_time".to_string()], DVector::from_vec(vec![0.0]))
            .build()
            .unwrap();
        assert!(model.check_inputs(&right, &data).is_ok());
    }

    #[test]
    fn model_loads_from_json_and_validates_nests() {
        let json = r#"{
            "specification": { "alternatives": [
                { "id": 1, "name": "alt1", "utility": { "parameter": "v1" } },
                { "id": 2, "name": "alt2", "utility": { "parameter": "v2" } }
            ] },
            "nesting": { "nested": [ { "name": "both", "scale": { "literal": 1.0 }, "alternatives": [1, 2] } ] }
        }"#;
        let model: ChoiceModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.specification().len(), 2);
        let p = model
            .probabilities(&values(&[("v1", 0.0), ("v2", 2.0_f64.ln())]), &NoCovariates, &ProbabilityOptions::default())
            .unwrap();
        assert_relative_eq!(p[0], 1.0 / 3.0, epsilon = 1e-12);

        let flat: ChoiceModel = serde_json::from_str(
            r#"{ "specification": { "alternatives": [ { "id": 1, "name": "a", "utility": { "literal": 0.0 } } ] } }"#,
        )
        .unwrap();
        assert_eq!(flat.nesting(), &NestingStructure::Flat);

        let unknown = json.replace("[1, 2]", "[1, 9]");
        assert!(serde_json::from_str::<ChoiceModel>(&unknown).is_err());
    }
}
