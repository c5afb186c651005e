//! Symbolic utility expressions over parameters and observation covariates.
//!
//! Utilities, availability conditions, nest scales and stratum filters are all
//! described with the same [`Expression`] tree and evaluated by a single
//! recursive evaluator. The `std::ops` implementations only build trees; they
//! never evaluate anything.

use std::collections::BTreeSet;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareError};
use crate::parameters::ParameterValues;

/// Below this magnitude the Box-Cox transform is evaluated as its `ln` limit.
const BOX_COX_LAMBDA_EPS: f64 = 1e-5;

/// Source of covariate values for one observation.
pub trait Covariates {
    /// Returns the value of the named covariate, or `None` if it does not exist.
    fn covariate(&self, name: &str) -> Option<f64>;
}

/// Empty covariate source, used for expressions that may only reference parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCovariates;

impl Covariates for NoCovariates {
    fn covariate(&self, _name: &str) -> Option<f64> {
        None
    }
}

/// Operators taking a single operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Exp,
    Ln,
    /// Logical negation: 1 when the operand is zero, 0 otherwise.
    Not,
}

impl UnaryOp {
    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Ln => x.ln(),
            UnaryOp::Not => indicator(x == 0.0),
        }
    }
}

/// Operators taking two operands. Comparisons and logical operators yield 1 or 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Eq => indicator(a == b),
            BinaryOp::Ne => indicator(a != b),
            BinaryOp::Lt => indicator(a < b),
            BinaryOp::Le => indicator(a <= b),
            BinaryOp::Gt => indicator(a > b),
            BinaryOp::Ge => indicator(a >= b),
            BinaryOp::And => indicator(a != 0.0 && b != 0.0),
            BinaryOp::Or => indicator(a != 0.0 || b != 0.0),
        }
    }
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Box-Cox transform `(x^λ - 1) / λ`, with the `ln x` limit near `λ = 0` and 0 at `x = 0`.
pub fn box_cox(x: f64, lambda: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else if lambda.abs() < BOX_COX_LAMBDA_EPS {
        x.ln()
    } else {
        (x.powf(lambda) - 1.0) / lambda
    }
}

/// Arithmetic expression tree over named parameters and covariates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Literal(f64),
    /// Reference to an observation covariate (dataset column).
    Variable(String),
    /// Reference to a model parameter.
    Parameter(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    BoxCox {
        operand: Box<Expression>,
        lambda: Box<Expression>,
    },
}

impl Expression {
    pub fn lit(value: f64) -> Self {
        Expression::Literal(value)
    }

    pub fn var<S: Into<String>>(name: S) -> Self {
        Expression::Variable(name.into())
    }

    pub fn param<S: Into<String>>(name: S) -> Self {
        Expression::Parameter(name.into())
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn exp(self) -> Self {
        Self::unary(UnaryOp::Exp, self)
    }

    pub fn ln(self) -> Self {
        Self::unary(UnaryOp::Ln, self)
    }

    pub fn not(self) -> Self {
        Self::unary(UnaryOp::Not, self)
    }

    pub fn pow<E: Into<Expression>>(self, exponent: E) -> Self {
        Self::binary(BinaryOp::Pow, self, exponent.into())
    }

    pub fn min<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Min, self, other.into())
    }

    pub fn max<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Max, self, other.into())
    }

    pub fn equals<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Eq, self, other.into())
    }

    pub fn not_equals<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Ne, self, other.into())
    }

    pub fn less_than<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Lt, self, other.into())
    }

    pub fn at_most<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Le, self, other.into())
    }

    pub fn greater_than<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Gt, self, other.into())
    }

    pub fn at_least<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Ge, self, other.into())
    }

    pub fn and<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::And, self, other.into())
    }

    pub fn or<E: Into<Expression>>(self, other: E) -> Self {
        Self::binary(BinaryOp::Or, self, other.into())
    }

    /// Box-Cox transform of `self` with a (usually parameter-valued) `lambda`.
    pub fn box_cox<E: Into<Expression>>(self, lambda: E) -> Self {
        Expression::BoxCox {
            operand: Box::new(self),
            lambda: Box::new(lambda.into()),
        }
    }

    /// Evaluates the expression for one observation.
    pub fn evaluate(&self, parameters: &ParameterValues, row: &dyn Covariates) -> Result<f64> {
        match self {
            Expression::Literal(value) => Ok(*value),
            Expression::Variable(name) => row
                .covariate(name)
                .ok_or_else(|| ShareError::UnknownVariable { name: name.clone() }),
            Expression::Parameter(name) => parameters
                .get(name)
                .ok_or_else(|| ShareError::UnknownParameter { name: name.clone() }),
            Expression::Unary { op, operand } => {
                Ok(op.apply(operand.evaluate(parameters, row)?))
            }
            Expression::Binary { op, lhs, rhs } => {
                let a = lhs.evaluate(parameters, row)?;
                let b = rhs.evaluate(parameters, row)?;
                Ok(op.apply(a, b))
            }
            Expression::BoxCox { operand, lambda } => {
                let x = operand.evaluate(parameters, row)?;
                let l = lambda.evaluate(parameters, row)?;
                Ok(box_cox(x, l))
            }
        }
    }

    /// Evaluates an expression that may only reference parameters.
    pub fn evaluate_parameters(&self, parameters: &ParameterValues) -> Result<f64> {
        self.evaluate(parameters, &NoCovariates)
    }

    /// Names of all parameters referenced by the expression.
    pub fn parameters(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.visit(&mut |node| {
            if let Expression::Parameter(name) = node {
                names.insert(name.as_str());
            }
        });
        names
    }

    /// Names of all covariates referenced by the expression.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.visit(&mut |node| {
            if let Expression::Variable(name) = node {
                names.insert(name.as_str());
            }
        });
        names
    }

    fn visit<'a, F: FnMut(&'a Expression)>(&'a self, f: &mut F) {
        f(self);
        match self {
            Expression::Literal(_) | Expression::Variable(_) | Expression::Parameter(_) => {}
            Expression::Unary { operand, .. } => operand.visit(f),
            Expression::Binary { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expression::BoxCox { operand, lambda } => {
                operand.visit(f);
                lambda.visit(f);
            }
        }
    }
}

/// Builds a parameter that shifts with the level of a discrete covariate.
///
/// `levels` maps covariate values to labels, and several values may share a
/// label. The label of the first entry is the reference and uses `base`
/// alone. Every value carrying another label adds the parameter
/// `{base}_{label}` when `variable == value`.
pub fn segmented_parameter(base: &str, variable: &str, levels: &[(f64, &str)]) -> Expression {
    let Some((_, reference)) = levels.first() else {
        return Expression::param(base);
    };
    levels
        .iter()
        .filter(|(_, label)| label != reference)
        .fold(Expression::param(base), |acc, (value, label)| {
            acc + Expression::param(format!("{base}_{label}"))
                * Expression::var(variable).equals(*value)
        })
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Literal(value)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<E: Into<Expression>> $trait<E> for Expression {
            type Output = Expression;

            fn $method(self, rhs: E) -> Expression {
                Expression::binary($op, self, rhs.into())
            }
        }

        impl $trait<Expression> for f64 {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::binary($op, Expression::Literal(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        Expression::unary(UnaryOp::Neg, self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use approx::assert_relative_eq;

    use super::*;

    struct MapRow(HashMap<&'static str, f64>);

    impl Covariates for MapRow {
        fn covariate(&self, name: &str) -> Option<f64> {
            self.0.get(name).copied()
        }
    }

    fn values(pairs: &[(&str, f64)]) -> ParameterValues {
        ParameterValues::from_pairs(pairs.iter().map(|(n, v)| (n.to_string(), *v)))
    }

    #[test]
    fn evaluates_linear_utility() {
        let utility = Expression::param("asc") + Expression::param("b_time") * Expression::var("time");
        let row = MapRow(HashMap::from([("time", 12.0)]));
        let params = values(&[("asc", 0.5), ("b_time", -0.1)]);
        assert_relative_eq!(utility.evaluate(&params, &row).unwrap(), -0.7, epsilon = 1e-12);
    }

    #[test]
    fn one_minus_parameter_builds_complement() {
        let complement = 1.0 - Expression::param("alpha");
        let params = values(&[("alpha", 0.3)]);
        assert_relative_eq!(complement.evaluate_parameters(&params).unwrap(), 0.7);
    }

    #[test]
    fn comparisons_yield_indicators() {
        let row = MapRow(HashMap::from([("female", 1.0), ("age", 50.0)]));
        let params = values(&[]);
        let filter = Expression::var("female")
            .equals(1.0)
            .and(Expression::var("age").greater_than(44.0));
        assert_eq!(filter.evaluate(&params, &row).unwrap(), 1.0);
        assert_eq!(filter.not().evaluate(&params, &row).unwrap(), 0.0);
    }

    #[test]
    fn missing_names_are_reported() {
        let params = values(&[]);
        let err = Expression::param("beta").evaluate_parameters(&params).unwrap_err();
        assert!(matches!(err, ShareError::UnknownParameter { name } if name == "beta"));
        let err = Expression::var("time").evaluate_parameters(&params).unwrap_err();
        assert!(matches!(err, ShareError::UnknownVariable { name } if name == "time"));
    }

    #[test]
    fn box_cox_matches_limits() {
        assert_relative_eq!(box_cox(4.0, 0.5), 2.0, epsilon = 1e-12);
        assert_relative_eq!(box_cox(4.0, 0.0), 4.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(box_cox(0.0, 0.5), 0.0);
        assert_relative_eq!(box_cox(4.0, 1.0), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn segmented_parameter_shifts_non_reference_levels() {
        let constant = segmented_parameter("asc_car", "female", &[(0.0, "male"), (1.0, "female")]);
        let params = values(&[("asc_car", 1.0), ("asc_car_female", -0.4)]);
        let male = MapRow(HashMap::from([("female", 0.0)]));
        let female = MapRow(HashMap::from([("female", 1.0)]));
        assert_relative_eq!(constant.evaluate(&params, &male).unwrap(), 1.0);
        assert_relative_eq!(constant.evaluate(&params, &female).unwrap(), 0.6);
        assert_eq!(
            constant.parameters().into_iter().collect::<Vec<_>>(),
            vec!["asc_car", "asc_car_female"]
        );
        assert_eq!(constant.variables().into_iter().collect::<Vec<_>>(), vec!["female"]);
    }

    #[test]
    fn segmented_parameter_groups_values_by_label() {
        let levels = [
            (1.0, "work"),
            (2.0, "work"),
            (3.0, "other"),
            (4.0, "work"),
            (5.0, "other"),
        ];
        let b_time = segmented_parameter("b_time", "purpose", &levels);
        assert_eq!(
            b_time.parameters().into_iter().collect::<Vec<_>>(),
            vec!["b_time", "b_time_other"]
        );
        let params = values(&[("b_time", -1.0), ("b_time_other", 0.5)]);
        for (purpose, expected) in [(1.0, -1.0), (2.0, -1.0), (3.0, -0.5), (4.0, -1.0), (5.0, -0.5)] {
            let row = MapRow(HashMap::from([("purpose", purpose)]));
            assert_relative_eq!(b_time.evaluate(&params, &row).unwrap(), expected);
        }
    }
}
