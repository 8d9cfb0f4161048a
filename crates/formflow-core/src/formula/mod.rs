//! Derived-value evaluator
//!
//! Formulas are small arithmetic expressions over numeric variables:
//! field ids plus the implicit clock `now` (epoch milliseconds).
//!
//! ```text
//! floor((now - dob) / 31557600000)
//! amount * rate
//! max(subtotal - discount, 0)
//! ```
//!
//! Operators: `+ - * / % ^`, unary `-`/`+`, parentheses.
//! A field whose id is not a plain name is referenced in brackets:
//! `[1697450000000] * 2`.
//! Functions: `floor ceil round trunc abs sqrt sign` (one argument),
//! `pow` (two), `min max` (one or more).
//!
//! Evaluation never panics; every failure is a [`FormulaError`] carrying the
//! offending formula text.

mod lexer;
mod parser;

pub use parser::{BinaryOp, Expr, UnaryOp};

use crate::domain::{FieldId, NOW_VARIABLE};
use std::collections::HashMap;
use thiserror::Error;

/// Formula evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("cannot parse `{formula}`: {message}")]
    Parse { formula: String, message: String },

    #[error("unknown identifier `{name}` in `{formula}`")]
    UnknownIdentifier { formula: String, name: String },

    #[error("unknown function `{name}` in `{formula}`")]
    UnknownFunction { formula: String, name: String },

    #[error("`{function}` expects {expected} argument(s), got {found} in `{formula}`")]
    Arity {
        formula: String,
        function: String,
        expected: &'static str,
        found: usize,
    },

    #[error("division by zero in `{formula}`")]
    DivisionByZero { formula: String },

    #[error("`{formula}` does not produce a finite number")]
    NonFinite { formula: String },

    #[error("`{formula}` depends on `{field}`, which has no value")]
    UpstreamFailed { formula: String, field: FieldId },
}

impl FormulaError {
    /// The formula text that failed
    pub fn formula(&self) -> &str {
        match self {
            Self::Parse { formula, .. }
            | Self::UnknownIdentifier { formula, .. }
            | Self::UnknownFunction { formula, .. }
            | Self::Arity { formula, .. }
            | Self::DivisionByZero { formula }
            | Self::NonFinite { formula }
            | Self::UpstreamFailed { formula, .. } => formula,
        }
    }
}

/// Name to number bindings visible to a formula
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    vars: HashMap<String, f64>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope holding only the clock
    pub fn with_now(now_ms: f64) -> Self {
        let mut scope = Self::new();
        scope.insert(NOW_VARIABLE, now_ms);
        scope
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.vars.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Scope {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut scope = Self::new();
        for (name, value) in iter {
            scope.insert(name, value);
        }
        scope
    }
}

/// A parsed formula, reusable across scopes
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let parse_error = |column: Option<usize>, message: String| FormulaError::Parse {
            formula: source.to_string(),
            message: match column {
                Some(col) => format!("{message} (column {col})"),
                None => message,
            },
        };

        let tokens = lexer::Lexer::new(source)
            .tokenize()
            .map_err(|e| parse_error(Some(e.column), e.message))?;
        let expr = parser::Parser::new(tokens)
            .parse()
            .map_err(|e| parse_error(e.column, e.message))?;

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Variable names the formula reads
    pub fn variables(&self) -> Vec<&str> {
        self.expr.variables()
    }

    pub fn evaluate(&self, scope: &Scope) -> Result<f64, FormulaError> {
        let value = self.eval(&self.expr, scope)?;
        if !value.is_finite() {
            return Err(FormulaError::NonFinite {
                formula: self.source.clone(),
            });
        }
        Ok(value)
    }

    fn eval(&self, expr: &Expr, scope: &Scope) -> Result<f64, FormulaError> {
        match expr {
            Expr::Number(n) => Ok(*n),
            Expr::Variable(name) => scope.get(name).ok_or_else(|| FormulaError::UnknownIdentifier {
                formula: self.source.clone(),
                name: name.clone(),
            }),
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, scope)?;
                Ok(match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Plus => value,
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                match op {
                    BinaryOp::Add => Ok(l + r),
                    BinaryOp::Sub => Ok(l - r),
                    BinaryOp::Mul => Ok(l * r),
                    BinaryOp::Div | BinaryOp::Rem if r == 0.0 => Err(FormulaError::DivisionByZero {
                        formula: self.source.clone(),
                    }),
                    BinaryOp::Div => Ok(l / r),
                    BinaryOp::Rem => Ok(l % r),
                    BinaryOp::Pow => Ok(l.powf(r)),
                }
            }
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, &values)
            }
        }
    }

    fn call(&self, name: &str, args: &[f64]) -> Result<f64, FormulaError> {
        let unary: Option<fn(f64) -> f64> = match name {
            "floor" => Some(f64::floor),
            "ceil" => Some(f64::ceil),
            "round" => Some(f64::round),
            "trunc" => Some(f64::trunc),
            "abs" => Some(f64::abs),
            "sqrt" => Some(f64::sqrt),
            "sign" => Some(sign),
            _ => None,
        };

        if let Some(f) = unary {
            return match args {
                [x] => Ok(f(*x)),
                _ => Err(self.arity(name, "1", args.len())),
            };
        }

        match name {
            "pow" => match args {
                [base, exp] => Ok(base.powf(*exp)),
                _ => Err(self.arity(name, "2", args.len())),
            },
            "min" | "max" => {
                let Some((&first, rest)) = args.split_first() else {
                    return Err(self.arity(name, "at least 1", 0));
                };
                Ok(rest.iter().fold(first, |acc, &x| {
                    if name == "min" {
                        acc.min(x)
                    } else {
                        acc.max(x)
                    }
                }))
            }
            _ => Err(FormulaError::UnknownFunction {
                formula: self.source.clone(),
                name: name.to_string(),
            }),
        }
    }

    fn arity(&self, function: &str, expected: &'static str, found: usize) -> FormulaError {
        FormulaError::Arity {
            formula: self.source.clone(),
            function: function.to_string(),
            expected,
            found,
        }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Parse and evaluate `formula` against `scope`
pub fn evaluate(formula: &str, scope: &Scope) -> Result<f64, FormulaError> {
    Formula::parse(formula)?.evaluate(scope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(vars: &[(&str, f64)]) -> Scope {
        vars.iter().map(|&(k, v)| (k, v)).collect()
    }

    #[test]
    fn test_tax_formula() {
        let s = scope(&[("amount", 100.0), ("rate", 0.2)]);
        assert_eq!(evaluate("amount * rate", &s).unwrap(), 20.0);
    }

    #[test]
    fn test_age_formula() {
        let year_ms = 31_557_600_000.0;
        let s = scope(&[("now", 30.5 * year_ms), ("dob", 0.0)]);
        assert_eq!(evaluate("floor((now - dob)/31557600000)", &s).unwrap(), 30.0);
    }

    #[test]
    fn test_operators_and_precedence() {
        let s = Scope::new();
        assert_eq!(evaluate("1 + 2 * 3", &s).unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3", &s).unwrap(), 9.0);
        assert_eq!(evaluate("-2 ^ 2", &s).unwrap(), -4.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2", &s).unwrap(), 512.0);
        assert_eq!(evaluate("7 % 3", &s).unwrap(), 1.0);
        assert_eq!(evaluate("--1", &s).unwrap(), 1.0);
    }

    #[test]
    fn test_functions() {
        let s = Scope::new();
        assert_eq!(evaluate("ceil(1.2)", &s).unwrap(), 2.0);
        assert_eq!(evaluate("round(2.5)", &s).unwrap(), 3.0);
        assert_eq!(evaluate("trunc(-1.7)", &s).unwrap(), -1.0);
        assert_eq!(evaluate("abs(-3)", &s).unwrap(), 3.0);
        assert_eq!(evaluate("sqrt(16)", &s).unwrap(), 4.0);
        assert_eq!(evaluate("sign(-8)", &s).unwrap(), -1.0);
        assert_eq!(evaluate("pow(2, 10)", &s).unwrap(), 1024.0);
        assert_eq!(evaluate("min(3, 1, 2)", &s).unwrap(), 1.0);
        assert_eq!(evaluate("max(3, 1, 2)", &s).unwrap(), 3.0);
    }

    #[test]
    fn test_unknown_identifier_carries_formula() {
        let err = evaluate("amount * rate", &scope(&[("amount", 1.0)])).unwrap_err();
        assert_eq!(
            err,
            FormulaError::UnknownIdentifier {
                formula: "amount * rate".into(),
                name: "rate".into()
            }
        );
        assert_eq!(err.formula(), "amount * rate");
    }

    #[test]
    fn test_division_by_zero() {
        let s = scope(&[("x", 0.0)]);
        assert!(matches!(
            evaluate("1 / x", &s),
            Err(FormulaError::DivisionByZero { .. })
        ));
        assert!(matches!(
            evaluate("1 % 0", &s),
            Err(FormulaError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_non_finite() {
        assert!(matches!(
            evaluate("sqrt(-1)", &Scope::new()),
            Err(FormulaError::NonFinite { .. })
        ));
        assert!(matches!(
            evaluate("10 ^ 400", &Scope::new()),
            Err(FormulaError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_call_errors() {
        assert!(matches!(
            evaluate("floor(1, 2)", &Scope::new()),
            Err(FormulaError::Arity { found: 2, .. })
        ));
        assert!(matches!(
            evaluate("max()", &Scope::new()),
            Err(FormulaError::Arity { found: 0, .. })
        ));
        assert!(matches!(
            evaluate("median(1)", &Scope::new()),
            Err(FormulaError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_parse_errors_are_typed() {
        for bad in ["", "1 +", "a $ b", "(1"] {
            let err = evaluate(bad, &Scope::new()).unwrap_err();
            assert!(matches!(err, FormulaError::Parse { .. }), "{bad}: {err}");
            assert_eq!(err.formula(), bad);
        }
    }

    #[test]
    fn test_runaway_nesting_is_a_parse_error() {
        let source = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = evaluate(&source, &Scope::new()).unwrap_err();
        assert!(matches!(err, FormulaError::Parse { .. }), "{err}");

        let negations = format!("{}1", "-".repeat(10_000));
        assert!(matches!(
            evaluate(&negations, &Scope::new()),
            Err(FormulaError::Parse { .. })
        ));
    }

    #[test]
    fn test_bracketed_field_reference() {
        let formula = Formula::parse("[1697450000000] * 2 + rate").unwrap();
        assert_eq!(formula.variables(), vec!["1697450000000", "rate"]);
        let scope = scope(&[("1697450000000", 5.0), ("rate", 1.0)]);
        assert_eq!(formula.evaluate(&scope).unwrap(), 11.0);
    }

    #[test]
    fn test_formula_reuse() {
        let formula = Formula::parse("a + 1").unwrap();
        assert_eq!(formula.variables(), vec!["a"]);
        assert_eq!(formula.evaluate(&scope(&[("a", 1.0)])).unwrap(), 2.0);
        assert_eq!(formula.evaluate(&scope(&[("a", 2.0)])).unwrap(), 3.0);
    }
}
