//! Eval command

use crate::output::OutputFormat;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use formflow_core::{format_scalar, Formula, Scope, NOW_VARIABLE};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Evaluation<'a> {
    formula: &'a str,
    variables: Vec<&'a str>,
    value: f64,
}

/// `name=value` argument parser for `--var`
pub fn parse_var(arg: &str) -> Result<(String, f64), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {arg:?}"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|_| format!("{:?} is not a number", value.trim()))?;
    Ok((name.trim().to_string(), value))
}

pub fn handle(
    source: &str,
    vars: Vec<(String, f64)>,
    now: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<()> {
    let formula = Formula::parse(source)?;
    let now = now.unwrap_or_else(Utc::now);

    let mut scope = Scope::with_now(now.timestamp_millis() as f64);
    for (name, value) in vars {
        if name == NOW_VARIABLE {
            tracing::debug!("--var now overrides the clock");
        }
        scope.insert(name, value);
    }

    let value = formula
        .evaluate(&scope)
        .with_context(|| format!("evaluating with {} binding(s)", scope.len()))?;

    let evaluation = Evaluation {
        formula: formula.source(),
        variables: formula.variables(),
        value,
    };
    format.print(&evaluation, || format_scalar(value))
}
