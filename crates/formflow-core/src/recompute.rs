//! Recomputation of derived field values
//!
//! One terminating pass per call: build the dependency graph, tag cycles,
//! evaluate the remaining derived fields in topological order. Pure with
//! respect to `(fields, now, config)`, hence idempotent.

use crate::config::EngineConfig;
use crate::domain::{
    format_scalar, parse_date_millis, DerivedFieldError, Field, FieldId, FieldSpec, NOW_VARIABLE,
};
use crate::formula::{Formula, FormulaError, Scope};
use crate::graph::DependencyGraph;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashSet;

/// Status tag produced for one derived field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub field_id: FieldId,
    pub error: DerivedFieldError,
}

/// Outcome of a recomputation pass
///
/// `fields` is borrowed from the input when no derived value or status
/// changed, so callers can detect a no-op without comparing field lists.
#[derive(Debug, Clone)]
pub struct Recomputed<'a> {
    fields: Cow<'a, [Field]>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Recomputed<'a> {
    pub fn changed(&self) -> bool {
        matches!(self.fields, Cow::Owned(_))
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Every derived field left with a status tag, in form order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields.into_owned()
    }
}

type Outcome = (Option<String>, Option<DerivedFieldError>);

/// Numeric view of an independent field inside a formula scope
pub fn scope_value(field: &Field) -> f64 {
    match field.spec() {
        FieldSpec::Checkbox { default_value } => {
            if *default_value {
                1.0
            } else {
                0.0
            }
        }
        FieldSpec::Number { default_value, .. } => default_value.unwrap_or(0.0),
        FieldSpec::Date { default_value, .. } => parse_date_millis(default_value).unwrap_or(0.0),
        FieldSpec::Text { .. }
        | FieldSpec::Textarea { .. }
        | FieldSpec::Radio { .. }
        | FieldSpec::Derived { .. } => 0.0,
    }
}

pub(crate) fn recompute_fields<'a>(
    fields: &'a [Field],
    now_ms: f64,
    config: &EngineConfig,
) -> Recomputed<'a> {
    let graph = DependencyGraph::build(fields);
    let n = fields.len();
    let error_text = || Some(config.formula_error_text.clone());

    let mut outcomes: Vec<Option<Outcome>> = vec![None; n];
    let mut values: Vec<Option<f64>> = vec![None; n];

    for component in graph.cyclic_components() {
        let cycle: Vec<FieldId> = component.iter().map(|&p| graph.id_at(p).clone()).collect();
        tracing::warn!(cycle = ?cycle, "dependency cycle between derived fields");
        for &p in &component {
            outcomes[p] = Some((
                error_text(),
                Some(DerivedFieldError::CyclicDependency {
                    cycle: cycle.clone(),
                }),
            ));
        }
    }

    // grows in topological order; each formula only sees `now`, independent
    // fields and its own declared parents
    let mut scope = Scope::with_now(now_ms);
    let mut independent: HashSet<&str> = HashSet::new();
    for field in fields.iter().filter(|f| !f.is_derived()) {
        // first occurrence wins, matching the graph
        if independent.insert(field.id().as_str()) {
            scope.insert(field.id().as_str(), scope_value(field));
        }
    }

    let (ordered, blocked) = graph.partial_order();
    for p in ordered {
        if !graph.is_derived_at(p) {
            continue;
        }
        let formula = fields[p].formula().unwrap_or_default();
        let outcome = match upstream_failure(&graph, &values, p) {
            Some(parent) => upstream_outcome(formula, graph.id_at(parent), error_text()),
            None if formula.trim().is_empty() => (None, None),
            None => {
                let dangling = graph.dangling_at(p);
                if !dangling.is_empty() {
                    tracing::warn!(
                        field = %graph.id_at(p),
                        missing = ?dangling,
                        "derived field references fields absent from the form"
                    );
                    for id in dangling {
                        if scope.get(id.as_str()).is_none() {
                            scope.insert(id.as_str(), 0.0);
                        }
                    }
                }

                let evaluated = Formula::parse(formula).and_then(|f| {
                    check_visible(&f, &independent, &graph, p)?;
                    f.evaluate(&scope)
                });
                match evaluated {
                    Ok(v) => {
                        values[p] = Some(v);
                        if scope.get(graph.id_at(p).as_str()).is_none() {
                            scope.insert(graph.id_at(p).as_str(), v);
                        }
                        let status = (!dangling.is_empty()).then(|| {
                            DerivedFieldError::MissingDependency {
                                missing: dangling.to_vec(),
                            }
                        });
                        (Some(format_scalar(v)), status)
                    }
                    Err(e) => {
                        tracing::debug!(field = %graph.id_at(p), error = %e, "formula failed");
                        (
                            error_text(),
                            Some(DerivedFieldError::FormulaEvaluationError {
                                reason: e.to_string(),
                            }),
                        )
                    }
                }
            }
        };
        outcomes[p] = Some(outcome);
    }

    // downstream of a cycle; cycle members already carry their tag
    for p in blocked {
        if outcomes[p].is_some() {
            continue;
        }
        let formula = fields[p].formula().unwrap_or_default();
        let parent = upstream_failure(&graph, &values, p).unwrap_or(p);
        outcomes[p] = Some(upstream_outcome(formula, graph.id_at(parent), error_text()));
    }

    let mut diagnostics = Vec::new();
    let mut updated: Option<Vec<Field>> = None;
    for (p, outcome) in outcomes.into_iter().enumerate() {
        let Some((value, status)) = outcome else {
            continue;
        };
        if let Some(error) = &status {
            diagnostics.push(Diagnostic {
                field_id: graph.id_at(p).clone(),
                error: error.clone(),
            });
        }
        if is_current(&fields[p], &value, &status) {
            continue;
        }
        let target = updated.get_or_insert_with(|| fields.to_vec());
        target[p].set_derived_result(value, status);
    }

    let changed = updated.is_some();
    tracing::debug!(
        fields = n,
        derived = graph.derived_count(),
        changed,
        "recomputed derived fields"
    );

    Recomputed {
        fields: updated.map_or(Cow::Borrowed(fields), Cow::Owned),
        diagnostics,
    }
}

/// Reject names the shared scope holds but this field never declared
fn check_visible(
    formula: &Formula,
    independent: &HashSet<&str>,
    graph: &DependencyGraph,
    p: usize,
) -> Result<(), FormulaError> {
    let declared = |name: &str| {
        graph
            .precedents_at(p)
            .iter()
            .any(|&parent| graph.id_at(parent).as_str() == name)
            || graph.dangling_at(p).iter().any(|id| id.as_str() == name)
    };
    match formula
        .variables()
        .into_iter()
        .find(|&name| name != NOW_VARIABLE && !independent.contains(name) && !declared(name))
    {
        Some(name) => Err(FormulaError::UnknownIdentifier {
            formula: formula.source().to_string(),
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}

/// First declared derived parent that has no value
fn upstream_failure(graph: &DependencyGraph, values: &[Option<f64>], p: usize) -> Option<usize> {
    graph
        .precedents_at(p)
        .iter()
        .copied()
        .find(|&parent| graph.is_derived_at(parent) && values[parent].is_none())
}

fn upstream_outcome(formula: &str, parent: &FieldId, error_text: Option<String>) -> Outcome {
    let error = FormulaError::UpstreamFailed {
        formula: formula.to_string(),
        field: parent.clone(),
    };
    (
        error_text,
        Some(DerivedFieldError::FormulaEvaluationError {
            reason: error.to_string(),
        }),
    )
}

fn is_current(field: &Field, value: &Option<String>, status: &Option<DerivedFieldError>) -> bool {
    match field.spec() {
        FieldSpec::Derived {
            default_value,
            status: current,
            ..
        } => default_value == value && current == status,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldKind, FieldValue};

    fn id(s: &str) -> FieldId {
        FieldId::new(s).unwrap()
    }

    fn number(name: &str, value: f64) -> Field {
        let mut field = Field::new(id(name), FieldKind::Number, None);
        field.set_value(value).unwrap();
        field
    }

    fn derived(name: &str, parents: &[&str], formula: &str) -> Field {
        let mut field = Field::new(id(name), FieldKind::Derived, None);
        field
            .set_parent_field_ids(parents.iter().map(|p| id(p)).collect())
            .unwrap();
        field.set_formula(formula).unwrap();
        field
    }

    fn run(fields: &[Field]) -> Recomputed<'_> {
        recompute_fields(fields, 0.0, &EngineConfig::default())
    }

    fn value_of(fields: &[Field], name: &str) -> FieldValue {
        fields.iter().find(|f| f.id().as_str() == name).unwrap().value()
    }

    #[test]
    fn test_tax_scenario() {
        let fields = vec![
            number("amount", 100.0),
            number("rate", 0.2),
            derived("tax", &["amount", "rate"], "amount * rate"),
        ];
        let out = run(&fields);
        assert!(out.changed());
        assert_eq!(value_of(out.fields(), "tax"), FieldValue::Text("20".into()));
        assert!(out.diagnostics().is_empty());
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let fields = vec![number("a", 2.0), derived("b", &["a"], "a * 3")];
        let first = run(&fields).into_fields();
        let second = run(&first);
        assert!(!second.changed());
        assert!(matches!(second.fields, Cow::Borrowed(_)));
    }

    #[test]
    fn test_chained_derived_fields_in_any_order() {
        let fields = vec![
            derived("c", &["b"], "b + 1"),
            derived("b", &["a"], "a * 2"),
            number("a", 5.0),
        ];
        let out = run(&fields);
        assert_eq!(value_of(out.fields(), "b"), FieldValue::Text("10".into()));
        assert_eq!(value_of(out.fields(), "c"), FieldValue::Text("11".into()));
    }

    #[test]
    fn test_cycle_tags_both_fields() {
        let fields = vec![derived("a", &["b"], "b + 1"), derived("b", &["a"], "a + 1")];
        let out = run(&fields);
        for field in out.fields() {
            assert_eq!(field.value(), FieldValue::Text("Formula error".into()));
            assert_eq!(
                field.derived_status(),
                Some(&DerivedFieldError::CyclicDependency {
                    cycle: vec![id("a"), id("b")]
                })
            );
        }
        assert_eq!(out.diagnostics().len(), 2);
    }

    #[test]
    fn test_downstream_of_cycle_is_upstream_failure() {
        let fields = vec![
            derived("a", &["b"], "b"),
            derived("b", &["a"], "a"),
            derived("c", &["a"], "a + 1"),
        ];
        let out = run(&fields);
        let c = &out.fields()[2];
        assert_eq!(c.value(), FieldValue::Text("Formula error".into()));
        assert!(matches!(
            c.derived_status(),
            Some(DerivedFieldError::FormulaEvaluationError { reason }) if reason.contains("`a`")
        ));
    }

    #[test]
    fn test_dangling_parent_evaluates_as_zero() {
        let fields = vec![number("a", 4.0), derived("total", &["a", "ghost"], "a + ghost")];
        let out = run(&fields);
        let total = &out.fields()[1];
        assert_eq!(total.value(), FieldValue::Text("4".into()));
        assert_eq!(
            total.derived_status(),
            Some(&DerivedFieldError::MissingDependency {
                missing: vec![id("ghost")]
            })
        );
    }

    #[test]
    fn test_formula_error_sets_sentinel() {
        let fields = vec![number("a", 0.0), derived("r", &["a"], "1 / a")];
        let out = run(&fields);
        let r = &out.fields()[1];
        assert_eq!(r.value(), FieldValue::Text("Formula error".into()));
        assert!(matches!(
            r.derived_status(),
            Some(DerivedFieldError::FormulaEvaluationError { .. })
        ));
    }

    #[test]
    fn test_undeclared_derived_reference_is_unknown() {
        let fields = vec![
            number("a", 1.0),
            derived("b", &["a"], "a"),
            derived("c", &["a"], "b + a"),
        ];
        let out = run(&fields);
        assert!(matches!(
            out.fields()[2].derived_status(),
            Some(DerivedFieldError::FormulaEvaluationError { reason })
                if reason.contains("unknown identifier")
        ));
    }

    #[test]
    fn test_undeclared_reference_to_other_fields_missing_parent() {
        let fields = vec![
            derived("a", &["ghost"], "ghost + 1"),
            derived("b", &[], "ghost + 1"),
        ];
        let out = run(&fields);
        assert_eq!(out.fields()[0].value(), FieldValue::Text("1".into()));
        assert!(matches!(
            out.fields()[1].derived_status(),
            Some(DerivedFieldError::FormulaEvaluationError { reason })
                if reason.contains("unknown identifier `ghost`")
        ));
    }

    #[test]
    fn test_long_chain() {
        let mut fields = vec![number("x0", 0.0)];
        for i in 1..10_000 {
            let parent = format!("x{}", i - 1);
            fields.push(derived(&format!("x{i}"), &[&parent], &format!("{parent} + 1")));
        }
        fields.reverse();
        let out = run(&fields);
        assert!(out.diagnostics().is_empty());
        assert_eq!(value_of(out.fields(), "x9999"), FieldValue::Text("9999".into()));
    }

    #[test]
    fn test_timestamp_ids_in_formulas() {
        let fields = vec![
            number("1697450000000", 100.0),
            derived("1697450000001", &["1697450000000"], "[1697450000000] * 0.2"),
        ];
        let out = run(&fields);
        assert_eq!(out.fields()[1].value(), FieldValue::Text("20".into()));
        assert!(out.diagnostics().is_empty());
    }

    #[test]
    fn test_blank_formula_has_no_value() {
        let fields = vec![derived("d", &[], "  ")];
        let out = run(&fields);
        assert!(!out.changed());
        assert_eq!(out.fields()[0].value(), FieldValue::Empty);
    }

    #[test]
    fn test_scope_coercion() {
        let mut agree = Field::new(id("agree"), FieldKind::Checkbox, None);
        agree.set_value(true).unwrap();
        let mut dob = Field::new(id("dob"), FieldKind::Date, None);
        dob.set_value("1970-01-02").unwrap();
        let mut name = Field::new(id("name"), FieldKind::Text, None);
        name.set_value("42").unwrap();
        let blank = Field::new(id("blank"), FieldKind::Number, None);

        assert_eq!(scope_value(&agree), 1.0);
        assert_eq!(scope_value(&dob), 86_400_000.0);
        assert_eq!(scope_value(&name), 0.0);
        assert_eq!(scope_value(&blank), 0.0);
    }

    #[test]
    fn test_custom_error_text() {
        let config = EngineConfig {
            formula_error_text: "#ERR".into(),
            ..EngineConfig::default()
        };
        let fields = vec![derived("x", &[], "nope(")];
        let out = recompute_fields(&fields, 0.0, &config);
        assert_eq!(out.fields()[0].value(), FieldValue::Text("#ERR".into()));
    }

    #[test]
    fn test_error_is_cleared_after_fix() {
        let mut fields = vec![number("a", 0.0), derived("r", &["a"], "1 / a")];
        fields = run(&fields).into_fields();
        fields[0].set_value(4.0).unwrap();
        let out = run(&fields);
        assert!(out.changed());
        assert_eq!(out.fields()[1].value(), FieldValue::Text("0.25".into()));
        assert_eq!(out.fields()[1].derived_status(), None);
    }
}
