//! formflow core - typed form definitions with validation and derived fields
//!
//! This crate provides:
//! - A form/field domain model where each field kind is a variant of a sum type
//! - A validation rule engine (runtime value rules and author-time form rules)
//! - A dependency graph over derived fields with cycle detection
//! - A small arithmetic formula evaluator
//! - A pure, idempotent recomputation pass for derived values
//! - A synchronous persistence gateway with in-memory and JSON file backends
//!
//! ```
//! use formflow_core::{recompute, Field, FieldId, FieldKind, FieldValue};
//!
//! let mut amount = Field::new(FieldId::new("amount").unwrap(), FieldKind::Number, None);
//! amount.set_value(100.0).unwrap();
//! let mut tax = Field::new(FieldId::new("tax").unwrap(), FieldKind::Derived, None);
//! tax.set_parent_field_ids(vec![amount.id().clone()]).unwrap();
//! tax.set_formula("amount * 0.2").unwrap();
//!
//! let fields = vec![amount, tax];
//! let out = recompute(&fields);
//! assert_eq!(out.fields()[1].value(), FieldValue::Text("20".into()));
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod formula;
pub mod graph;
pub mod recompute;
pub mod validation;

pub use config::EngineConfig;
pub use domain::*;
pub use engine::{save_form, Engine};
pub use error::{FormsError, Result};
pub use formula::{evaluate, Formula, FormulaError, Scope};
pub use graph::{build_graph, detect_cycle, CycleError, DependencyGraph};
pub use recompute::{scope_value, Diagnostic, Recomputed};
pub use validation::{
    validate_field, validate_form, validate_form_field, FormDefinitionError, FormReport, Limit,
    Validator, Violation, ViolationKind,
};

/// Recompute derived fields with the default engine and the current clock
pub fn recompute(fields: &[Field]) -> Recomputed<'_> {
    Engine::default().recompute(fields)
}
