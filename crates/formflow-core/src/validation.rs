//! Validation rule engine
//!
//! Two layers:
//! - runtime rules: a candidate value checked against one field definition
//!   ([`validate_field`]); every applicable rule reports independently.
//! - author-time rules: the form definition itself ([`validate_form`]), which
//!   also runs the runtime rules over each field's current value.

use crate::config::EngineConfig;
use crate::domain::{
    date_millis, parse_date_millis, Field, FieldId, FieldSpec, FieldSubtype, FieldValue, Form,
};
use crate::error::{FormsError, Result};
use chrono::NaiveDate;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Minimum number of distinct options a radio field needs
pub const MIN_RADIO_OPTIONS: usize = 2;

/// Compiled field patterns kept before the cache is flushed
const PATTERN_CACHE_CAPACITY: usize = 256;

/// `local@domain.tld` with no whitespace and a single `@`
static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

type CompiledPattern = std::result::Result<Regex, regex::Error>;

static PATTERNS: Lazy<RwLock<HashMap<String, CompiledPattern>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Rule that a value failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViolationKind {
    Required,
    TooShort,
    TooLong,
    PatternMismatch,
    InvalidEmail,
    PasswordTooShort,
    PasswordNeedsDigit,
    InvalidNumber,
    BelowMinimum,
    AboveMaximum,
    InvalidDate,
    InvalidOption,
    InsufficientOptions,
}

impl ViolationKind {
    /// Author-time violations block saving the form definition
    pub fn is_author_time(&self) -> bool {
        matches!(self, Self::InsufficientOptions)
    }
}

/// Bound that a violation refers to, for message rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Limit {
    Count(u32),
    Number(f64),
    Date(NaiveDate),
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Date(d) => write!(f, "{d}"),
        }
    }
}

/// One failure of one field against one rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
}

impl Violation {
    fn new(kind: ViolationKind, field: &Field) -> Self {
        Self {
            kind,
            label: field.label().to_string(),
            limit: None,
        }
    }

    fn with_limit(mut self, limit: Limit) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = &self.label;
        let limit = self.limit.map(|l| l.to_string()).unwrap_or_default();
        match self.kind {
            ViolationKind::Required => write!(f, "{label} is required"),
            ViolationKind::TooShort => write!(f, "{label} must be at least {limit} characters"),
            ViolationKind::TooLong => write!(f, "{label} must be at most {limit} characters"),
            ViolationKind::PatternMismatch => {
                write!(f, "{label} does not match the expected format")
            }
            ViolationKind::InvalidEmail => write!(f, "{label} must be a valid email address"),
            ViolationKind::PasswordTooShort => {
                write!(f, "{label} must be a password of at least {limit} characters")
            }
            ViolationKind::PasswordNeedsDigit => {
                write!(f, "{label} must contain at least one digit")
            }
            ViolationKind::InvalidNumber => write!(f, "{label} must be a number"),
            ViolationKind::BelowMinimum => write!(f, "{label} must be at least {limit}"),
            ViolationKind::AboveMaximum => write!(f, "{label} must be at most {limit}"),
            ViolationKind::InvalidDate => write!(f, "{label} must be a valid date"),
            ViolationKind::InvalidOption => write!(f, "{label} must be one of the listed options"),
            ViolationKind::InsufficientOptions => {
                write!(f, "{label} needs at least {limit} distinct options")
            }
        }
    }
}

/// Problems with the form definition itself
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "type")]
pub enum FormDefinitionError {
    #[error("form name is missing")]
    FormNameMissing,

    #[error("form has no fields")]
    NoFields,

    #[error("password field {field} allows passwords shorter than {required} characters (minimum {min_length})")]
    PasswordPolicyTooWeak {
        field: FieldId,
        min_length: u32,
        required: u32,
    },

    #[error("field {position} ({field}) is missing a label")]
    LabelMissing { field: FieldId, position: usize },

    #[error("field {field}: min length {min} exceeds max length {max}")]
    LengthBoundsInverted { field: FieldId, min: u32, max: u32 },

    #[error("field {field}: minimum exceeds maximum")]
    BoundsInverted { field: FieldId },

    #[error("field {field}: invalid pattern: {message}")]
    InvalidPattern { field: FieldId, message: String },

    #[error("field id {field} is used more than once")]
    DuplicateFieldId { field: FieldId },
}

/// Result of [`validate_form`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormReport {
    /// Violations per field, in form order; clean fields are absent
    pub fields: IndexMap<FieldId, Vec<Violation>>,
    /// Author-time problems with the definition
    pub definition: Vec<FormDefinitionError>,
}

impl FormReport {
    /// Nothing to report at all
    pub fn is_clean(&self) -> bool {
        self.definition.is_empty() && self.fields.values().all(Vec::is_empty)
    }

    /// Number of problems that block saving the definition
    pub fn blocking_count(&self) -> usize {
        self.definition.len()
            + self
                .fields
                .values()
                .flatten()
                .filter(|v| v.kind.is_author_time())
                .count()
    }

    pub fn blocks_save(&self) -> bool {
        self.blocking_count() > 0
    }

    pub fn violations_for(&self, id: &FieldId) -> &[Violation] {
        self.fields.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn push(&mut self, id: &FieldId, violations: Vec<Violation>) {
        if violations.is_empty() {
            return;
        }
        self.fields.entry(id.clone()).or_default().extend(violations);
    }
}

/// Validation with the default engine settings
pub fn validate_field(field: &Field, candidate: &FieldValue) -> Vec<Violation> {
    Validator::new(&EngineConfig::default()).field(field, candidate)
}

/// Form validation with the default engine settings
pub fn validate_form(form: &Form) -> FormReport {
    Validator::new(&EngineConfig::default()).form(form)
}

/// Validate a candidate for a field looked up by id
///
/// Asking for a field the form does not contain is a caller bug and is
/// reported as [`FormsError::FieldNotFound`].
pub fn validate_form_field(
    form: &Form,
    id: &FieldId,
    candidate: &FieldValue,
) -> Result<Vec<Violation>> {
    let field = form
        .field(id)
        .ok_or_else(|| FormsError::FieldNotFound(id.clone()))?;
    Ok(validate_field(field, candidate))
}

/// Rule evaluator bound to one configuration
pub struct Validator<'c> {
    config: &'c EngineConfig,
}

impl<'c> Validator<'c> {
    pub fn new(config: &'c EngineConfig) -> Self {
        Self { config }
    }

    /// Runtime rules for one candidate value
    pub fn field(&self, field: &Field, candidate: &FieldValue) -> Vec<Violation> {
        let mut out = Vec::new();

        // engine-owned value
        if field.is_derived() {
            return out;
        }

        // covers the radio "nothing selected" sentinel as well
        if field.required() && candidate.is_blank() {
            out.push(Violation::new(ViolationKind::Required, field));
        }

        match field.spec() {
            FieldSpec::Text {
                subtype,
                min_length,
                max_length,
                pattern,
                ..
            } => {
                if let Some(text) = non_blank_text(candidate) {
                    self.text_rules(
                        field,
                        &text,
                        *min_length,
                        *max_length,
                        pattern.as_deref(),
                        &mut out,
                    );
                    self.subtype_rules(field, &text, *subtype, *min_length, &mut out);
                }
            }
            FieldSpec::Textarea {
                min_length,
                max_length,
                pattern,
                ..
            } => {
                if let Some(text) = non_blank_text(candidate) {
                    self.text_rules(
                        field,
                        &text,
                        *min_length,
                        *max_length,
                        pattern.as_deref(),
                        &mut out,
                    );
                }
            }
            FieldSpec::Number {
                min_value,
                max_value,
                ..
            } => match candidate_number(candidate) {
                Some(Ok(n)) => {
                    if let Some(min) = min_value.filter(|&min| n < min) {
                        out.push(
                            Violation::new(ViolationKind::BelowMinimum, field)
                                .with_limit(Limit::Number(min)),
                        );
                    }
                    if let Some(max) = max_value.filter(|&max| n > max) {
                        out.push(
                            Violation::new(ViolationKind::AboveMaximum, field)
                                .with_limit(Limit::Number(max)),
                        );
                    }
                }
                Some(Err(())) => out.push(Violation::new(ViolationKind::InvalidNumber, field)),
                None => {}
            },
            FieldSpec::Date {
                min_value,
                max_value,
                ..
            } => match candidate_date(candidate) {
                Some(Ok(ms)) => {
                    if let Some(min) = min_value.filter(|&min| ms < date_millis(min)) {
                        out.push(
                            Violation::new(ViolationKind::BelowMinimum, field)
                                .with_limit(Limit::Date(min)),
                        );
                    }
                    if let Some(max) = max_value.filter(|&max| ms > date_millis(max)) {
                        out.push(
                            Violation::new(ViolationKind::AboveMaximum, field)
                                .with_limit(Limit::Date(max)),
                        );
                    }
                }
                Some(Err(())) => out.push(Violation::new(ViolationKind::InvalidDate, field)),
                None => {}
            },
            FieldSpec::Radio { options, .. } => {
                if let Some(text) = non_blank_text(candidate) {
                    if !options.iter().any(|o| o.as_str() == &*text) {
                        out.push(Violation::new(ViolationKind::InvalidOption, field));
                    }
                }
            }
            FieldSpec::Checkbox { .. } | FieldSpec::Derived { .. } => {}
        }

        out
    }

    /// Author-time checks plus runtime rules over current values
    pub fn form(&self, form: &Form) -> FormReport {
        let mut report = FormReport::default();

        if form.name().trim().is_empty() {
            report.definition.push(FormDefinitionError::FormNameMissing);
        }
        if form.fields().is_empty() {
            report.definition.push(FormDefinitionError::NoFields);
        }

        let mut seen = HashSet::new();
        for (idx, field) in form.fields().iter().enumerate() {
            let id = field.id();
            if !seen.insert(id) {
                report
                    .definition
                    .push(FormDefinitionError::DuplicateFieldId { field: id.clone() });
            }
            if field.label().trim().is_empty() {
                report.definition.push(FormDefinitionError::LabelMissing {
                    field: id.clone(),
                    position: idx + 1,
                });
            }
            self.definition_rules(field, &mut report);
            report.push(id, self.field(field, &field.value()));
        }

        if !report.is_clean() {
            tracing::debug!(
                form = %form.id(),
                blocking = report.blocking_count(),
                "form validation found problems"
            );
        }
        report
    }

    fn definition_rules(&self, field: &Field, report: &mut FormReport) {
        let id = field.id();
        match field.spec() {
            FieldSpec::Text {
                subtype,
                min_length,
                max_length,
                pattern,
                ..
            } => {
                check_length_order(id, *min_length, *max_length, report);
                check_pattern(id, pattern.as_deref(), report);
                if *subtype == FieldSubtype::Password {
                    let required = self.config.password_min_length;
                    let min_length = self.password_minimum(*min_length);
                    if min_length < required {
                        report.definition.push(FormDefinitionError::PasswordPolicyTooWeak {
                            field: id.clone(),
                            min_length,
                            required,
                        });
                    }
                }
            }
            FieldSpec::Textarea {
                min_length,
                max_length,
                pattern,
                ..
            } => {
                check_length_order(id, *min_length, *max_length, report);
                check_pattern(id, pattern.as_deref(), report);
            }
            FieldSpec::Number {
                min_value,
                max_value,
                ..
            } => {
                if matches!((min_value, max_value), (Some(min), Some(max)) if min > max) {
                    report
                        .definition
                        .push(FormDefinitionError::BoundsInverted { field: id.clone() });
                }
            }
            FieldSpec::Date {
                min_value,
                max_value,
                ..
            } => {
                if matches!((min_value, max_value), (Some(min), Some(max)) if min > max) {
                    report
                        .definition
                        .push(FormDefinitionError::BoundsInverted { field: id.clone() });
                }
            }
            FieldSpec::Radio { options, .. } => {
                let distinct: HashSet<&str> = options
                    .iter()
                    .map(|o| o.trim())
                    .filter(|o| !o.is_empty())
                    .collect();
                if distinct.len() < MIN_RADIO_OPTIONS {
                    report.push(
                        id,
                        vec![Violation::new(ViolationKind::InsufficientOptions, field)
                            .with_limit(Limit::Count(MIN_RADIO_OPTIONS as u32))],
                    );
                }
            }
            FieldSpec::Checkbox { .. } | FieldSpec::Derived { .. } => {}
        }
    }

    fn text_rules(
        &self,
        field: &Field,
        text: &str,
        min_length: Option<u32>,
        max_length: Option<u32>,
        pattern: Option<&str>,
        out: &mut Vec<Violation>,
    ) {
        let len = text.chars().count();
        if let Some(min) = min_length.filter(|&min| len < min as usize) {
            out.push(Violation::new(ViolationKind::TooShort, field).with_limit(Limit::Count(min)));
        }
        if let Some(max) = max_length.filter(|&max| len > max as usize) {
            out.push(Violation::new(ViolationKind::TooLong, field).with_limit(Limit::Count(max)));
        }
        // an uncompilable pattern is reported at author time
        if let Some(Ok(re)) = pattern.map(compiled_pattern) {
            if !re.is_match(text) {
                out.push(Violation::new(ViolationKind::PatternMismatch, field));
            }
        }
    }

    fn subtype_rules(
        &self,
        field: &Field,
        text: &str,
        subtype: FieldSubtype,
        min_length: Option<u32>,
        out: &mut Vec<Violation>,
    ) {
        match subtype {
            FieldSubtype::Plain => {}
            FieldSubtype::Email => {
                if !is_email(text) {
                    out.push(Violation::new(ViolationKind::InvalidEmail, field));
                }
            }
            FieldSubtype::Password => {
                let minimum = self.password_minimum(min_length);
                if text.chars().count() < minimum as usize {
                    out.push(
                        Violation::new(ViolationKind::PasswordTooShort, field)
                            .with_limit(Limit::Count(minimum)),
                    );
                }
                if !text.chars().any(|c| c.is_ascii_digit()) {
                    out.push(Violation::new(ViolationKind::PasswordNeedsDigit, field));
                }
            }
        }
    }

    fn password_minimum(&self, min_length: Option<u32>) -> u32 {
        min_length.unwrap_or(self.config.password_min_length)
    }
}

fn check_length_order(id: &FieldId, min: Option<u32>, max: Option<u32>, report: &mut FormReport) {
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            report.definition.push(FormDefinitionError::LengthBoundsInverted {
                field: id.clone(),
                min,
                max,
            });
        }
    }
}

fn check_pattern(id: &FieldId, pattern: Option<&str>, report: &mut FormReport) {
    if let Some(Err(e)) = pattern.map(compiled_pattern) {
        report.definition.push(FormDefinitionError::InvalidPattern {
            field: id.clone(),
            message: e.to_string(),
        });
    }
}

fn non_blank_text(candidate: &FieldValue) -> Option<std::borrow::Cow<'_, str>> {
    candidate.as_text().filter(|t| !t.trim().is_empty())
}

/// `None` when there is nothing to check, `Err` when unparseable
fn candidate_number(candidate: &FieldValue) -> Option<std::result::Result<f64, ()>> {
    match candidate {
        FieldValue::Empty => None,
        FieldValue::Number(n) if n.is_nan() => None,
        FieldValue::Number(n) => Some(Ok(*n)),
        FieldValue::Text(s) if s.trim().is_empty() => None,
        FieldValue::Text(s) => Some(s.trim().parse().map_err(|_| ())),
        FieldValue::Bool(_) => Some(Err(())),
    }
}

fn candidate_date(candidate: &FieldValue) -> Option<std::result::Result<f64, ()>> {
    match candidate {
        FieldValue::Empty => None,
        FieldValue::Number(ms) => Some(Ok(*ms)),
        FieldValue::Text(s) if s.trim().is_empty() => None,
        FieldValue::Text(s) => Some(parse_date_millis(s).ok_or(())),
        FieldValue::Bool(_) => Some(Err(())),
    }
}

fn is_email(text: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(text))
}

/// Compile a field pattern once per distinct source
fn compiled_pattern(pattern: &str) -> CompiledPattern {
    if let Some(compiled) = PATTERNS.read().get(pattern) {
        return compiled.clone();
    }
    let compiled = Regex::new(pattern);
    let mut cache = PATTERNS.write();
    if cache.len() >= PATTERN_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(pattern.to_string(), compiled.clone());
    compiled
}
