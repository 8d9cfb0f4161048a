//! Value Objects - Immutable domain primitives with validation
//!
//! Value Objects are:
//! - Immutable
//! - Comparable by value (not identity)
//! - Self-validating
//! - Side-effect free

use crate::error::FormsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the implicit clock variable available to every formula
pub const NOW_VARIABLE: &str = "now";

/// Field identifier (Value Object)
///
/// Field ids double as formula variable names. Ids are opaque, so stored
/// timestamp ids such as `1697450000000` load unchanged; an id that is not a
/// plain name (`[A-Za-z_][A-Za-z0-9_]*`) is written `[1697450000000]` in a
/// formula.
///
/// # Invariants
/// - Max 64 characters
/// - No whitespace, control characters, `[` or `]`
/// - Never the reserved name `now`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldId(String);

impl FieldId {
    /// Create new field ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self, FormsError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("cannot be empty")
        } else if id.len() > 64 {
            Some("max 64 characters")
        } else if id == NOW_VARIABLE {
            Some("`now` is reserved for the formula clock")
        } else if id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '[' || c == ']')
        {
            Some("must not contain whitespace, control characters or brackets")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(FormsError::InvalidFieldId { id, reason }),
            None => Ok(Self(id)),
        }
    }

    /// Fresh id that is unique for all practical purposes
    pub fn generate() -> Self {
        Self(format!("f_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get inner value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FieldId {
    type Error = FormsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FieldId> for String {
    fn from(id: FieldId) -> Self {
        id.0
    }
}

/// Form identifier (Value Object)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormId(String);

impl FormId {
    /// Create new form ID
    pub fn new(id: impl Into<String>) -> Result<Self, FormsError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(FormsError::InvalidFormId("cannot be empty"));
        }
        if id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(FormsError::InvalidFormId("must not look like a path"));
        }
        Ok(Self(id))
    }

    /// Fresh random form id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FormId {
    type Error = FormsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FormId> for String {
    fn from(id: FormId) -> Self {
        id.0
    }
}

/// Field kind (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Checkbox,
    Textarea,
    Radio,
    Derived,
}

impl FieldKind {
    /// All kinds, in the order the editor offers them
    pub const ALL: [FieldKind; 7] = [
        Self::Text,
        Self::Number,
        Self::Date,
        Self::Checkbox,
        Self::Textarea,
        Self::Radio,
        Self::Derived,
    ];

    /// Text-like kinds carry length bounds and patterns
    pub fn is_text_like(&self) -> bool {
        matches!(self, Self::Text | Self::Textarea)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Checkbox => "checkbox",
            Self::Textarea => "textarea",
            Self::Radio => "radio",
            Self::Derived => "derived",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown field kind: {s}"))
    }
}

/// Text subtype, governs extra validation only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSubtype {
    #[default]
    #[serde(rename = "none")]
    Plain,
    Email,
    Password,
}

impl FieldSubtype {
    pub fn is_plain(&self) -> bool {
        matches!(self, Self::Plain)
    }
}

/// Primitive candidate value handed over by the input boundary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Empty, blank text or an unchecked box
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bool(b) => !b,
            Self::Number(n) => n.is_nan(),
            Self::Text(s) => s.trim().is_empty(),
        }
    }

    /// Text view used by string rules; numbers are printed
    pub fn as_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Self::Text(s) => Some(std::borrow::Cow::Borrowed(s)),
            Self::Number(n) => Some(std::borrow::Cow::Owned(format_scalar(*n))),
            Self::Empty | Self::Bool(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Status tag of a derived field after recomputation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DerivedFieldError {
    /// Field sits on a dependency cycle; never evaluated. `cycle` lists
    /// every field of the cycle in form order
    CyclicDependency { cycle: Vec<FieldId> },
    /// Declared parents absent from the form; they evaluated as 0
    MissingDependency { missing: Vec<FieldId> },
    /// Formula failed to evaluate
    FormulaEvaluationError { reason: String },
}

impl DerivedFieldError {
    /// Fatal errors replace the value with the error text
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MissingDependency { .. })
    }
}

impl fmt::Display for DerivedFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CyclicDependency { cycle } => {
                let names: Vec<_> = cycle.iter().map(FieldId::as_str).collect();
                write!(f, "cyclic dependency between {}", names.join(", "))
            }
            Self::MissingDependency { missing } => {
                let names: Vec<_> = missing.iter().map(FieldId::as_str).collect();
                write!(f, "missing dependencies treated as 0: {}", names.join(", "))
            }
            Self::FormulaEvaluationError { reason } => write!(f, "formula error: {reason}"),
        }
    }
}

/// Epoch milliseconds of a date string
///
/// Accepts `YYYY-MM-DD` (midnight UTC), RFC 3339 timestamps and the
/// `YYYY-MM-DDTHH:MM[:SS]` shape produced by datetime inputs (read as UTC).
pub fn parse_date_millis(input: &str) -> Option<f64> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date_millis(date));
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(input) {
        return Some(ts.timestamp_millis() as f64);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis() as f64)
}

/// Epoch milliseconds of midnight UTC on `date`
pub fn date_millis(date: chrono::NaiveDate) -> f64 {
    date.and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp_millis() as f64
}

/// Render a computed scalar the way it is stored in `defaultValue`
pub fn format_scalar(value: f64) -> String {
    if value == 0.0 {
        // folds -0 into 0
        return "0".to_string();
    }
    format!("{value}")
}
