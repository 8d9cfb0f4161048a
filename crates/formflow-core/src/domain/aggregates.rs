//! Aggregates - Consistency boundaries for domain entities
//!
//! Aggregates are:
//! - Consistency boundaries
//! - Loaded and saved as a unit
//! - Referenced by ID only from outside
//! - Enforce invariants

use super::value_objects::*;
use crate::error::{FormsError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Label given to freshly created fields
pub const DEFAULT_LABEL: &str = "Untitled";

/// Field (Entity within the Form Aggregate)
///
/// # Invariants
/// - `id` never changes
/// - the kind, i.e. the [`FieldSpec`] variant, is fixed at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    id: FieldId,
    label: String,
    #[serde(default)]
    required: bool,
    #[serde(flatten)]
    spec: FieldSpec,
}

/// Kind-specific attributes of a field
///
/// Each variant carries exactly the attributes its kind supports, and
/// `defaultValue` is typed per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum FieldSpec {
    Text {
        #[serde(default, skip_serializing_if = "FieldSubtype::is_plain")]
        subtype: FieldSubtype,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        default_value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Number {
        #[serde(
            default,
            deserialize_with = "lenient_number",
            skip_serializing_if = "Option::is_none"
        )]
        default_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<f64>,
    },
    Date {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        default_value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_value: Option<NaiveDate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_value: Option<NaiveDate>,
    },
    Checkbox {
        #[serde(default)]
        default_value: bool,
    },
    Textarea {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        default_value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Radio {
        #[serde(default)]
        options: Vec<String>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        default_value: String,
    },
    Derived {
        #[serde(default)]
        parent_field_ids: Vec<FieldId>,
        #[serde(default)]
        formula: String,
        /// Engine-set, never user-set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
        #[serde(default, rename = "derivedError", skip_serializing_if = "Option::is_none")]
        status: Option<DerivedFieldError>,
    },
}

impl FieldSpec {
    /// Kind-appropriate defaults
    pub fn for_kind(kind: FieldKind, subtype: Option<FieldSubtype>) -> Self {
        match kind {
            FieldKind::Text => Self::Text {
                subtype: subtype.unwrap_or_default(),
                default_value: String::new(),
                min_length: None,
                max_length: None,
                pattern: None,
            },
            FieldKind::Textarea => Self::Textarea {
                default_value: String::new(),
                min_length: None,
                max_length: None,
                pattern: None,
            },
            FieldKind::Number => Self::Number {
                default_value: None,
                min_value: None,
                max_value: None,
            },
            FieldKind::Date => Self::Date {
                default_value: String::new(),
                min_value: None,
                max_value: None,
            },
            FieldKind::Checkbox => Self::Checkbox {
                default_value: false,
            },
            FieldKind::Radio => Self::Radio {
                options: Vec::new(),
                default_value: String::new(),
            },
            FieldKind::Derived => Self::Derived {
                parent_field_ids: Vec::new(),
                formula: String::new(),
                default_value: None,
                status: None,
            },
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Text { .. } => FieldKind::Text,
            Self::Number { .. } => FieldKind::Number,
            Self::Date { .. } => FieldKind::Date,
            Self::Checkbox { .. } => FieldKind::Checkbox,
            Self::Textarea { .. } => FieldKind::Textarea,
            Self::Radio { .. } => FieldKind::Radio,
            Self::Derived { .. } => FieldKind::Derived,
        }
    }
}

fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(f64),
        Text(String),
        Null,
    }

    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => Ok(Some(n)),
        Lenient::Null => Ok(None),
        Lenient::Text(s) if s.trim().is_empty() => Ok(None),
        Lenient::Text(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s:?}"))),
    }
}

/// Create a field with a fresh id and kind-appropriate defaults
///
/// `subtype` only applies to text fields and is ignored otherwise.
pub fn create_field(kind: FieldKind, subtype: Option<FieldSubtype>) -> Field {
    Field::new(FieldId::generate(), kind, subtype)
}

impl Field {
    /// Create field with an explicit id
    pub fn new(id: FieldId, kind: FieldKind, subtype: Option<FieldSubtype>) -> Self {
        if subtype.is_some() && kind != FieldKind::Text {
            tracing::debug!(%id, %kind, "subtype ignored for non-text field");
        }
        Self {
            id,
            label: DEFAULT_LABEL.to_string(),
            required: false,
            spec: FieldSpec::for_kind(kind, subtype),
        }
    }

    /// Assemble a field from a prepared spec
    pub fn from_spec(
        id: FieldId,
        label: impl Into<String>,
        required: bool,
        spec: FieldSpec,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            required,
            spec,
        }
    }

    pub fn id(&self) -> &FieldId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn kind(&self) -> FieldKind {
        self.spec.kind()
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.spec, FieldSpec::Derived { .. })
    }

    /// Text subtype; `None` for every other kind
    pub fn subtype(&self) -> Option<FieldSubtype> {
        match &self.spec {
            FieldSpec::Text { subtype, .. } => Some(*subtype),
            _ => None,
        }
    }

    pub fn options(&self) -> Option<&[String]> {
        match &self.spec {
            FieldSpec::Radio { options, .. } => Some(options),
            _ => None,
        }
    }

    /// Declared formula parents; empty for independent fields
    pub fn parent_field_ids(&self) -> &[FieldId] {
        match &self.spec {
            FieldSpec::Derived {
                parent_field_ids, ..
            } => parent_field_ids,
            _ => &[],
        }
    }

    pub fn formula(&self) -> Option<&str> {
        match &self.spec {
            FieldSpec::Derived { formula, .. } => Some(formula),
            _ => None,
        }
    }

    /// Status tag left by the last recomputation
    pub fn derived_status(&self) -> Option<&DerivedFieldError> {
        match &self.spec {
            FieldSpec::Derived { status, .. } => status.as_ref(),
            _ => None,
        }
    }

    /// Current `defaultValue` as a primitive
    pub fn value(&self) -> FieldValue {
        match &self.spec {
            FieldSpec::Text { default_value, .. }
            | FieldSpec::Textarea { default_value, .. }
            | FieldSpec::Date { default_value, .. }
            | FieldSpec::Radio { default_value, .. } => text_value(default_value),
            FieldSpec::Number { default_value, .. } => {
                default_value.map_or(FieldValue::Empty, FieldValue::Number)
            }
            FieldSpec::Checkbox { default_value } => FieldValue::Bool(*default_value),
            FieldSpec::Derived { default_value, .. } => default_value
                .as_deref()
                .map_or(FieldValue::Empty, text_value),
        }
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn set_required(&mut self, required: bool) {
        self.required = required;
    }

    /// Store a user-entered value, coerced to the kind's shape
    pub fn set_value(&mut self, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        let kind = self.kind();
        let mismatch = || FormsError::ValueShapeMismatch { kind };

        match &mut self.spec {
            FieldSpec::Text { default_value, .. }
            | FieldSpec::Textarea { default_value, .. }
            | FieldSpec::Date { default_value, .. }
            | FieldSpec::Radio { default_value, .. } => {
                *default_value = match value {
                    FieldValue::Empty => String::new(),
                    FieldValue::Text(s) => s,
                    FieldValue::Number(n) => format_scalar(n),
                    FieldValue::Bool(_) => return Err(mismatch()),
                };
            }
            FieldSpec::Number { default_value, .. } => {
                *default_value = match value {
                    FieldValue::Empty => None,
                    FieldValue::Number(n) => Some(n),
                    FieldValue::Text(s) if s.trim().is_empty() => None,
                    FieldValue::Text(s) => Some(s.trim().parse().map_err(|_| mismatch())?),
                    FieldValue::Bool(_) => return Err(mismatch()),
                };
            }
            FieldSpec::Checkbox { default_value } => {
                *default_value = match value {
                    FieldValue::Empty => false,
                    FieldValue::Bool(b) => b,
                    _ => return Err(mismatch()),
                };
            }
            FieldSpec::Derived { .. } => return Err(self.inapplicable("defaultValue")),
        }
        Ok(())
    }

    pub fn set_subtype(&mut self, new_subtype: FieldSubtype) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Text { subtype, .. } => {
                *subtype = new_subtype;
                Ok(())
            }
            _ => Err(self.inapplicable("subtype")),
        }
    }

    pub fn set_length_bounds(&mut self, min: Option<u32>, max: Option<u32>) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Text {
                min_length,
                max_length,
                ..
            }
            | FieldSpec::Textarea {
                min_length,
                max_length,
                ..
            } => {
                *min_length = min;
                *max_length = max;
                Ok(())
            }
            _ => Err(self.inapplicable("minLength/maxLength")),
        }
    }

    pub fn set_pattern(&mut self, new_pattern: Option<String>) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Text { pattern, .. } | FieldSpec::Textarea { pattern, .. } => {
                *pattern = new_pattern;
                Ok(())
            }
            _ => Err(self.inapplicable("pattern")),
        }
    }

    pub fn set_numeric_bounds(&mut self, min: Option<f64>, max: Option<f64>) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Number {
                min_value,
                max_value,
                ..
            } => {
                *min_value = min;
                *max_value = max;
                Ok(())
            }
            _ => Err(self.inapplicable("minValue/maxValue")),
        }
    }

    pub fn set_date_bounds(
        &mut self,
        min: Option<NaiveDate>,
        max: Option<NaiveDate>,
    ) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Date {
                min_value,
                max_value,
                ..
            } => {
                *min_value = min;
                *max_value = max;
                Ok(())
            }
            _ => Err(self.inapplicable("minValue/maxValue")),
        }
    }

    pub fn set_options(&mut self, new_options: Vec<String>) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Radio { options, .. } => {
                *options = new_options;
                Ok(())
            }
            _ => Err(self.inapplicable("options")),
        }
    }

    pub fn set_parent_field_ids(&mut self, parents: Vec<FieldId>) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Derived {
                parent_field_ids, ..
            } => {
                *parent_field_ids = parents;
                Ok(())
            }
            _ => Err(self.inapplicable("parentFieldIds")),
        }
    }

    pub fn set_formula(&mut self, new_formula: impl Into<String>) -> Result<()> {
        match &mut self.spec {
            FieldSpec::Derived { formula, .. } => {
                *formula = new_formula.into();
                Ok(())
            }
            _ => Err(self.inapplicable("formula")),
        }
    }

    /// Engine-only write of a derived result
    pub(crate) fn set_derived_result(
        &mut self,
        value: Option<String>,
        new_status: Option<DerivedFieldError>,
    ) {
        if let FieldSpec::Derived {
            default_value,
            status,
            ..
        } = &mut self.spec
        {
            *default_value = value;
            *status = new_status;
        }
    }

    fn inapplicable(&self, attribute: &'static str) -> FormsError {
        FormsError::InapplicableAttribute {
            attribute,
            kind: self.kind(),
        }
    }
}

fn text_value(s: &str) -> FieldValue {
    if s.is_empty() {
        FieldValue::Empty
    } else {
        FieldValue::Text(s.to_string())
    }
}

/// Split comma-separated option input into trimmed, non-empty options
pub fn parse_options(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}

/// Form Aggregate Root
///
/// # Invariants
/// - `id` and `created_at` are set once
/// - field ids are unique within the form
/// - field order is user-significant and preserved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    id: FormId,
    name: String,
    fields: Vec<Field>,
    created_at: DateTime<Utc>,
}

/// Listing entry returned by the persistence gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSummary {
    pub id: FormId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Form {
    /// New empty form with a fresh id
    pub fn create(name: impl Into<String>) -> Self {
        Self {
            id: FormId::generate(),
            name: name.into(),
            fields: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Rebuild a form from stored parts
    pub fn from_parts(
        id: FormId,
        name: impl Into<String>,
        fields: Vec<Field>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            fields,
            created_at,
        }
    }

    pub fn id(&self) -> &FormId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn summary(&self) -> FormSummary {
        FormSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn field(&self, id: &FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id() == id)
    }

    pub fn field_mut(&mut self, id: &FieldId) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.id() == id)
    }

    /// Append a field (maintains id uniqueness)
    pub fn add_field(&mut self, field: Field) -> Result<()> {
        if self.field(field.id()).is_some() {
            return Err(FormsError::DuplicateField(field.id().clone()));
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn remove_field(&mut self, id: &FieldId) -> Result<Field> {
        let index = self
            .fields
            .iter()
            .position(|f| f.id() == id)
            .ok_or_else(|| FormsError::FieldNotFound(id.clone()))?;
        Ok(self.fields.remove(index))
    }

    /// Index splice used by drag-and-drop reordering
    pub fn move_field(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.fields.len();
        for index in [from, to] {
            if index >= len {
                return Err(FormsError::FieldIndexOutOfRange { index, len });
            }
        }
        let moved = self.fields.remove(from);
        self.fields.insert(to, moved);
        Ok(())
    }

    /// Replace derived values after a field mutation; returns whether anything changed
    pub fn recompute(&mut self, engine: &crate::Engine) -> bool {
        let outcome = engine.recompute(&self.fields);
        if !outcome.changed() {
            return false;
        }
        self.fields = outcome.into_fields();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> FieldId {
        FieldId::new(s).unwrap()
    }

    #[test]
    fn test_create_field_defaults() {
        let checkbox = create_field(FieldKind::Checkbox, None);
        assert_eq!(checkbox.value(), FieldValue::Bool(false));
        assert_eq!(checkbox.label(), DEFAULT_LABEL);
        assert!(!checkbox.required());

        let radio = create_field(FieldKind::Radio, None);
        assert_eq!(radio.options(), Some(&[][..]));
        assert_eq!(radio.value(), FieldValue::Empty);

        let derived = create_field(FieldKind::Derived, None);
        assert!(derived.is_derived());
        assert!(derived.parent_field_ids().is_empty());
        assert_eq!(derived.formula(), Some(""));
    }

    #[test]
    fn test_subtype_only_on_text() {
        let text = create_field(FieldKind::Text, Some(FieldSubtype::Email));
        assert_eq!(text.subtype(), Some(FieldSubtype::Email));

        let number = create_field(FieldKind::Number, Some(FieldSubtype::Email));
        assert_eq!(number.subtype(), None);
    }

    #[test]
    fn test_set_value_coerces_per_kind() {
        let mut number = Field::new(id("amount"), FieldKind::Number, None);
        number.set_value("100").unwrap();
        assert_eq!(number.value(), FieldValue::Number(100.0));
        number.set_value("").unwrap();
        assert_eq!(number.value(), FieldValue::Empty);
        assert!(number.set_value("abc").is_err());
        assert!(number.set_value(true).is_err());

        let mut checkbox = Field::new(id("agree"), FieldKind::Checkbox, None);
        checkbox.set_value(true).unwrap();
        assert_eq!(checkbox.value(), FieldValue::Bool(true));
        assert!(checkbox.set_value("yes").is_err());
    }

    #[test]
    fn test_derived_value_is_engine_only() {
        let mut derived = Field::new(id("tax"), FieldKind::Derived, None);
        assert!(matches!(
            derived.set_value(1.0),
            Err(FormsError::InapplicableAttribute { .. })
        ));
    }

    #[test]
    fn test_inapplicable_attributes() {
        let mut checkbox = Field::new(id("c"), FieldKind::Checkbox, None);
        assert!(checkbox.set_length_bounds(Some(1), None).is_err());
        assert!(checkbox.set_options(vec!["A".into()]).is_err());
        assert!(checkbox.set_formula("1").is_err());

        let mut area = Field::new(id("bio"), FieldKind::Textarea, None);
        assert!(area.set_length_bounds(Some(1), Some(10)).is_ok());
        assert!(area.set_subtype(FieldSubtype::Email).is_err());
    }

    #[test]
    fn test_parse_options() {
        assert_eq!(parse_options("A, B,,C ,"), vec!["A", "B", "C"]);
        assert!(parse_options("  ").is_empty());
    }

    #[test]
    fn test_add_field_rejects_duplicates() {
        let mut form = Form::create("Contact");
        form.add_field(Field::new(id("email"), FieldKind::Text, None))
            .unwrap();
        let dup = form.add_field(Field::new(id("email"), FieldKind::Number, None));
        assert!(matches!(dup, Err(FormsError::DuplicateField(_))));
        assert_eq!(form.fields().len(), 1);
    }

    #[test]
    fn test_move_field_splices() {
        let mut form = Form::create("Order");
        for name in ["a", "b", "c"] {
            form.add_field(Field::new(id(name), FieldKind::Text, None))
                .unwrap();
        }
        form.move_field(0, 2).unwrap();
        let order: Vec<_> = form.fields().iter().map(|f| f.id().as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert!(form.move_field(0, 3).is_err());
    }

    #[test]
    fn test_remove_field() {
        let mut form = Form::create("Order");
        form.add_field(Field::new(id("a"), FieldKind::Text, None))
            .unwrap();
        assert_eq!(form.remove_field(&id("a")).unwrap().id().as_str(), "a");
        assert!(form.remove_field(&id("a")).is_err());
    }

    #[test]
    fn test_serialized_shape_omits_absent_attributes() {
        let mut field = Field::new(id("name"), FieldKind::Text, None);
        field.set_label("Name");
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "id": "name", "label": "Name", "required": false, "kind": "text" })
        );
    }

    #[test]
    fn test_field_round_trip_all_kinds() {
        let mut password = Field::new(id("pw"), FieldKind::Text, Some(FieldSubtype::Password));
        password.set_length_bounds(Some(8), Some(64)).unwrap();
        password.set_pattern(Some("^\\S+$".into())).unwrap();

        let mut number = Field::new(id("amount"), FieldKind::Number, None);
        number.set_value(12.5).unwrap();
        number.set_numeric_bounds(Some(0.0), None).unwrap();

        let mut date = Field::new(id("dob"), FieldKind::Date, None);
        date.set_value("1990-05-01").unwrap();
        date.set_date_bounds(NaiveDate::from_ymd_opt(1900, 1, 1), None)
            .unwrap();

        let mut radio = Field::new(id("size"), FieldKind::Radio, None);
        radio.set_options(parse_options("S, M, L")).unwrap();
        radio.set_value("M").unwrap();

        let mut derived = Field::new(id("age"), FieldKind::Derived, None);
        derived.set_parent_field_ids(vec![id("dob")]).unwrap();
        derived.set_formula("floor((now - dob) / 31557600000)").unwrap();
        derived.set_derived_result(
            Some("Formula error".into()),
            Some(DerivedFieldError::CyclicDependency {
                cycle: vec![id("age"), id("age")],
            }),
        );

        for field in [
            password,
            number,
            date,
            radio,
            derived,
            Field::new(id("agree"), FieldKind::Checkbox, None),
            Field::new(id("bio"), FieldKind::Textarea, None),
        ] {
            let json = serde_json::to_string(&field).unwrap();
            let back: Field = serde_json::from_str(&json).unwrap();
            assert_eq!(back, field, "round trip of {json}");
        }
    }

    #[test]
    fn test_number_default_accepts_numeric_string() {
        let field: Field = serde_json::from_str(
            r#"{"id":"qty","label":"Qty","required":true,"kind":"number","defaultValue":"42"}"#,
        )
        .unwrap();
        assert_eq!(field.value(), FieldValue::Number(42.0));
    }
}
