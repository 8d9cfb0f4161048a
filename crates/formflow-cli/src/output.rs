//! Output formatting

use anyhow::Result;
use clap::ValueEnum;
use formflow_core::{Field, FieldValue, FormReport, FormSummary};
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Structured formats serialize `data`; the table format renders `table`
    pub fn print<T: Serialize>(&self, data: &T, table: impl FnOnce() -> String) -> Result<()> {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(data)?),
            OutputFormat::Table => println!("{}", table()),
        }
        Ok(())
    }
}

#[derive(Tabled)]
pub struct SummaryRow {
    pub id: String,
    pub name: String,
    pub created: String,
}

impl From<&FormSummary> for SummaryRow {
    fn from(s: &FormSummary) -> Self {
        Self {
            id: s.id.to_string(),
            name: s.name.clone(),
            created: s.created_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

#[derive(Tabled)]
pub struct FieldRow {
    pub id: String,
    pub kind: String,
    pub label: String,
    pub required: bool,
    pub value: String,
    pub status: String,
}

impl From<&Field> for FieldRow {
    fn from(f: &Field) -> Self {
        let kind = match f.subtype() {
            Some(subtype) if !subtype.is_plain() => format!("{} ({subtype:?})", f.kind()),
            _ => f.kind().to_string(),
        };
        Self {
            id: f.id().to_string(),
            kind,
            label: f.label().to_string(),
            required: f.required(),
            value: display_value(&f.value()),
            status: f.derived_status().map(|s| s.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
pub struct ProblemRow {
    pub field: String,
    pub rule: String,
    pub message: String,
}

pub fn summaries_table(summaries: &[FormSummary]) -> String {
    Table::new(summaries.iter().map(SummaryRow::from)).to_string()
}

pub fn fields_table(fields: &[Field]) -> String {
    Table::new(fields.iter().map(FieldRow::from)).to_string()
}

pub fn report_table(report: &FormReport) -> String {
    let definition = report.definition.iter().map(|e| ProblemRow {
        field: String::new(),
        rule: "definition".into(),
        message: e.to_string(),
    });
    let fields = report.fields.iter().flat_map(|(id, violations)| {
        violations.iter().map(move |v| ProblemRow {
            field: id.to_string(),
            rule: format!("{:?}", v.kind),
            message: v.to_string(),
        })
    });
    Table::new(definition.chain(fields)).to_string()
}

fn display_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Empty => String::new(),
        FieldValue::Bool(b) => b.to_string(),
        other => other.as_text().map(|t| t.into_owned()).unwrap_or_default(),
    }
}
