//! Forms commands

use crate::config::Config;
use crate::output::{self, OutputFormat};
use crate::FormCommands;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use formflow_core::{
    Engine, Field, Form, FormId, FormRepository, FormsError, JsonFileFormRepository,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Form definition file; `id` and `createdAt` are filled in when absent
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormFile {
    #[serde(default)]
    id: Option<FormId>,
    name: String,
    #[serde(default)]
    fields: Vec<Field>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<FormFile> for Form {
    fn from(file: FormFile) -> Self {
        Form::from_parts(
            file.id.unwrap_or_else(FormId::generate),
            file.name,
            file.fields,
            file.created_at.unwrap_or_else(Utc::now),
        )
    }
}

/// Read a JSON or YAML (by extension) form definition
fn read_form(path: &Path) -> Result<Form> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: FormFile = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?,
    };
    Ok(file.into())
}

fn open_repository(config: &Config, data_dir: Option<PathBuf>) -> Result<JsonFileFormRepository> {
    let dir = match data_dir.or_else(|| config.data_dir.clone()) {
        Some(dir) => dir,
        None => Config::default_data_dir()?,
    };
    Ok(JsonFileFormRepository::open(dir)?)
}

pub fn handle(
    action: FormCommands,
    config: &Config,
    data_dir: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::new(config.engine.clone());

    match action {
        FormCommands::List => {
            let repo = open_repository(config, data_dir)?;
            let summaries = repo.list()?;
            format.print(&summaries, || output::summaries_table(&summaries))?;
        }
        FormCommands::Show { id } => {
            let repo = open_repository(config, data_dir)?;
            let form = repo.load(&FormId::new(id)?)?;
            format.print(&form, || {
                format!(
                    "{} ({})\n{}",
                    form.name().bold(),
                    form.id(),
                    output::fields_table(form.fields())
                )
            })?;
        }
        FormCommands::Delete { id } => {
            let repo = open_repository(config, data_dir)?;
            let id = FormId::new(id)?;
            repo.delete(&id)?;
            println!("Deleted form: {}", id);
        }
        FormCommands::Save { file } => {
            let repo = open_repository(config, data_dir)?;
            let mut form = read_form(&file)?;
            match engine.save_form(&repo, &mut form) {
                Ok(id) => println!("Saved form: {}", id),
                Err(FormsError::SaveBlocked { problems, report }) => {
                    eprintln!("{}", output::report_table(&report));
                    bail!("{} not saved: {problems} blocking problem(s)", file.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        FormCommands::Check { file } => {
            let mut form = read_form(&file)?;
            form.recompute(&engine);
            let report = engine.validate_form(&form);
            format.print(&report, || {
                if report.is_clean() {
                    format!("{}", "no problems found".green())
                } else {
                    output::report_table(&report)
                }
            })?;
            if report.blocks_save() {
                bail!("{} blocking problem(s)", report.blocking_count());
            }
        }
        FormCommands::Recompute { file, now } => {
            let form = read_form(&file)?;
            let outcome = engine.recompute_at(form.fields(), now.unwrap_or_else(Utc::now));
            for diagnostic in outcome.diagnostics() {
                tracing::info!(field = %diagnostic.field_id, "{}", diagnostic.error);
            }
            let derived: Vec<&Field> = outcome.fields().iter().filter(|f| f.is_derived()).collect();
            format.print(&derived, || {
                let owned: Vec<Field> = derived.iter().map(|f| (*f).clone()).collect();
                output::fields_table(&owned)
            })?;
        }
    }
    Ok(())
}
