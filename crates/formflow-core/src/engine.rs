//! Engine facade: configuration bound to validation, recomputation and saving

use crate::config::EngineConfig;
use crate::domain::{Field, FieldValue, Form, FormId, FormRepository};
use crate::error::{FormsError, Result};
use crate::recompute::{recompute_fields, Recomputed};
use crate::validation::{FormReport, Validator, Violation};
use chrono::{DateTime, Utc};

/// Validation and recomputation with one configuration
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Recompute derived fields against the current clock
    pub fn recompute<'a>(&self, fields: &'a [Field]) -> Recomputed<'a> {
        self.recompute_at(fields, Utc::now())
    }

    /// Recompute derived fields with a fixed `now`
    pub fn recompute_at<'a>(&self, fields: &'a [Field], now: DateTime<Utc>) -> Recomputed<'a> {
        recompute_fields(fields, now.timestamp_millis() as f64, &self.config)
    }

    pub fn validate_field(&self, field: &Field, candidate: &FieldValue) -> Vec<Violation> {
        Validator::new(&self.config).field(field, candidate)
    }

    pub fn validate_form(&self, form: &Form) -> FormReport {
        Validator::new(&self.config).form(form)
    }

    /// Recompute, validate, then store the form
    ///
    /// Definition errors and author-time violations refuse the save with
    /// [`FormsError::SaveBlocked`]; runtime value violations do not.
    pub fn save_form(&self, repo: &dyn FormRepository, form: &mut Form) -> Result<FormId> {
        form.recompute(self);

        let report = self.validate_form(form);
        if report.blocks_save() {
            tracing::warn!(form = %form.id(), problems = report.blocking_count(), "save blocked");
            return Err(FormsError::SaveBlocked {
                problems: report.blocking_count(),
                report: Box::new(report),
            });
        }
        Ok(repo.save(form)?)
    }
}

/// Save with the default engine
pub fn save_form(repo: &dyn FormRepository, form: &mut Form) -> Result<FormId> {
    Engine::default().save_form(repo, form)
}
