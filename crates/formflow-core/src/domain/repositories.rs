//! Repositories - Persistence abstraction for the Form aggregate
//!
//! Repository pattern:
//! - Abstracts persistence details
//! - Works with whole aggregates
//! - Synchronous; the gateway is the only I/O component

use super::aggregates::*;
use super::value_objects::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Repository result type
pub type RepoResult<T> = Result<T, RepositoryError>;

/// Repository errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Form persistence gateway
///
/// Forms are immutable once stored: saving an id that already exists is a
/// [`RepositoryError::Conflict`].
pub trait FormRepository: Send + Sync {
    /// Store a new form
    fn save(&self, form: &Form) -> RepoResult<FormId>;

    /// Load form by ID
    fn load(&self, id: &FormId) -> RepoResult<Form>;

    /// Summaries of all stored forms, oldest first
    fn list(&self) -> RepoResult<Vec<FormSummary>>;

    /// Delete form by ID
    fn delete(&self, id: &FormId) -> RepoResult<()>;
}

/// In-memory form repository (for testing and embedding)
pub struct InMemoryFormRepository {
    forms: RwLock<HashMap<FormId, Form>>,
}

impl InMemoryFormRepository {
    pub fn new() -> Self {
        Self {
            forms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryFormRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FormRepository for InMemoryFormRepository {
    fn save(&self, form: &Form) -> RepoResult<FormId> {
        let mut forms = self.forms.write();
        if forms.contains_key(form.id()) {
            return Err(RepositoryError::Conflict(form.id().to_string()));
        }
        forms.insert(form.id().clone(), form.clone());
        tracing::info!(form = %form.id(), name = form.name(), "form saved");
        Ok(form.id().clone())
    }

    fn load(&self, id: &FormId) -> RepoResult<Form> {
        self.forms
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    fn list(&self) -> RepoResult<Vec<FormSummary>> {
        let mut summaries: Vec<_> = self.forms.read().values().map(Form::summary).collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    fn delete(&self, id: &FormId) -> RepoResult<()> {
        self.forms
            .write()
            .remove(id)
            .map(|_| tracing::info!(form = %id, "form deleted"))
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }
}

/// One pretty-printed JSON document per form, named `<id>.json`
pub struct JsonFileFormRepository {
    dir: PathBuf,
}

impl JsonFileFormRepository {
    /// Open (and create if needed) the data directory
    pub fn open(dir: impl Into<PathBuf>) -> RepoResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| storage(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &FormId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read(&self, path: &Path) -> RepoResult<Form> {
        let data = std::fs::read_to_string(path).map_err(|e| storage(path, e))?;
        serde_json::from_str(&data).map_err(|e| storage(path, e))
    }
}

impl FormRepository for JsonFileFormRepository {
    fn save(&self, form: &Form) -> RepoResult<FormId> {
        let path = self.path_for(form.id());
        if path.exists() {
            return Err(RepositoryError::Conflict(form.id().to_string()));
        }
        let data = serde_json::to_string_pretty(form).map_err(|e| storage(&path, e))?;
        std::fs::write(&path, data).map_err(|e| storage(&path, e))?;
        tracing::info!(form = %form.id(), path = %path.display(), "form saved");
        Ok(form.id().clone())
    }

    fn load(&self, id: &FormId) -> RepoResult<Form> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        tracing::debug!(form = %id, "loading form");
        self.read(&path)
    }

    fn list(&self) -> RepoResult<Vec<FormSummary>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| storage(&self.dir, e))?;
        let mut summaries = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| storage(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            summaries.push(self.read(&path)?.summary());
        }
        sort_summaries(&mut summaries);
        tracing::debug!(count = summaries.len(), "listed forms");
        Ok(summaries)
    }

    fn delete(&self, id: &FormId) -> RepoResult<()> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        std::fs::remove_file(&path).map_err(|e| storage(&path, e))?;
        tracing::info!(form = %id, "form deleted");
        Ok(())
    }
}

fn sort_summaries(summaries: &mut [FormSummary]) {
    summaries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn storage(path: &Path, err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::StorageError(format!("{}: {err}", path.display()))
}
