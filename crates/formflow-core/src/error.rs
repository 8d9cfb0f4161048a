//! Error types for formflow

use crate::domain::repositories::RepositoryError;
use crate::domain::value_objects::{FieldId, FieldKind};
use thiserror::Error;

/// formflow error type
#[derive(Error, Debug)]
pub enum FormsError {
    /// Field identifier rejected by [`FieldId::new`]
    #[error("invalid field id {id:?}: {reason}")]
    InvalidFieldId { id: String, reason: &'static str },

    /// Form identifier rejected by `FormId::new`
    #[error("invalid form id: {0}")]
    InvalidFormId(&'static str),

    /// Field not present in the form
    #[error("field not found: {0}")]
    FieldNotFound(FieldId),

    /// Field id already used in the form
    #[error("duplicate field id: {0}")]
    DuplicateField(FieldId),

    /// Reorder index outside the field list
    #[error("field index {index} out of range for {len} fields")]
    FieldIndexOutOfRange { index: usize, len: usize },

    /// Attribute does not exist on this field kind
    #[error("attribute `{attribute}` does not apply to {kind} fields")]
    InapplicableAttribute {
        attribute: &'static str,
        kind: FieldKind,
    },

    /// Candidate value shape does not match the field kind
    #[error("{kind} fields cannot hold this value")]
    ValueShapeMismatch { kind: FieldKind },

    /// Save refused because of definition errors
    #[error("form cannot be saved: {problems} blocking problem(s)")]
    SaveBlocked {
        problems: usize,
        report: Box<crate::validation::FormReport>,
    },

    /// Persistence gateway failure
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result type for formflow
pub type Result<T> = std::result::Result<T, FormsError>;
