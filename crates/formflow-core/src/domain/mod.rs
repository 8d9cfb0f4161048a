//! Form Domain Model
//!
//! - **Value Objects**: FieldId, FormId, FieldKind, FieldValue, DerivedFieldError
//! - **Aggregates**: Form (root) owning an ordered list of Field entities
//! - **Repositories**: FormRepository with in-memory and JSON file backends
//!
//! Field kinds are a closed sum type ([`FieldSpec`]); each variant carries
//! exactly the attributes its kind supports.

pub mod value_objects;
pub mod aggregates;
pub mod repositories;

pub use value_objects::*;
pub use aggregates::*;
pub use repositories::*;
