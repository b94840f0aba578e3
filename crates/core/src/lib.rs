//! gmf-core: Shared GMF module types and validation
//!
//! This crate provides the data model for the restricted ("safe mode")
//! subset of the Synthea Generic Module Framework, the disease profile
//! type that drives module generation, and the validators the repair
//! loop runs candidates through. Everything here is pure: no I/O, no
//! model calls, no shared state.

pub mod error;
pub mod module;
pub mod profile;
pub mod validate;

// Re-export our types
pub use error::GmfError;
pub use module::{Code, Module, State};
pub use profile::DiseaseProfile;
pub use validate::{Defect, Validation, ValidationReport};
