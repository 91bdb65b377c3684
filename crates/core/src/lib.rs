//! Record model for tracked job applications.
//!
//! Request payloads are validated here before they reach storage; the crate
//! performs no I/O.

pub mod types;
pub mod validation;

pub use types::{
    Application, ApplicationPatch, NewApplication, ValidatedApplication, ValidatedPatch,
    DEFAULT_STATUS,
};
pub use validation::{parse_date_applied, ValidationError, DATE_FORMAT};
