//! Validator errors.
//!
//! These are faults of the validator itself (bad schema files, missing
//! versions), never of the document under validation.

use ddocache_core::DdoVersion;
use thiserror::Error;

/// Validator fault.
#[derive(Error, Debug)]
pub enum ValidatorError {
    /// Embedded schema failed to parse, compile or pin its version.
    #[error("Invalid schema for {version}: {reason}")]
    InvalidSchema {
        /// Version the schema was loaded for.
        version: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A version in the allow-list has no loaded schema.
    #[error("No schema loaded for version {0}")]
    MissingSchema(DdoVersion),
}
