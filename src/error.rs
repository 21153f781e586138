//! Typed errors raised by the engine and pipeline assembly.
//!
//! Absence of a field is not represented here; it is a normal outcome
//! reported through [`crate::FieldPresence`].

use crate::path::FieldPath;
use thiserror::Error;

/// The payload store could not return bytes for a locator.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("read {locator}: {source}")]
    Io {
        locator: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no payload stored for {0}")]
    Missing(String),

    #[error("container file of {0} is not a plain relative path")]
    OutsideDataDir(String),

    #[error("short read for {locator}: expected {expected} bytes, got {got}")]
    Truncated {
        locator: String,
        expected: u64,
        got: u64,
    },
}

/// Pipeline assembly failures. Always fatal, raised before any record is
/// processed (or when a caller asks for something never assembled).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("step '{step}' depends on '{dependency}', which no step produces")]
    UnknownDependency { step: String, dependency: FieldPath },

    #[error("field '{path}' is produced by two different functions ('{first}' and '{second}')")]
    NameCollision {
        path: FieldPath,
        first: String,
        second: String,
    },

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("function '{0}' is not registered in this pipeline")]
    Unregistered(String),

    #[error("no step produces field '{0}'")]
    UnknownField(FieldPath),

    #[error("step '{step}': unknown function '{function}'")]
    UnknownFunction { step: String, function: String },

    #[error("step '{step}': {message}")]
    InvalidStep { step: String, message: String },
}

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("single-valued function '{function}' returned {count} values")]
    ContractViolation { function: String, count: usize },
}

impl DerivationError {
    pub fn is_fetch(&self) -> bool {
        matches!(self, DerivationError::Fetch(_))
    }
}
