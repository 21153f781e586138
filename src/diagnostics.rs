//! User-facing message helpers.
//!
//! Errors are prefixed once here so every `bail!` site reads the same, and
//! warnings go through `tracing` so the CLI filter decides what is shown.

use std::fmt::Display;

/// Prefix applied to every fatal message.
pub const ERROR_PREFIX: &str = "recordtree";

pub fn error_message(msg: impl Display) -> String {
    format!("{}: {}", ERROR_PREFIX, msg)
}

pub fn warn(msg: impl Display) {
    tracing::warn!("{}", msg);
}
