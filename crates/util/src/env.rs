//! Environment variable lookups with blank-value handling.

use std::env;

use thiserror::Error;

/// Error surfaced when a required environment variable is unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("environment variable {name} is not set")]
    Missing { name: String },
    #[error("environment variable {name} is set but blank")]
    Blank { name: String },
}

/// Reads `name`, treating unset and whitespace-only values as absent.
pub fn optional_env(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

/// Reads `name`, failing when it is unset or blank.
pub fn required_env(name: &str) -> Result<String, EnvError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(EnvError::Blank { name: name.to_string() }),
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => Err(EnvError::Missing { name: name.to_string() }),
    }
}
