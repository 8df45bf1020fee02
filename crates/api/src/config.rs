//! Client configuration resolved from the environment.
//!
//! Credentials come from `CLIENT_ID`, `CLIENT_SECRET`, `TENANT_ID` and `SUBSCRIPTION_ID`. The
//! management endpoint is taken from `PROVISION_API_BASE` when set and validated before use.

use std::fmt;

use provisioner_util::{EnvError, optional_env, required_env};
use thiserror::Error;
use url::Url;

pub const CLIENT_ID_ENV: &str = "CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "CLIENT_SECRET";
pub const TENANT_ID_ENV: &str = "TENANT_ID";
pub const SUBSCRIPTION_ID_ENV: &str = "SUBSCRIPTION_ID";
pub const API_BASE_ENV: &str = "PROVISION_API_BASE";
pub const DEFAULT_API_BASE: &str = "https://management.azure.com";

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Error surfaced when the client configuration is incomplete or unsafe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("invalid PROVISION_API_BASE '{value}': {reason}")]
    InvalidBaseUrl { value: String, reason: String },
}

impl ConfigError {
    fn invalid_base_url(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBaseUrl {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Service principal credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Everything the REST client needs to reach the management API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub subscription_id: String,
    pub credentials: Credentials,
}

impl ClientConfig {
    /// Build a [`ClientConfig`] from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] when a credential variable is missing or blank, and
    /// [`ConfigError::InvalidBaseUrl`] when `PROVISION_API_BASE` fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let credentials = Credentials {
            tenant_id: required_env(TENANT_ID_ENV)?,
            client_id: required_env(CLIENT_ID_ENV)?,
            client_secret: required_env(CLIENT_SECRET_ENV)?,
        };
        let subscription_id = required_env(SUBSCRIPTION_ID_ENV)?;
        let base_url = optional_env(API_BASE_ENV).unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        validate_base_url(&base_url)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            subscription_id,
            credentials,
        })
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(base).map_err(|error| ConfigError::invalid_base_url(base, error.to_string()))?;
    let host_name = parsed
        .host_str()
        .ok_or_else(|| ConfigError::invalid_base_url(base, "missing host"))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }

    if parsed.scheme() != "https" {
        return Err(ConfigError::invalid_base_url(
            base,
            format!("https is required for non-localhost hosts; got '{}://'", parsed.scheme()),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_rules() {
        assert!(validate_base_url("https://management.example.com").is_ok());
        assert!(validate_base_url("http://localhost:8080").is_ok());
        assert!(validate_base_url("http://127.0.0.1").is_ok());

        let error = validate_base_url("http://management.example.com").expect_err("plain http rejected");
        assert!(error.to_string().contains("https is required"));
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn from_env_reads_credentials_and_trims_base_url() {
        temp_env::with_vars(
            [
                (TENANT_ID_ENV, Some("tenant")),
                (CLIENT_ID_ENV, Some("client")),
                (CLIENT_SECRET_ENV, Some("secret")),
                (SUBSCRIPTION_ID_ENV, Some("sub-1")),
                (API_BASE_ENV, Some("http://localhost:9000/")),
            ],
            || {
                let config = ClientConfig::from_env().expect("config from env");
                assert_eq!(config.base_url, "http://localhost:9000");
                assert_eq!(config.subscription_id, "sub-1");
                assert_eq!(config.credentials.client_secret, "secret");
            },
        );
    }

    #[test]
    fn from_env_reports_missing_credentials() {
        temp_env::with_vars(
            [
                (TENANT_ID_ENV, Some("tenant")),
                (CLIENT_ID_ENV, None),
                (CLIENT_SECRET_ENV, Some("secret")),
                (SUBSCRIPTION_ID_ENV, Some("sub-1")),
            ],
            || {
                let error = ClientConfig::from_env().expect_err("client id missing");
                assert_eq!(
                    error,
                    ConfigError::Env(EnvError::Missing {
                        name: CLIENT_ID_ENV.into()
                    })
                );
            },
        );
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let credentials = Credentials {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "very-secret".into(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("client"));
    }
}
