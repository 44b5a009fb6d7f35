//! Backend configuration module
//!
//! Handles loading configuration from environment variables with sensible
//! defaults. Environment variables:
//! - `U2F_APP_ID` - application identifier (default: `https://localhost`)
//! - `U2F_TRUSTED_FACETS` - comma-separated origins allowed to answer
//!   challenges (default: the application identifier)
//! - `U2F_REQUIRE_ATTESTATION` - verify attestation signatures (default: true)
//! - `U2F_ATTESTATION_ROOTS` - comma-separated base64 DER certificates that
//!   attestation certificates must chain to (default: none)
//! - `U2F_CHALLENGE_TTL_SECS` - challenge lifetime, 0 disables (default: 300)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Duration;
use u2f_core::{VerificationPolicy, DEFAULT_CHALLENGE_TTL_SECS};
use url::Url;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid application id: {0}")]
    InvalidAppId(String),

    #[error("Invalid trusted facet {facet:?}: {reason}")]
    InvalidFacet { facet: String, reason: String },

    #[error("Invalid attestation root #{index}: {reason}")]
    InvalidAttestationRoot { index: usize, reason: String },
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Application identifier bound into every challenge
    pub app_id: String,
    /// Origins whose client data is accepted
    pub trusted_facets: Vec<String>,
    /// Verify attestation signatures on registration (default: true)
    pub require_attestation: bool,
    /// DER certificates attestation certificates must equal or be signed by
    pub attestation_roots: Vec<Vec<u8>>,
    /// Challenge lifetime in seconds, 0 = no wall-clock expiry (default: 300)
    pub challenge_ttl_secs: u64,
}

const DEFAULT_APP_ID: &str = "https://localhost";

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            trusted_facets: vec![DEFAULT_APP_ID.to_string()],
            require_attestation: true,
            attestation_roots: Vec::new(),
            challenge_ttl_secs: DEFAULT_CHALLENGE_TTL_SECS as u64,
        }
    }
}

impl Config {
    /// Configuration for an application served from `app_id` only.
    pub fn for_app(app_id: impl Into<String>) -> Self {
        let app_id = app_id.into();
        Self {
            trusted_facets: vec![app_id.clone()],
            app_id,
            ..Self::default()
        }
    }

    /// Load and validate configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_id = var("U2F_APP_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_APP_ID.to_string());

        let trusted_facets = var("U2F_TRUSTED_FACETS")
            .map(|facets| split_list(&facets))
            .filter(|facets| !facets.is_empty())
            .unwrap_or_else(|| vec![app_id.clone()]);

        let require_attestation = var("U2F_REQUIRE_ATTESTATION")
            .map(|v| v.trim().to_lowercase() != "false")
            .unwrap_or(true);

        let attestation_roots = var("U2F_ATTESTATION_ROOTS")
            .map(|roots| {
                split_list(&roots)
                    .iter()
                    .enumerate()
                    .map(|(index, root)| {
                        BASE64.decode(root).map_err(|e| ConfigError::InvalidAttestationRoot {
                            index,
                            reason: e.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let challenge_ttl_secs = var("U2F_CHALLENGE_TTL_SECS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_CHALLENGE_TTL_SECS as u64);

        let config = Self {
            app_id,
            trusted_facets,
            require_attestation,
            attestation_roots,
            challenge_ttl_secs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the application id and facets are absolute URLs and that
    /// every attestation root is an X.509 certificate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.app_id).map_err(|e| ConfigError::InvalidAppId(e.to_string()))?;

        for facet in &self.trusted_facets {
            let url = Url::parse(facet).map_err(|e| ConfigError::InvalidFacet {
                facet: facet.clone(),
                reason: e.to_string(),
            })?;
            // Client data carries a bare origin; a path can never match.
            if url.path() != "/" || facet.ends_with('/') {
                return Err(ConfigError::InvalidFacet {
                    facet: facet.clone(),
                    reason: "must be an origin without a path".to_string(),
                });
            }
        }

        for (index, root) in self.attestation_roots.iter().enumerate() {
            X509Certificate::from_der(root).map_err(|e| ConfigError::InvalidAttestationRoot {
                index,
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Verification policy handed to the core verifiers.
    pub fn policy(&self) -> VerificationPolicy {
        VerificationPolicy {
            require_attestation: self.require_attestation,
            attestation_roots: self.attestation_roots.clone(),
            // Out-of-range lifetimes behave like no expiry.
            challenge_ttl: i64::try_from(self.challenge_ttl_secs)
                .ok()
                .filter(|secs| *secs > 0)
                .and_then(Duration::try_seconds),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.app_id, "https://localhost");
        assert_eq!(config.trusted_facets, vec!["https://localhost"]);
        assert!(config.require_attestation);
        assert_eq!(config.challenge_ttl_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(vars(&[])).unwrap();
        assert_eq!(config.app_id, "https://localhost");
        assert!(config.require_attestation);
        assert_eq!(config.policy().challenge_ttl, Some(Duration::seconds(300)));
    }

    #[test]
    fn test_from_vars_overrides() {
        let config = Config::from_vars(vars(&[
            ("U2F_APP_ID", "https://vault.example.test"),
            (
                "U2F_TRUSTED_FACETS",
                "https://vault.example.test, https://login.example.test",
            ),
            ("U2F_REQUIRE_ATTESTATION", "FALSE"),
            ("U2F_CHALLENGE_TTL_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.trusted_facets.len(), 2);
        assert!(!config.require_attestation);
        let policy = config.policy();
        assert!(!policy.require_attestation);
        assert_eq!(policy.challenge_ttl, None);
    }

    #[test]
    fn test_facets_default_to_app_id() {
        let config =
            Config::from_vars(vars(&[("U2F_APP_ID", "https://vault.example.test")])).unwrap();
        assert_eq!(config.trusted_facets, vec!["https://vault.example.test"]);
    }

    #[test]
    fn test_invalid_app_id() {
        let result = Config::from_vars(vars(&[("U2F_APP_ID", "not a url")]));
        assert!(matches!(result, Err(ConfigError::InvalidAppId(_))));
    }

    #[test]
    fn test_facet_with_path_is_rejected() {
        let mut config = Config::for_app("https://vault.example.test");
        config.trusted_facets = vec!["https://vault.example.test/login".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFacet { .. })
        ));
    }

    #[test]
    fn test_invalid_attestation_root() {
        let result = Config::from_vars(vars(&[("U2F_ATTESTATION_ROOTS", "%%%")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidAttestationRoot { index: 0, .. })
        ));

        let not_a_cert = BASE64.encode(b"hello");
        let result = Config::from_vars(vars(&[("U2F_ATTESTATION_ROOTS", not_a_cert.as_str())]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidAttestationRoot { index: 0, .. })
        ));
    }
}
