//! Configuration module for certkeeper
//!
//! This module provides configuration parsing and validation. Values are
//! loaded once and handed explicitly to the components that need them;
//! nothing reads configuration from global state.
//!
//! # Module Organization
//!
//! - [`acme`]: Certificate authority directories and timeouts
//! - [`dns`]: DNS provider timeouts, default profile and propagation checks
//! - [`observability`]: Logging configuration
//! - [`validation`]: Field and cross-field validation functions
//! - [`defaults`]: Example configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

use certkeeper_common::DnsProfile;

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
mod defaults;
pub mod dns;
pub mod observability;
pub mod validation;

// ============================================================================
// Re-exports
// ============================================================================

pub use acme::{AcmeSettings, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use defaults::EXAMPLE_CONFIG_TOML;
pub use dns::{DnsSettings, PropagationSettings};
pub use observability::LoggingSettings;

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Main configuration structure for certkeeper
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validation::validate_config_semantics"))]
pub struct Config {
    /// Certificate authority settings
    #[validate(nested)]
    pub acme: AcmeSettings,

    /// Where certificate files are written
    pub storage: StorageSettings,

    /// DNS provider settings
    #[serde(default)]
    #[validate(nested)]
    pub dns: DnsSettings,

    /// DNS profiles available to certificate requests
    #[serde(default)]
    pub profiles: Vec<DnsProfile>,

    /// Logging configuration
    #[serde(default)]
    #[validate(nested)]
    pub logging: LoggingSettings,
}

/// Certificate file storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory; each certificate gets a sub-directory named after its
    /// primary domain
    pub ssl_directory: PathBuf,
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Config {
    /// Load configuration from a file, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("toml");

        match extension {
            "toml" => Self::from_toml(&content),
            "json" => Self::from_json(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
        .with_context(|| format!("Invalid configuration in {:?}", path))
    }

    /// Parse configuration from TOML
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML configuration")?;
        config.validated()
    }

    /// Parse configuration from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).context("Failed to parse JSON configuration")?;
        config.validated()
    }

    /// Minimal configuration for the given contact address and directory
    pub fn new(contact_email: impl Into<String>, ssl_directory: impl Into<PathBuf>) -> Self {
        Self {
            acme: AcmeSettings::new(contact_email),
            storage: StorageSettings {
                ssl_directory: ssl_directory.into(),
            },
            dns: DnsSettings::default(),
            profiles: Vec::new(),
            logging: LoggingSettings::default(),
        }
    }

    fn validated(self) -> Result<Self> {
        self.validate().context("Configuration validation failed")?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certkeeper_common::{CertificateClass, LogFormat, ProfileId};
    use std::io::Write;

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_toml(EXAMPLE_CONFIG_TOML).unwrap();
        assert_eq!(config.acme.contact_email, "admin@example.com");
        assert_eq!(config.dns.default_profile, Some(ProfileId::new(1)));
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].zone_id, "0123456789abcdef");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(
            config.acme.directory_for(CertificateClass::Staging),
            LETSENCRYPT_STAGING
        );
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = Config::from_json(
            r#"{"acme": {"contact_email": "ops@example.org"},
                "storage": {"ssl_directory": "/tmp/ssl"}}"#,
        )
        .unwrap();

        assert_eq!(config.acme.request_timeout_secs, 30);
        assert_eq!(config.acme.validation_timeout_secs, 120);
        assert_eq!(config.dns.api_timeout_secs, 30);
        assert!(config.dns.propagation.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.acme.directory_for(CertificateClass::Production),
            LETSENCRYPT_PRODUCTION
        );
    }

    #[test]
    fn test_invalid_email_rejected() {
        let result = Config::from_json(
            r#"{"acme": {"contact_email": "not-an-email"},
                "storage": {"ssl_directory": "/tmp/ssl"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_profile_ids_rejected() {
        let result = Config::from_toml(
            r#"
            [acme]
            contact_email = "ops@example.org"
            [storage]
            ssl_directory = "/tmp/ssl"
            [[profiles]]
            id = 3
            create_url = "https://dns/a"
            [[profiles]]
            id = 3
            create_url = "https://dns/b"
            "#,
        );
        let err = format!("{:#}", result.unwrap_err());
        assert!(err.contains("more than once"), "{}", err);
    }

    #[test]
    fn test_default_profile_must_exist() {
        let result = Config::from_toml(
            r#"
            [acme]
            contact_email = "ops@example.org"
            [storage]
            ssl_directory = "/tmp/ssl"
            [dns]
            default_profile = 9
            [[profiles]]
            id = 3
            create_url = "https://dns/a"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("certkeeper.toml");
        std::fs::File::create(&toml_path)
            .unwrap()
            .write_all(EXAMPLE_CONFIG_TOML.as_bytes())
            .unwrap();
        assert!(Config::from_file(&toml_path).is_ok());

        let yaml_path = dir.path().join("certkeeper.yaml");
        std::fs::write(&yaml_path, "acme: {}").unwrap();
        assert!(Config::from_file(&yaml_path).is_err());
    }
}
