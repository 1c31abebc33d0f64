//! Certificate authority settings

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use certkeeper_common::CertificateClass;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// How to talk to the ACME certificate authority
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeSettings {
    /// Contact address registered with every new account
    #[validate(email(message = "contact-email must be a valid email address"))]
    pub contact_email: String,

    /// Directory used for PRODUCTION certificates
    #[serde(default = "default_production_directory")]
    #[validate(custom(function = "crate::validation::validate_directory_url"))]
    pub production_directory: String,

    /// Directory used for STAGING certificates
    #[serde(default = "default_staging_directory")]
    #[validate(custom(function = "crate::validation::validate_directory_url"))]
    pub staging_directory: String,

    /// Upper bound on any single call to the authority
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,

    /// Upper bound on waiting for authorizations and the certificate
    #[serde(default = "default_validation_timeout")]
    #[validate(range(min = 1, max = 3600))]
    pub validation_timeout_secs: u64,

    /// Delay between order status polls
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 10, max = 60000))]
    pub poll_interval_ms: u64,
}

impl AcmeSettings {
    pub fn new(contact_email: impl Into<String>) -> Self {
        Self {
            contact_email: contact_email.into(),
            production_directory: default_production_directory(),
            staging_directory: default_staging_directory(),
            request_timeout_secs: default_request_timeout(),
            validation_timeout_secs: default_validation_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }

    /// Directory URL for a certificate class
    pub fn directory_for(&self, class: CertificateClass) -> &str {
        match class {
            CertificateClass::Production => &self.production_directory,
            CertificateClass::Staging => &self.staging_directory,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_production_directory() -> String {
    LETSENCRYPT_PRODUCTION.to_string()
}

fn default_staging_directory() -> String {
    LETSENCRYPT_STAGING.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_validation_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    2000
}
