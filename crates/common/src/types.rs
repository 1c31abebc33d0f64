//! Common type definitions shared by the configuration and issuer crates.
//!
//! For identifier types (CertificateId, ProfileId, etc.), see the `ids` module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{CertificateId, ProfileId, UserId};

// ============================================================================
// Certificate class
// ============================================================================

/// Which certificate authority directory a certificate is issued against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificateClass {
    /// Publicly trusted certificates
    #[default]
    Production,
    /// Untrusted test certificates with relaxed rate limits
    Staging,
}

impl CertificateClass {
    /// Lenient mapping used for create requests: anything that is not a
    /// recognised class (including no value) becomes `Production`.
    pub fn from_input(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Small-integer encoding used in storage
    pub const fn code(self) -> u8 {
        match self {
            CertificateClass::Production => 1,
            CertificateClass::Staging => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CertificateClass::Production),
            2 => Some(CertificateClass::Staging),
            _ => None,
        }
    }

    pub fn is_staging(self) -> bool {
        self == CertificateClass::Staging
    }
}

impl FromStr for CertificateClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(CertificateClass::Production),
            "staging" => Ok(CertificateClass::Staging),
            other => Err(format!("unknown certificate type '{}'", other)),
        }
    }
}

impl fmt::Display for CertificateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateClass::Production => write!(f, "PRODUCTION"),
            CertificateClass::Staging => write!(f, "STAGING"),
        }
    }
}

// ============================================================================
// DNS profile
// ============================================================================

/// Provider-agnostic description of how to create and delete a TXT record.
///
/// URL templates may contain `{zone.id}`, `{record.name}`, `{record.value}`
/// and `{domain.name}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsProfile {
    pub id: ProfileId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Provider label, informational only
    #[serde(default)]
    pub provider: String,

    /// Secret sent as a bearer token
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub zone_id: String,

    /// Template used to publish a record
    #[serde(default)]
    pub create_url: String,

    /// Template used to retract a record; falls back to `create_url`
    #[serde(default)]
    pub delete_url: Option<String>,

    /// HTTP method for publishing; `POST` when absent
    #[serde(default)]
    pub method: Option<String>,
}

impl fmt::Debug for DnsProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("zone_id", &self.zone_id)
            .field("create_url", &self.create_url)
            .field("delete_url", &self.delete_url)
            .field("method", &self.method)
            .finish()
    }
}

// ============================================================================
// Certificate record
// ============================================================================

/// A persisted certificate entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub name: String,
    pub description: Option<String>,
    pub created_by: UserId,
    #[serde(rename = "type")]
    pub class: CertificateClass,
    /// Deduplicated domain set; the first entry is the primary domain
    pub domains: Vec<String>,
    pub dns_profile: ProfileId,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Certificate {
    /// The domain whose name the certificate directory carries
    pub fn primary_domain(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }

    pub fn covers(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d == domain)
    }
}
