//! DNS-01 challenge records

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::authority::PendingAuthorization;

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// Strip a leading `*.` wildcard label
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// `_acme-challenge.<domain>`, using the base domain for wildcards
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

/// The TXT value for a key authorization: base64url(SHA-256(key_authorization))
pub fn compute_challenge_value(key_authorization: &str) -> String {
    let digest = Sha256::digest(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// One record to publish for one authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    /// Domain being authorized
    pub domain: String,
    /// Full record name, e.g. `_acme-challenge.example.com`
    pub record_name: String,
    /// Expected TXT content
    pub value: String,
    /// Where readiness is signalled
    pub challenge_url: String,
}

impl ChallengeRecord {
    pub fn from_authorization(authorization: &PendingAuthorization) -> Self {
        Self {
            domain: authorization.domain.clone(),
            record_name: challenge_record_fqdn(&authorization.domain),
            value: compute_challenge_value(&authorization.key_authorization),
            challenge_url: authorization.challenge_url.clone(),
        }
    }
}
