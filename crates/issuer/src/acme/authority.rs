//! Certificate authority seam
//!
//! The orchestrator drives issuance through these traits. [`AcmeAuthority`]
//! implements them with `instant-acme`; tests plug in scripted authorities.
//!
//! [`AcmeAuthority`]: super::AcmeAuthority

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// Errors reported by an authority
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The authority offered no DNS-01 challenge for a domain
    #[error("No DNS-01 challenge available for domain '{0}'")]
    NoDnsChallenge(String),

    /// An operation needs an order but none was created
    #[error("No order has been created in this session")]
    NoOrder,

    /// ACME protocol or transport error
    #[error("ACME protocol error: {0}")]
    Protocol(String),
}

impl From<instant_acme::Error> for AuthorityError {
    fn from(e: instant_acme::Error) -> Self {
        AuthorityError::Protocol(e.to_string())
    }
}

/// A DNS-01 challenge awaiting a TXT record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub domain: String,
    /// Key authorization; the TXT value is derived from it
    pub key_authorization: String,
    pub challenge_url: String,
}

/// Order status as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderProgress {
    /// Authorizations or issuance still in progress
    Pending,
    /// All authorizations valid; the CSR can be submitted
    Ready,
    /// The certificate is available for download
    Valid,
    /// The order failed; `domain` names the failed authorization when known
    Invalid {
        domain: Option<String>,
        detail: Option<String>,
    },
}

/// Entry point of an authority: registers an account for one issuance
#[async_trait]
pub trait CertificateAuthority: Send + Sync + Debug {
    /// Register a fresh account at `directory_url`, agreeing to the terms of
    /// service with `contact_email` as contact
    async fn register_account(
        &self,
        directory_url: &str,
        contact_email: &str,
    ) -> Result<Box<dyn AuthoritySession>, AuthorityError>;
}

/// One account and at most one order
#[async_trait]
pub trait AuthoritySession: Send {
    /// Create an order covering `domains` and return the pending DNS-01
    /// challenges; already valid authorizations are skipped
    async fn new_order(
        &mut self,
        domains: &[String],
    ) -> Result<Vec<PendingAuthorization>, AuthorityError>;

    /// Tell the authority the record for `challenge_url` is in place
    async fn set_challenge_ready(&mut self, challenge_url: &str) -> Result<(), AuthorityError>;

    async fn poll_order(&mut self) -> Result<OrderProgress, AuthorityError>;

    /// Submit the DER-encoded CSR
    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AuthorityError>;

    /// The issued PEM chain, once the order is valid
    async fn certificate(&mut self) -> Result<Option<String>, AuthorityError>;
}
