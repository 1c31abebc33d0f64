//! Certificate and DNS profile persistence
//!
//! The core talks to storage only through [`CertificateStore`] and
//! [`ProfileStore`]. Uniqueness of names and domains is enforced by the
//! store itself on [`CertificateStore::insert`] and
//! [`CertificateStore::update`], so two requests that both pass the
//! pre-checks cannot both succeed.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use thiserror::Error;

use certkeeper_common::{Certificate, CertificateClass, CertificateId, DnsProfile, ErrorKind, ProfileId};

pub use memory::MemoryStore;

/// Errors raised by store implementations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Another certificate already uses this name
    #[error("A certificate with the name '{name}' already exists")]
    NameConflict { name: String },

    /// A non-disabled certificate of the same class already covers the domain
    #[error("Domain '{domain}' is already in use by certificate {existing}")]
    DomainConflict {
        domain: String,
        existing: CertificateId,
    },

    /// No certificate with this id exists
    #[error("Certificate {id} not found")]
    NotFound { id: CertificateId },

    /// The backing store could not be reached
    #[error("Certificate store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NameConflict { .. } | Self::DomainConflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unavailable(_) => ErrorKind::Storage,
        }
    }
}

/// Column changes applied by [`CertificateStore::update`]; `None` leaves a
/// column untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    pub class: Option<CertificateClass>,
    pub domains: Option<Vec<String>>,
    pub dns_profile: Option<ProfileId>,
    pub disabled: Option<bool>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CertificateUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the changes to a loaded record
    pub fn apply_to(&self, cert: &mut Certificate) {
        if let Some(name) = &self.name {
            cert.name = name.clone();
        }
        if let Some(description) = &self.description {
            cert.description = description.clone();
        }
        if let Some(class) = self.class {
            cert.class = class;
        }
        if let Some(domains) = &self.domains {
            cert.domains = domains.clone();
        }
        if let Some(profile) = self.dns_profile {
            cert.dns_profile = profile;
        }
        if let Some(disabled) = self.disabled {
            cert.disabled = disabled;
        }
        if let Some(issued_at) = self.issued_at {
            cert.issued_at = Some(issued_at);
        }
        if let Some(expires_at) = self.expires_at {
            cert.expires_at = Some(expires_at);
        }
    }
}

/// Certificate record storage
#[async_trait]
pub trait CertificateStore: Send + Sync + Debug {
    async fn exists_by_name(&self, name: &str) -> Result<bool, StoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Certificate>, StoreError>;

    /// The id of a non-disabled certificate of `class` covering `domain`,
    /// ignoring `exclude`
    async fn find_domain_conflict(
        &self,
        domain: &str,
        class: CertificateClass,
        exclude: Option<&CertificateId>,
    ) -> Result<Option<CertificateId>, StoreError>;

    async fn get(&self, id: &CertificateId) -> Result<Option<Certificate>, StoreError>;

    /// Insert a new record, re-checking name and domain uniqueness atomically
    async fn insert(&self, cert: Certificate) -> Result<CertificateId, StoreError>;

    /// Apply column changes, re-checking uniqueness against other records
    async fn update(
        &self,
        id: &CertificateId,
        update: CertificateUpdate,
    ) -> Result<Certificate, StoreError>;
}

/// Read-only access to DNS profiles
#[async_trait]
pub trait ProfileStore: Send + Sync + Debug {
    async fn find_profile(&self, id: ProfileId) -> Result<Option<DnsProfile>, StoreError>;
}
