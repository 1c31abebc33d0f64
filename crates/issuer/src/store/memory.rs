//! In-process store backed by hash maps
//!
//! Used by the CLI and by tests. Every check-and-write runs under one write
//! lock, which gives the same guarantee a unique index gives a database.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use certkeeper_common::{Certificate, CertificateClass, CertificateId, DnsProfile, ProfileId};

use super::{CertificateStore, CertificateUpdate, ProfileStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    certificates: RwLock<HashMap<CertificateId, Certificate>>,
    profiles: RwLock<HashMap<ProfileId, DnsProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with the given DNS profiles
    pub fn with_profiles(profiles: impl IntoIterator<Item = DnsProfile>) -> Self {
        let store = Self::new();
        for profile in profiles {
            store.put_profile(profile);
        }
        store
    }

    pub fn put_profile(&self, profile: DnsProfile) {
        self.profiles.write().insert(profile.id, profile);
    }

    pub fn len(&self) -> usize {
        self.certificates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.read().is_empty()
    }

    /// Snapshot of every stored record
    pub fn certificates(&self) -> Vec<Certificate> {
        self.certificates.read().values().cloned().collect()
    }
}

fn name_taken(
    certificates: &HashMap<CertificateId, Certificate>,
    name: &str,
    exclude: Option<&CertificateId>,
) -> bool {
    certificates
        .values()
        .any(|c| c.name == name && Some(&c.id) != exclude)
}

fn domain_owner<'a>(
    certificates: &'a HashMap<CertificateId, Certificate>,
    domain: &str,
    class: CertificateClass,
    exclude: Option<&CertificateId>,
) -> Option<&'a CertificateId> {
    certificates
        .values()
        .find(|c| !c.disabled && c.class == class && Some(&c.id) != exclude && c.covers(domain))
        .map(|c| &c.id)
}

/// Uniqueness check for a record about to be stored as `candidate`
fn check_unique(
    certificates: &HashMap<CertificateId, Certificate>,
    candidate: &Certificate,
    exclude: Option<&CertificateId>,
) -> Result<(), StoreError> {
    if name_taken(certificates, &candidate.name, exclude) {
        return Err(StoreError::NameConflict {
            name: candidate.name.clone(),
        });
    }

    if candidate.disabled {
        return Ok(());
    }

    for domain in &candidate.domains {
        if let Some(existing) = domain_owner(certificates, domain, candidate.class, exclude) {
            return Err(StoreError::DomainConflict {
                domain: domain.clone(),
                existing: existing.clone(),
            });
        }
    }

    Ok(())
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn exists_by_name(&self, name: &str) -> Result<bool, StoreError> {
        Ok(name_taken(&self.certificates.read(), name, None))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Certificate>, StoreError> {
        Ok(self
            .certificates
            .read()
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn find_domain_conflict(
        &self,
        domain: &str,
        class: CertificateClass,
        exclude: Option<&CertificateId>,
    ) -> Result<Option<CertificateId>, StoreError> {
        Ok(domain_owner(&self.certificates.read(), domain, class, exclude).cloned())
    }

    async fn get(&self, id: &CertificateId) -> Result<Option<Certificate>, StoreError> {
        Ok(self.certificates.read().get(id).cloned())
    }

    async fn insert(&self, cert: Certificate) -> Result<CertificateId, StoreError> {
        let mut certificates = self.certificates.write();
        check_unique(&certificates, &cert, None)?;

        let id = cert.id.clone();
        debug!(certificate_id = %id, name = %cert.name, "Inserting certificate record");
        certificates.insert(id.clone(), cert);
        Ok(id)
    }

    async fn update(
        &self,
        id: &CertificateId,
        update: CertificateUpdate,
    ) -> Result<Certificate, StoreError> {
        let mut certificates = self.certificates.write();

        let mut candidate = certificates
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
        update.apply_to(&mut candidate);
        check_unique(&certificates, &candidate, Some(id))?;

        debug!(certificate_id = %id, "Updating certificate record");
        certificates.insert(id.clone(), candidate.clone());
        Ok(candidate)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_profile(&self, id: ProfileId) -> Result<Option<DnsProfile>, StoreError> {
        Ok(self.profiles.read().get(&id).cloned())
    }
}
