//! Certificate operations
//!
//! [`CertificateService`] runs each request through validation, the
//! capability check, store pre-checks and profile resolution before handing
//! it to the [`Orchestrator`]. Uniqueness is checked again by the store on
//! the final write, so the pre-checks only make the common conflict cheap.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certkeeper_common::{Capability, CapabilitySet, Certificate, CertificateClass, CertificateId, UserId};
use certkeeper_config::Config;

use crate::acme::{CertificateAuthority, IssuanceJob, IssuedCertificate, Orchestrator, RecordWrite};
use crate::dns::{ProfileResolver, ProvisionError};
use crate::error::CertkeeperError;
use crate::store::{CertificateStore, CertificateUpdate, ProfileStore, StoreError};
use crate::validation::{CertificateRequest, RequestValidator};

pub use crate::validation::UpdateMode;

/// An authenticated caller and the capabilities it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: UserId,
    pub capabilities: CapabilitySet,
}

impl Caller {
    pub fn new(user: UserId, capabilities: CapabilitySet) -> Self {
        Self { user, capabilities }
    }

    /// Fail closed unless the caller holds `capability`
    pub fn require(&self, capability: Capability) -> Result<(), CertkeeperError> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            warn!(user = %self.user, capability = %capability, "Permission denied");
            Err(CertkeeperError::PermissionDenied { capability })
        }
    }
}

#[derive(Debug)]
pub struct CertificateService {
    validator: RequestValidator,
    store: Arc<dyn CertificateStore>,
    resolver: ProfileResolver,
    orchestrator: Orchestrator,
}

impl CertificateService {
    pub fn new(
        validator: RequestValidator,
        store: Arc<dyn CertificateStore>,
        resolver: ProfileResolver,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            validator,
            store,
            resolver,
            orchestrator,
        }
    }

    /// Wire every component from configuration
    pub fn from_config(
        config: &Config,
        certificates: Arc<dyn CertificateStore>,
        profiles: Arc<dyn ProfileStore>,
        authority: Arc<dyn CertificateAuthority>,
    ) -> Result<Self, ProvisionError> {
        let orchestrator = Orchestrator::from_config(config, authority, Arc::clone(&certificates))?;
        Ok(Self::new(
            RequestValidator::new(config.dns.default_profile),
            certificates,
            ProfileResolver::new(profiles),
            orchestrator,
        ))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Fetch a certificate record
    pub async fn get(
        &self,
        caller: &Caller,
        id: &CertificateId,
    ) -> Result<Certificate, CertkeeperError> {
        caller.require(Capability::ViewCertificates)?;
        self.load(id).await
    }

    /// Validate a request and issue a new certificate for it
    pub async fn create(
        &self,
        caller: &Caller,
        request: &CertificateRequest,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, CertkeeperError> {
        let validated = self.validator.validate_create(request)?;
        caller.require(Capability::CreateCertificates)?;

        if self.store.exists_by_name(&validated.name).await? {
            return Err(StoreError::NameConflict {
                name: validated.name,
            }
            .into());
        }
        self.check_domains(&validated.domains, validated.class, None)
            .await?;

        let profile = self.resolver.resolve(validated.profile).await?;

        let certificate = Certificate {
            id: CertificateId::generate(),
            name: validated.name,
            description: validated.description,
            created_by: caller.user.clone(),
            class: validated.class,
            domains: validated.domains.clone(),
            dns_profile: profile.id,
            disabled: false,
            created_at: Utc::now(),
            issued_at: None,
            expires_at: None,
        };
        info!(
            certificate_id = %certificate.id,
            name = %certificate.name,
            user = %caller.user,
            "Creating certificate"
        );

        let job = IssuanceJob {
            domains: validated.domains,
            class: validated.class,
            profile,
            record: RecordWrite::Insert(certificate),
        };
        Ok(self.orchestrator.issue(&job, cancel).await?)
    }

    /// Change an existing certificate
    ///
    /// A changed domain set or class re-runs issuance and the record is
    /// written once the new files are staged. Any other change is a plain
    /// record update.
    pub async fn update(
        &self,
        caller: &Caller,
        id: &CertificateId,
        request: &CertificateRequest,
        mode: UpdateMode,
        cancel: &CancellationToken,
    ) -> Result<Certificate, CertkeeperError> {
        caller.require(Capability::EditCertificates)?;
        let existing = self.load(id).await?;
        let validated = self.validator.validate_update(request, &existing, mode)?;

        if existing.disabled {
            return Err(CertkeeperError::CertificateDisabled(id.clone()));
        }

        if let Some(name) = validated.name.as_deref().filter(|n| *n != existing.name) {
            if let Some(other) = self.store.find_by_name(name).await? {
                if other.id != *id {
                    return Err(StoreError::NameConflict {
                        name: name.to_string(),
                    }
                    .into());
                }
            }
        }
        self.check_domains(&validated.domains, validated.class, Some(id))
            .await?;

        let new_profile = match validated.profile {
            Some(profile_id) if profile_id != existing.dns_profile => {
                Some(self.resolver.resolve(profile_id).await?)
            }
            _ => None,
        };

        let domains_changed = !same_domains(&validated.domains, &existing.domains);
        let class_changed = validated.class != existing.class;

        let changes = CertificateUpdate {
            name: validated.name.filter(|n| *n != existing.name),
            description: request.description.as_ref().map(|_| validated.description),
            class: class_changed.then_some(validated.class),
            domains: domains_changed.then(|| validated.domains.clone()),
            dns_profile: new_profile.as_ref().map(|p| p.id),
            ..Default::default()
        };

        if !domains_changed && !class_changed {
            if changes.is_empty() {
                debug!(certificate_id = %id, "Update changes nothing");
                return Ok(existing);
            }
            info!(certificate_id = %id, user = %caller.user, "Updating certificate record");
            return Ok(self.store.update(id, changes).await?);
        }

        let profile = match new_profile {
            Some(profile) => profile,
            None => self.resolver.resolve(existing.dns_profile).await?,
        };
        info!(
            certificate_id = %id,
            user = %caller.user,
            domains_changed,
            class_changed,
            "Re-issuing certificate for update"
        );

        let job = IssuanceJob {
            domains: validated.domains,
            class: validated.class,
            profile,
            record: RecordWrite::Update {
                id: id.clone(),
                changes,
            },
        };
        let issued = self.orchestrator.issue(&job, cancel).await?;
        Ok(issued.certificate)
    }

    /// Re-run issuance for the stored domains and profile
    pub async fn renew(
        &self,
        caller: &Caller,
        id: &CertificateId,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, CertkeeperError> {
        caller.require(Capability::RenewCertificates)?;
        let existing = self.load(id).await?;
        if existing.disabled {
            return Err(CertkeeperError::CertificateDisabled(id.clone()));
        }

        let profile = self.resolver.resolve(existing.dns_profile).await?;
        info!(certificate_id = %id, user = %caller.user, "Renewing certificate");

        let job = IssuanceJob {
            domains: existing.domains,
            class: existing.class,
            profile,
            record: RecordWrite::Update {
                id: id.clone(),
                changes: CertificateUpdate::default(),
            },
        };
        Ok(self.orchestrator.issue(&job, cancel).await?)
    }

    /// Mark a certificate disabled; disabling twice is a no-op
    pub async fn disable(
        &self,
        caller: &Caller,
        id: &CertificateId,
    ) -> Result<Certificate, CertkeeperError> {
        caller.require(Capability::DisableCertificates)?;
        let existing = self.load(id).await?;
        if existing.disabled {
            return Ok(existing);
        }

        info!(certificate_id = %id, user = %caller.user, "Disabling certificate");
        let changes = CertificateUpdate {
            disabled: Some(true),
            ..Default::default()
        };
        Ok(self.store.update(id, changes).await?)
    }

    async fn load(&self, id: &CertificateId) -> Result<Certificate, CertkeeperError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.clone() }.into())
    }

    async fn check_domains(
        &self,
        domains: &[String],
        class: CertificateClass,
        exclude: Option<&CertificateId>,
    ) -> Result<(), CertkeeperError> {
        for domain in domains {
            if let Some(existing) = self
                .store
                .find_domain_conflict(domain, class, exclude)
                .await?
            {
                return Err(StoreError::DomainConflict {
                    domain: domain.clone(),
                    existing,
                }
                .into());
            }
        }
        Ok(())
    }
}

fn same_domains(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AuthorityError, AuthoritySession};
    use crate::dns::RecordProvisioner;
    use crate::persist::CertificateWriter;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use certkeeper_common::{DnsProfile, ErrorKind, FieldErrorKind, ProfileId};
    use certkeeper_config::AcmeSettings;

    /// Authority that refuses every account, so any issuance attempt fails
    #[derive(Debug)]
    struct UnreachableAuthority;

    #[async_trait]
    impl CertificateAuthority for UnreachableAuthority {
        async fn register_account(
            &self,
            _directory_url: &str,
            _contact_email: &str,
        ) -> Result<Box<dyn AuthoritySession>, AuthorityError> {
            Err(AuthorityError::Protocol("unreachable".to_string()))
        }
    }

    #[derive(Debug)]
    struct NoopProvisioner;

    #[async_trait]
    impl RecordProvisioner for NoopProvisioner {
        async fn publish(
            &self,
            _profile: &DnsProfile,
            _record_name: &str,
            _value: &str,
            _primary_domain: Option<&str>,
        ) -> Result<(), ProvisionError> {
            Ok(())
        }

        async fn retract(
            &self,
            _profile: &DnsProfile,
            _record_name: &str,
            _primary_domain: Option<&str>,
        ) -> Result<(), ProvisionError> {
            Ok(())
        }
    }

    fn profile(id: u64) -> DnsProfile {
        DnsProfile {
            id: ProfileId::new(id),
            name: "test".to_string(),
            provider: "webhook".to_string(),
            api_key: "key".to_string(),
            zone_id: "zone".to_string(),
            create_url: "https://dns.test/{zone.id}".to_string(),
            delete_url: None,
            method: None,
        }
    }

    fn service() -> (CertificateService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_profiles([profile(7), profile(8)]));
        let orchestrator = Orchestrator::new(
            AcmeSettings::new("admin@example.com"),
            Arc::new(UnreachableAuthority),
            Arc::new(NoopProvisioner),
            store.clone(),
            CertificateWriter::new("/nonexistent"),
        );
        let service = CertificateService::new(
            RequestValidator::new(Some(ProfileId::new(7))),
            store.clone(),
            ProfileResolver::new(store.clone()),
            orchestrator,
        );
        (service, store)
    }

    fn admin() -> Caller {
        Caller::new(
            UserId::new("admin"),
            CapabilitySet::from_capabilities(Capability::ALL),
        )
    }

    fn seeded(name: &str, domains: &[&str]) -> Certificate {
        Certificate {
            id: CertificateId::generate(),
            name: name.to_string(),
            description: None,
            created_by: UserId::new("admin"),
            class: CertificateClass::Production,
            domains: domains.iter().map(|d| d.to_string()).collect(),
            dns_profile: ProfileId::new(7),
            disabled: false,
            created_at: Utc::now(),
            issued_at: None,
            expires_at: None,
        }
    }

    fn request(name: &str, domains: &[&str]) -> CertificateRequest {
        CertificateRequest {
            name: Some(name.to_string()),
            domains: Some(domains.iter().map(|d| d.to_string()).collect()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_without_capability_is_denied() {
        let (service, store) = service();
        let caller = Caller::new(
            UserId::new("viewer"),
            CapabilitySet::from_capabilities([Capability::ViewCertificates]),
        );

        let err = service
            .create(&caller, &request("web", &["a.example.com"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_validation_runs_before_capability_check() {
        let (service, _) = service();
        let caller = Caller::new(UserId::new("nobody"), CapabilitySet::EMPTY);

        let err = service
            .create(&caller, &request("x", &[]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            CertkeeperError::Validation(errors) => {
                assert!(errors.contains(FieldErrorKind::InvalidField));
                assert!(errors.contains(FieldErrorKind::TooFewDomains));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_existing_name_and_domain() {
        let (service, store) = service();
        let existing = seeded("web", &["a.example.com"]);
        store.insert(existing.clone()).await.unwrap();

        let err = service
            .create(&admin(), &request("web", &["b.example.com"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CertkeeperError::Store(StoreError::NameConflict { .. })));

        let err = service
            .create(&admin(), &request("other", &["A.example.com"]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            CertkeeperError::Store(StoreError::DomainConflict { domain, existing: owner }) => {
                assert_eq!(domain, "a.example.com");
                assert_eq!(owner, existing.id);
            }
            other => panic!("expected domain conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_unknown_profile() {
        let (service, store) = service();
        let mut req = request("web", &["a.example.com"]);
        req.profile = Some(ProfileId::new(99));

        let err = service
            .create(&admin(), &req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_issuance_failure_writes_no_record() {
        let (service, store) = service();
        let err = service
            .create(&admin(), &request("web", &["a.example.com"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Issuance);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_update_skips_issuance() {
        let (service, store) = service();
        let existing = seeded("web", &["a.example.com"]);
        store.insert(existing.clone()).await.unwrap();

        let req = CertificateRequest {
            name: Some("web-renamed".to_string()),
            description: Some("front door".to_string()),
            profile: Some(ProfileId::new(8)),
            ..Default::default()
        };
        let updated = service
            .update(&admin(), &existing.id, &req, UpdateMode::Patch, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(updated.name, "web-renamed");
        assert_eq!(updated.description.as_deref(), Some("front door"));
        assert_eq!(updated.dns_profile, ProfileId::new(8));
        assert_eq!(updated.domains, existing.domains);
    }

    #[tokio::test]
    async fn test_domain_change_reissues() {
        let (service, store) = service();
        let existing = seeded("web", &["a.example.com"]);
        store.insert(existing.clone()).await.unwrap();

        // The stub authority fails, proving issuance was attempted
        let err = service
            .update(
                &admin(),
                &existing.id,
                &request("web", &["b.example.com"]),
                UpdateMode::Patch,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Issuance);

        let stored = store.get(&existing.id).await.unwrap().unwrap();
        assert_eq!(stored.domains, vec!["a.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_update_name_conflict() {
        let (service, store) = service();
        let first = seeded("web", &["a.example.com"]);
        let second = seeded("api", &["b.example.com"]);
        store.insert(first).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        let req = CertificateRequest {
            name: Some("web".to_string()),
            ..Default::default()
        };
        let err = service
            .update(&admin(), &second.id, &req, UpdateMode::Patch, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_disable_is_idempotent_and_blocks_renewal() {
        let (service, store) = service();
        let existing = seeded("web", &["a.example.com"]);
        store.insert(existing.clone()).await.unwrap();

        let disabled = service.disable(&admin(), &existing.id).await.unwrap();
        assert!(disabled.disabled);
        let again = service.disable(&admin(), &existing.id).await.unwrap();
        assert_eq!(again, disabled);

        let err = service
            .renew(&admin(), &existing.id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CertkeeperError::CertificateDisabled(_)));

        // Disabled certificates free their domains
        let owner = store
            .find_domain_conflict("a.example.com", CertificateClass::Production, None)
            .await
            .unwrap();
        assert!(owner.is_none());
    }

    #[tokio::test]
    async fn test_renew_unknown_certificate() {
        let (service, _) = service();
        let err = service
            .renew(&admin(), &CertificateId::generate(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_without_capability_hides_existence() {
        let (service, store) = service();
        let existing = seeded("web", &["a.example.com"]);
        store.insert(existing.clone()).await.unwrap();
        let viewer = Caller::new(
            UserId::new("viewer"),
            CapabilitySet::from_capabilities([Capability::ViewCertificates]),
        );
        let req = CertificateRequest {
            description: Some("front door".to_string()),
            ..Default::default()
        };

        for id in [existing.id.clone(), CertificateId::generate()] {
            let err = service
                .update(&viewer, &id, &req, UpdateMode::Patch, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                CertkeeperError::PermissionDenied {
                    capability: Capability::EditCertificates
                }
            ));
        }
        assert_eq!(store.get(&existing.id).await.unwrap().unwrap(), existing);
    }
}
