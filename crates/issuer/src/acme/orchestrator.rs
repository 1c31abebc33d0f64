//! Issuance state machine
//!
//! ```text
//! START -> ACCOUNT_READY -> CSR_READY -> CHALLENGE_PENDING -> CHALLENGE_PUBLISHED
//!       -> VALIDATING -> ISSUED -> PERSISTED
//! ```
//!
//! Any step may fail, which ends the run in `FAILED`. Each state owns exactly
//! the data the next step needs, so a step cannot run with missing inputs.
//!
//! Every remote call is bounded by a timeout and watches a
//! [`CancellationToken`]. Challenge records are registered for cleanup before
//! they are published and retracted after validation whether it succeeded or
//! not. Records are also retracted when the run is cancelled or its future is
//! dropped mid-flight. Retraction failures are logged and otherwise ignored.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use certkeeper_common::{Certificate, CertificateClass, CertificateId, DnsProfile};
use certkeeper_config::{AcmeSettings, Config};

use super::authority::{
    AuthorityError, AuthoritySession, CertificateAuthority, OrderProgress, PendingAuthorization,
};
use super::challenge::ChallengeRecord;
use crate::dns::{
    HttpRecordProvisioner, PropagationChecker, ProvisionError, RecordLease, RecordLocks,
    RecordProvisioner,
};
use crate::error::{FailureCause, IssuanceError, IssuanceStage};
use crate::persist::{parse_certificate_expiry, split_bundle, CertificateWriter};
use crate::store::{CertificateStore, CertificateUpdate, StoreError};

// ============================================================================
// Public types
// ============================================================================

/// Observable position in the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuancePhase {
    Start,
    AccountReady,
    CsrReady,
    ChallengePending,
    ChallengePublished,
    Validating,
    Issued,
    Persisted,
    Failed,
}

impl fmt::Display for IssuancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::AccountReady => "ACCOUNT_READY",
            Self::CsrReady => "CSR_READY",
            Self::ChallengePending => "CHALLENGE_PENDING",
            Self::ChallengePublished => "CHALLENGE_PUBLISHED",
            Self::Validating => "VALIDATING",
            Self::Issued => "ISSUED",
            Self::Persisted => "PERSISTED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// How the certificate record is written once files are staged
#[derive(Debug, Clone)]
pub enum RecordWrite {
    /// Create a new record
    Insert(Certificate),
    /// Change an existing record; issue and expiry times are added
    Update {
        id: CertificateId,
        changes: CertificateUpdate,
    },
}

/// Everything one run needs
#[derive(Debug, Clone)]
pub struct IssuanceJob {
    /// Domains to cover; the first one names the file directory
    pub domains: Vec<String>,
    pub class: CertificateClass,
    pub profile: DnsProfile,
    pub record: RecordWrite,
}

/// Result of a run that reached `PERSISTED`
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    /// The record as stored
    pub certificate: Certificate,
    /// Directory holding the key and certificate files
    pub directory: PathBuf,
    /// Phases visited, starting with `Start`
    pub phases: Vec<IssuancePhase>,
}

impl IssuedCertificate {
    pub fn final_phase(&self) -> IssuancePhase {
        self.phases.last().copied().unwrap_or(IssuancePhase::Start)
    }
}

// ============================================================================
// States
// ============================================================================

struct CertificateKey {
    private_key_pem: String,
    csr_der: Vec<u8>,
}

enum IssuanceState {
    Start,
    AccountReady {
        session: Box<dyn AuthoritySession>,
    },
    CsrReady {
        session: Box<dyn AuthoritySession>,
        key: CertificateKey,
    },
    ChallengePending {
        session: Box<dyn AuthoritySession>,
        key: CertificateKey,
        authorizations: Vec<PendingAuthorization>,
    },
    ChallengePublished {
        session: Box<dyn AuthoritySession>,
        key: CertificateKey,
        cleanup: ChallengeCleanup,
    },
    Validating {
        session: Box<dyn AuthoritySession>,
        key: CertificateKey,
        cleanup: ChallengeCleanup,
    },
    Issued {
        private_key_pem: String,
        bundle: String,
    },
    Persisted(IssuedCertificate),
}

impl IssuanceState {
    fn phase(&self) -> IssuancePhase {
        match self {
            Self::Start => IssuancePhase::Start,
            Self::AccountReady { .. } => IssuancePhase::AccountReady,
            Self::CsrReady { .. } => IssuancePhase::CsrReady,
            Self::ChallengePending { .. } => IssuancePhase::ChallengePending,
            Self::ChallengePublished { .. } => IssuancePhase::ChallengePublished,
            Self::Validating { .. } => IssuancePhase::Validating,
            Self::Issued { .. } => IssuancePhase::Issued,
            Self::Persisted(_) => IssuancePhase::Persisted,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives certificates through the authority exchange and persists them
#[derive(Debug)]
pub struct Orchestrator {
    acme: AcmeSettings,
    authority: Arc<dyn CertificateAuthority>,
    provisioner: Arc<dyn RecordProvisioner>,
    store: Arc<dyn CertificateStore>,
    writer: CertificateWriter,
    locks: RecordLocks,
    propagation: Option<Arc<PropagationChecker>>,
}

impl Orchestrator {
    pub fn new(
        acme: AcmeSettings,
        authority: Arc<dyn CertificateAuthority>,
        provisioner: Arc<dyn RecordProvisioner>,
        store: Arc<dyn CertificateStore>,
        writer: CertificateWriter,
    ) -> Self {
        Self {
            acme,
            authority,
            provisioner,
            store,
            writer,
            locks: RecordLocks::new(),
            propagation: None,
        }
    }

    /// Build from configuration with the HTTP provisioner
    pub fn from_config(
        config: &Config,
        authority: Arc<dyn CertificateAuthority>,
        store: Arc<dyn CertificateStore>,
    ) -> Result<Self, ProvisionError> {
        let provisioner = HttpRecordProvisioner::new(config.dns.api_timeout())?;
        let mut orchestrator = Self::new(
            config.acme.clone(),
            authority,
            Arc::new(provisioner),
            store,
            CertificateWriter::new(&config.storage.ssl_directory),
        );

        if let Some(settings) = &config.dns.propagation {
            orchestrator = orchestrator.with_propagation(PropagationChecker::new(settings));
        }
        Ok(orchestrator)
    }

    /// Wait for records to be visible in DNS before signalling readiness
    pub fn with_propagation(mut self, checker: PropagationChecker) -> Self {
        self.propagation = Some(Arc::new(checker));
        self
    }

    /// Share record locks with other orchestrators
    pub fn with_locks(mut self, locks: RecordLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn writer(&self) -> &CertificateWriter {
        &self.writer
    }

    /// Run the state machine to `PERSISTED` or the first failure
    pub async fn issue(
        &self,
        job: &IssuanceJob,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, IssuanceError> {
        let primary = job.domains.first().map(String::as_str).unwrap_or_default();
        let mut phases = vec![IssuancePhase::Start];
        let mut state = IssuanceState::Start;

        info!(
            domain = %primary,
            domains = job.domains.len(),
            class = %job.class,
            profile_id = %job.profile.id,
            "Starting certificate issuance"
        );

        loop {
            let next = match state {
                IssuanceState::Start => self.register_account(job, cancel).await,
                IssuanceState::AccountReady { session } => generate_key(session, &job.domains),
                IssuanceState::CsrReady { session, key } => {
                    self.create_order(session, key, job, cancel).await
                }
                IssuanceState::ChallengePending {
                    session,
                    key,
                    authorizations,
                } => {
                    self.publish_challenges(session, key, authorizations, job, cancel)
                        .await
                }
                IssuanceState::ChallengePublished {
                    session,
                    key,
                    cleanup,
                } => self.signal_ready(session, key, cleanup, cancel).await,
                IssuanceState::Validating {
                    session,
                    key,
                    cleanup,
                } => self.await_certificate(session, key, cleanup, cancel).await,
                IssuanceState::Issued {
                    private_key_pem,
                    bundle,
                } => self
                    .persist(job, private_key_pem, bundle, cancel)
                    .await
                    .map(IssuanceState::Persisted),
                IssuanceState::Persisted(mut issued) => {
                    issued.phases = phases;
                    info!(
                        domain = %primary,
                        certificate_id = %issued.certificate.id,
                        directory = %issued.directory.display(),
                        "Certificate issued"
                    );
                    return Ok(issued);
                }
            };

            match next {
                Ok(next) => {
                    debug!(domain = %primary, phase = %next.phase(), "Issuance state transition");
                    phases.push(next.phase());
                    state = next;
                }
                Err(e) => {
                    phases.push(IssuancePhase::Failed);
                    error!(
                        domain = %primary,
                        stage = %e.stage(),
                        failed_domain = e.domain().unwrap_or("-"),
                        error = %e,
                        "Certificate issuance failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    async fn register_account(
        &self,
        job: &IssuanceJob,
        cancel: &CancellationToken,
    ) -> Result<IssuanceState, IssuanceError> {
        let directory = self.acme.directory_for(job.class);
        let session = bounded(
            IssuanceStage::Account,
            None,
            self.acme.request_timeout(),
            cancel,
            self.authority
                .register_account(directory, &self.acme.contact_email),
        )
        .await?
        .map_err(|e| IssuanceError::AccountRegistrationFailed {
            cause: FailureCause::failed(e),
        })?;

        Ok(IssuanceState::AccountReady { session })
    }

    async fn create_order(
        &self,
        mut session: Box<dyn AuthoritySession>,
        key: CertificateKey,
        job: &IssuanceJob,
        cancel: &CancellationToken,
    ) -> Result<IssuanceState, IssuanceError> {
        let authorizations = bounded(
            IssuanceStage::Challenge,
            None,
            self.acme.request_timeout(),
            cancel,
            session.new_order(&job.domains),
        )
        .await?
        .map_err(|e| match e {
            AuthorityError::NoDnsChallenge(domain) => {
                IssuanceError::NoDnsChallenge { domain }
            }
            other => IssuanceError::ChallengeProvisioningFailed {
                domain: job.domains.first().cloned().unwrap_or_default(),
                cause: FailureCause::failed(other),
            },
        })?;

        Ok(IssuanceState::ChallengePending {
            session,
            key,
            authorizations,
        })
    }

    async fn publish_challenges(
        &self,
        session: Box<dyn AuthoritySession>,
        key: CertificateKey,
        authorizations: Vec<PendingAuthorization>,
        job: &IssuanceJob,
        cancel: &CancellationToken,
    ) -> Result<IssuanceState, IssuanceError> {
        let records: Vec<ChallengeRecord> = authorizations
            .iter()
            .map(ChallengeRecord::from_authorization)
            .collect();

        let keys = records
            .iter()
            .map(|r| (job.profile.zone_id.clone(), r.record_name.clone()));
        let lease = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(IssuanceError::interrupted(
                    IssuanceStage::Challenge,
                    job.domains.first().map(String::as_str),
                    FailureCause::Cancelled,
                ));
            }
            lease = self.locks.acquire(keys) => lease,
        };

        let mut cleanup = ChallengeCleanup::new(
            Arc::clone(&self.provisioner),
            job.profile.clone(),
            job.domains.first().cloned(),
            self.acme.request_timeout(),
            lease,
        );

        if let Err(e) = self.publish_all(&records, &mut cleanup, job, cancel).await {
            cleanup.retract_all().await;
            return Err(e);
        }

        Ok(IssuanceState::ChallengePublished {
            session,
            key,
            cleanup,
        })
    }

    async fn publish_all(
        &self,
        records: &[ChallengeRecord],
        cleanup: &mut ChallengeCleanup,
        job: &IssuanceJob,
        cancel: &CancellationToken,
    ) -> Result<(), IssuanceError> {
        let primary = job.domains.first().map(String::as_str);

        for record in records {
            cleanup.register(record.clone());
            debug!(domain = %record.domain, record = %record.record_name, "Publishing challenge record");

            bounded(
                IssuanceStage::Challenge,
                Some(&record.domain),
                self.acme.request_timeout(),
                cancel,
                self.provisioner
                    .publish(&job.profile, &record.record_name, &record.value, primary),
            )
            .await?
            .map_err(|e| IssuanceError::ChallengeProvisioningFailed {
                domain: record.domain.clone(),
                cause: FailureCause::failed(e),
            })?;
        }

        if let Some(checker) = &self.propagation {
            for record in records {
                bounded(
                    IssuanceStage::Challenge,
                    Some(&record.domain),
                    checker.max_wait() + self.acme.request_timeout(),
                    cancel,
                    checker.wait_for(&record.record_name, &record.value),
                )
                .await?
                .map_err(|e| IssuanceError::ChallengeProvisioningFailed {
                    domain: record.domain.clone(),
                    cause: FailureCause::failed(e),
                })?;
            }
        }

        Ok(())
    }

    async fn signal_ready(
        &self,
        mut session: Box<dyn AuthoritySession>,
        key: CertificateKey,
        cleanup: ChallengeCleanup,
        cancel: &CancellationToken,
    ) -> Result<IssuanceState, IssuanceError> {
        for record in cleanup.records().to_vec() {
            let signalled = bounded(
                IssuanceStage::Validation,
                Some(&record.domain),
                self.acme.request_timeout(),
                cancel,
                session.set_challenge_ready(&record.challenge_url),
            )
            .await
            .and_then(|r| {
                r.map_err(|e| IssuanceError::ChallengeValidationFailed {
                    domain: Some(record.domain.clone()),
                    cause: FailureCause::failed(e),
                })
            });

            if let Err(e) = signalled {
                cleanup.retract_all().await;
                return Err(e);
            }
        }

        Ok(IssuanceState::Validating {
            session,
            key,
            cleanup,
        })
    }

    async fn await_certificate(
        &self,
        mut session: Box<dyn AuthoritySession>,
        key: CertificateKey,
        cleanup: ChallengeCleanup,
        cancel: &CancellationToken,
    ) -> Result<IssuanceState, IssuanceError> {
        let validated = self.wait_for_validation(session.as_mut(), cancel).await;
        cleanup.retract_all().await;
        let progress = validated?;
        debug!("Authorizations valid");

        if progress != OrderProgress::Valid {
            bounded(
                IssuanceStage::Finalization,
                None,
                self.acme.request_timeout(),
                cancel,
                session.finalize(&key.csr_der),
            )
            .await?
            .map_err(finalization_failed)?;

            self.wait_for_issuance(session.as_mut(), cancel).await?;
        }

        let bundle = bounded(
            IssuanceStage::Finalization,
            None,
            self.acme.request_timeout(),
            cancel,
            session.certificate(),
        )
        .await?
        .map_err(finalization_failed)?
        .ok_or_else(|| finalization_failed("No certificate in response"))?;

        Ok(IssuanceState::Issued {
            private_key_pem: key.private_key_pem,
            bundle,
        })
    }

    async fn persist(
        &self,
        job: &IssuanceJob,
        private_key_pem: String,
        bundle_pem: String,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, IssuanceError> {
        let primary = job.domains.first().map(String::as_str).unwrap_or_default();

        let bundle = split_bundle(&bundle_pem)
            .map_err(|parts| IssuanceError::MalformedCertificateBundle { parts })?;

        let issued_at = Utc::now();
        let expires_at = match parse_certificate_expiry(&bundle.leaf) {
            Ok(expiry) => Some(expiry),
            Err(e) => {
                warn!(domain = %primary, error = %e, "Could not read certificate expiry");
                None
            }
        };

        // Dropping `staged` before commit removes the staged files
        let staged = self
            .writer
            .stage(primary, private_key_pem, bundle)
            .await
            .map_err(|e| IssuanceError::Persistence {
                cause: FailureCause::failed(e),
            })?;

        // The previous set stays parked until the record write settles
        let committed = staged.commit().await.map_err(|e| IssuanceError::Persistence {
            cause: FailureCause::failed(e),
        })?;

        let write = async {
            match job.record.clone() {
                RecordWrite::Insert(mut cert) => {
                    cert.issued_at = Some(issued_at);
                    cert.expires_at = expires_at;
                    self.store.insert(cert.clone()).await?;
                    Ok::<_, StoreError>(cert)
                }
                RecordWrite::Update { id, mut changes } => {
                    changes.issued_at = Some(issued_at);
                    changes.expires_at = expires_at;
                    self.store.update(&id, changes).await
                }
            }
        };
        let written = bounded(
            IssuanceStage::Persistence,
            None,
            self.acme.request_timeout(),
            cancel,
            write,
        )
        .await
        .and_then(|r| r.map_err(IssuanceError::Record));

        let certificate = match written {
            Ok(certificate) => certificate,
            Err(e) => {
                if let Err(rollback) = committed.rollback().await {
                    error!(
                        domain = %primary,
                        error = %rollback,
                        "Failed to roll back certificate files"
                    );
                }
                return Err(e);
            }
        };
        let directory = committed.finish().await;

        Ok(IssuedCertificate {
            certificate,
            directory,
            phases: Vec::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    /// Poll until every authorization is valid
    async fn wait_for_validation(
        &self,
        session: &mut dyn AuthoritySession,
        cancel: &CancellationToken,
    ) -> Result<OrderProgress, IssuanceError> {
        let limit = self.acme.validation_timeout();
        let poll = async {
            loop {
                let progress = bounded(
                    IssuanceStage::Validation,
                    None,
                    self.acme.request_timeout(),
                    cancel,
                    session.poll_order(),
                )
                .await?
                .map_err(|e| IssuanceError::ChallengeValidationFailed {
                    domain: None,
                    cause: FailureCause::failed(e),
                })?;

                match progress {
                    OrderProgress::Ready | OrderProgress::Valid => return Ok(progress),
                    OrderProgress::Invalid { domain, detail } => {
                        return Err(IssuanceError::ChallengeValidationFailed {
                            domain,
                            cause: FailureCause::failed(
                                detail.as_deref().unwrap_or("authorization invalid"),
                            ),
                        });
                    }
                    OrderProgress::Pending => tokio::time::sleep(self.acme.poll_interval()).await,
                }
            }
        };

        bounded(IssuanceStage::Validation, None, limit, cancel, poll).await?
    }

    /// Poll until the finalized order is valid
    async fn wait_for_issuance(
        &self,
        session: &mut dyn AuthoritySession,
        cancel: &CancellationToken,
    ) -> Result<(), IssuanceError> {
        let limit = self.acme.validation_timeout();
        let poll = async {
            loop {
                let progress = bounded(
                    IssuanceStage::Finalization,
                    None,
                    self.acme.request_timeout(),
                    cancel,
                    session.poll_order(),
                )
                .await?
                .map_err(finalization_failed)?;

                match progress {
                    OrderProgress::Valid => return Ok(()),
                    OrderProgress::Invalid { detail, .. } => {
                        return Err(finalization_failed(
                            detail.as_deref().unwrap_or("order became invalid"),
                        ));
                    }
                    OrderProgress::Pending | OrderProgress::Ready => {
                        tokio::time::sleep(self.acme.poll_interval()).await
                    }
                }
            }
        };

        bounded(IssuanceStage::Finalization, None, limit, cancel, poll).await?
    }
}

fn generate_key(
    session: Box<dyn AuthoritySession>,
    domains: &[String],
) -> Result<IssuanceState, IssuanceError> {
    let csr_failed = |e: rcgen::Error| IssuanceError::CsrGenerationFailed {
        cause: FailureCause::failed(e),
    };

    let key_pair = rcgen::KeyPair::generate().map_err(csr_failed)?;
    let params = rcgen::CertificateParams::new(domains.to_vec()).map_err(csr_failed)?;
    let csr = params.serialize_request(&key_pair).map_err(csr_failed)?;

    Ok(IssuanceState::CsrReady {
        session,
        key: CertificateKey {
            private_key_pem: key_pair.serialize_pem(),
            csr_der: csr.der().to_vec(),
        },
    })
}

fn finalization_failed(e: impl fmt::Display) -> IssuanceError {
    IssuanceError::FinalizationFailed {
        cause: FailureCause::failed(e),
    }
}

/// Run `fut` with a time limit, giving up early on cancellation
async fn bounded<F: Future>(
    stage: IssuanceStage,
    domain: Option<&str>,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, IssuanceError> {
    tokio::select! {
        _ = cancel.cancelled() => {
            Err(IssuanceError::interrupted(stage, domain, FailureCause::Cancelled))
        }
        result = tokio::time::timeout(limit, fut) => {
            result.map_err(|_| IssuanceError::interrupted(stage, domain, FailureCause::TimedOut(limit)))
        }
    }
}

// ============================================================================
// Challenge cleanup
// ============================================================================

/// Published records plus the record locks guarding them
///
/// [`ChallengeCleanup::retract_all`] is the normal path. If the value is
/// dropped with records still registered, retraction continues on a spawned
/// task that keeps the locks until it finishes.
struct ChallengeCleanup {
    provisioner: Arc<dyn RecordProvisioner>,
    profile: DnsProfile,
    primary_domain: Option<String>,
    timeout: Duration,
    records: Vec<ChallengeRecord>,
    lease: Option<RecordLease>,
}

impl ChallengeCleanup {
    fn new(
        provisioner: Arc<dyn RecordProvisioner>,
        profile: DnsProfile,
        primary_domain: Option<String>,
        timeout: Duration,
        lease: RecordLease,
    ) -> Self {
        Self {
            provisioner,
            profile,
            primary_domain,
            timeout,
            records: Vec::new(),
            lease: Some(lease),
        }
    }

    fn register(&mut self, record: ChallengeRecord) {
        self.records.push(record);
    }

    fn records(&self) -> &[ChallengeRecord] {
        &self.records
    }

    async fn retract_all(mut self) {
        let records = std::mem::take(&mut self.records);
        retract_records(
            self.provisioner.as_ref(),
            &self.profile,
            self.primary_domain.as_deref(),
            self.timeout,
            &records,
        )
        .await;
        self.lease.take();
    }
}

impl Drop for ChallengeCleanup {
    fn drop(&mut self) {
        if self.records.is_empty() {
            return;
        }

        let records = std::mem::take(&mut self.records);
        let lease = self.lease.take();
        let provisioner = Arc::clone(&self.provisioner);
        let profile = self.profile.clone();
        let primary_domain = self.primary_domain.clone();
        let timeout = self.timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(records = records.len(), "Retracting challenge records in background");
                handle.spawn(async move {
                    retract_records(
                        provisioner.as_ref(),
                        &profile,
                        primary_domain.as_deref(),
                        timeout,
                        &records,
                    )
                    .await;
                    drop(lease);
                });
            }
            Err(_) => {
                warn!(
                    records = records.len(),
                    "No runtime available; challenge records left in place"
                );
            }
        }
    }
}

async fn retract_records(
    provisioner: &dyn RecordProvisioner,
    profile: &DnsProfile,
    primary_domain: Option<&str>,
    timeout: Duration,
    records: &[ChallengeRecord],
) {
    for record in records {
        let outcome = tokio::time::timeout(
            timeout,
            provisioner.retract(profile, &record.record_name, primary_domain),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(domain = %record.domain, record = %record.record_name, "Challenge record retracted");
            }
            Ok(Err(e)) => {
                warn!(domain = %record.domain, record = %record.record_name, error = %e, "Failed to retract challenge record");
            }
            Err(_) => {
                warn!(domain = %record.domain, record = %record.record_name, "Timed out retracting challenge record");
            }
        }
    }
}
