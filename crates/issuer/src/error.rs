//! Issuance and service error types

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use certkeeper_common::{Capability, CertificateId, ErrorKind, ValidationErrors};

use crate::dns::ResolveError;
use crate::store::StoreError;

/// Step of the issuance state machine a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuanceStage {
    Account,
    Csr,
    Challenge,
    Validation,
    Finalization,
    Persistence,
}

impl fmt::Display for IssuanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Account => "account",
            Self::Csr => "csr",
            Self::Challenge => "challenge",
            Self::Validation => "validation",
            Self::Finalization => "finalization",
            Self::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The remote call did not finish within its bound
    TimedOut(Duration),
    /// The caller cancelled the operation
    Cancelled,
    /// The remote side or a local library reported an error
    Failed(String),
}

impl FailureCause {
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(after) => write!(f, "timed out after {:?}", after),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(message) => f.write_str(message),
        }
    }
}

/// Errors raised while driving a certificate through the authority exchange
///
/// No certificate record is written and no certificate files change when
/// any of these is returned.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// Registering the ACME account failed
    #[error("Account registration failed: {cause}")]
    AccountRegistrationFailed { cause: FailureCause },

    /// Generating the certificate key or CSR failed
    #[error("CSR generation failed: {cause}")]
    CsrGenerationFailed { cause: FailureCause },

    /// Publishing a challenge record (or waiting for it to propagate) failed
    #[error("Challenge provisioning failed for '{domain}': {cause}")]
    ChallengeProvisioningFailed { domain: String, cause: FailureCause },

    /// The authority offered no DNS-01 challenge for a domain
    #[error("No DNS-01 challenge offered for '{domain}'")]
    NoDnsChallenge { domain: String },

    /// The authority rejected an authorization or validation did not finish
    #[error("Challenge validation failed{}: {cause}", domain_suffix(.domain))]
    ChallengeValidationFailed {
        domain: Option<String>,
        cause: FailureCause,
    },

    /// Submitting the CSR or downloading the certificate failed
    #[error("Certificate finalization failed: {cause}")]
    FinalizationFailed { cause: FailureCause },

    /// The downloaded bundle did not hold a leaf and a chain
    #[error("Malformed certificate bundle: expected at least 2 certificates, found {parts}")]
    MalformedCertificateBundle { parts: usize },

    /// Writing key or certificate files failed
    #[error("Failed to write certificate files: {cause}")]
    Persistence { cause: FailureCause },

    /// Writing the certificate record failed
    #[error("Failed to write certificate record: {0}")]
    Record(#[from] StoreError),
}

fn domain_suffix(domain: &Option<String>) -> String {
    domain
        .as_ref()
        .map(|d| format!(" for '{}'", d))
        .unwrap_or_default()
}

impl IssuanceError {
    /// The stage this error was raised in
    pub fn stage(&self) -> IssuanceStage {
        match self {
            Self::AccountRegistrationFailed { .. } => IssuanceStage::Account,
            Self::CsrGenerationFailed { .. } => IssuanceStage::Csr,
            Self::ChallengeProvisioningFailed { .. } | Self::NoDnsChallenge { .. } => {
                IssuanceStage::Challenge
            }
            Self::ChallengeValidationFailed { .. } => IssuanceStage::Validation,
            Self::FinalizationFailed { .. } => IssuanceStage::Finalization,
            Self::MalformedCertificateBundle { .. } | Self::Persistence { .. } | Self::Record(_) => {
                IssuanceStage::Persistence
            }
        }
    }

    /// The domain involved, when known
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::ChallengeProvisioningFailed { domain, .. } | Self::NoDnsChallenge { domain } => {
                Some(domain)
            }
            Self::ChallengeValidationFailed { domain, .. } => domain.as_deref(),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::AccountRegistrationFailed { cause }
            | Self::CsrGenerationFailed { cause }
            | Self::ChallengeProvisioningFailed { cause, .. }
            | Self::ChallengeValidationFailed { cause, .. }
            | Self::FinalizationFailed { cause }
            | Self::Persistence { cause } => Some(cause),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause(), Some(FailureCause::Cancelled))
    }

    /// Build the error for `stage` from a timeout or cancellation
    pub(crate) fn interrupted(stage: IssuanceStage, domain: Option<&str>, cause: FailureCause) -> Self {
        let domain_or_unknown = || domain.unwrap_or("unknown").to_string();
        match stage {
            IssuanceStage::Account => Self::AccountRegistrationFailed { cause },
            IssuanceStage::Csr => Self::CsrGenerationFailed { cause },
            IssuanceStage::Challenge => Self::ChallengeProvisioningFailed {
                domain: domain_or_unknown(),
                cause,
            },
            IssuanceStage::Validation => Self::ChallengeValidationFailed {
                domain: domain.map(str::to_string),
                cause,
            },
            IssuanceStage::Finalization => Self::FinalizationFailed { cause },
            IssuanceStage::Persistence => Self::Persistence { cause },
        }
    }
}

// ============================================================================
// Service errors
// ============================================================================

/// Errors returned by [`crate::CertificateService`] operations
#[derive(Debug, Error)]
pub enum CertkeeperError {
    /// The request failed validation; nothing was changed
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// The caller lacks the capability for the operation
    #[error("Permission denied: missing capability {capability}")]
    PermissionDenied { capability: Capability },

    /// Disabled certificates cannot be renewed or edited
    #[error("Certificate {0} is disabled")]
    CertificateDisabled(CertificateId),

    /// Store lookup or write failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The DNS profile could not be used
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The authority exchange or file persistence failed
    #[error("Issuance failed at {} stage: {}", .0.stage(), .0)]
    Issuance(IssuanceError),
}

impl From<IssuanceError> for CertkeeperError {
    fn from(err: IssuanceError) -> Self {
        match err {
            // A late conflict on the final write is reported like an early one
            IssuanceError::Record(store) => CertkeeperError::Store(store),
            other => CertkeeperError::Issuance(other),
        }
    }
}

impl CertkeeperError {
    /// The reporting class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::CertificateDisabled(_) => ErrorKind::Validation,
            Self::PermissionDenied { .. } => ErrorKind::Authorization,
            Self::Store(err) => err.kind(),
            Self::Resolve(ResolveError::Store(err)) => err.kind(),
            Self::Resolve(_) => ErrorKind::Validation,
            Self::Issuance(_) => ErrorKind::Issuance,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(StoreError::Unavailable(_))
            | Self::Resolve(ResolveError::Store(StoreError::Unavailable(_))) => true,
            Self::Issuance(err) => matches!(err.cause(), Some(FailureCause::TimedOut(_))),
            _ => false,
        }
    }
}
