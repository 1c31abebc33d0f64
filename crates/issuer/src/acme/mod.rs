//! Certificate issuance against an ACME authority
//!
//! - [`authority`]: the seam the orchestrator drives, plus its error type
//! - [`client`]: the `instant-acme` implementation
//! - [`challenge`]: DNS-01 record names and values
//! - [`orchestrator`]: the issuance state machine

pub mod authority;
pub mod challenge;
pub mod client;
pub mod orchestrator;

pub use authority::{
    AuthorityError, AuthoritySession, CertificateAuthority, OrderProgress, PendingAuthorization,
};
pub use challenge::{challenge_record_fqdn, compute_challenge_value, ChallengeRecord};
pub use client::AcmeAuthority;
pub use orchestrator::{IssuanceJob, IssuancePhase, IssuedCertificate, Orchestrator, RecordWrite};
