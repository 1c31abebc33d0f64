//! certkeeper: validated certificate requests and DNS-01 issuance
//!
//! # Architecture
//!
//! A create, update or renew request passes through these components in
//! order:
//!
//! 1. [`validation::RequestValidator`] normalizes and checks the request
//! 2. [`service::Caller`] is checked for the operation's capability bit
//! 3. [`store::CertificateStore`] rejects name and domain conflicts
//! 4. [`dns::ProfileResolver`] loads a usable DNS profile
//! 5. [`acme::Orchestrator`] proves domain control through the
//!    [`dns::RecordProvisioner`], downloads the certificate, writes the
//!    record and moves the key and certificate files into place
//!
//! [`service::CertificateService`] ties the steps together. Configuration is
//! handed to each component when it is built; nothing reads global state.

pub mod acme;
pub mod dns;
pub mod error;
pub mod persist;
pub mod service;
pub mod store;
pub mod validation;

pub use acme::{
    AcmeAuthority, CertificateAuthority, IssuanceJob, IssuancePhase, IssuedCertificate,
    Orchestrator, RecordWrite,
};
pub use dns::{HttpRecordProvisioner, ProfileResolver, RecordLocks, RecordProvisioner};
pub use error::{CertkeeperError, IssuanceError, IssuanceStage};
pub use persist::CertificateWriter;
pub use service::{Caller, CertificateService, UpdateMode};
pub use store::{CertificateStore, MemoryStore, ProfileStore, StoreError};
pub use validation::{CertificateRequest, RequestValidator};
