//! Common utilities and shared components for certkeeper
//!
//! This crate provides the pieces shared by the configuration crate and the
//! issuer: identifiers, the certificate and DNS-profile data model, the
//! capability bitfield, validation error types and tracing setup.
//!
//! # Module Organization
//!
//! - [`capability`]: Named permission bits packed into a `u64`
//! - [`ids`]: Type-safe identifier newtypes (CertificateId, ProfileId, UserId)
//! - [`types`]: Certificate class, DNS profile and certificate record
//! - [`errors`]: Validation error list and error classes
//! - [`observability`]: Tracing initialization

pub mod capability;
pub mod errors;
pub mod ids;
pub mod observability;
pub mod types;

pub use capability::{Capability, CapabilityError, CapabilitySet};
pub use errors::{ErrorKind, FieldError, FieldErrorKind, ValidationErrors};
pub use ids::{CertificateId, ProfileId, UserId};
pub use observability::{init_tracing, LogFormat};
pub use types::{Certificate, CertificateClass, DnsProfile};
