//! DNS profile resolution and challenge record provisioning
//!
//! - [`ProfileResolver`] turns a profile reference into a usable [`DnsProfile`]
//! - [`template`] fills the profile's URL templates
//! - [`RecordProvisioner`] publishes and retracts TXT records over HTTP
//! - [`RecordLocks`] serializes work on the same (zone, record) pair
//! - [`PropagationChecker`] waits until a record is visible in DNS
//!
//! [`DnsProfile`]: certkeeper_common::DnsProfile

mod locks;
mod propagation;
mod provisioner;
mod resolver;
pub mod template;

pub use locks::{RecordKey, RecordLease, RecordLocks};
pub use propagation::{PropagationChecker, PropagationError};
pub use provisioner::{HttpRecordProvisioner, ProvisionError, RecordProvisioner, CHALLENGE_TTL};
pub use resolver::{ProfileRef, ProfileResolver, ResolveError};
