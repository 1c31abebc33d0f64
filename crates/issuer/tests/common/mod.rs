//! Shared fixtures for integration tests
//!
//! [`StubAuthority`] stands in for an ACME directory. It hands out one
//! DNS-01 authorization per domain and returns a two-certificate bundle
//! generated with rcgen once the order is finalized.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use certkeeper::acme::{AuthorityError, AuthoritySession, OrderProgress, PendingAuthorization};
use certkeeper::{Caller, CertificateAuthority};
use certkeeper_common::{Capability, CapabilitySet, DnsProfile, ProfileId, UserId};
use certkeeper_config::Config;

/// How the stub misbehaves
#[derive(Debug, Clone, Default)]
pub struct StubBehaviour {
    /// Report this domain's authorization as invalid
    pub invalid_domain: Option<String>,
    /// Download a bundle holding only the leaf certificate
    pub single_certificate: bool,
    /// Keep authorizations pending forever
    pub stall_validation: bool,
}

#[derive(Debug, Default)]
pub struct StubAuthority {
    behaviour: StubBehaviour,
    directories: Mutex<Vec<String>>,
    orders: Arc<Mutex<Vec<Vec<String>>>>,
}

impl StubAuthority {
    pub fn new(behaviour: StubBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            ..Default::default()
        })
    }

    /// Directory URLs accounts were registered against
    pub fn directories(&self) -> Vec<String> {
        self.directories.lock().clone()
    }

    /// Domain lists of every order created
    pub fn orders(&self) -> Vec<Vec<String>> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl CertificateAuthority for StubAuthority {
    async fn register_account(
        &self,
        directory_url: &str,
        _contact_email: &str,
    ) -> Result<Box<dyn AuthoritySession>, AuthorityError> {
        self.directories.lock().push(directory_url.to_string());
        Ok(Box::new(StubSession {
            behaviour: self.behaviour.clone(),
            domains: Vec::new(),
            finalized: AtomicBool::new(false),
            orders: Arc::clone(&self.orders),
        }))
    }
}

struct StubSession {
    behaviour: StubBehaviour,
    domains: Vec<String>,
    finalized: AtomicBool,
    orders: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl AuthoritySession for StubSession {
    async fn new_order(
        &mut self,
        domains: &[String],
    ) -> Result<Vec<PendingAuthorization>, AuthorityError> {
        self.domains = domains.to_vec();
        self.orders.lock().push(domains.to_vec());
        Ok(domains
            .iter()
            .map(|domain| PendingAuthorization {
                domain: domain.clone(),
                key_authorization: format!("token-{}.thumbprint", domain),
                challenge_url: format!("https://ca.test/chall/{}", domain),
            })
            .collect())
    }

    async fn set_challenge_ready(&mut self, _challenge_url: &str) -> Result<(), AuthorityError> {
        Ok(())
    }

    async fn poll_order(&mut self) -> Result<OrderProgress, AuthorityError> {
        if let Some(domain) = &self.behaviour.invalid_domain {
            return Ok(OrderProgress::Invalid {
                domain: Some(domain.clone()),
                detail: Some("Incorrect TXT record found".to_string()),
            });
        }
        if self.behaviour.stall_validation {
            return Ok(OrderProgress::Pending);
        }
        if self.finalized.load(Ordering::SeqCst) {
            Ok(OrderProgress::Valid)
        } else {
            Ok(OrderProgress::Ready)
        }
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AuthorityError> {
        if csr_der.is_empty() {
            return Err(AuthorityError::Protocol("empty CSR".to_string()));
        }
        self.finalized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn certificate(&mut self) -> Result<Option<String>, AuthorityError> {
        let leaf = self_signed(&self.domains);
        if self.behaviour.single_certificate {
            return Ok(Some(leaf));
        }
        let issuer = self_signed(&["ca.stub.test".to_string()]);
        Ok(Some(format!("{}{}", leaf, issuer)))
    }
}

pub fn self_signed(names: &[String]) -> String {
    rcgen::generate_simple_self_signed(names.to_vec())
        .unwrap()
        .cert
        .pem()
}

/// A profile whose templates point at `base_url`
pub fn profile(id: u64, base_url: &str) -> DnsProfile {
    DnsProfile {
        id: ProfileId::new(id),
        name: format!("profile-{}", id),
        provider: "webhook".to_string(),
        api_key: "secret-token".to_string(),
        zone_id: format!("zone-{}", id),
        create_url: format!("{}/zones/{{zone.id}}/records", base_url),
        delete_url: None,
        method: None,
    }
}

/// Configuration writing below `ssl_directory` with fast polling
pub fn config(ssl_directory: &Path, profiles: Vec<DnsProfile>) -> Config {
    let mut config = Config::new("admin@example.com", ssl_directory);
    config.acme.poll_interval_ms = 10;
    config.acme.validation_timeout_secs = 10;
    config.dns.api_timeout_secs = 5;
    config.profiles = profiles;
    config
}

pub fn admin() -> Caller {
    Caller::new(
        UserId::new("admin"),
        CapabilitySet::from_capabilities(Capability::ALL),
    )
}
