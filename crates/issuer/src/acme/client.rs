//! ACME authority backed by instant-acme
//!
//! Each issuance registers a fresh account, as the state machine starts
//! from a new account key every time.

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus,
};
use tracing::{debug, info, trace};

use super::authority::{
    AuthorityError, AuthoritySession, CertificateAuthority, OrderProgress, PendingAuthorization,
};

/// Talks to an RFC 8555 directory over HTTPS
#[derive(Debug, Clone, Default)]
pub struct AcmeAuthority;

impl AcmeAuthority {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn register_account(
        &self,
        directory_url: &str,
        contact_email: &str,
    ) -> Result<Box<dyn AuthoritySession>, AuthorityError> {
        info!(directory = %directory_url, email = %contact_email, "Creating ACME account");

        let (account, _credentials) = Account::builder()?
            .create(
                &NewAccount {
                    contact: &[&format!("mailto:{}", contact_email)],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                directory_url.to_owned(),
                None,
            )
            .await?;

        debug!(directory = %directory_url, "ACME account created");
        Ok(Box::new(AcmeSession {
            account,
            order: None,
        }))
    }
}

struct AcmeSession {
    account: Account,
    order: Option<Order>,
}

impl AcmeSession {
    fn order(&mut self) -> Result<&mut Order, AuthorityError> {
        self.order.as_mut().ok_or(AuthorityError::NoOrder)
    }
}

#[async_trait]
impl AuthoritySession for AcmeSession {
    async fn new_order(
        &mut self,
        domains: &[String],
    ) -> Result<Vec<PendingAuthorization>, AuthorityError> {
        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();

        info!(domains = ?domains, "Creating certificate order with DNS-01 challenges");

        let mut order = self.account.new_order(&NewOrder::new(&identifiers)).await?;

        let mut pending = Vec::new();
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;

            let domain = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            debug!(domain = %domain, status = ?authz.status, "Processing DNS-01 authorization");

            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }

            let challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| AuthorityError::NoDnsChallenge(domain.clone()))?;

            pending.push(PendingAuthorization {
                key_authorization: challenge.key_authorization().as_str().to_string(),
                challenge_url: challenge.url.clone(),
                domain,
            });
        }

        self.order = Some(order);
        Ok(pending)
    }

    async fn set_challenge_ready(&mut self, challenge_url: &str) -> Result<(), AuthorityError> {
        debug!(challenge_url = %challenge_url, "Setting challenge ready");

        let order = self.order()?;
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;

            let matches = authz.challenges.iter().any(|c| c.url == challenge_url);
            if !matches {
                continue;
            }
            if let Some(mut challenge) = authz.challenge(ChallengeType::Dns01) {
                challenge.set_ready().await?;
                return Ok(());
            }
        }

        Err(AuthorityError::Protocol(format!(
            "Challenge not found for URL: {}",
            challenge_url
        )))
    }

    async fn poll_order(&mut self) -> Result<OrderProgress, AuthorityError> {
        let order = self.order()?;
        let status = order.refresh().await?.status;
        trace!(status = ?status, "Polled order");

        let progress = match status {
            OrderStatus::Pending | OrderStatus::Processing => OrderProgress::Pending,
            OrderStatus::Ready => OrderProgress::Ready,
            OrderStatus::Valid => OrderProgress::Valid,
            OrderStatus::Invalid => {
                let (domain, detail) = failed_authorization(order).await;
                OrderProgress::Invalid { domain, detail }
            }
        };
        Ok(progress)
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AuthorityError> {
        info!("Finalizing certificate order");
        self.order()?.finalize_csr(csr_der).await?;
        Ok(())
    }

    async fn certificate(&mut self) -> Result<Option<String>, AuthorityError> {
        Ok(self.order()?.certificate().await?)
    }
}

/// The first invalid authorization of a failed order, and its error detail
async fn failed_authorization(order: &mut Order) -> (Option<String>, Option<String>) {
    let mut authorizations = order.authorizations();
    while let Some(Ok(authz)) = authorizations.next().await {
        if authz.status != AuthorizationStatus::Invalid {
            continue;
        }

        let domain = match &authz.identifier().identifier {
            Identifier::Dns(domain) => Some(domain.clone()),
            _ => None,
        };
        let detail = authz
            .challenges
            .iter()
            .find_map(|c| c.error.as_ref())
            .map(ToString::to_string);
        return (domain, detail);
    }
    (None, None)
}
