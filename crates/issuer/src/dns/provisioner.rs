//! TXT record provisioning through a profile's HTTP API
//!
//! # Request shape
//!
//! ```text
//! {METHOD} {rendered URL}
//! Authorization: Bearer {api_key}
//! Content-Type: application/json
//!
//! {"type": "TXT", "name": "_acme-challenge.example.com", "content": "<value>", "ttl": 60}
//! ```
//!
//! On retraction the method is `DELETE`, the delete template is used when
//! the profile has one, and `content` is `null`. Publishing a blank value
//! is treated as a retraction. Any 2xx status counts as
//! success. Failures are not retried.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use certkeeper_common::DnsProfile;

use super::template::{self, TemplateVars};

/// TTL of published challenge records, in seconds
pub const CHALLENGE_TTL: u32 = 60;

/// Errors that can occur while calling a DNS provider
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The HTTP client could not be built
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    /// The profile's method override is not a valid HTTP method
    #[error("Invalid HTTP method '{0}' in DNS profile")]
    InvalidMethod(String),

    /// The request could not be sent or the response not read
    #[error("DNS provider request to '{url}' failed: {message}")]
    Request { url: String, message: String },

    /// The provider did not answer in time
    #[error("DNS provider request timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// The provider answered with a non-2xx status
    #[error("DNS provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Publishes and retracts challenge TXT records
///
/// Implementations must be safe to call concurrently. Callers serialize
/// operations on the same record through [`super::RecordLocks`].
#[async_trait]
pub trait RecordProvisioner: Send + Sync + Debug {
    /// Create or overwrite `record_name` with `value`
    async fn publish(
        &self,
        profile: &DnsProfile,
        record_name: &str,
        value: &str,
        primary_domain: Option<&str>,
    ) -> Result<(), ProvisionError>;

    /// Remove `record_name`
    async fn retract(
        &self,
        profile: &DnsProfile,
        record_name: &str,
        primary_domain: Option<&str>,
    ) -> Result<(), ProvisionError>;
}

/// Provider-agnostic provisioner driven entirely by the profile's templates
#[derive(Debug, Clone)]
pub struct HttpRecordProvisioner {
    client: Client,
    timeout: Duration,
}

impl HttpRecordProvisioner {
    /// Create a provisioner whose requests are bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisionError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    async fn send(
        &self,
        profile: &DnsProfile,
        record_name: &str,
        value: Option<&str>,
        primary_domain: Option<&str>,
    ) -> Result<(), ProvisionError> {
        let result = self
            .send_inner(profile, record_name, value, primary_domain)
            .await;

        if let Err(e) = &result {
            error!(
                profile_id = %profile.id,
                domain = primary_domain.unwrap_or("-"),
                record = %record_name,
                retract = value.is_none(),
                error = %e,
                "DNS record update failed"
            );
        }
        result
    }

    async fn send_inner(
        &self,
        profile: &DnsProfile,
        record_name: &str,
        value: Option<&str>,
        primary_domain: Option<&str>,
    ) -> Result<(), ProvisionError> {
        let url_template = match (value, profile.delete_url.as_deref()) {
            (None, Some(delete_url)) if !delete_url.trim().is_empty() => delete_url,
            _ => profile.create_url.as_str(),
        };

        let url = template::render(
            url_template,
            &TemplateVars {
                zone_id: &profile.zone_id,
                record_name,
                record_value: value,
                domain_name: primary_domain,
            },
        );

        let method = request_method(profile, value.is_none())?;

        debug!(
            profile_id = %profile.id,
            method = %method,
            record = %record_name,
            "Sending DNS record update"
        );

        let body = TxtRecordBody {
            record_type: "TXT",
            name: record_name,
            content: value,
            ttl: CHALLENGE_TTL,
        };

        let response = self
            .client
            .request(method, &url)
            .bearer_auth(&profile.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProvisionError::Timeout {
                        elapsed_secs: self.timeout.as_secs(),
                    }
                } else {
                    ProvisionError::Request {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(profile_id = %profile.id, record = %record_name, status = status.as_u16(), "DNS record updated");
        Ok(())
    }
}

#[async_trait]
impl RecordProvisioner for HttpRecordProvisioner {
    async fn publish(
        &self,
        profile: &DnsProfile,
        record_name: &str,
        value: &str,
        primary_domain: Option<&str>,
    ) -> Result<(), ProvisionError> {
        // A blank value means there is nothing to publish
        let value = Some(value).filter(|v| !v.trim().is_empty());
        self.send(profile, record_name, value, primary_domain).await
    }

    async fn retract(
        &self,
        profile: &DnsProfile,
        record_name: &str,
        primary_domain: Option<&str>,
    ) -> Result<(), ProvisionError> {
        self.send(profile, record_name, None, primary_domain).await
    }
}

/// `DELETE` for retraction, otherwise the profile's method or `POST`
fn request_method(profile: &DnsProfile, retract: bool) -> Result<Method, ProvisionError> {
    if retract {
        return Ok(Method::DELETE);
    }

    match profile.method.as_deref().map(str::trim) {
        None | Some("") => Ok(Method::POST),
        Some(raw) => Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
            .map_err(|_| ProvisionError::InvalidMethod(raw.to_string())),
    }
}

#[derive(Debug, Serialize)]
struct TxtRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: Option<&'a str>,
    ttl: u32,
}
