//! DNS provider and propagation settings

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use validator::Validate;

use certkeeper_common::ProfileId;

/// Settings for publishing challenge records
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DnsSettings {
    /// Profile used when a request names none
    #[serde(default)]
    pub default_profile: Option<ProfileId>,

    /// Timeout for each call to a DNS provider API
    #[serde(default = "default_api_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub api_timeout_secs: u64,

    /// Wait for published records to become visible before validation
    #[serde(default)]
    #[validate(nested)]
    pub propagation: Option<PropagationSettings>,
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            default_profile: None,
            api_timeout_secs: default_api_timeout(),
            propagation: None,
        }
    }
}

impl DnsSettings {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Propagation check timing
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PropagationSettings {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_check_interval")]
    #[validate(range(min = 1))]
    pub check_interval_secs: u64,

    #[serde(default = "default_propagation_timeout")]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_secs: u64,

    /// Resolvers to query; system configuration when empty
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            check_interval_secs: default_check_interval(),
            timeout_secs: default_propagation_timeout(),
            nameservers: Vec::new(),
        }
    }
}

fn default_api_timeout() -> u64 {
    30
}

fn default_initial_delay() -> u64 {
    10
}

fn default_check_interval() -> u64 {
    5
}

fn default_propagation_timeout() -> u64 {
    120
}
