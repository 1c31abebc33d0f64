//! DNS propagation checking for challenge records
//!
//! Optionally verifies that a published TXT record is visible through
//! recursive resolvers before the authority is told to validate it.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use certkeeper_config::PropagationSettings;

/// Errors raised while waiting for propagation
#[derive(Debug, Error)]
pub enum PropagationError {
    /// The record did not show up before the deadline
    #[error("TXT record '{record}' not visible after {elapsed_secs}s")]
    Timeout { record: String, elapsed_secs: u64 },

    /// A lookup failed with something other than "not found"
    #[error("DNS lookup failed for '{record}': {message}")]
    Lookup { record: String, message: String },
}

/// Polls resolvers until a TXT record carries an expected value
#[derive(Debug)]
pub struct PropagationChecker {
    initial_delay: Duration,
    check_interval: Duration,
    timeout: Duration,
    resolver: TokioResolver,
}

impl PropagationChecker {
    pub fn new(settings: &PropagationSettings) -> Self {
        Self {
            initial_delay: Duration::from_secs(settings.initial_delay_secs),
            check_interval: Duration::from_secs(settings.check_interval_secs),
            timeout: Duration::from_secs(settings.timeout_secs),
            resolver: build_resolver(settings),
        }
    }

    /// Upper bound on [`PropagationChecker::wait_for`], including the
    /// initial delay
    pub fn max_wait(&self) -> Duration {
        self.initial_delay + self.timeout
    }

    /// Wait until `record_name` resolves to `expected_value`
    pub async fn wait_for(
        &self,
        record_name: &str,
        expected_value: &str,
    ) -> Result<(), PropagationError> {
        let start = Instant::now();

        debug!(
            record = %record_name,
            timeout_secs = self.timeout.as_secs(),
            "Waiting for DNS propagation"
        );

        tokio::time::sleep(self.initial_delay).await;
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.check_record(record_name, expected_value).await {
                Ok(true) => {
                    debug!(
                        record = %record_name,
                        elapsed_secs = start.elapsed().as_secs(),
                        "DNS propagation confirmed"
                    );
                    return Ok(());
                }
                Ok(false) => {
                    trace!(record = %record_name, "Record not yet propagated");
                }
                Err(e) => {
                    warn!(record = %record_name, error = %e, "DNS lookup error");
                }
            }

            if Instant::now() >= deadline {
                return Err(PropagationError::Timeout {
                    record: record_name.to_string(),
                    elapsed_secs: start.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(self.check_interval).await;
        }
    }

    async fn check_record(
        &self,
        record_name: &str,
        expected_value: &str,
    ) -> Result<bool, PropagationError> {
        match self.resolver.txt_lookup(record_name).await {
            Ok(records) => Ok(records.iter().any(|record| {
                // A TXT record may be split into several strings
                let value: String = record
                    .txt_data()
                    .iter()
                    .map(|data| String::from_utf8_lossy(data))
                    .collect();
                value == expected_value
            })),
            Err(e) => {
                let message = e.to_string();
                let lowered = message.to_lowercase();
                // Absent records are expected while the provider catches up
                if lowered.contains("no records found")
                    || lowered.contains("nxdomain")
                    || lowered.contains("record not found")
                {
                    Ok(false)
                } else {
                    Err(PropagationError::Lookup {
                        record: record_name.to_string(),
                        message,
                    })
                }
            }
        }
    }
}

fn build_resolver(settings: &PropagationSettings) -> TokioResolver {
    let resolver_config = if settings.nameservers.is_empty() {
        ResolverConfig::default()
    } else {
        let mut config = ResolverConfig::new();
        for ip in &settings.nameservers {
            config.add_name_server(NameServerConfig::new(SocketAddr::new(*ip, 53), Protocol::Udp));
        }
        config
    };

    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(5);
    opts.attempts = 2;
    // Every check must hit the resolvers
    opts.cache_size = 0;

    Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
        .with_options(opts)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_checker_from_settings() {
        let settings = PropagationSettings {
            initial_delay_secs: 5,
            check_interval_secs: 2,
            timeout_secs: 60,
            nameservers: vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))],
        };

        let checker = PropagationChecker::new(&settings);
        assert_eq!(checker.check_interval, Duration::from_secs(2));
        assert_eq!(checker.max_wait(), Duration::from_secs(65));
    }

    #[tokio::test]
    async fn test_default_settings_use_system_resolvers() {
        let checker = PropagationChecker::new(&PropagationSettings::default());
        assert_eq!(checker.max_wait(), Duration::from_secs(130));
    }
}
