//! Example configuration shipped with the binary
//!
//! Printed by `certkeeper print-config` as a starting point and parsed in
//! tests to keep it in sync with the model.

/// Annotated example configuration in TOML format
pub const EXAMPLE_CONFIG_TOML: &str = r#"
# certkeeper example configuration

[acme]
contact_email = "admin@example.com"
# production_directory = "https://acme-v02.api.letsencrypt.org/directory"
# staging_directory = "https://acme-staging-v02.api.letsencrypt.org/directory"
request_timeout_secs = 30
validation_timeout_secs = 120
poll_interval_ms = 2000

[storage]
ssl_directory = "/var/lib/certkeeper/ssl"

[dns]
default_profile = 1
api_timeout_secs = 30

# [dns.propagation]
# initial_delay_secs = 10
# check_interval_secs = 5
# timeout_secs = 120
# nameservers = ["1.1.1.1", "8.8.8.8"]

[[profiles]]
id = 1
name = "cloudflare-main"
provider = "cloudflare"
api_key = "replace-me"
zone_id = "0123456789abcdef"
create_url = "https://api.cloudflare.com/client/v4/zones/{zone.id}/dns_records"
method = "POST"

[logging]
level = "info"
format = "pretty"
"#;
