//! Configuration validation functions
//!
//! Field validators referenced from `#[validate(custom(...))]` attributes,
//! plus the cross-field checks run on the whole [`Config`].

use std::borrow::Cow;
use std::collections::HashSet;
use tracing::warn;
use validator::ValidationError;

use crate::Config;

// ============================================================================
// Field Validators
// ============================================================================

/// Validate that an ACME directory is an absolute http(s) URL
pub fn validate_directory_url(url: &str) -> Result<(), ValidationError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));

    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_directory_url");
            err.message = Some(Cow::Owned(format!(
                "Invalid ACME directory URL '{}'. Expected an absolute http(s) URL",
                url
            )));
            Err(err)
        }
    }
}

// ============================================================================
// Semantic Validation
// ============================================================================

/// Cross-field checks on a parsed configuration
pub fn validate_config_semantics(config: &Config) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for profile in &config.profiles {
        if !seen.insert(profile.id) {
            let mut err = ValidationError::new("duplicate_profile");
            err.message = Some(Cow::Owned(format!(
                "DNS profile id {} is defined more than once",
                profile.id
            )));
            return Err(err);
        }

        if profile.api_key.trim().is_empty() || profile.create_url.trim().is_empty() {
            warn!(
                profile_id = %profile.id,
                "DNS profile has no api key or create URL and cannot be used for issuance"
            );
        }
    }

    if let Some(default_profile) = config.dns.default_profile {
        if !config.profiles.is_empty() && !seen.contains(&default_profile) {
            let mut err = ValidationError::new("unknown_default_profile");
            err.message = Some(Cow::Owned(format!(
                "Default DNS profile {} is not among the configured profiles",
                default_profile
            )));
            return Err(err);
        }
    }

    Ok(())
}
