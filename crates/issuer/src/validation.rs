//! Certificate request normalization and validation
//!
//! Every field is checked and every problem is reported; validation never
//! stops at the first error and never touches the store.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use certkeeper_common::{
    Certificate, CertificateClass, FieldError, FieldErrorKind, ProfileId, ValidationErrors,
};

/// Inclusive bounds on name and description length after trimming
pub const TEXT_MIN_LEN: usize = 3;
pub const TEXT_MAX_LEN: usize = 255;

/// Most domains a single certificate may cover
pub const MAX_DOMAINS: usize = 40;

/// Longest hostname accepted, in bytes
pub const MAX_HOSTNAME_LEN: usize = 253;

/// Lowercase hostname with at least two labels.
///
/// Labels may carry an `xn--` or `_` prefix; the whole name may carry a
/// leading `*.` wildcard label. The last label is alphabetic or a punycode
/// TLD.
static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:\*\.)?(?:(?:xn--|_)?[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+(?:[a-z]{2,63}|xn--[a-z0-9-]{1,59})$",
    )
    .expect("hostname pattern is a valid regex")
});

/// Whether `domain` (already trimmed and lowercased) is an acceptable hostname
pub fn is_valid_hostname(domain: &str) -> bool {
    !domain.is_empty() && domain.len() <= MAX_HOSTNAME_LEN && HOSTNAME_RE.is_match(domain)
}

// ============================================================================
// Request types
// ============================================================================

/// A create or update request as submitted by the front end
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateRequest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Single domain, merged into `domains`
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub domains: Option<Vec<String>>,

    #[serde(default, alias = "provider")]
    pub profile: Option<ProfileId>,

    /// Certificate class as free text
    #[serde(default, rename = "type")]
    pub class: Option<String>,
}

/// A create request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub name: String,
    pub description: Option<String>,
    /// Deduplicated, first entry is the primary domain
    pub domains: Vec<String>,
    pub class: CertificateClass,
    pub profile: ProfileId,
}

/// How an update treats the domain list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// The submitted domains replace the stored set
    Put,
    /// The submitted domains are added to the stored set
    Patch,
}

/// An update request that passed validation, resolved against the stored
/// record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Final domain set after replace or merge
    pub domains: Vec<String>,
    /// Final class
    pub class: CertificateClass,
    pub profile: Option<ProfileId>,
}

// ============================================================================
// Validator
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RequestValidator {
    default_profile: Option<ProfileId>,
}

impl RequestValidator {
    pub fn new(default_profile: Option<ProfileId>) -> Self {
        Self { default_profile }
    }

    /// Validate a create request
    pub fn validate_create(
        &self,
        request: &CertificateRequest,
    ) -> Result<ValidatedRequest, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = match request.name.as_deref().map(str::trim) {
            Some(name) if text_len_ok(name) => name.to_string(),
            _ => {
                errors.push(FieldError::invalid_field("name", "Invalid name provided"));
                String::new()
            }
        };

        let description = check_description(request.description.as_deref(), &mut errors);
        let class = CertificateClass::from_input(request.class.as_deref());

        let domains = merge_domains(
            std::iter::empty(),
            request.domain.as_deref(),
            request.domains.as_deref(),
        );
        check_domains(&domains, &mut errors);

        let profile = request.profile.or(self.default_profile);
        if profile.is_none() {
            errors.push(FieldError::new(
                "dns-profile",
                FieldErrorKind::InvalidProfile,
                "Invalid DNS Profile provided",
            ));
        }

        match profile {
            Some(profile) if errors.is_empty() => Ok(ValidatedRequest {
                name,
                description,
                domains,
                class,
                profile,
            }),
            _ => Err(errors),
        }
    }

    /// Validate an update of `existing`
    ///
    /// Unlike create, an unrecognised class is rejected here instead of
    /// falling back to production.
    pub fn validate_update(
        &self,
        request: &CertificateRequest,
        existing: &Certificate,
        mode: UpdateMode,
    ) -> Result<ValidatedUpdate, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = match request.name.as_deref().map(str::trim) {
            None => None,
            Some(name) if text_len_ok(name) => Some(name.to_string()),
            Some(_) => {
                errors.push(FieldError::invalid_field("name", "Invalid name provided"));
                None
            }
        };

        let description = check_description(request.description.as_deref(), &mut errors);

        let class = match request.class.as_deref() {
            None => existing.class,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                errors.push(FieldError::invalid_field(
                    "type",
                    "Invalid certificate type provided",
                ));
                existing.class
            }),
        };

        let stored = match mode {
            UpdateMode::Put => &[][..],
            UpdateMode::Patch => existing.domains.as_slice(),
        };
        let domains = merge_domains(
            stored.iter().map(String::as_str),
            request.domain.as_deref(),
            request.domains.as_deref(),
        );
        check_domains(&domains, &mut errors);

        errors.into_result(ValidatedUpdate {
            name,
            description,
            domains,
            class,
            profile: request.profile,
        })
    }
}

fn text_len_ok(value: &str) -> bool {
    (TEXT_MIN_LEN..=TEXT_MAX_LEN).contains(&value.chars().count())
}

/// Blank descriptions become `None`
fn check_description(raw: Option<&str>, errors: &mut ValidationErrors) -> Option<String> {
    let description = raw.map(str::trim).filter(|d| !d.is_empty())?;
    if text_len_ok(description) {
        Some(description.to_string())
    } else {
        errors.push(FieldError::invalid_field(
            "description",
            "Invalid description provided",
        ));
        None
    }
}

/// Normalize and merge domains, keeping first occurrences in order:
/// `stored`, then `domains`, then `domain`
fn merge_domains<'a>(
    stored: impl Iterator<Item = &'a str>,
    domain: Option<&'a str>,
    domains: Option<&'a [String]>,
) -> Vec<String> {
    let submitted = domains
        .into_iter()
        .flatten()
        .map(String::as_str)
        .chain(domain);

    let mut merged: Vec<String> = Vec::new();
    for raw in stored.chain(submitted) {
        let normalized = raw.trim().to_ascii_lowercase();
        if !merged.contains(&normalized) {
            merged.push(normalized);
        }
    }
    merged
}

fn check_domains(domains: &[String], errors: &mut ValidationErrors) {
    if domains.is_empty() {
        errors.push(FieldError::new(
            "domains",
            FieldErrorKind::TooFewDomains,
            "At least one valid domain must be provided",
        ));
    } else if domains.len() > MAX_DOMAINS {
        errors.push(FieldError::new(
            "domains",
            FieldErrorKind::TooManyDomains,
            "Too many domains provided",
        ));
    }

    for domain in domains.iter().filter(|d| !is_valid_hostname(d)) {
        errors.push(FieldError::new(
            "domains",
            FieldErrorKind::InvalidDomain,
            format!("Invalid domain provided: '{}'", domain),
        ));
    }
}
