//! Capability bitfield used to gate certificate operations.
//!
//! Each [`Capability`] owns exactly one bit of a `u64`. A subject carries a
//! single [`CapabilitySet`] value that is replaced wholesale when edited.
//!
//! Lookups and edits deliberately disagree on unknown names:
//!
//! - [`CapabilitySet::has`] and [`CapabilitySet::has_any`] return `false` for
//!   names that are not defined, so authorization checks fail closed.
//! - [`CapabilitySet::add`] and [`CapabilitySet::remove`] return
//!   [`CapabilityError::Unknown`], so administrative edits fail loud.
//!
//! ```
//! use certkeeper_common::capability::CapabilitySet;
//!
//! let perms = CapabilitySet::from_bits(0).add(["CreateCertificates"]).unwrap();
//! assert!(perms.has("CreateCertificates"));
//! assert!(!perms.has("NoSuchCapability"));
//! assert!(perms.add(["NoSuchCapability"]).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by capability edits
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// A name did not match any defined capability
    #[error("Invalid capability: {0}")]
    Unknown(String),
}

// ============================================================================
// Capability flags
// ============================================================================

/// A single named permission bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// List and inspect certificates
    ViewCertificates,
    /// Request new certificates
    CreateCertificates,
    /// Change name, description, domains, class or profile of a certificate
    EditCertificates,
    /// Re-run issuance for an existing certificate
    RenewCertificates,
    /// Disable a certificate
    DisableCertificates,
    /// View the logs page in the admin panel
    ViewLogs,
    /// List DNS profiles
    ViewDnsProfiles,
    /// Create and edit DNS profiles
    ManageDnsProfiles,
    /// Invite new users to the admin panel
    InviteUsers,
    /// View the users page
    ViewUsers,
    /// Edit settings of user accounts
    EditUsers,
    /// Delete user accounts
    DeleteUsers,
    /// Change the passwords of other accounts
    ChangeUserPasswords,
    /// Receive alert emails, e.g. for expiring certificates
    ReceiveAdminAlerts,
    /// View the site settings page
    ViewSiteSettings,
    /// Change site settings
    ChangeSiteSettings,
}

impl Capability {
    /// Every defined capability, in bit order
    pub const ALL: [Capability; 16] = [
        Capability::ViewCertificates,
        Capability::CreateCertificates,
        Capability::EditCertificates,
        Capability::RenewCertificates,
        Capability::DisableCertificates,
        Capability::ViewLogs,
        Capability::ViewDnsProfiles,
        Capability::ManageDnsProfiles,
        Capability::InviteUsers,
        Capability::ViewUsers,
        Capability::EditUsers,
        Capability::DeleteUsers,
        Capability::ChangeUserPasswords,
        Capability::ReceiveAdminAlerts,
        Capability::ViewSiteSettings,
        Capability::ChangeSiteSettings,
    ];

    /// Bit position of this capability.
    ///
    /// Positions are persisted, so existing values must never move.
    pub const fn position(self) -> u32 {
        match self {
            Capability::ViewCertificates => 0,
            Capability::CreateCertificates => 1,
            Capability::EditCertificates => 2,
            Capability::RenewCertificates => 3,
            Capability::DisableCertificates => 4,
            Capability::ViewLogs => 6,
            Capability::ViewDnsProfiles => 7,
            Capability::ManageDnsProfiles => 8,
            Capability::InviteUsers => 10,
            Capability::ViewUsers => 11,
            Capability::EditUsers => 12,
            Capability::DeleteUsers => 13,
            Capability::ChangeUserPasswords => 14,
            Capability::ReceiveAdminAlerts => 16,
            Capability::ViewSiteSettings => 20,
            Capability::ChangeSiteSettings => 21,
        }
    }

    /// The single-bit mask of this capability
    pub const fn bit(self) -> u64 {
        1u64 << self.position()
    }

    /// Canonical name, as stored in administrative payloads
    pub const fn name(self) -> &'static str {
        match self {
            Capability::ViewCertificates => "ViewCertificates",
            Capability::CreateCertificates => "CreateCertificates",
            Capability::EditCertificates => "EditCertificates",
            Capability::RenewCertificates => "RenewCertificates",
            Capability::DisableCertificates => "DisableCertificates",
            Capability::ViewLogs => "ViewLogs",
            Capability::ViewDnsProfiles => "ViewDnsProfiles",
            Capability::ManageDnsProfiles => "ManageDnsProfiles",
            Capability::InviteUsers => "InviteUsers",
            Capability::ViewUsers => "ViewUsers",
            Capability::EditUsers => "EditUsers",
            Capability::DeleteUsers => "DeleteUsers",
            Capability::ChangeUserPasswords => "ChangeUserPasswords",
            Capability::ReceiveAdminAlerts => "ReceiveAdminAlerts",
            Capability::ViewSiteSettings => "ViewSiteSettings",
            Capability::ChangeSiteSettings => "ChangeSiteSettings",
        }
    }

    /// Look up a capability by exact name
    pub fn lookup(name: &str) -> Option<Capability> {
        Capability::ALL.into_iter().find(|cap| cap.name() == name)
    }
}

impl FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::lookup(s).ok_or_else(|| CapabilityError::Unknown(s.to_string()))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Capability set
// ============================================================================

/// The bitfield value owned by one subject.
///
/// Serialized as the raw integer. Bits that do not correspond to a defined
/// capability are preserved untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(u64);

impl CapabilitySet {
    /// The empty set
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    /// Wrap a raw persisted value
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// OR-reduce a list of names into a set, rejecting unknown names
    pub fn from_names<I, S>(names: I) -> Result<Self, CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::EMPTY.add(names)
    }

    /// Build a set from typed capabilities
    pub fn from_capabilities<I>(caps: I) -> Self
    where
        I: IntoIterator<Item = Capability>,
    {
        Self(caps.into_iter().fold(0, |acc, cap| acc | cap.bit()))
    }

    /// Raw integer value
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Typed membership check
    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() == cap.bit()
    }

    /// Whether the named capability is present. Unknown names yield `false`.
    pub fn has(self, name: &str) -> bool {
        Capability::lookup(name).is_some_and(|cap| self.contains(cap))
    }

    /// Whether at least one of the named capabilities is present.
    /// Unknown names are skipped.
    pub fn has_any<I, S>(self, names: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().any(|name| self.has(name.as_ref()))
    }

    /// Whether every named capability is present.
    ///
    /// An unknown name makes the result `false`.
    pub fn has_all<I, S>(self, names: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().all(|name| self.has(name.as_ref()))
    }

    /// Return a new set with the named capabilities added
    pub fn add<I, S>(self, names: I) -> Result<Self, CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(self, |acc, name| {
            let cap: Capability = name.as_ref().parse()?;
            Ok(Self(acc.0 | cap.bit()))
        })
    }

    /// Return a new set with the named capabilities removed
    pub fn remove<I, S>(self, names: I) -> Result<Self, CapabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(self, |acc, name| {
            let cap: Capability = name.as_ref().parse()?;
            Ok(Self(acc.0 & !cap.bit()))
        })
    }

    /// Names of all defined capabilities present in the set
    pub fn to_names(self) -> BTreeSet<&'static str> {
        Capability::ALL
            .into_iter()
            .filter(|cap| self.contains(*cap))
            .map(Capability::name)
            .collect()
    }
}

impl From<u64> for CapabilitySet {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_are_unique_and_fit() {
        let mut seen = 0u64;
        for cap in Capability::ALL {
            assert_eq!(seen & cap.bit(), 0, "{} shares a bit", cap);
            seen |= cap.bit();
        }
        assert!(Capability::ChangeSiteSettings.position() >= 21);
    }

    #[test]
    fn test_add_then_remove_round_trips() {
        let original = CapabilitySet::from_bits(Capability::ViewLogs.bit());
        let added = original.add(["CreateCertificates"]).unwrap();
        assert!(added.has("CreateCertificates"));

        let removed = added.remove(["CreateCertificates"]).unwrap();
        assert_eq!(removed, original);
        assert!(!removed.has("CreateCertificates"));
    }

    #[test]
    fn test_unknown_name_fails_closed_on_lookup() {
        let all = CapabilitySet::from_bits(u64::MAX);
        assert!(!all.has("NotARealCapability"));
        assert!(!all.has_any(["NotARealCapability"]));
        assert!(!all.has_all(["ViewLogs", "NotARealCapability"]));
    }

    #[test]
    fn test_unknown_name_fails_loud_on_edit() {
        let set = CapabilitySet::EMPTY;
        assert_eq!(
            set.add(["ViewLogs", "Bogus"]).unwrap_err(),
            CapabilityError::Unknown("Bogus".to_string())
        );
        assert!(set.remove(["Bogus"]).is_err());
        assert!(CapabilitySet::from_names(["Bogus"]).is_err());
    }

    #[test]
    fn test_has_any_and_has_all() {
        let set = CapabilitySet::from_capabilities([
            Capability::ViewCertificates,
            Capability::RenewCertificates,
        ]);

        assert!(set.has_any(["EditCertificates", "RenewCertificates"]));
        assert!(!set.has_any(["EditCertificates", "DeleteUsers"]));
        assert!(set.has_all(["ViewCertificates", "RenewCertificates"]));
        assert!(!set.has_all(["ViewCertificates", "EditCertificates"]));
    }

    #[test]
    fn test_from_names_or_reduces() {
        let set = CapabilitySet::from_names(["ViewLogs", "InviteUsers"]).unwrap();
        assert_eq!(set.bits(), (1 << 6) | (1 << 10));
    }

    #[test]
    fn test_to_names_ignores_undefined_bits() {
        let set = CapabilitySet::from_bits(Capability::ViewUsers.bit() | (1 << 40));
        let names = set.to_names();
        assert_eq!(names.len(), 1);
        assert!(names.contains("ViewUsers"));
        // undefined bits survive edits untouched
        let edited = set.add(["EditUsers"]).unwrap();
        assert_eq!(edited.bits() & (1 << 40), 1 << 40);
    }

    #[test]
    fn test_serializes_as_integer() {
        let set = CapabilitySet::from_bits(1 << 21);
        assert_eq!(serde_json::to_string(&set).unwrap(), "2097152");
        let back: CapabilitySet = serde_json::from_str("2097152").unwrap();
        assert!(back.contains(Capability::ChangeSiteSettings));
    }
}
