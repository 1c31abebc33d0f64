//! Type-safe identifier newtypes.
//!
//! These keep certificate, profile and user identifiers from being mixed up
//! at call sites (e.g. passing a profile id where a certificate id is
//! expected).

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of generated certificate identifiers
pub const CERTIFICATE_ID_LEN: usize = 25;

/// Opaque random identifier of a certificate record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(CERTIFICATE_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Wrap an identifier loaded from storage
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primary key of a DNS profile.
///
/// Accepts either a JSON number or a numeric string on input, since front
/// ends submit form values as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ProfileRef", into = "u64")]
pub struct ProfileId(u64);

impl ProfileId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfileId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<ProfileId> for u64 {
    fn from(id: ProfileId) -> Self {
        id.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileRef {
    Number(u64),
    Text(String),
}

impl TryFrom<ProfileRef> for ProfileId {
    type Error = String;

    fn try_from(value: ProfileRef) -> Result<Self, Self::Error> {
        match value {
            ProfileRef::Number(n) => Ok(Self(n)),
            ProfileRef::Text(s) => s
                .parse()
                .map_err(|_| format!("invalid DNS profile id '{}'", s)),
        }
    }
}

/// Identifier of the user that created a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
