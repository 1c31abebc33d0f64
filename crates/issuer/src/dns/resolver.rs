//! DNS profile lookup

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use certkeeper_common::{DnsProfile, ProfileId};

use crate::store::{ProfileStore, StoreError};

/// Errors raised while resolving a DNS profile
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No profile with this id exists
    #[error("Invalid DNS Profile provided: profile {0} not found")]
    ProfileNotFound(ProfileId),

    /// The profile lacks a field needed to publish records
    #[error("DNS profile {id} is incomplete: missing {missing}")]
    ProfileIncomplete { id: ProfileId, missing: &'static str },

    /// The profile store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Either a profile id to load or an already loaded profile
#[derive(Debug, Clone)]
pub enum ProfileRef {
    Id(ProfileId),
    Loaded(DnsProfile),
}

impl From<ProfileId> for ProfileRef {
    fn from(id: ProfileId) -> Self {
        Self::Id(id)
    }
}

impl From<DnsProfile> for ProfileRef {
    fn from(profile: DnsProfile) -> Self {
        Self::Loaded(profile)
    }
}

/// Loads DNS profiles and checks they can be used for issuance
#[derive(Debug, Clone)]
pub struct ProfileResolver {
    profiles: Arc<dyn ProfileStore>,
}

impl ProfileResolver {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }

    /// Resolve a profile reference; the profile is returned unchanged
    pub async fn resolve(&self, target: impl Into<ProfileRef>) -> Result<DnsProfile, ResolveError> {
        let profile = match target.into() {
            ProfileRef::Loaded(profile) => profile,
            ProfileRef::Id(id) => self
                .profiles
                .find_profile(id)
                .await?
                .ok_or(ResolveError::ProfileNotFound(id))?,
        };

        ensure_complete(&profile)?;
        debug!(profile_id = %profile.id, provider = %profile.provider, "Resolved DNS profile");
        Ok(profile)
    }
}

fn ensure_complete(profile: &DnsProfile) -> Result<(), ResolveError> {
    let missing = if profile.api_key.trim().is_empty() {
        Some("api_key")
    } else if profile.create_url.trim().is_empty() {
        Some("create_url")
    } else {
        None
    };

    match missing {
        Some(missing) => {
            warn!(profile_id = %profile.id, missing, "DNS profile is incomplete");
            Err(ResolveError::ProfileIncomplete {
                id: profile.id,
                missing,
            })
        }
        None => Ok(()),
    }
}
