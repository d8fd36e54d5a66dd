//! Morsels: the producer's unit of resumable progress.
//!
//! A morsel names one (account, space, store policy) enumeration and the
//! marker it has advanced to. Identity excludes the marker, so a persisted
//! morsel (with progress) and a freshly policy-derived morsel (marker null)
//! collide in the morsel queue and the persisted one wins.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{AccountId, ContentId, SpaceId};
use super::policy::StorePolicy;

/// One resumable slice of producer work.
///
/// Serialized into the state blob as
/// `{ account, spaceId, marker, srcStoreId, destStoreId }`; a null marker
/// means the space scan has not begun and the deletion sweep has not yet run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Morsel {
    pub account: AccountId,

    pub space_id: SpaceId,

    /// Last content id successfully enqueued; exclusive lower bound for the
    /// next source page.
    pub marker: Option<ContentId>,

    #[serde(flatten)]
    pub store_policy: StorePolicy,
}

impl Morsel {
    pub fn new(
        account: impl Into<AccountId>,
        space_id: impl Into<SpaceId>,
        marker: Option<ContentId>,
        store_policy: StorePolicy,
    ) -> Self {
        Morsel {
            account: account.into(),
            space_id: space_id.into(),
            marker,
            store_policy,
        }
    }

    /// The dedup key for queue membership and persisted-state merging.
    pub fn identity(&self) -> MorselIdentity {
        MorselIdentity {
            account: self.account.clone(),
            space_id: self.space_id.clone(),
            store_policy: self.store_policy.clone(),
        }
    }

    /// Advances the marker. Markers only ever move forward within a run;
    /// they reset to null when a full pass over the space completes.
    pub fn advance_to(&mut self, marker: ContentId) {
        self.marker = Some(marker);
    }
}

impl fmt::Display for Morsel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} [{}] marker={}",
            self.account,
            self.space_id,
            self.store_policy,
            self.marker.as_ref().map(ContentId::as_str).unwrap_or("<null>")
        )
    }
}

/// Morsel identity: everything but the marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MorselIdentity {
    pub account: AccountId,
    pub space_id: SpaceId,
    pub store_policy: StorePolicy,
}
