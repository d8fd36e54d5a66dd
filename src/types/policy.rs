//! Replication policy types.
//!
//! A tenant's replication configuration says, per space, which source store
//! should be mirrored into which destination store(s). The producer expands a
//! snapshot of this configuration into morsels at startup.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::ids::{AccountId, SpaceId, StoreId};

/// A single source-to-destination replication edge.
///
/// A space may carry several policies with the same source and different
/// destinations (fan-out).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorePolicy {
    #[serde(rename = "srcStoreId")]
    pub src_store_id: StoreId,

    #[serde(rename = "destStoreId")]
    pub dest_store_id: StoreId,
}

impl StorePolicy {
    pub fn new(src: impl Into<StoreId>, dest: impl Into<StoreId>) -> Self {
        StorePolicy {
            src_store_id: src.into(),
            dest_store_id: dest.into(),
        }
    }
}

impl std::fmt::Display for StorePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.src_store_id, self.dest_store_id)
    }
}

/// Per-tenant replication configuration: space id to the set of store
/// policies that apply to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantPolicy {
    spaces: BTreeMap<SpaceId, BTreeSet<StorePolicy>>,
}

impl TenantPolicy {
    pub fn new() -> Self {
        TenantPolicy::default()
    }

    /// Adds a policy for a space, returning `self` for builder-style use.
    pub fn with_policy(mut self, space_id: impl Into<SpaceId>, policy: StorePolicy) -> Self {
        self.add(space_id, policy);
        self
    }

    pub fn add(&mut self, space_id: impl Into<SpaceId>, policy: StorePolicy) {
        self.spaces.entry(space_id.into()).or_default().insert(policy);
    }

    /// Spaces with at least one policy, in lexicographic order.
    pub fn spaces(&self) -> impl Iterator<Item = &SpaceId> {
        self.spaces.keys()
    }

    pub fn store_policies(&self, space_id: &SpaceId) -> impl Iterator<Item = &StorePolicy> {
        self.spaces.get(space_id).into_iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

/// The producer's read-only view of every tenant's replication policy,
/// captured once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySnapshot {
    accounts: BTreeMap<AccountId, TenantPolicy>,
}

impl PolicySnapshot {
    pub fn new() -> Self {
        PolicySnapshot::default()
    }

    pub fn with_account(mut self, account: impl Into<AccountId>, policy: TenantPolicy) -> Self {
        self.accounts.insert(account.into(), policy);
        self
    }

    /// Accounts with replication configured, in lexicographic order.
    ///
    /// The ordering determines the initial fairness order of policy-derived
    /// morsels, so it must be deterministic.
    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, &TenantPolicy)> {
        self.accounts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Loads a snapshot from a JSON file of the shape
    /// `{ "account": { "space": [ {"srcStoreId": ..., "destStoreId": ...} ] } }`.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, PolicyLoadError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Errors loading a policy snapshot from disk.
#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
