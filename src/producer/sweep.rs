//! Membership structure for the deletion sweep.
//!
//! The sweep must answer `contains(id)` for every content id in the source
//! space while staying bounded in memory over multi-million-object spaces.
//! Instead of holding the ids themselves, [`DigestSet`] keeps a sorted vector
//! of 16-byte MD5 digests: 16 bytes per id regardless of id length, one
//! binary search per lookup. A 128-bit digest collision across a single
//! space is vanishingly unlikely; the trade-off is recorded in DESIGN.md.

use md5::{Digest, Md5};

use crate::types::ContentId;

fn digest(content_id: &ContentId) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(content_id.as_str().as_bytes());
    hasher.finalize().into()
}

/// A compact, build-then-query membership set over content ids.
///
/// Usage is two-phase: `insert` everything, `seal`, then `contains`. Sealing
/// sorts the digest vector so lookups are logarithmic.
#[derive(Debug, Default)]
pub struct DigestSet {
    digests: Vec<[u8; 16]>,
    sealed: bool,
}

impl DigestSet {
    pub fn new() -> Self {
        DigestSet::default()
    }

    /// Records an id. Must not be called after `seal`.
    pub fn insert(&mut self, content_id: &ContentId) {
        debug_assert!(!self.sealed, "insert after seal");
        self.digests.push(digest(content_id));
    }

    /// Sorts the set for querying.
    pub fn seal(&mut self) {
        self.digests.sort_unstable();
        self.digests.dedup();
        self.sealed = true;
    }

    /// Whether `content_id` was inserted. Only valid after `seal`.
    pub fn contains(&self, content_id: &ContentId) -> bool {
        debug_assert!(self.sealed, "contains before seal");
        self.digests.binary_search(&digest(content_id)).is_ok()
    }

    /// Releases the memory; the set is reusable afterwards.
    pub fn clear(&mut self) {
        self.digests = Vec::new();
        self.sealed = false;
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}
