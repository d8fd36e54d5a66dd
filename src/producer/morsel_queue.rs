//! Ordered morsel work set.
//!
//! A FIFO queue with set semantics on morsel identity: a morsel may not
//! appear twice, and insertion order is preserved so that no tenant starves.
//! The producer pushes persisted morsels first, then policy-derived ones, and
//! the identity dedup is what makes persisted markers win.

use std::collections::{HashSet, VecDeque};

use crate::types::{Morsel, MorselIdentity};

/// FIFO queue of morsels with identity dedup on insert.
#[derive(Debug, Default)]
pub struct MorselQueue {
    queue: VecDeque<Morsel>,
    seen: HashSet<MorselIdentity>,
}

impl MorselQueue {
    pub fn new() -> Self {
        MorselQueue::default()
    }

    /// Appends a morsel unless one with the same identity is already queued.
    ///
    /// Returns `true` if the morsel was added.
    pub fn add(&mut self, morsel: Morsel) -> bool {
        if !self.seen.insert(morsel.identity()) {
            return false;
        }
        self.queue.push_back(morsel);
        true
    }

    /// Appends each morsel in order, skipping identity duplicates.
    pub fn add_all(&mut self, morsels: impl IntoIterator<Item = Morsel>) {
        for morsel in morsels {
            self.add(morsel);
        }
    }

    /// Removes and returns the head of the queue.
    pub fn poll(&mut self) -> Option<Morsel> {
        let morsel = self.queue.pop_front()?;
        self.seen.remove(&morsel.identity());
        Some(morsel)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// The queued morsels in consumption order, for persistence.
    pub fn iter(&self) -> impl Iterator<Item = &Morsel> {
        self.queue.iter()
    }
}
