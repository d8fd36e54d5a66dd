//! Inclusion/exclusion filtering of producer work.
//!
//! Operators scope a producer run with two line-delimited list files of
//! `account` or `account/spaceId` patterns. The producer consults the filter
//! before emitting a morsel, for both policy-derived and persisted morsels.

use std::io;
use std::path::Path;

use crate::types::{AccountId, SpaceId};

/// One `account[/spaceId]` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    account: String,
    space_id: Option<String>,
}

impl PathPattern {
    /// Parses a single pattern. Returns `None` for blank lines and `#`
    /// comments.
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        match line.split_once('/') {
            Some((account, space)) => Some(PathPattern {
                account: account.to_string(),
                space_id: Some(space.to_string()),
            }),
            None => Some(PathPattern {
                account: line.to_string(),
                space_id: None,
            }),
        }
    }

    /// An account-wide pattern matches every space in the account.
    fn matches(&self, account: &AccountId, space_id: &SpaceId) -> bool {
        self.account == account.as_str()
            && self
                .space_id
                .as_deref()
                .is_none_or(|s| s == space_id.as_str())
    }
}

/// The combined inclusion/exclusion decision.
///
/// An empty inclusion list admits everything; exclusions always win.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    includes: Vec<PathPattern>,
    excludes: Vec<PathPattern>,
}

impl PathFilter {
    /// A filter that admits everything.
    pub fn allow_all() -> Self {
        PathFilter::default()
    }

    pub fn from_lines(inclusion: &str, exclusion: &str) -> Self {
        PathFilter {
            includes: inclusion.lines().filter_map(PathPattern::parse).collect(),
            excludes: exclusion.lines().filter_map(PathPattern::parse).collect(),
        }
    }

    /// Loads list files; a `None` path stands for an empty list.
    pub fn from_files(
        inclusion: Option<&Path>,
        exclusion: Option<&Path>,
    ) -> io::Result<Self> {
        let read = |path: Option<&Path>| -> io::Result<String> {
            match path {
                Some(path) => std::fs::read_to_string(path),
                None => Ok(String::new()),
            }
        };
        Ok(Self::from_lines(&read(inclusion)?, &read(exclusion)?))
    }

    pub fn allows(&self, account: &AccountId, space_id: &SpaceId) -> bool {
        if self.excludes.iter().any(|p| p.matches(account, space_id)) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(|p| p.matches(account, space_id))
    }
}
