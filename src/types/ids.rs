//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! StoreId where a SpaceId is expected) and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tenant identifier (the account subdomain).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(s: impl Into<String>) -> Self {
        AccountId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        AccountId(s)
    }
}

/// A logical bucket within a store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(pub String);

impl SpaceId {
    pub fn new(s: impl Into<String>) -> Self {
        SpaceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A task carrying an empty space id is malformed and fails fatally.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SpaceId {
    fn from(s: String) -> Self {
        SpaceId(s)
    }
}

/// A content item identifier within a space.
///
/// Ordering is lexicographic on the underlying bytes; listing markers rely on
/// this matching the order in which providers enumerate a space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn new(s: impl Into<String>) -> Self {
        ContentId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty content id denotes a space-level task.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentId {
    fn from(s: String) -> Self {
        ContentId(s)
    }
}

/// An object-storage backend instance, unique within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub String);

impl StoreId {
    pub fn new(s: impl Into<String>) -> Self {
        StoreId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StoreId {
    fn from(s: String) -> Self {
        StoreId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn account_serde_roundtrip(s in "[a-z][a-z0-9-]{0,30}") {
            let id = AccountId::new(&s);
            let json = serde_json::to_string(&id).unwrap();
            let parsed: AccountId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn content_id_ordering_is_lexicographic(a in "[a-z/._0-9]{0,20}", b in "[a-z/._0-9]{0,20}") {
            let ca = ContentId::new(&a);
            let cb = ContentId::new(&b);
            prop_assert_eq!(ca.cmp(&cb), a.cmp(&b));
        }

        #[test]
        fn content_id_serde_is_transparent(s in "[a-z/._0-9]{0,20}") {
            let id = ContentId::new(&s);
            let json = serde_json::to_string(&id).unwrap();
            prop_assert_eq!(json, serde_json::to_string(&s).unwrap());
        }
    }

    #[test]
    fn empty_content_id_denotes_space_level() {
        assert!(ContentId::new("").is_empty());
        assert!(!ContentId::new("item").is_empty());
    }

    #[test]
    fn display_is_bare_value() {
        assert_eq!(format!("{}", SpaceId::new("photos")), "photos");
        assert_eq!(format!("{}", StoreId::new("store-1")), "store-1");
    }
}
