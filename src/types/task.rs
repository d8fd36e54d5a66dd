//! The task envelope carried on the queue and the duplication task it
//! encodes.
//!
//! A `Task` is a keyed map of string properties plus a type tag; this is the
//! only shape the queue knows about. `DuplicationTask` is the typed view used
//! by the producer and processor, and round-trips through
//! [`DuplicationTask::write_task`] / [`DuplicationTask::read_task`].
//!
//! Task identity (for dedup and queue bookkeeping) is the type tag plus the
//! property map. The `attempts` counter is delivery metadata maintained by
//! workers and deliberately excluded from equality, so a redelivered task
//! still matches its original identity.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{AccountId, ContentId, SpaceId, StoreId};
use super::policy::StorePolicy;

/// Envelope property keys. These are wire format: changing them breaks
/// in-flight tasks.
const KEY_ACCOUNT: &str = "account";
const KEY_SPACE_ID: &str = "spaceId";
const KEY_CONTENT_ID: &str = "contentId";
const KEY_STORE_ID: &str = "storeId";
const KEY_SOURCE_STORE_ID: &str = "sourceStoreId";
const KEY_DEST_STORE_ID: &str = "destStoreId";

/// The kind of work a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "DUPLICATE")]
    Duplicate,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Duplicate => write!(f, "DUPLICATE"),
        }
    }
}

/// The serialized envelope that travels on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task-type")]
    pub task_type: TaskType,

    pub properties: BTreeMap<String, String>,

    /// Delivery attempt count, incremented by workers. Not part of identity.
    #[serde(default)]
    pub attempts: u32,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.task_type == other.task_type && self.properties == other.properties
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.task_type.hash(state);
        self.properties.hash(state);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[account={}, spaceId={}, contentId={}]",
            self.task_type,
            self.properties.get(KEY_ACCOUNT).map(String::as_str).unwrap_or(""),
            self.properties.get(KEY_SPACE_ID).map(String::as_str).unwrap_or(""),
            self.properties.get(KEY_CONTENT_ID).map(String::as_str).unwrap_or(""),
        )
    }
}

/// Errors reading a typed task out of an envelope.
#[derive(Debug, Error)]
pub enum TaskParseError {
    #[error("missing required property: {0}")]
    MissingProperty(&'static str),
}

/// A single unit of reconciliation work: bring one (space, content) tuple on
/// the destination store into agreement with the source store.
///
/// An empty content id denotes a space-level task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuplicationTask {
    pub account: AccountId,
    pub space_id: SpaceId,
    pub content_id: ContentId,
    pub source_store_id: StoreId,
    pub dest_store_id: StoreId,
}

impl DuplicationTask {
    pub fn new(
        account: AccountId,
        space_id: SpaceId,
        content_id: ContentId,
        store_policy: &StorePolicy,
    ) -> Self {
        DuplicationTask {
            account,
            space_id,
            content_id,
            source_store_id: store_policy.src_store_id.clone(),
            dest_store_id: store_policy.dest_store_id.clone(),
        }
    }

    pub fn store_policy(&self) -> StorePolicy {
        StorePolicy {
            src_store_id: self.source_store_id.clone(),
            dest_store_id: self.dest_store_id.clone(),
        }
    }

    /// Serializes into the queue envelope.
    ///
    /// `storeId` is written alongside `sourceStoreId` with the same value;
    /// older consumers read the former.
    pub fn write_task(&self) -> Task {
        let mut properties = BTreeMap::new();
        properties.insert(KEY_ACCOUNT.to_string(), self.account.0.clone());
        properties.insert(KEY_SPACE_ID.to_string(), self.space_id.0.clone());
        properties.insert(KEY_CONTENT_ID.to_string(), self.content_id.0.clone());
        properties.insert(KEY_STORE_ID.to_string(), self.source_store_id.0.clone());
        properties.insert(
            KEY_SOURCE_STORE_ID.to_string(),
            self.source_store_id.0.clone(),
        );
        properties.insert(KEY_DEST_STORE_ID.to_string(), self.dest_store_id.0.clone());
        Task {
            task_type: TaskType::Duplicate,
            properties,
            attempts: 0,
        }
    }

    /// Deserializes from a queue envelope.
    ///
    /// A missing `contentId` is read as empty (a space-level task); every
    /// other property is required.
    pub fn read_task(task: &Task) -> Result<Self, TaskParseError> {
        match task.task_type {
            TaskType::Duplicate => {}
        }

        let required = |key: &'static str| {
            task.properties
                .get(key)
                .cloned()
                .ok_or(TaskParseError::MissingProperty(key))
        };

        Ok(DuplicationTask {
            account: AccountId(required(KEY_ACCOUNT)?),
            space_id: SpaceId(required(KEY_SPACE_ID)?),
            content_id: ContentId(
                task.properties
                    .get(KEY_CONTENT_ID)
                    .cloned()
                    .unwrap_or_default(),
            ),
            source_store_id: StoreId(required(KEY_SOURCE_STORE_ID)?),
            dest_store_id: StoreId(required(KEY_DEST_STORE_ID)?),
        })
    }
}

impl fmt::Display for DuplicationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "duplicate {}/{}/{} from store {} to store {}",
            self.account, self.space_id, self.content_id, self.source_store_id, self.dest_store_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::arb_duplication_task;
    use proptest::prelude::*;

    fn sample_task() -> DuplicationTask {
        DuplicationTask {
            account: AccountId::new("acme"),
            space_id: SpaceId::new("photos"),
            content_id: ContentId::new("2024/cat.jpg"),
            source_store_id: StoreId::new("0"),
            dest_store_id: StoreId::new("1"),
        }
    }

    #[test]
    fn envelope_carries_expected_keys() {
        let task = sample_task().write_task();
        assert_eq!(task.properties.get("account").unwrap(), "acme");
        assert_eq!(task.properties.get("spaceId").unwrap(), "photos");
        assert_eq!(task.properties.get("contentId").unwrap(), "2024/cat.jpg");
        assert_eq!(task.properties.get("storeId").unwrap(), "0");
        assert_eq!(task.properties.get("sourceStoreId").unwrap(), "0");
        assert_eq!(task.properties.get("destStoreId").unwrap(), "1");
        assert_eq!(task.attempts, 0);
    }

    #[test]
    fn attempts_excluded_from_identity() {
        let a = sample_task().write_task();
        let mut b = a.clone();
        b.attempts = 7;
        assert_eq!(a, b);

        let mut seen = std::collections::HashSet::new();
        seen.insert(a);
        assert!(seen.contains(&b));
    }

    #[test]
    fn missing_content_id_reads_as_space_level() {
        let mut envelope = sample_task().write_task();
        envelope.properties.remove("contentId");
        let parsed = DuplicationTask::read_task(&envelope).unwrap();
        assert!(parsed.content_id.is_empty());
    }

    #[test]
    fn missing_account_is_rejected() {
        let mut envelope = sample_task().write_task();
        envelope.properties.remove("account");
        assert!(matches!(
            DuplicationTask::read_task(&envelope),
            Err(TaskParseError::MissingProperty("account"))
        ));
    }

    #[test]
    fn task_type_serializes_as_wire_tag() {
        let json = serde_json::to_string(&TaskType::Duplicate).unwrap();
        assert_eq!(json, r#""DUPLICATE""#);
    }

    proptest! {
        /// write_task/read_task round-trips the typed view.
        #[test]
        fn envelope_roundtrip(task in arb_duplication_task()) {
            let envelope = task.write_task();
            let parsed = DuplicationTask::read_task(&envelope).unwrap();
            prop_assert_eq!(task, parsed);
        }

        /// The envelope itself survives JSON serialization (queue payloads
        /// are JSON in the local queue and in tests).
        #[test]
        fn envelope_json_roundtrip(task in arb_duplication_task(), attempts in 0u32..10) {
            let mut envelope = task.write_task();
            envelope.attempts = attempts;
            let json = serde_json::to_string(&envelope).unwrap();
            let parsed: Task = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(&envelope, &parsed);
            prop_assert_eq!(parsed.attempts, attempts);
        }

        /// Tasks with equal identity tuples are equal regardless of how they
        /// were built.
        #[test]
        fn identity_is_the_coordinate_tuple(task in arb_duplication_task()) {
            let a = task.write_task();
            let b = DuplicationTask::read_task(&a).unwrap().write_task();
            prop_assert_eq!(a, b);
        }
    }
}
