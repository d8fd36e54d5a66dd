//! Shared test utilities and arbitrary generators for property-based testing.

use proptest::prelude::*;

use crate::storage::memory::MemoryStorageProvider;
use crate::storage::{md5_hex, ContentProperties, PROP_CONTENT_CHECKSUM, PROP_CONTENT_MIMETYPE};
use crate::types::{
    AccountId, ContentId, DuplicationTask, Morsel, SpaceId, StoreId, StorePolicy, Task,
};

pub fn arb_account_id() -> impl Strategy<Value = AccountId> {
    "[a-z][a-z0-9-]{0,15}".prop_map(AccountId::new)
}

pub fn arb_space_id() -> impl Strategy<Value = SpaceId> {
    "[a-z][a-z0-9-]{0,15}".prop_map(SpaceId::new)
}

pub fn arb_content_id() -> impl Strategy<Value = ContentId> {
    "[a-z0-9][a-z0-9/._-]{0,30}".prop_map(ContentId::new)
}

pub fn arb_store_id() -> impl Strategy<Value = StoreId> {
    "[0-9]{1,3}".prop_map(StoreId::new)
}

pub fn arb_store_policy() -> impl Strategy<Value = StorePolicy> {
    (arb_store_id(), arb_store_id()).prop_map(|(src, dest)| StorePolicy {
        src_store_id: src,
        dest_store_id: dest,
    })
}

pub fn arb_morsel() -> impl Strategy<Value = Morsel> {
    (
        arb_account_id(),
        arb_space_id(),
        prop::option::of(arb_content_id()),
        arb_store_policy(),
    )
        .prop_map(|(account, space_id, marker, policy)| {
            Morsel::new(account, space_id, marker, policy)
        })
}

pub fn arb_duplication_task() -> impl Strategy<Value = DuplicationTask> {
    (
        arb_account_id(),
        arb_space_id(),
        // Space-level tasks (empty content id) are part of the domain.
        prop_oneof![Just(ContentId::new("")), arb_content_id()],
        arb_store_policy(),
    )
        .prop_map(|(account, space_id, content_id, policy)| {
            DuplicationTask::new(account, space_id, content_id, &policy)
        })
}

/// A content-task envelope for queue-level tests.
pub fn make_content_task(account: &str, space_id: &str, content_id: &str) -> Task {
    DuplicationTask::new(
        AccountId::new(account),
        SpaceId::new(space_id),
        ContentId::new(content_id),
        &StorePolicy::new(StoreId::new("0"), StoreId::new("1")),
    )
    .write_task()
}

/// Properties for an item whose bytes are `bytes`: a correct checksum and a
/// plain-text mimetype.
pub fn props_for(bytes: &[u8]) -> ContentProperties {
    let mut props = ContentProperties::new();
    props.insert(PROP_CONTENT_CHECKSUM.to_string(), md5_hex(bytes));
    props.insert(PROP_CONTENT_MIMETYPE.to_string(), "text/plain".to_string());
    props
}

/// Creates `space_id` on `provider` and stores each id with its own name as
/// content bytes and a correct recorded checksum.
pub fn seed_space(provider: &MemoryStorageProvider, space_id: &SpaceId, ids: &[String]) {
    provider.ensure_space(space_id);
    for id in ids {
        let bytes = id.as_bytes().to_vec();
        provider.insert_raw(
            space_id,
            &ContentId::new(id.clone()),
            bytes.clone(),
            props_for(&bytes),
        );
    }
}

/// An in-memory provider with `space_id` created and seeded via
/// [`seed_space`].
pub fn seeded_provider(space_id: &SpaceId, ids: &[String]) -> MemoryStorageProvider {
    let provider = MemoryStorageProvider::new();
    seed_space(&provider, space_id, ids);
    provider
}
