//! Scenario tests for the looping task producer.
//!
//! These drive full producer runs against in-memory providers and the local
//! queue: ceiling behavior, resumable markers, deletion sweeps, in-run dedup,
//! filtering, frequency gating, and the producer-plus-worker reconciliation
//! loop end to end.

use std::path::PathBuf;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::{PathFilter, ProducerConfig};
use crate::queue::local::LocalTaskQueue;
use crate::retry::RetryConfig;
use crate::state::ProducerState;
use crate::storage::memory::{MemoryStorageFactory, MemoryStorageProvider};
use crate::storage::{md5_hex, ContentProperties, PROP_CONTENT_CHECKSUM};
use crate::test_utils::{props_for, seed_space};
use crate::types::{StoreId, TenantPolicy};
use crate::worker::TaskWorker;

const SRC: &str = "0";
const DST: &str = "1";

struct Fixture {
    factory: MemoryStorageFactory,
    queue: LocalTaskQueue,
    state_path: PathBuf,
    policies: PolicySnapshot,
    _state_dir: TempDir,
}

impl Fixture {
    /// One account ("acme") replicating one space ("photos") from store 0 to
    /// store 1.
    fn new() -> Self {
        Self::with_policies(
            PolicySnapshot::new().with_account(
                AccountId::new("acme"),
                TenantPolicy::new().with_policy(
                    SpaceId::new("photos"),
                    StorePolicy::new(StoreId::new(SRC), StoreId::new(DST)),
                ),
            ),
        )
    }

    fn with_policies(policies: PolicySnapshot) -> Self {
        let state_dir = TempDir::new().unwrap();
        Fixture {
            factory: MemoryStorageFactory::new(),
            queue: LocalTaskQueue::new(),
            state_path: state_dir.path().join("producer-state.json"),
            policies,
            _state_dir: state_dir,
        }
    }

    fn provider(&self, account: &str, store: &str) -> MemoryStorageProvider {
        self.factory
            .provider(&AccountId::new(account), &StoreId::new(store))
    }

    fn source(&self) -> MemoryStorageProvider {
        self.provider("acme", SRC)
    }

    fn dest(&self) -> MemoryStorageProvider {
        self.provider("acme", DST)
    }

    fn state(&self) -> StateStore {
        StateStore::new(&self.state_path)
    }

    fn producer(
        &self,
        config: ProducerConfig,
    ) -> LoopingTaskProducer<LocalTaskQueue, MemoryStorageFactory> {
        LoopingTaskProducer::new(
            self.factory.clone(),
            self.policies.clone(),
            self.queue.clone(),
            self.state(),
            config,
        )
        .with_retry_config(RetryConfig::fast())
    }

    async fn run(&self, config: ProducerConfig) -> RunReport {
        self.producer(config)
            .run(&CancellationToken::new())
            .await
            .unwrap()
    }

    /// Takes and acknowledges every queued task, returning the content ids
    /// in delivery order.
    async fn drain_content_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(task) = self.queue.take().await {
            ids.push(
                task.properties
                    .get("contentId")
                    .cloned()
                    .unwrap_or_default(),
            );
            self.queue.delete(&task).await.unwrap();
        }
        ids
    }

    /// Runs the worker until the queue is empty.
    async fn process_all(&self) {
        let worker = TaskWorker::new(self.queue.clone(), self.factory.clone())
            .with_retry_config(RetryConfig::fast());
        worker.drain(&CancellationToken::new()).await.unwrap();
    }
}

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}_{:02}", prefix, i)).collect()
}

// ─── Scenario A: copy of new content ───

#[tokio::test]
async fn produces_tasks_for_new_content_and_worker_converges_dest() {
    let fixture = Fixture::new();
    seed_space(
        &fixture.source(),
        &SpaceId::new("photos"),
        &["a".to_string(), "b".to_string()],
    );

    let report = fixture.run(ProducerConfig::new(100)).await;

    assert_eq!(report.content_tasks, 2);
    assert_eq!(report.deletion_tasks, 0);
    assert!(report.completed);
    assert_eq!(fixture.queue.size().await.unwrap(), 2);

    fixture.process_all().await;

    let dest = fixture.dest();
    for id in ["a", "b"] {
        let content_id = ContentId::new(id);
        assert_eq!(
            dest.content_bytes(&SpaceId::new("photos"), &content_id)
                .unwrap(),
            id.as_bytes()
        );
    }
}

// ─── Scenario B: deletion of stray content ───

#[tokio::test]
async fn sweep_enqueues_deletions_before_content_tasks() {
    let fixture = Fixture::new();
    let space = SpaceId::new("photos");
    seed_space(&fixture.source(), &space, &["a".to_string()]);
    seed_space(
        &fixture.dest(),
        &space,
        &["a".to_string(), "stray".to_string()],
    );

    let report = fixture.run(ProducerConfig::new(100)).await;

    assert_eq!(report.deletion_tasks, 1);
    assert_eq!(report.content_tasks, 1);

    let delivered = fixture.drain_content_ids().await;
    assert_eq!(delivered, vec!["stray".to_string(), "a".to_string()]);
}

#[tokio::test]
async fn sweep_then_processing_removes_strays_from_destination() {
    let fixture = Fixture::new();
    let space = SpaceId::new("photos");
    seed_space(&fixture.source(), &space, &["a".to_string()]);
    seed_space(
        &fixture.dest(),
        &space,
        &["a".to_string(), "stray".to_string()],
    );

    fixture.run(ProducerConfig::new(100)).await;
    fixture.process_all().await;

    let remaining: Vec<_> = fixture
        .dest()
        .content_ids(&space)
        .iter()
        .map(|c| c.as_str().to_string())
        .collect();
    assert_eq!(remaining, vec!["a".to_string()]);
}

#[tokio::test]
async fn sweep_is_skipped_when_destination_space_is_missing() {
    let fixture = Fixture::new();
    seed_space(
        &fixture.source(),
        &SpaceId::new("photos"),
        &ids("item", 3),
    );

    let report = fixture.run(ProducerConfig::new(100)).await;

    assert_eq!(report.deletion_tasks, 0);
    assert_eq!(report.content_tasks, 3);
}

// ─── Scenario E: queue ceiling and resumption ───

#[tokio::test]
async fn ceiling_stops_the_run_and_persists_the_marker() {
    let fixture = Fixture::new();
    seed_space(&fixture.source(), &SpaceId::new("photos"), &ids("item", 50));

    let config = ProducerConfig::new(5).with_source_page_size(5);
    let report = fixture.run(config).await;

    assert!(!report.completed);
    assert_eq!(report.content_tasks, 5);
    assert_eq!(fixture.queue.size().await.unwrap(), 5);

    let state = fixture.state().load().unwrap();
    assert_eq!(state.morsels.len(), 1);
    assert_eq!(
        state.morsels[0].marker.as_ref().unwrap().as_str(),
        "item_05"
    );
    assert!(state.run_completed_at.is_none());
}

#[tokio::test]
async fn repeated_runs_advance_markers_until_the_space_is_exhausted() {
    let fixture = Fixture::new();
    let all_ids = ids("item", 50);
    seed_space(&fixture.source(), &SpaceId::new("photos"), &all_ids);

    let mut delivered = Vec::new();
    let mut last_marker = String::new();
    let mut runs = 0;

    loop {
        let config = ProducerConfig::new(5).with_source_page_size(5);
        let report = fixture.run(config).await;
        runs += 1;
        assert!(runs < 20, "producer failed to make progress");

        delivered.extend(fixture.drain_content_ids().await);
        if report.completed {
            break;
        }

        // Markers only ever move forward across runs.
        let state = fixture.state().load().unwrap();
        let marker = state.morsels[0].marker.as_ref().unwrap().as_str();
        assert!(marker >= last_marker.as_str());
        last_marker = marker.to_string();
    }

    delivered.sort();
    assert_eq!(delivered, all_ids);

    let final_state = fixture.state().load().unwrap();
    assert!(final_state.morsels.is_empty());
    assert!(final_state.run_completed_at.is_some());
}

// ─── Dedup within a run ───

#[tokio::test]
async fn tasks_are_not_enqueued_twice_within_a_run() {
    let fixture = Fixture::new();
    let mut producer = fixture.producer(ProducerConfig::new(100));

    let account = AccountId::new("acme");
    let space = SpaceId::new("photos");
    let policy = StorePolicy::new(StoreId::new(SRC), StoreId::new(DST));
    let page: Vec<ContentId> = ["a", "b", "c"].iter().map(|s| ContentId::new(*s)).collect();

    let first = producer
        .enqueue_tasks(&account, &space, &policy, &page)
        .await
        .unwrap();
    let second = producer
        .enqueue_tasks(&account, &space, &policy, &page)
        .await
        .unwrap();

    assert_eq!(first, 3);
    assert_eq!(second, 0);
    assert_eq!(fixture.queue.size().await.unwrap(), 3);
}

#[tokio::test]
async fn all_duplicate_page_still_advances_the_marker() {
    // Open-question decision: a page whose ids were all enqueued earlier in
    // the run is no-progress, not completion. The morsel must survive with
    // an advanced marker.
    let fixture = Fixture::new();
    seed_space(
        &fixture.source(),
        &SpaceId::new("photos"),
        &["a".to_string(), "b".to_string()],
    );

    let mut producer = fixture.producer(ProducerConfig::new(100));
    let account = AccountId::new("acme");
    let space = SpaceId::new("photos");
    let policy = StorePolicy::new(StoreId::new(SRC), StoreId::new(DST));
    let page: Vec<ContentId> = [ContentId::new("a"), ContentId::new("b")].to_vec();
    producer
        .enqueue_tasks(&account, &space, &policy, &page)
        .await
        .unwrap();

    // Marker before "a", sweep already done for this pass.
    let morsel = Morsel::new(
        account.clone(),
        space.clone(),
        Some(ContentId::new("0")),
        policy.clone(),
    );
    let mut report = RunReport::default();
    producer.nibble(morsel, &mut report).await.unwrap();

    assert_eq!(report.content_tasks, 0);
    assert_eq!(producer.morsels_to_reload.len(), 1);
    assert_eq!(
        producer.morsels_to_reload[0]
            .marker
            .as_ref()
            .unwrap()
            .as_str(),
        "b"
    );
}

// ─── Filtering ───

#[tokio::test]
async fn inclusion_list_scopes_the_run_to_listed_accounts() {
    let policies = PolicySnapshot::new()
        .with_account(
            AccountId::new("acme"),
            TenantPolicy::new().with_policy(
                SpaceId::new("photos"),
                StorePolicy::new(StoreId::new(SRC), StoreId::new(DST)),
            ),
        )
        .with_account(
            AccountId::new("globex"),
            TenantPolicy::new().with_policy(
                SpaceId::new("photos"),
                StorePolicy::new(StoreId::new(SRC), StoreId::new(DST)),
            ),
        );
    let fixture = Fixture::with_policies(policies);

    let space = SpaceId::new("photos");
    seed_space(&fixture.provider("acme", SRC), &space, &["a".to_string()]);
    seed_space(&fixture.provider("globex", SRC), &space, &["g".to_string()]);

    let config = ProducerConfig::new(100)
        .with_filter(PathFilter::from_lines("acme\n", ""));
    let report = fixture.run(config).await;

    assert_eq!(report.content_tasks, 1);
    assert_eq!(fixture.drain_content_ids().await, vec!["a".to_string()]);
}

#[tokio::test]
async fn persisted_morsels_for_excluded_accounts_are_dropped_on_load() {
    let fixture = Fixture::new();
    seed_space(&fixture.source(), &SpaceId::new("photos"), &["a".to_string()]);

    // A stale persisted morsel for an account that is now excluded.
    let mut state = ProducerState::empty();
    state.morsels.push(Morsel::new(
        AccountId::new("globex"),
        SpaceId::new("photos"),
        Some(ContentId::new("leftover")),
        StorePolicy::new(StoreId::new(SRC), StoreId::new(DST)),
    ));
    fixture.state().save(&state).unwrap();

    let config = ProducerConfig::new(100)
        .with_filter(PathFilter::from_lines("", "globex\n"));
    let report = fixture.run(config).await;

    assert!(report.completed);
    let final_state = fixture.state().load().unwrap();
    assert!(final_state.morsels.is_empty());
}

// ─── Frequency gating ───

#[tokio::test]
async fn completed_pass_gates_the_next_run_within_the_frequency() {
    let fixture = Fixture::new();
    seed_space(&fixture.source(), &SpaceId::new("photos"), &["a".to_string()]);

    let frequency = std::time::Duration::from_secs(3600);
    let first = fixture
        .run(ProducerConfig::new(100).with_frequency(frequency))
        .await;
    assert!(first.completed);
    assert!(!first.gated);

    fixture.drain_content_ids().await;

    let second = fixture
        .run(ProducerConfig::new(100).with_frequency(frequency))
        .await;
    assert!(second.gated);
    assert_eq!(second.content_tasks, 0);
    assert_eq!(fixture.queue.size().await.unwrap(), 0);
}

#[tokio::test]
async fn zero_frequency_never_gates() {
    let fixture = Fixture::new();
    seed_space(&fixture.source(), &SpaceId::new("photos"), &["a".to_string()]);

    let first = fixture.run(ProducerConfig::new(100)).await;
    assert!(first.completed);
    fixture.drain_content_ids().await;

    let second = fixture.run(ProducerConfig::new(100)).await;
    assert!(!second.gated);
    assert_eq!(second.content_tasks, 1);
}

// ─── Missing source space ───

#[tokio::test]
async fn missing_source_space_retires_the_morsel_without_failing() {
    let fixture = Fixture::new();
    // Policy references a space the source store never created.

    let report = fixture.run(ProducerConfig::new(100)).await;

    assert!(report.completed);
    assert_eq!(report.content_tasks, 0);
    assert!(fixture.state().load().unwrap().morsels.is_empty());
}

// ─── Cancellation ───

#[tokio::test]
async fn cancelled_run_persists_pending_morsels_and_exits() {
    let fixture = Fixture::new();
    seed_space(&fixture.source(), &SpaceId::new("photos"), &ids("item", 10));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut producer = fixture.producer(ProducerConfig::new(100));
    let report = producer.run(&cancel).await.unwrap();

    assert!(!report.completed);
    assert_eq!(report.content_tasks, 0);

    // The policy-derived morsel was persisted for the next invocation.
    let state = fixture.state().load().unwrap();
    assert_eq!(state.morsels.len(), 1);
    assert!(state.morsels[0].marker.is_none());
}

// ─── Reconciliation closure, end to end ───

#[tokio::test]
async fn full_pass_plus_workers_converge_destination_to_source() {
    let fixture = Fixture::new();
    let space = SpaceId::new("photos");
    let source = fixture.source();
    let dest = fixture.dest();

    // Fresh content, stale content, converged content on the source side.
    seed_space(&source, &space, &ids("doc", 7));
    let mut tagged = props_for(b"doc_03");
    tagged.insert("owner".to_string(), "archives-team".to_string());
    source.insert_raw(&space, &ContentId::new("doc_03"), b"doc_03".to_vec(), tagged);

    // Destination: two strays, one item with diverged bytes, one converged.
    dest.ensure_space(&space);
    seed_space(
        &dest,
        &space,
        &["stray_a".to_string(), "stray_b".to_string(), "doc_07".to_string()],
    );
    dest.insert_raw(
        &space,
        &ContentId::new("doc_01"),
        b"outdated".to_vec(),
        {
            let mut props = ContentProperties::new();
            props.insert(PROP_CONTENT_CHECKSUM.to_string(), md5_hex(b"outdated"));
            props
        },
    );

    fixture.run(ProducerConfig::new(1000)).await;
    fixture.process_all().await;

    let dest_ids: Vec<String> = dest
        .content_ids(&space)
        .iter()
        .map(|c| c.as_str().to_string())
        .collect();
    assert_eq!(dest_ids, ids("doc", 7));

    for id in ids("doc", 7) {
        let content_id = ContentId::new(id.clone());
        assert_eq!(
            dest.content_bytes(&space, &content_id).unwrap(),
            id.as_bytes(),
            "content of {} must match source",
            id
        );
    }

    // Operator-set metadata propagated with the copy.
    let props = dest
        .get_content_properties(&space, &ContentId::new("doc_03"))
        .await
        .unwrap();
    assert_eq!(props.get("owner").unwrap(), "archives-team");
}

// ─── Fan-out policies ───

#[tokio::test]
async fn fan_out_policies_produce_tasks_per_destination() {
    let policies = PolicySnapshot::new().with_account(
        AccountId::new("acme"),
        TenantPolicy::new()
            .with_policy(
                SpaceId::new("photos"),
                StorePolicy::new(StoreId::new(SRC), StoreId::new("1")),
            )
            .with_policy(
                SpaceId::new("photos"),
                StorePolicy::new(StoreId::new(SRC), StoreId::new("2")),
            ),
    );
    let fixture = Fixture::with_policies(policies);
    seed_space(&fixture.provider("acme", SRC), &SpaceId::new("photos"), &["a".to_string()]);

    let report = fixture.run(ProducerConfig::new(100)).await;

    // One task per (content, destination) pair; identities differ by store.
    assert_eq!(report.content_tasks, 2);
    fixture.process_all().await;
    for store in ["1", "2"] {
        assert_eq!(
            fixture
                .provider("acme", store)
                .content_bytes(&SpaceId::new("photos"), &ContentId::new("a"))
                .unwrap(),
            b"a"
        );
    }
}
