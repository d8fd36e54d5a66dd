//! dupmill producer driver.
//!
//! Runs one pass of the looping task producer against the filesystem storage
//! backend and the in-process queue. Cloud deployments swap those two
//! collaborators behind the same seams; everything else (state handling,
//! policy expansion, filtering, the ceiling) is identical.
//!
//! Exit codes: 0 on success (including a frequency-gated no-op), 1 on any
//! fatal error.

use std::path::PathBuf;
use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dupmill::config::Settings;
use dupmill::producer::LoopingTaskProducer;
use dupmill::queue::local::LocalTaskQueue;
use dupmill::state::StateStore;
use dupmill::storage::local::FsStorageFactory;
use dupmill::types::PolicySnapshot;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dupmill=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => {
            tracing::info!("looping task producer completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "looping task producer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let properties_path = std::env::var("DUPMILL_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(properties_path.as_deref())?;

    tracing::info!(
        state_file = %settings.state_path.display(),
        max_task_queue_size = settings.max_task_queue_size,
        task_queue_name = %settings.task_queue_name,
        "starting duplication task producer"
    );

    let policies = PolicySnapshot::from_json_file(&settings.policy_path)?;
    let config = settings.producer_config()?;

    let factory = FsStorageFactory::new(&settings.storage_root);
    let queue = LocalTaskQueue::new();
    let state = StateStore::new(&settings.state_path);

    // Finish the current nibble, persist, and exit on ctrl-c.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let mut producer = LoopingTaskProducer::new(factory, policies, queue, state, config);
    let report = producer.run(&cancel).await?;

    tracing::info!(
        content_tasks = report.content_tasks,
        deletion_tasks = report.deletion_tasks,
        completed = report.completed,
        gated = report.gated,
        "producer run report"
    );
    Ok(())
}
