//! Application state wiring the engine to its infrastructure.
//!
//! The engine is generic over its store and filesystem; AppState pins it to
//! SQLite and the local filesystem under the data directory.

use std::path::PathBuf;

use anyhow::Context;
use unitflow_core::event::EventBus;
use unitflow_core::workflow::{ExecutorRegistry, WorkflowEngine};
use unitflow_infra::config::load_engine_config;
use unitflow_infra::filesystem::{LocalFileSystem, resolve_data_dir};
use unitflow_infra::sqlite::kv::SqliteKvStore;
use unitflow_infra::sqlite::pool::{DatabasePool, database_url};

/// The engine pinned to the infra implementations.
pub type ConcreteEngine = WorkflowEngine<SqliteKvStore, LocalFileSystem>;

pub struct AppState {
    pub engine: ConcreteEngine,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the data directory, database and template store.
    ///
    /// The CLI registers no executors, so it never re-enters the scheduler
    /// for persisted workflows; it only inspects and steers them.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let mut config = load_engine_config(&data_dir).await;
        config
            .template_directory
            .get_or_insert_with(|| LocalFileSystem::templates_dir(&data_dir));
        config.resume_on_start = false;

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open the engine database")?;

        let events = EventBus::new(config.event_capacity);
        let engine = WorkflowEngine::new(
            config,
            SqliteKvStore::new(db_pool),
            LocalFileSystem::new(),
            events,
            ExecutorRegistry::new(),
        )
        .await;

        Ok(Self { engine, data_dir })
    }
}
