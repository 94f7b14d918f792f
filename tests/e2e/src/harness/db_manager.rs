//! Test System Manager
//!
//! Provides isolated memory systems for testing:
//! - SQLite archive in a temporary directory, removed on drop
//! - Mock collaborators the test can script and inspect
//! - Restart simulation against the same database file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use somnia_core::{Collaborators, Input, MemoryConfig, MemorySystem, ProcessOutcome, SqliteArchive, Tier};
use tempfile::TempDir;

use crate::mocks::{MockEmbedder, MockGenerator, MockTrainer, TagExtractor};

/// Embedding width used by every harness system
pub const TEST_DIMENSION: usize = 64;

/// Manager for test systems
///
/// Each manager owns its own database file and mock collaborators, so
/// tests never interfere with each other.
///
/// # Example
///
/// ```rust,ignore
/// let mut harness = TestSystemManager::new_temp();
///
/// harness.process("#coffee before work").await;
/// harness.restart();
///
/// // Database is automatically deleted when `harness` goes out of scope
/// ```
pub struct TestSystemManager {
    pub system: Arc<MemorySystem>,
    pub backend: Arc<SqliteArchive>,
    pub embedder: Arc<MockEmbedder>,
    pub generator: Arc<MockGenerator>,
    pub trainer: Arc<MockTrainer>,
    config: MemoryConfig,
    /// Kept alive to prevent premature deletion
    _temp_dir: Option<TempDir>,
    db_path: PathBuf,
}

impl TestSystemManager {
    /// Small, fast configuration shared by the journeys
    pub fn test_config() -> MemoryConfig {
        let mut config = MemoryConfig {
            embedding_dimension: TEST_DIMENSION,
            active_memory_size: 20,
            max_context_items: 50,
            max_permanent_memories: 500,
            ..Default::default()
        };
        config.nightly.training_batch_size = 2;
        config.background.batch_items = 2;
        config.background.batch_pause_secs = 0;
        config
    }

    /// Create a new system with [`test_config`](Self::test_config)
    pub fn new_temp() -> Self {
        Self::with_config(Self::test_config())
    }

    /// Create a new system in a temporary directory
    pub fn with_config(config: MemoryConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test_somnia.db");
        let mut manager = Self::open(config, db_path);
        manager._temp_dir = Some(temp_dir);
        manager
    }

    /// Create a system over an existing database file
    ///
    /// The file is NOT deleted when the manager is dropped.
    pub fn new_at_path(path: PathBuf) -> Self {
        Self::open(Self::test_config(), path)
    }

    fn open(config: MemoryConfig, db_path: PathBuf) -> Self {
        let backend = Arc::new(SqliteArchive::open(Some(db_path.clone())).expect("Failed to open test archive"));
        let embedder = Arc::new(MockEmbedder::new(config.embedding_dimension));
        let generator = Arc::new(MockGenerator::new());
        let trainer = Arc::new(MockTrainer::new());
        let system = Self::build(&config, &backend, &embedder, &generator, &trainer);

        Self {
            system,
            backend,
            embedder,
            generator,
            trainer,
            config,
            _temp_dir: None,
            db_path,
        }
    }

    fn build(
        config: &MemoryConfig,
        backend: &Arc<SqliteArchive>,
        embedder: &Arc<MockEmbedder>,
        generator: &Arc<MockGenerator>,
        trainer: &Arc<MockTrainer>,
    ) -> Arc<MemorySystem> {
        let system = MemorySystem::new(
            config.clone(),
            Collaborators {
                embedder: embedder.clone(),
                generator: generator.clone(),
                trainer: trainer.clone(),
            },
            backend.clone(),
        )
        .expect("Failed to build test system")
        .with_extractor(Arc::new(TagExtractor));
        Arc::new(system)
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Process one input, panicking on error
    pub async fn process(&self, text: &str) -> ProcessOutcome {
        self.system
            .process_input(Input::text(text))
            .await
            .expect("process_input failed")
    }

    /// Process one input of a declared kind
    pub async fn process_kind(&self, text: &str, kind: &str) -> ProcessOutcome {
        self.system
            .process_input(Input::text(text).with_kind(kind))
            .await
            .expect("process_input failed")
    }

    /// Persist snapshots, then rebuild the system over a fresh connection
    /// to the same file and restore them. Mocks carry over.
    ///
    /// Returns the number of memories restored.
    pub fn restart(&mut self) -> usize {
        self.system.persist_snapshots().expect("Failed to persist snapshots");
        self.reopen();
        self.system.restore_snapshots().expect("Failed to restore snapshots")
    }

    /// Rebuild without persisting or restoring anything
    pub fn reopen(&mut self) {
        self.backend = Arc::new(
            SqliteArchive::open(Some(self.db_path.clone())).expect("Failed to reopen test archive"),
        );
        self.system = Self::build(&self.config, &self.backend, &self.embedder, &self.generator, &self.trainer);
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Sealed archive entries in the database
    pub fn entry_count(&self) -> usize {
        self.backend.entry_count().unwrap_or(0)
    }

    /// Memories in sealed entries across every day
    pub fn archived_memory_count(&self) -> usize {
        self.system
            .archive()
            .days()
            .map(|days| days.iter().map(|d| d.memories).sum())
            .unwrap_or(0)
    }

    /// Every memory that has left the active tiers, sealed or still pending
    pub fn demoted_memory_count(&self) -> usize {
        self.archived_memory_count() + self.system.archive().pending_len()
    }

    pub fn tier_len(&self, tier: Tier) -> usize {
        self.system.store().len(tier)
    }

    pub fn active_memory_count(&self) -> usize {
        self.system.store().total_len()
    }
}
