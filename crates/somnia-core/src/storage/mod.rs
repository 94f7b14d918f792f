//! Storage Module
//!
//! Append-only archive of demoted memories:
//! - Pending day batch sealed by nightly cleanup
//! - Bounded in-memory view over recently archived records
//! - SQLite backend with versioned migrations, or an in-process one
//! - Tier snapshots and the unsealed day checkpoint for restart recovery

mod archive;
mod migrations;
mod sqlite;

pub use archive::{
    ArchiveBackend, ArchiveDay, ArchiveEntry, ArchiveStore, Checkpoint, DailyMetrics,
    InMemoryArchive, NightlyRunRecord, PendingDay,
};
pub use migrations::MIGRATIONS;
pub use sqlite::{DATABASE_FILE, SqliteArchive, default_data_dir};
