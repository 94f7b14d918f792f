//! Database Migrations
//!
//! Schema migration definitions for the archive log.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Archive log and tier snapshots",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Nightly run history",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Unsealed day and knowledge checkpoints",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
-- One row per sealed day batch, never updated
CREATE TABLE IF NOT EXISTS archive_entries (
    id TEXT PRIMARY KEY,
    archive_date TEXT NOT NULL,
    created_at TEXT NOT NULL,
    memory_count INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_archive_date ON archive_entries(archive_date);

CREATE TRIGGER IF NOT EXISTS archive_entries_no_update
BEFORE UPDATE ON archive_entries
BEGIN
    SELECT RAISE(ABORT, 'archive entries are append-only');
END;

-- Latest persisted view of each active tier
CREATE TABLE IF NOT EXISTS tier_snapshots (
    tier TEXT PRIMARY KEY,
    saved_at TEXT NOT NULL,
    payload TEXT NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Nightly run history, read back to keep nightly at most once per day
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS nightly_runs (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    summary TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_nightly_completed ON nightly_runs(completed_at);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: State that lives between nightly seals. Single-row tables.
const MIGRATION_V3_UP: &str = r#"
-- Demoted memories and experiences not yet sealed into an archive entry
CREATE TABLE IF NOT EXISTS pending_day (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    saved_at TEXT NOT NULL,
    payload TEXT NOT NULL
);

-- Integrated knowledge entries
CREATE TABLE IF NOT EXISTS knowledge_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    saved_at TEXT NOT NULL,
    payload TEXT NOT NULL
);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
