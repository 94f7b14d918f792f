//! SQLite archive backend
//!
//! Archive entries and tier snapshots are stored as JSON payloads next to
//! a few indexed columns. One connection behind a mutex: the archive is
//! written once a night and read by operators.
//!
//! Appends and checkpoints run in a transaction, so the unsealed day and
//! the archive log never disagree about which memories were sealed.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::archive::{
    ArchiveBackend, ArchiveDay, ArchiveEntry, Checkpoint, NightlyRunRecord, PendingDay,
};
use crate::consolidation::KnowledgeEntry;
use crate::error::{MemoryError, Result};
use crate::memory::{MemoryRecord, Tier};

/// File name inside the data directory
pub const DATABASE_FILE: &str = "somnia.db";

/// Default data directory for this platform
pub fn default_data_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "somnia", "core")
        .ok_or_else(|| MemoryError::Init("Could not determine project directories".to_string()))?;
    Ok(proj_dirs.data_dir().to_path_buf())
}

pub struct SqliteArchive {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteArchive").field("path", &self.path).finish()
    }
}

impl SqliteArchive {
    /// Apply PRAGMAs and optional encryption to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        #[cfg(feature = "encryption")]
        {
            if let Ok(key) = std::env::var("SOMNIA_ENCRYPTION_KEY") {
                if !key.is_empty() {
                    conn.pragma_update(None, "key", &key)?;
                }
            }
        }

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA journal_size_limit = 67108864;",
        )?;

        Ok(())
    }

    /// Open (or create) the archive database.
    ///
    /// `None` uses `somnia.db` in the platform data directory.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let data_dir = default_data_dir()?;
                std::fs::create_dir_all(&data_dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o700);
                    let _ = std::fs::set_permissions(&data_dir, perms);
                }
                data_dir.join(DATABASE_FILE)
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&conn)?;
        super::migrations::apply_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Throwaway database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::migrations::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MemoryError::Init("Archive connection lock poisoned".into()))
    }

    /// Total number of sealed entries
    pub fn entry_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM archive_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::Init(format!("Invalid timestamp {}: {}", raw, e)))
}

fn write_snapshot(conn: &Connection, tier: Tier, records: &[MemoryRecord]) -> Result<()> {
    let payload = serde_json::to_string(records)?;
    conn.execute(
        "INSERT INTO tier_snapshots (tier, saved_at, payload) VALUES (?1, ?2, ?3)
         ON CONFLICT(tier) DO UPDATE SET saved_at = excluded.saved_at, payload = excluded.payload",
        params![tier.as_str(), Utc::now().to_rfc3339(), payload],
    )?;
    Ok(())
}

fn read_pending_day(conn: &Connection) -> Result<Option<PendingDay>> {
    let payload = conn
        .query_row("SELECT payload FROM pending_day WHERE id = 1", [], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    payload
        .map(|p| serde_json::from_str(&p).map_err(MemoryError::from))
        .transpose()
}

fn write_pending_day(conn: &Connection, day: &PendingDay) -> Result<()> {
    let payload = serde_json::to_string(day)?;
    conn.execute(
        "INSERT INTO pending_day (id, saved_at, payload) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET saved_at = excluded.saved_at, payload = excluded.payload",
        params![day.saved_at.to_rfc3339(), payload],
    )?;
    Ok(())
}

fn write_knowledge(conn: &Connection, entries: &[KnowledgeEntry]) -> Result<()> {
    let payload = serde_json::to_string(entries)?;
    conn.execute(
        "INSERT INTO knowledge_state (id, saved_at, payload) VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET saved_at = excluded.saved_at, payload = excluded.payload",
        params![Utc::now().to_rfc3339(), payload],
    )?;
    Ok(())
}

impl ArchiveBackend for SqliteArchive {
    fn append(&self, entry: &ArchiveEntry) -> Result<()> {
        let payload = serde_json::to_string(entry)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO archive_entries (id, archive_date, created_at, memory_count, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id.to_string(),
                entry.date.to_string(),
                entry.created_at.to_rfc3339(),
                entry.archived_memories.len() as i64,
                payload,
            ],
        )?;
        if let Some(mut day) = read_pending_day(&tx)? {
            if day.prune_sealed(entry) {
                write_pending_day(&tx, &day)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn entries_for(&self, date: NaiveDate) -> Result<Vec<ArchiveEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM archive_entries WHERE archive_date = ?1 ORDER BY created_at, rowid",
        )?;
        let payloads = stmt
            .query_map(params![date.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(MemoryError::from))
            .collect()
    }

    fn days(&self) -> Result<Vec<ArchiveDay>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT archive_date, COUNT(*), COALESCE(SUM(memory_count), 0)
             FROM archive_entries GROUP BY archive_date ORDER BY archive_date",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(date, entries, memories)| {
                let date = date
                    .parse::<NaiveDate>()
                    .map_err(|e| MemoryError::Init(format!("Invalid archive date {}: {}", date, e)))?;
                Ok(ArchiveDay {
                    date,
                    entries: entries as usize,
                    memories: memories as usize,
                })
            })
            .collect()
    }

    fn save_snapshot(&self, tier: Tier, records: &[MemoryRecord]) -> Result<()> {
        let conn = self.conn()?;
        write_snapshot(&conn, tier, records)
    }

    fn load_snapshots(&self) -> Result<Vec<(String, Vec<MemoryRecord>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT tier, payload FROM tier_snapshots ORDER BY tier")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(tier, payload)| Ok((tier, serde_json::from_str(&payload)?)))
            .collect()
    }

    fn record_run(&self, run: &NightlyRunRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO nightly_runs (id, started_at, completed_at, completed, summary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.id.to_string(),
                run.started_at.to_rfc3339(),
                run.completed_at.to_rfc3339(),
                run.completed,
                run.summary,
            ],
        )?;
        Ok(())
    }

    fn last_run(&self) -> Result<Option<NightlyRunRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, started_at, completed_at, completed, summary
                 FROM nightly_runs ORDER BY completed_at DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, started_at, completed_at, completed, summary)| {
            Ok(NightlyRunRecord {
                id: Uuid::parse_str(&id)
                    .map_err(|e| MemoryError::Init(format!("Invalid run id {}: {}", id, e)))?,
                started_at: parse_timestamp(&started_at)?,
                completed_at: parse_timestamp(&completed_at)?,
                completed,
                summary,
            })
        })
        .transpose()
    }

    fn save_pending_day(&self, day: &PendingDay) -> Result<()> {
        let conn = self.conn()?;
        write_pending_day(&conn, day)
    }

    fn load_pending_day(&self) -> Result<Option<PendingDay>> {
        let conn = self.conn()?;
        read_pending_day(&conn)
    }

    fn save_knowledge(&self, entries: &[KnowledgeEntry]) -> Result<()> {
        let conn = self.conn()?;
        write_knowledge(&conn, entries)
    }

    fn load_knowledge(&self) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.conn()?;
        let payload = conn
            .query_row("SELECT payload FROM knowledge_state WHERE id = 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (tier, records) in &checkpoint.tiers {
            write_snapshot(&tx, *tier, records)?;
        }
        write_pending_day(&tx, &checkpoint.pending_day)?;
        write_knowledge(&tx, &checkpoint.knowledge)?;
        tx.commit()?;
        Ok(())
    }
}
