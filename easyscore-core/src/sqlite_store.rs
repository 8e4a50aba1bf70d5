//! SQLite-backed metadata store
//!
//! Entry metadata lives in a single `score_meta` table with an explicit
//! `rank` column, session pointers in a small key/value `session` table.
//! The database runs in WAL mode. Images never touch this store.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::entry::EntryId;
use crate::error::{StorageError, StorageResult};
use crate::storage::{check_quota, MetadataRecord, MetadataStore, SessionRecord};

const SESSION_KEY: &str = "session";

fn configure(conn: &Connection) -> StorageResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS score_meta (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            bpm INTEGER NOT NULL,
            zoom INTEGER,
            rank INTEGER NOT NULL DEFAULT 0
        ) WITHOUT ROWID;
        CREATE TABLE IF NOT EXISTS session (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    migrate(conn)
}

/// Bring tables written by older schemas up to date.
///
/// Early databases had no `zoom` and no `rank` column. Missing zoom stays
/// NULL and is back-filled on rehydration; missing rank defaults to 0 and
/// ties fall back to id order.
fn migrate(conn: &Connection) -> StorageResult<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(score_meta)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    if !columns.iter().any(|c| c == "zoom") {
        conn.execute_batch("ALTER TABLE score_meta ADD COLUMN zoom INTEGER")?;
        tracing::info!("Migrated metadata store: added zoom column");
    }
    if !columns.iter().any(|c| c == "rank") {
        conn.execute_batch("ALTER TABLE score_meta ADD COLUMN rank INTEGER NOT NULL DEFAULT 0")?;
        tracing::info!("Migrated metadata store: added rank column");
    }
    Ok(())
}

fn upsert(conn: &Connection, record: &MetadataRecord) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO score_meta (id,name,bpm,zoom,rank) VALUES (?1,?2,?3,?4,?5) \
         ON CONFLICT(id) DO UPDATE SET name=excluded.name,bpm=excluded.bpm,zoom=excluded.zoom,rank=excluded.rank",
        params![record.id.as_str(), record.name, record.bpm, record.zoom, record.rank as i64],
    )?;
    Ok(())
}

fn stored_bytes(conn: &Connection) -> StorageResult<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(CAST(id AS BLOB)) + LENGTH(CAST(name AS BLOB)) + 16), 0) FROM score_meta",
        [],
        |r| r.get(0),
    )?;
    Ok(total.max(0) as u64)
}

/// Metadata store on an SQLite database file
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
    quota_bytes: u64,
}

impl SqliteMetadataStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path, quota_bytes: u64) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        configure(&conn)?;
        tracing::debug!("Opened metadata store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes,
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory(quota_bytes: u64) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes,
        })
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    /// Acquire the connection for the duration of one operation
    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Backend(format!("metadata connection poisoned: {}", e)))
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn put(&self, records: Vec<MetadataRecord>) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in &records {
            upsert(&tx, record)?;
        }
        check_quota(stored_bytes(&tx)?, self.quota_bytes)?;
        tx.commit()?;
        Ok(())
    }

    async fn get_all(&self) -> StorageResult<Vec<MetadataRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT id,name,bpm,zoom,rank FROM score_meta")?;
        let records = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let rank: i64 = row.get(4)?;
                Ok(MetadataRecord {
                    id: EntryId::new(id),
                    name: row.get(1)?,
                    bpm: row.get(2)?,
                    zoom: row.get(3)?,
                    rank: rank.clamp(0, u32::MAX as i64) as u32,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn remove(&self, ids: Vec<EntryId>) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for id in &ids {
            tx.execute("DELETE FROM score_meta WHERE id=?1", params![id.as_str()])?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn put_session(&self, session: SessionRecord) -> StorageResult<()> {
        let value = serde_json::to_string(&session)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn()?.execute(
            "INSERT INTO session (key,value) VALUES (?1,?2) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![SESSION_KEY, value],
        )?;
        Ok(())
    }

    async fn get_session(&self) -> StorageResult<Option<SessionRecord>> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM session WHERE key=?1",
                params![SESSION_KEY],
                |r| r.get(0),
            )
            .optional()?;
        value
            .map(|v| {
                serde_json::from_str(&v).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn clear(&self) -> StorageResult<()> {
        self.conn()?
            .execute_batch("DELETE FROM score_meta; DELETE FROM session;")?;
        Ok(())
    }

    async fn replace_all(&self, records: Vec<MetadataRecord>) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM score_meta", [])?;
        for record in &records {
            upsert(&tx, record)?;
        }
        check_quota(stored_bytes(&tx)?, self.quota_bytes)?;
        tx.commit()?;
        Ok(())
    }
}
