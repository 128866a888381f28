//! SQLite-backed shared store. WAL mode plus a busy timeout lets several consumer
//! processes open the same file; read-modify-write paths run inside IMMEDIATE
//! transactions so concurrent writers serialize on the database lock.

use super::{DedupStore, DocumentIndex, MetricsStore, PatternStore};
use crate::error::StoreError;
use crate::metrics::MetricWindow;
use crate::search::IndexedDocument;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create DB at path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Private database, gone when dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dedup_hashes (
                log_type TEXT NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (log_type, hash)
            );
            CREATE TABLE IF NOT EXISTS metric_windows (
                id TEXT PRIMARY KEY,
                service TEXT NOT NULL,
                window_start TEXT NOT NULL,
                error_rate REAL NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_windows_service ON metric_windows(service, window_start);
            CREATE TABLE IF NOT EXISTS pattern_events (
                key TEXT NOT NULL,
                ts INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pattern_key_ts ON pattern_events(key, ts);
            CREATE INDEX IF NOT EXISTS idx_pattern_ts ON pattern_events(ts);
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                indexed_at INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_indexed_at ON documents(indexed_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Retention: drop documents indexed before `ts` (ms). Returns rows removed.
    pub fn prune_documents_before(&self, ts: i64) -> Result<u64, StoreError> {
        let n = self
            .conn()?
            .execute("DELETE FROM documents WHERE indexed_at < ?1", params![ts])?;
        Ok(n as u64)
    }
}

impl DedupStore for SqliteStore {
    fn load_hashes(&self, log_type: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT hash FROM dedup_hashes WHERE log_type = ?1")?;
        let rows = stmt.query_map(params![log_type], |row| row.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for hash in rows {
            out.insert(hash?);
        }
        Ok(out)
    }

    fn persist_hashes(&self, log_type: &str, hashes: &HashSet<String>) -> Result<(), StoreError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO dedup_hashes (log_type, hash) VALUES (?1, ?2)",
            )?;
            for hash in hashes {
                stmt.execute(params![log_type, hash])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn reset(&self, log_type: &str) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM dedup_hashes WHERE log_type = ?1", params![log_type])?;
        Ok(())
    }
}

impl MetricsStore for SqliteStore {
    fn get_window(&self, id: &str) -> Result<Option<MetricWindow>, StoreError> {
        let conn = self.conn()?;
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM metric_windows WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match doc {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    fn merge_window(&self, delta: &MetricWindow) -> Result<MetricWindow, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT doc FROM metric_windows WHERE id = ?1",
                params![delta.id],
                |row| row.get(0),
            )
            .optional()?;
        let merged = match existing {
            Some(doc) => {
                let mut stored: MetricWindow = serde_json::from_str(&doc)?;
                stored.merge(delta);
                stored
            }
            None => delta.clone(),
        };
        tx.execute(
            "INSERT OR REPLACE INTO metric_windows (id, service, window_start, error_rate, doc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                merged.id,
                merged.service,
                merged.window_start,
                merged.error_rate_percent,
                serde_json::to_string(&merged)?
            ],
        )?;
        tx.commit()?;
        Ok(merged)
    }

    fn windows(&self, service: Option<&str>, limit: usize) -> Result<Vec<MetricWindow>, StoreError> {
        let conn = self.conn()?;
        let limit = limit as i64;
        let docs: Vec<String> = match service {
            Some(s) => {
                let mut stmt = conn.prepare(
                    "SELECT doc FROM metric_windows WHERE service = ?1 ORDER BY window_start DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![s, limit], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT doc FROM metric_windows ORDER BY window_start DESC, id DESC LIMIT ?1")?;
                let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(StoreError::from))
            .collect()
    }
}

impl PatternStore for SqliteStore {
    fn record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        failure: bool,
    ) -> Result<usize, StoreError> {
        let now_ms = now.timestamp_millis();
        let cutoff = now_ms - window.num_milliseconds();
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // expiry applies to every key, so idle keys disappear without a sweeper
        tx.execute("DELETE FROM pattern_events WHERE ts <= ?1", params![cutoff])?;
        if failure {
            tx.execute(
                "INSERT INTO pattern_events (key, ts) VALUES (?1, ?2)",
                params![key, now_ms],
            )?;
        }
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM pattern_events WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(count as usize)
    }
}

impl DocumentIndex for SqliteStore {
    fn upsert(&self, doc: &IndexedDocument) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO documents (id, indexed_at, doc) VALUES (?1, ?2, ?3)",
            params![doc.id, Utc::now().timestamp_millis(), body],
        )?;
        Ok(())
    }

    fn fetch(&self, limit: usize) -> Result<Vec<IndexedDocument>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM documents ORDER BY indexed_at DESC, rowid DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for doc in rows {
            out.push(serde_json::from_str(&doc?)?);
        }
        Ok(out)
    }
}
