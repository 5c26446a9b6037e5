//! SQLite-backed persistence for an OwnWorld node.
//!
//! Three tables: `meta` (identity and genesis lineage, written once),
//! `ledger` (the append-only hash chain, one row per tick), and `snapshots`
//! (one compressed world blob per simulated day, served paginated to
//! cold-starting peers). WAL mode is enabled so the federation handlers can
//! read while the tick loop appends.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Identity metadata is missing or unreadable. Fatal: without identity
    /// the node cannot participate safely.
    #[error("identity corrupted: {0}")]
    IdentityCorrupted(String),

    #[error("ledger chain broken at tick {tick}")]
    ChainBroken { tick: u64 },

    /// Appending out of order or re-appending an existing tick.
    #[error("append-only violation at tick {tick}")]
    AppendOnlyViolation { tick: u64 },
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// One record in the append-only hash chain, anchoring a tick's state to
/// its predecessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub tick: u64,
    pub timestamp_ms: u64,
    /// Head hash before this tick, hex.
    pub prev_hash: String,
    /// `blake3(tick_be || prev_hash || state_digest)`, hex.
    pub final_hash: String,
}

impl LedgerEntry {
    /// Build the entry for `tick`, chaining onto `prev_hash`.
    pub fn chain(tick: u64, timestamp_ms: u64, prev_hash: &str, state_digest: &[u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&tick.to_be_bytes());
        hasher.update(prev_hash.as_bytes());
        hasher.update(state_digest);
        Self {
            tick,
            timestamp_ms,
            prev_hash: prev_hash.to_string(),
            final_hash: hex::encode(hasher.finalize().as_bytes()),
        }
    }
}

/// One persisted day of world state.
#[derive(Debug, Clone)]
pub struct DailySnapshot {
    pub day_id: u64,
    /// LZ4-compressed world-state blob.
    pub blob: Vec<u8>,
    /// Final hash of the last tick of that day, hex.
    pub final_hash: String,
}

/// Storage backend for an OwnWorld node.
///
/// The connection is shared behind a mutex; every call holds it only for
/// the duration of one statement or transaction.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    // --- Metadata ---

    /// Read a metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Write a metadata value.
    pub fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Write several metadata values in one transaction. Used by identity
    /// creation, which must be all-or-nothing.
    pub fn put_meta_batch(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- Ledger ---

    /// Append one entry to the chain. Rejects re-used ticks.
    pub fn append_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ledger (tick, timestamp_ms, prev_hash, final_hash)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.tick as i64,
                entry.timestamp_ms as i64,
                entry.prev_hash,
                entry.final_hash
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::AppendOnlyViolation { tick: entry.tick }
            }
            other => StoreError::Database(other),
        })?;
        Ok(())
    }

    /// The node's authoritative chain position.
    pub fn head(&self) -> Result<Option<LedgerEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT tick, timestamp_ms, prev_hash, final_hash
                 FROM ledger ORDER BY tick DESC LIMIT 1",
                [],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Fetch one entry by tick.
    pub fn entry(&self, tick: u64) -> Result<Option<LedgerEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT tick, timestamp_ms, prev_hash, final_hash
                 FROM ledger WHERE tick = ?1",
                params![tick as i64],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Number of ledger entries.
    pub fn entry_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM ledger", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Walk the chain and check that each entry's `prev_hash` equals its
    /// predecessor's `final_hash`. A tick gap (left behind by a hard resync)
    /// starts a new segment; continuity is only required between
    /// consecutive ticks.
    pub fn verify_chain(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tick, timestamp_ms, prev_hash, final_hash FROM ledger ORDER BY tick ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut prev: Option<LedgerEntry> = None;
        while let Some(row) = rows.next()? {
            let entry = Self::row_to_entry(row)?;
            if let Some(prev) = prev {
                if entry.tick == prev.tick + 1 && entry.prev_hash != prev.final_hash {
                    return Err(StoreError::ChainBroken { tick: entry.tick });
                }
            }
            prev = Some(entry);
        }
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
        Ok(LedgerEntry {
            tick: row.get::<_, i64>(0)? as u64,
            timestamp_ms: row.get::<_, i64>(1)? as u64,
            prev_hash: row.get(2)?,
            final_hash: row.get(3)?,
        })
    }

    // --- Daily snapshots ---

    /// Persist one day of world state. Idempotent per day.
    pub fn put_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (day_id, blob, final_hash)
             VALUES (?1, ?2, ?3)",
            params![snapshot.day_id as i64, snapshot.blob, snapshot.final_hash],
        )?;
        Ok(())
    }

    /// Fetch up to `limit` snapshots with `day_id >= since_day`, ascending.
    pub fn snapshots_since(&self, since_day: u64, limit: u64) -> Result<Vec<DailySnapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT day_id, blob, final_hash FROM snapshots
             WHERE day_id >= ?1 ORDER BY day_id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since_day as i64, limit as i64], |row| {
            Ok(DailySnapshot {
                day_id: row.get::<_, i64>(0)? as u64,
                blob: row.get(1)?,
                final_hash: row.get(2)?,
            })
        })?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    /// The most recent snapshot, if any.
    pub fn latest_snapshot(&self) -> Result<Option<DailySnapshot>> {
        let conn = self.conn.lock().unwrap();
        let snapshot = conn
            .query_row(
                "SELECT day_id, blob, final_hash FROM snapshots
                 ORDER BY day_id DESC LIMIT 1",
                [],
                |row| {
                    Ok(DailySnapshot {
                        day_id: row.get::<_, i64>(0)? as u64,
                        blob: row.get(1)?,
                        final_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }
}
