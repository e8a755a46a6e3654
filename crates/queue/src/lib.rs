//! Pylon Durable Queue - crash-safe outbound chunk storage for sensors
//!
//! The queue survives process crashes between enqueue and server
//! acknowledgment. Sequences are assigned by SQLite's `AUTOINCREMENT` rowid
//! and are monotonically increasing across the sensor's lifetime - never
//! reused, even after acknowledged entries are deleted.
//!
//! # Concurrency
//!
//! One logical owner per sensor process performs mutations; an internal
//! async lock serializes them. Reads may run concurrently.
//!
//! # Retention
//!
//! Entries older than the retention window (default 72 h) are pruned
//! opportunistically on enqueue, bounding disk usage even when the
//! collector never acknowledges. Data loss past the retention window is a
//! deliberate, documented tradeoff.

mod error;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use turso::{Builder, Database};

use pylon_protocol::{encode_hash, Compression, DataChunk, EventChunk};

pub use error::{QueueError, Result};

/// Default retention window for un-acked entries (72 hours)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(72 * 3600);

/// A chunk plus its delivery metadata, as stored in the queue
#[derive(Debug, Clone)]
pub struct QueuedChunk {
    /// Queue-assigned sequence, unique per sensor, never reused
    pub sequence: u64,
    /// The chunk itself
    pub chunk: EventChunk,
    /// When the chunk was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Send attempts so far
    pub attempt_count: u32,
    /// Most recent send attempt, if any
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedChunk {
    /// Stored payload size in bytes
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.chunk.payload.len()
    }

    /// Convert into a data-channel chunk for the given sensor
    pub fn to_data_chunk(&self, sensor_id: &str) -> DataChunk {
        DataChunk::from_event_chunk(
            sensor_id,
            self.sequence,
            &self.enqueued_at.to_rfc3339(),
            &self.chunk,
        )
    }
}

/// Crash-safe, ordered, persistent store of chunks awaiting acknowledgment
pub struct DurableQueue {
    db: Database,
    retention: Duration,
    /// Serializes mutations (single-writer discipline)
    write_lock: Mutex<()>,
}

impl DurableQueue {
    /// Open (or create) a queue database at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QueueError::CreateDir {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let path_str = path.display().to_string();
        info!(path = %path_str, "Opening durable queue");

        let db = Builder::new_local(&path_str).build().await?;
        let queue = Self {
            db,
            retention: DEFAULT_RETENTION,
            write_lock: Mutex::new(()),
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    /// Open an in-memory queue (for testing)
    pub async fn open_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let queue = Self {
            db,
            retention: DEFAULT_RETENTION,
            write_lock: Mutex::new(()),
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    /// Override the retention window
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(SCHEMA_CHUNKS, ()).await?;
        conn.execute(INDEX_CHUNKS_EVENT, ()).await?;
        debug!("Queue schema initialized");
        Ok(())
    }

    /// Transactionally append chunks, assigning monotonic sequences
    ///
    /// Returns the assigned sequences in input order. Retention pruning
    /// runs afterwards in the same call.
    pub async fn enqueue(&self, chunks: &[EventChunk]) -> Result<Vec<u64>> {
        let _guard = self.write_lock.lock().await;
        let conn = self.db.connect()?;
        let now = Utc::now().to_rfc3339();

        conn.execute("BEGIN", ()).await?;
        let mut sequences = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let result = conn
                .execute(
                    r#"
                INSERT INTO chunks (
                    event_id, chunk_index, chunk_count, compression, payload,
                    chunk_sha256, event_sha256, total_bytes, enqueued_at,
                    attempt_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)
                "#,
                    (
                        chunk.event_id.as_str(),
                        chunk.chunk_index as i64,
                        chunk.chunk_count as i64,
                        chunk.compression.as_str(),
                        chunk.payload.to_vec(),
                        encode_hash(&chunk.chunk_sha256),
                        encode_hash(&chunk.event_sha256),
                        chunk.total_bytes as i64,
                        now.as_str(),
                    ),
                )
                .await;
            if let Err(e) = result {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(e.into());
            }
            sequences.push(conn.last_insert_rowid() as u64);
        }
        conn.execute("COMMIT", ()).await?;

        self.prune(&conn).await?;

        debug!(
            count = sequences.len(),
            first = sequences.first().copied().unwrap_or(0),
            "Enqueued chunks"
        );
        Ok(sequences)
    }

    /// Read-only window over pending chunks, in sequence order
    ///
    /// Honors both `max_chunks` and `max_bytes`; at least one chunk is
    /// returned when one is available, even if it alone exceeds the byte
    /// budget (otherwise an oversized chunk could never be sent).
    pub async fn peek_range(
        &self,
        since_sequence: u64,
        max_chunks: u32,
        max_bytes: u64,
    ) -> Result<Vec<QueuedChunk>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                r#"
            SELECT sequence, event_id, chunk_index, chunk_count, compression,
                   payload, chunk_sha256, event_sha256, total_bytes,
                   enqueued_at, attempt_count, last_attempt_at
            FROM chunks
            WHERE sequence > ?1
            ORDER BY sequence ASC
            LIMIT ?2
            "#,
                (since_sequence as i64, (max_chunks as i64).saturating_mul(2)),
            )
            .await?;

        let mut window = Vec::new();
        let mut total_bytes = 0u64;
        while let Some(row) = rows.next().await? {
            let chunk = row_to_queued_chunk(&row)?;
            let payload_bytes = chunk.payload_size() as u64;

            if window.len() as u32 >= max_chunks {
                break;
            }
            if !window.is_empty() && total_bytes + payload_bytes > max_bytes {
                break;
            }

            total_bytes += payload_bytes;
            window.push(chunk);
        }
        Ok(window)
    }

    /// Delete all entries with sequence ≤ `sequence`
    ///
    /// Returns the number of deleted entries.
    pub async fn ack_upto(&self, sequence: u64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let conn = self.db.connect()?;
        let deleted = conn
            .execute(
                "DELETE FROM chunks WHERE sequence <= ?1",
                [sequence as i64],
            )
            .await?;
        if deleted > 0 {
            debug!(upto = sequence, deleted, "Acknowledged queue entries");
        }
        Ok(deleted)
    }

    /// Record a send attempt for the given sequences
    pub async fn mark_attempt(&self, sequences: &[u64]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let conn = self.db.connect()?;
        let now = Utc::now().to_rfc3339();
        for sequence in sequences {
            conn.execute(
                r#"
                UPDATE chunks
                SET attempt_count = attempt_count + 1, last_attempt_at = ?1
                WHERE sequence = ?2
                "#,
                (now.as_str(), *sequence as i64),
            )
            .await?;
        }
        Ok(())
    }

    /// Count of un-acked entries
    pub async fn queue_depth(&self) -> Result<u64> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM chunks", ())
            .await?;
        if let Some(row) = rows.next().await? {
            let count: i64 = row.get(0)?;
            Ok(count as u64)
        } else {
            Ok(0)
        }
    }

    /// Highest sequence ever assigned (0 when the queue has never held data)
    pub async fn last_sequence(&self) -> Result<u64> {
        let conn = self.db.connect()?;
        // The sqlite_sequence bookkeeping row survives deletion, so this
        // reports the high-water mark rather than the newest live row.
        let mut rows = conn
            .query(
                "SELECT seq FROM sqlite_sequence WHERE name = 'chunks'",
                (),
            )
            .await?;
        if let Some(row) = rows.next().await? {
            let seq: i64 = row.get(0)?;
            Ok(seq as u64)
        } else {
            Ok(0)
        }
    }

    /// Age of the oldest pending entry, if any
    pub async fn oldest_age(&self) -> Result<Option<Duration>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query("SELECT MIN(enqueued_at) FROM chunks", ())
            .await?;
        if let Some(row) = rows.next().await? {
            let oldest: Option<String> = row.get(0).ok();
            if let Some(oldest) = oldest {
                let parsed = DateTime::parse_from_rfc3339(&oldest)
                    .map_err(|e| QueueError::invalid_row("enqueued_at", e.to_string()))?
                    .with_timezone(&Utc);
                let age = (Utc::now() - parsed).to_std().unwrap_or(Duration::ZERO);
                return Ok(Some(age));
            }
        }
        Ok(None)
    }

    /// Garbage-collect entries older than the given retention window
    ///
    /// Returns the number of expired entries. Expired data is lost; this is
    /// the documented bounded-loss behavior for sensors the collector never
    /// acknowledges.
    pub async fn expire_older_than(&self, retention: Duration) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let conn = self.db.connect()?;
        self.expire_with(&conn, retention).await
    }

    async fn expire_with(&self, conn: &turso::Connection, retention: Duration) -> Result<u64> {
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero()))
        .to_rfc3339();
        let expired = conn
            .execute(
                "DELETE FROM chunks WHERE enqueued_at < ?1",
                [cutoff.as_str()],
            )
            .await?;
        if expired > 0 {
            info!(expired, retention_secs = retention.as_secs(), "Expired queue entries");
        }
        Ok(expired)
    }

    /// Retention pruning with the configured window (caller holds the lock)
    async fn prune(&self, conn: &turso::Connection) -> Result<()> {
        self.expire_with(conn, self.retention).await?;
        Ok(())
    }
}

fn row_to_queued_chunk(row: &turso::Row) -> Result<QueuedChunk> {
    let sequence: i64 = row.get(0)?;
    let event_id: String = row.get(1)?;
    let chunk_index: i64 = row.get(2)?;
    let chunk_count: i64 = row.get(3)?;
    let compression: String = row.get(4)?;
    let payload: Vec<u8> = row.get(5)?;
    let chunk_sha256: String = row.get(6)?;
    let event_sha256: String = row.get(7)?;
    let total_bytes: i64 = row.get(8)?;
    let enqueued_at: String = row.get(9)?;
    let attempt_count: i64 = row.get(10)?;
    let last_attempt_at: Option<String> = row.get(11).ok();

    let compression = Compression::parse(&compression)?;
    let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
        .map_err(|e| QueueError::invalid_row("enqueued_at", e.to_string()))?
        .with_timezone(&Utc);
    let last_attempt_at = match last_attempt_at {
        Some(s) if !s.is_empty() => Some(
            DateTime::parse_from_rfc3339(&s)
                .map_err(|e| QueueError::invalid_row("last_attempt_at", e.to_string()))?
                .with_timezone(&Utc),
        ),
        _ => None,
    };

    Ok(QueuedChunk {
        sequence: sequence as u64,
        chunk: EventChunk {
            event_id,
            chunk_index: chunk_index as u32,
            chunk_count: chunk_count as u32,
            compression,
            payload: payload.into(),
            chunk_sha256: parse_hash(&chunk_sha256, "chunk_sha256")?,
            event_sha256: parse_hash(&event_sha256, "event_sha256")?,
            total_bytes: total_bytes as u64,
        },
        enqueued_at,
        attempt_count: attempt_count as u32,
        last_attempt_at,
    })
}

fn parse_hash(hex: &str, field: &'static str) -> Result<[u8; 32]> {
    if hex.len() != 64 {
        return Err(QueueError::invalid_row(field, "wrong length"));
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk)
            .map_err(|_| QueueError::invalid_row(field, "invalid UTF-8"))?;
        bytes[i] = u8::from_str_radix(pair, 16)
            .map_err(|_| QueueError::invalid_row(field, "invalid hex"))?;
    }
    Ok(bytes)
}

const SCHEMA_CHUNKS: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    compression TEXT NOT NULL,
    payload BLOB NOT NULL,
    chunk_sha256 TEXT NOT NULL,
    event_sha256 TEXT NOT NULL,
    total_bytes INTEGER NOT NULL,
    enqueued_at TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT
)
"#;

const INDEX_CHUNKS_EVENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_chunks_event ON chunks(event_id, chunk_index)";

#[cfg(test)]
#[path = "queue_test.rs"]
mod tests;
