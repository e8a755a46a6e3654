//! Deduplicating chunk store with event reassembly
//!
//! Chunks are keyed by `(sensor_id, sequence)`. Writing the same key with
//! the same hash is an idempotent no-op; the same key with a different hash
//! is a per-chunk integrity error. When the last chunk of an event arrives
//! the event is reassembled and verified against the whole-payload hash.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use turso::{Builder, Connection, Database};

use pylon_protocol::{assemble, Compression, DataChunk, EventChunk};

use crate::error::{Result, StoreError};

/// Outcome of a single chunk write
#[derive(Debug)]
pub enum WriteOutcome {
    /// Chunk stored; carries the completed event when this chunk finished it
    Accepted {
        /// Present when this write completed the chunk's event
        completed: Option<CompletedEvent>,
    },
    /// Chunk already stored with the same hash; nothing changed
    DuplicateIgnored,
}

impl WriteOutcome {
    /// True when the write stored a new chunk
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// A fully reassembled, verified event
#[derive(Debug, Clone)]
pub struct CompletedEvent {
    /// Owning sensor
    pub sensor_id: String,
    /// Event identifier
    pub event_id: String,
    /// Reassembled, uncompressed payload
    pub payload: Bytes,
    /// Payload size in bytes
    pub total_bytes: u64,
    /// When the final chunk arrived
    pub completed_at: DateTime<Utc>,
}

/// Crash-safe, deduplicating store of received chunks and events
pub struct ChunkStore {
    db: Database,
}

impl ChunkStore {
    /// Open (or create) the store database at the given path
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let path_str = path.display().to_string();
        info!(path = %path_str, "Opening chunk store");

        let db = Builder::new_local(&path_str).build().await?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub async fn open_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    /// Handle to the underlying database, shared with the offset tracker
    pub(crate) fn database(&self) -> Database {
        self.db.clone()
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(SCHEMA_CHUNKS, ()).await?;
        conn.execute(SCHEMA_EVENTS, ()).await?;
        conn.execute(SCHEMA_OFFSETS, ()).await?;
        conn.execute(INDEX_CHUNKS_EVENT, ()).await?;
        debug!("Store schema initialized");
        Ok(())
    }

    /// Write one chunk, idempotent on `(sensor_id, sequence)`
    ///
    /// The chunk hash is recomputed before anything is stored. Callers must
    /// serialize writes per sensor.
    pub async fn write(&self, chunk: &DataChunk) -> Result<WriteOutcome> {
        // Verify the stored-bytes hash before touching the database
        let declared = chunk.chunk_hash()?;
        let recomputed: [u8; 32] = Sha256::digest(&chunk.payload).into();
        if recomputed != declared {
            return Err(StoreError::ChunkHashMismatch {
                sequence: chunk.sequence,
            });
        }
        // Reject unknown codecs and malformed event hashes up front
        chunk.codec()?;
        chunk.event_hash()?;

        let conn = self.db.connect()?;
        let now = Utc::now();

        // Dedupe check
        let stored_hash: Option<String> = {
            let mut rows = conn
                .query(
                    "SELECT chunk_sha256 FROM chunks WHERE sensor_id = ?1 AND sequence = ?2",
                    (chunk.sensor_id.as_str(), chunk.sequence as i64),
                )
                .await?;
            match rows.next().await? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        if let Some(stored_hash) = stored_hash {
            if stored_hash == chunk.chunk_sha256 {
                return Ok(WriteOutcome::DuplicateIgnored);
            }
            return Err(StoreError::HashConflict {
                sequence: chunk.sequence,
            });
        }

        conn.execute("BEGIN", ()).await?;
        match self.write_in_tx(&conn, chunk, now).await {
            Ok(TxOutcome::Accepted(completed)) => {
                conn.execute("COMMIT", ()).await?;
                Ok(WriteOutcome::Accepted { completed })
            }
            // The failed-event markers must survive, so commit before
            // surfacing the integrity error.
            Ok(TxOutcome::EventFailed(event_id)) => {
                conn.execute("COMMIT", ()).await?;
                Err(StoreError::EventHashMismatch { event_id })
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn write_in_tx(
        &self,
        conn: &Connection,
        chunk: &DataChunk,
        now: DateTime<Utc>,
    ) -> Result<TxOutcome> {
        conn.execute(
            r#"
            INSERT INTO chunks (
                sensor_id, sequence, event_id, chunk_index, chunk_count,
                compression, payload, chunk_sha256, event_sha256, total_bytes,
                enqueued_at, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            (
                chunk.sensor_id.as_str(),
                chunk.sequence as i64,
                chunk.event_id.as_str(),
                chunk.chunk_index as i64,
                chunk.chunk_count as i64,
                chunk.compression.as_str(),
                chunk.payload.clone(),
                chunk.chunk_sha256.as_str(),
                chunk.event_sha256.as_str(),
                chunk.total_bytes as i64,
                chunk.enqueued_at.as_str(),
                now.to_rfc3339().as_str(),
            ),
        )
        .await?;

        // Upsert the event bookkeeping row
        let event_row: Option<(i64, String, i64)> = {
            let mut rows = conn
                .query(
                    r#"
                SELECT chunk_count, event_sha256, received_chunks
                FROM events
                WHERE sensor_id = ?1 AND event_id = ?2
                "#,
                    (chunk.sensor_id.as_str(), chunk.event_id.as_str()),
                )
                .await?;
            match rows.next().await? {
                Some(row) => Some((row.get(0)?, row.get(1)?, row.get(2)?)),
                None => None,
            }
        };

        let received = if let Some((existing_count, existing_hash, received)) = event_row {
            if existing_hash != chunk.event_sha256 {
                return Err(StoreError::EventMismatch {
                    event_id: chunk.event_id.clone(),
                    message: "event hash differs from earlier chunks".into(),
                });
            }
            if existing_count != chunk.chunk_count as i64 {
                return Err(StoreError::EventMismatch {
                    event_id: chunk.event_id.clone(),
                    message: format!(
                        "chunk count {} differs from earlier {}",
                        chunk.chunk_count, existing_count
                    ),
                });
            }

            let received = received + 1;
            conn.execute(
                r#"
                UPDATE events SET received_chunks = ?1, updated_at = ?2
                WHERE sensor_id = ?3 AND event_id = ?4
                "#,
                (
                    received,
                    now.to_rfc3339().as_str(),
                    chunk.sensor_id.as_str(),
                    chunk.event_id.as_str(),
                ),
            )
            .await?;
            received
        } else {
            conn.execute(
                r#"
                INSERT INTO events (
                    sensor_id, event_id, chunk_count, event_sha256,
                    received_chunks, total_bytes, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)
                "#,
                (
                    chunk.sensor_id.as_str(),
                    chunk.event_id.as_str(),
                    chunk.chunk_count as i64,
                    chunk.event_sha256.as_str(),
                    chunk.total_bytes as i64,
                    now.to_rfc3339().as_str(),
                ),
            )
            .await?;
            1
        };

        if received < chunk.chunk_count as i64 {
            return Ok(TxOutcome::Accepted(None));
        }

        // All chunks present: reassemble and verify the whole payload
        match self
            .assemble_event(conn, &chunk.sensor_id, &chunk.event_id)
            .await
        {
            Ok(payload) => {
                conn.execute(
                    r#"
                    UPDATE events SET completed_at = ?1, updated_at = ?1
                    WHERE sensor_id = ?2 AND event_id = ?3
                    "#,
                    (
                        now.to_rfc3339().as_str(),
                        chunk.sensor_id.as_str(),
                        chunk.event_id.as_str(),
                    ),
                )
                .await?;

                let total_bytes = payload.len() as u64;
                Ok(TxOutcome::Accepted(Some(CompletedEvent {
                    sensor_id: chunk.sensor_id.clone(),
                    event_id: chunk.event_id.clone(),
                    payload,
                    total_bytes,
                    completed_at: now,
                })))
            }
            Err(StoreError::EventHashMismatch { event_id }) => {
                // Mark the event failed and release its chunk rows so the
                // committed point stays below them and the gap gets
                // re-requested.
                warn!(
                    sensor_id = %chunk.sensor_id,
                    event_id = %event_id,
                    "event failed whole-payload verification"
                );
                conn.execute(
                    r#"
                    UPDATE events SET failed_at = ?1, updated_at = ?1
                    WHERE sensor_id = ?2 AND event_id = ?3
                    "#,
                    (
                        now.to_rfc3339().as_str(),
                        chunk.sensor_id.as_str(),
                        event_id.as_str(),
                    ),
                )
                .await?;
                conn.execute(
                    "DELETE FROM chunks WHERE sensor_id = ?1 AND event_id = ?2",
                    (chunk.sensor_id.as_str(), event_id.as_str()),
                )
                .await?;
                Ok(TxOutcome::EventFailed(event_id))
            }
            Err(e) => Err(e),
        }
    }

    async fn assemble_event(
        &self,
        conn: &Connection,
        sensor_id: &str,
        event_id: &str,
    ) -> Result<Bytes> {
        let mut rows = conn
            .query(
                r#"
            SELECT chunk_index, chunk_count, compression, payload,
                   chunk_sha256, event_sha256, total_bytes
            FROM chunks
            WHERE sensor_id = ?1 AND event_id = ?2
            ORDER BY chunk_index ASC
            "#,
                (sensor_id, event_id),
            )
            .await?;

        let mut chunks = Vec::new();
        while let Some(row) = rows.next().await? {
            let chunk_index: i64 = row.get(0)?;
            let chunk_count: i64 = row.get(1)?;
            let compression: String = row.get(2)?;
            let payload: Vec<u8> = row.get(3)?;
            let chunk_sha256: String = row.get(4)?;
            let event_sha256: String = row.get(5)?;
            let total_bytes: i64 = row.get(6)?;

            chunks.push(EventChunk {
                event_id: event_id.to_string(),
                chunk_index: chunk_index as u32,
                chunk_count: chunk_count as u32,
                compression: Compression::parse(&compression)?,
                payload: payload.into(),
                chunk_sha256: parse_hash(&chunk_sha256, "chunk_sha256")?,
                event_sha256: parse_hash(&event_sha256, "event_sha256")?,
                total_bytes: total_bytes as u64,
            });
        }

        assemble(&chunks).map_err(|e| {
            if matches!(e, pylon_protocol::ProtocolError::EventHashMismatch { .. }) {
                StoreError::EventHashMismatch {
                    event_id: event_id.to_string(),
                }
            } else {
                StoreError::Protocol(e)
            }
        })
    }

    /// All stored sequences for a sensor strictly greater than `from`,
    /// ascending - the offset tracker walks these for contiguity
    pub async fn sequences_after(&self, sensor_id: &str, from: u64) -> Result<Vec<u64>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                r#"
            SELECT sequence FROM chunks
            WHERE sensor_id = ?1 AND sequence > ?2
            ORDER BY sequence ASC
            "#,
                (sensor_id, from as i64),
            )
            .await?;

        let mut sequences = Vec::new();
        while let Some(row) = rows.next().await? {
            let seq: i64 = row.get(0)?;
            sequences.push(seq as u64);
        }
        Ok(sequences)
    }

    /// Distinct sensors with stored state (chunks or committed offsets)
    pub async fn known_sensors(&self) -> Result<Vec<String>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                r#"
            SELECT sensor_id FROM chunks
            UNION
            SELECT sensor_id FROM offsets
            "#,
                (),
            )
            .await?;

        let mut sensors = Vec::new();
        while let Some(row) = rows.next().await? {
            sensors.push(row.get(0)?);
        }
        Ok(sensors)
    }

    /// Remove completed events (and their chunks) older than the retention
    /// window; returns the number of pruned events
    pub async fn prune_completed(&self, retention: Duration) -> Result<u64> {
        let conn = self.db.connect()?;
        let cutoff = (Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero()))
        .to_rfc3339();

        let mut rows = conn
            .query(
                r#"
            SELECT sensor_id, event_id FROM events
            WHERE completed_at IS NOT NULL AND completed_at < ?1
            "#,
                [cutoff.as_str()],
            )
            .await?;
        let mut expired: Vec<(String, String)> = Vec::new();
        while let Some(row) = rows.next().await? {
            expired.push((row.get(0)?, row.get(1)?));
        }

        for (sensor_id, event_id) in &expired {
            conn.execute(
                "DELETE FROM chunks WHERE sensor_id = ?1 AND event_id = ?2",
                (sensor_id.as_str(), event_id.as_str()),
            )
            .await?;
            conn.execute(
                "DELETE FROM events WHERE sensor_id = ?1 AND event_id = ?2",
                (sensor_id.as_str(), event_id.as_str()),
            )
            .await?;
        }

        let pruned = expired.len() as u64;
        if pruned > 0 {
            info!(pruned, "Pruned completed events past retention");
        }
        Ok(pruned)
    }
}

/// Internal transaction outcome, pre-commit
enum TxOutcome {
    Accepted(Option<CompletedEvent>),
    EventFailed(String),
}

fn parse_hash(hex: &str, field: &'static str) -> Result<[u8; 32]> {
    if hex.len() != 64 {
        return Err(StoreError::invalid_row(field, "wrong length"));
    }
    let mut bytes = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk)
            .map_err(|_| StoreError::invalid_row(field, "invalid UTF-8"))?;
        bytes[i] = u8::from_str_radix(pair, 16)
            .map_err(|_| StoreError::invalid_row(field, "invalid hex"))?;
    }
    Ok(bytes)
}

const SCHEMA_CHUNKS: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    sensor_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    event_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    compression TEXT NOT NULL,
    payload BLOB NOT NULL,
    chunk_sha256 TEXT NOT NULL,
    event_sha256 TEXT NOT NULL,
    total_bytes INTEGER NOT NULL,
    enqueued_at TEXT NOT NULL,
    received_at TEXT NOT NULL,
    PRIMARY KEY (sensor_id, sequence)
)
"#;

const SCHEMA_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    sensor_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    chunk_count INTEGER NOT NULL,
    event_sha256 TEXT NOT NULL,
    received_chunks INTEGER NOT NULL,
    total_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    failed_at TEXT,
    PRIMARY KEY (sensor_id, event_id)
)
"#;

const SCHEMA_OFFSETS: &str = r#"
CREATE TABLE IF NOT EXISTS offsets (
    sensor_id TEXT PRIMARY KEY,
    committed_sequence INTEGER NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

const INDEX_CHUNKS_EVENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_chunks_event ON chunks(sensor_id, event_id, chunk_index)";
