//! Per-sensor committed sequence tracking
//!
//! The committed sequence is the highest sequence for which all lower
//! sequences are durably stored, with no gaps. It advances only along
//! contiguous runs of stored chunks and never regresses.
//!
//! Committed positions are persisted in the store database (`offsets`
//! table): retention pruning deletes old chunk rows, so the committed point
//! cannot be recomputed from chunks alone after a restart.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;
use turso::Database;

use crate::error::Result;
use crate::store::ChunkStore;

/// Per-sensor high-water mark of contiguously committed sequences
pub struct OffsetTracker {
    db: Database,
    /// Cached committed positions; authoritative copy lives in the database
    cache: Mutex<HashMap<String, u64>>,
}

impl OffsetTracker {
    /// Create a tracker sharing the chunk store's database and load all
    /// persisted positions
    pub async fn open(store: &ChunkStore) -> Result<Self> {
        let tracker = Self {
            db: store.database(),
            cache: Mutex::new(HashMap::new()),
        };
        tracker.load_all().await?;
        Ok(tracker)
    }

    async fn load_all(&self) -> Result<()> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query("SELECT sensor_id, committed_sequence FROM offsets", ())
            .await?;

        let mut loaded = HashMap::new();
        while let Some(row) = rows.next().await? {
            let sensor_id: String = row.get(0)?;
            let committed: i64 = row.get(1)?;
            loaded.insert(sensor_id, committed as u64);
        }

        if !loaded.is_empty() {
            debug!(sensors = loaded.len(), "Loaded committed offsets");
        }
        *self.cache.lock() = loaded;
        Ok(())
    }

    /// Committed sequence for a sensor (0 when nothing is committed)
    ///
    /// This is the `since_sequence` the scheduler hands to chunk requests.
    pub fn committed(&self, sensor_id: &str) -> u64 {
        self.cache.lock().get(sensor_id).copied().unwrap_or(0)
    }

    /// Snapshot of all committed positions
    pub fn all(&self) -> HashMap<String, u64> {
        self.cache.lock().clone()
    }

    /// Extend the committed sequence along the largest contiguous run of
    /// stored chunks and persist the new position
    ///
    /// Never skips a hole: a missing lower sequence blocks advancement.
    /// Returns the (possibly unchanged) committed sequence. Callers must
    /// serialize per sensor.
    pub async fn advance(&self, store: &ChunkStore, sensor_id: &str) -> Result<u64> {
        let mut committed = self.committed(sensor_id);
        let start = committed;

        for sequence in store.sequences_after(sensor_id, committed).await? {
            if sequence == committed + 1 {
                committed = sequence;
            } else {
                break;
            }
        }

        if committed != start {
            let conn = self.db.connect()?;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO offsets (sensor_id, committed_sequence, updated_at)
                VALUES (?1, ?2, ?3)
                "#,
                (
                    sensor_id,
                    committed as i64,
                    Utc::now().to_rfc3339().as_str(),
                ),
            )
            .await?;

            self.cache
                .lock()
                .insert(sensor_id.to_string(), committed);
            debug!(sensor_id, from = start, to = committed, "Advanced committed sequence");
        }

        Ok(committed)
    }
}
