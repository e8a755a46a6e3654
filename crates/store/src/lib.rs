//! Pylon Store - server-side durable ingest state
//!
//! Three cooperating pieces:
//! - [`ChunkStore`] - deduplicating, persistent store of received chunks
//!   with event reassembly on completion
//! - [`OffsetTracker`] - per-sensor committed sequence, advanced only along
//!   contiguous runs and persisted next to the chunks
//! - [`SnapshotCache`] - in-memory latest-complete-event per sensor with a
//!   broadcast feed for live consumers
//!
//! All mutations for a given sensor must be serialized by the caller (the
//! ingest endpoint holds a per-sensor lock); cross-sensor operations are
//! independent.

mod error;
mod offsets;
mod snapshot;
mod store;

pub use error::{Result, StoreError};
pub use offsets::OffsetTracker;
pub use snapshot::{Snapshot, SnapshotCache};
pub use store::{ChunkStore, CompletedEvent, WriteOutcome};

/// Default retention window for completed events (72 hours)
pub const DEFAULT_RETENTION: std::time::Duration = std::time::Duration::from_secs(72 * 3600);

// Test modules - only compiled during testing
#[cfg(test)]
mod store_test;
