//! Pylon Server - the collector half of the delivery pipeline
//!
//! Four cooperating services share the durable state in `pylon-store`:
//! - [`ControlListener`] - accepts sensor control sessions, authenticates
//!   them against the registry, and routes heartbeats
//! - [`SessionRegistry`] - one live session per sensor identity; a newer
//!   registration supersedes and closes any prior one
//! - the ingest endpoint ([`ingest`]) - validates and stores chunk batches,
//!   advances committed offsets, publishes snapshots
//! - [`RequestScheduler`] - pushes flow-controlled chunk requests to
//!   connected sensors
//! - [`SnapshotStreamer`] - live snapshot feed for read-side consumers

pub mod ingest;

mod control;
mod error;
mod scheduler;
mod session;
mod stream;

pub use control::ControlListener;
pub use error::{Result, ServerError};
pub use ingest::{build_router, IngestServer, IngestState};
pub use scheduler::RequestScheduler;
pub use session::{SessionHandle, SessionRegistry};
pub use stream::SnapshotStreamer;

// Test modules - only compiled during testing
#[cfg(test)]
mod session_test;
