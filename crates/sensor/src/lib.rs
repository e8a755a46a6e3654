//! Pylon Sensor - the on-device half of the delivery pipeline
//!
//! A sensor runs one [`SensorAgent`] wiring together:
//! - the durable queue (`pylon-queue`) holding chunks awaiting ack
//! - a [`ControlClient`] maintaining the outbound control session
//! - a [`ChunkDispatcher`] turning server chunk requests into
//!   flow-controlled batches
//! - a [`ChunkSender`] pushing batches over the data channel with bounded
//!   retry
//!
//! The agent reconnects forever with jittered exponential backoff; the
//! queue guarantees nothing un-acked is lost across crashes.

mod agent;
mod backoff;
mod control;
mod dispatch;
mod error;
mod sender;

pub use agent::SensorAgent;
pub use backoff::ExponentialBackoff;
pub use control::ControlClient;
pub use dispatch::{AckStats, ChunkDispatcher};
pub use error::{Result, SensorError};
pub use sender::ChunkSender;

// Test modules - only compiled during testing
#[cfg(test)]
mod dispatch_test;
