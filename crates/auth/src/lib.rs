//! Pylon Auth - sensor credential registry and reader tokens
//!
//! Two separate credential domains:
//! - [`SensorRegistry`] - which sensors may register control sessions and
//!   push chunks. Provisioned out of band as an `id:token` file, rotated by
//!   reloading the file.
//! - [`ReaderToken`] - a single bearer token for read-side consumers
//!   (snapshot API and stream feed), distinct from sensor credentials.
//!
//! # Security
//!
//! Token validation uses constant-time comparison to prevent timing attacks.

mod error;
mod registry;

pub use error::{AuthError, Result};
pub use registry::{constant_time_eq, extract_bearer, ReaderToken, SensorRegistry};
