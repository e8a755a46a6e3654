//! CLI subcommands

pub mod enqueue;
pub mod sensor;
pub mod serve;
