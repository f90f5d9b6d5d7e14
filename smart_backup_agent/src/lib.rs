//! Idle-triggered backup agent.
//!
//! Samples system load, and when the machine is quiet and the last backup is old
//! enough, copies the workspace into a timestamped snapshot, mirrors it into a live
//! directory, prunes old snapshots and records the time.

pub mod config;
pub mod error;
pub mod idle;
pub mod logging;
pub mod monitor;
pub mod probe;
pub mod retention;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod types;
