//! Replay a file of natural-language queries against a hosted Copilot Studio
//! agent, measure per-query latency, capture planner telemetry and persist
//! the results as CSV checkpoints and an optional SQLite run archive.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod observability;
pub mod replay;
pub mod telemetry;

pub use config::Config;
pub use error::{BenchError, Result};
pub use replay::{ReplayLoop, RunEnd, RunOptions, RunReport};
