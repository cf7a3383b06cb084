//! Proxy Sweep - bounded-concurrency proxy prober
//!
//! Reads a list of proxy endpoints, probes each one through an ordered set
//! of verification stages with a fixed number of probes in flight, and
//! splits the results into active and dead lists on disk.

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod runner;

pub use config::{ProbeConfig, RunConfig};
pub use error::{ParseError, RunError, SinkError, SourceError, StageError};
pub use proxy::*;
pub use runner::{run, run_with_policy, RunSummary};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
