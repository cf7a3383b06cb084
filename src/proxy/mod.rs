//! Proxy probing
//!
//! This module provides:
//! - Parsing candidate lists (`address,port[,country[,organization]]`)
//! - Verification stages and the fallback policy that combines them
//! - A bounded-concurrency scheduler for running probes
//! - A result sink that keeps active and dead sets on disk
//! - Optional country lookup from a MaxMind database

pub mod geo;
pub mod models;
pub mod parser;
pub mod policy;
pub mod scheduler;
pub mod sink;
pub mod stages;

pub use geo::GeoLocator;
pub use models::{Candidate, ProbeResult, StageKind, StageOutcome, Verdict};
pub use parser::{CandidateParser, CandidateSource, SourceStats};
pub use policy::ProbePolicy;
pub use scheduler::{ProbeScheduler, SchedulerStats};
pub use sink::{ResultSink, SinkSummary};
pub use stages::{DirectProbe, ProbeStage, VerificationApi};
