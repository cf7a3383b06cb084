//! One sweep over a candidate list, from input file to result files

use crate::config::RunConfig;
use crate::error::{RunError, SourceError};
use crate::proxy::geo::GeoLocator;
use crate::proxy::parser::CandidateSource;
use crate::proxy::policy::ProbePolicy;
use crate::proxy::scheduler::ProbeScheduler;
use crate::proxy::sink::{write_atomic, ResultSink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened during a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input: PathBuf,
    pub active_output: PathBuf,
    pub dead_output: PathBuf,
    /// Records parsed from the input
    pub parsed: usize,
    /// Malformed records skipped
    pub skipped: usize,
    /// Records repeating an address and port seen earlier
    pub duplicates: usize,
    pub probed: usize,
    pub active: usize,
    pub dead: usize,
    /// Results dropped by the sink because their key was already written
    pub duplicates_dropped: usize,
    pub peak_in_flight: usize,
    pub cancelled: bool,
}

/// Run a sweep with the stages named in the configuration
pub async fn run(config: &RunConfig, cancel: CancellationToken) -> Result<RunSummary, RunError> {
    let policy = ProbePolicy::from_config(&config.probe)?;
    run_with_policy(config, policy, cancel).await
}

/// Run a sweep with an explicit policy.
///
/// The input must exist before any output is touched. Outputs are truncated,
/// then filled as verdicts arrive and flushed atomically at the end, also on
/// cancellation. If the input could not be read to the end the run fails
/// after that flush and the input is never promoted over.
pub async fn run_with_policy(
    config: &RunConfig,
    policy: ProbePolicy,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    let started_at = Utc::now();

    let source = CandidateSource::open(&config.input)?;
    let source_stats = source.stats();
    let geo = config
        .mmdb_path
        .as_ref()
        .map(GeoLocator::from_path)
        .transpose()?;

    let sink = ResultSink::new(&config.active_output, &config.dead_output)
        .with_checkpoint_every(config.checkpoint_every);
    sink.prepare()?;

    info!(
        input = %config.input.display(),
        stages = ?policy,
        "sweep started"
    );

    let (tx, rx) = mpsc::channel(config.concurrency.max(1));
    let writer = sink.spawn(rx);

    let mut seen = HashSet::new();
    let mut duplicates = 0;
    let candidates = source
        .filter(|candidate| {
            let fresh = seen.insert((candidate.address.clone(), candidate.port));
            if !fresh {
                debug!(candidate = %candidate, "duplicate endpoint skipped");
                duplicates += 1;
            }
            fresh
        })
        .map(|candidate| match &geo {
            Some(geo) => geo.enrich(candidate),
            None => candidate,
        });

    let scheduler = ProbeScheduler::new(policy, config.concurrency);
    let stats = scheduler.run(candidates, tx, &cancel).await;
    let (sink, sink_summary) = writer.await??;

    if let Some(source) = source_stats.take_read_error() {
        return Err(SourceError::Io {
            path: config.input.clone(),
            source,
        }
        .into());
    }

    if stats.cancelled {
        warn!(probed = stats.probed, "sweep cancelled, outputs hold partial results");
    } else if config.promote_active {
        sink.promote_active(&config.input)?;
        info!(input = %config.input.display(), "input replaced with active set");
    }

    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        input: config.input.clone(),
        active_output: config.active_output.clone(),
        dead_output: config.dead_output.clone(),
        parsed: source_stats.parsed(),
        skipped: source_stats.skipped(),
        duplicates,
        probed: stats.probed,
        active: sink_summary.active,
        dead: sink_summary.dead,
        duplicates_dropped: sink_summary.duplicates_dropped,
        peak_in_flight: stats.peak_in_flight,
        cancelled: stats.cancelled,
    };

    if let Some(path) = &config.summary_path {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => write_atomic(path, &[json])?,
            Err(e) => warn!("failed to encode run summary: {}", e),
        }
    }

    info!(
        active = summary.active,
        dead = summary.dead,
        skipped = summary.skipped,
        "sweep finished"
    );
    Ok(summary)
}
