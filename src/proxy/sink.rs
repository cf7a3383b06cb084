//! Result persistence
//!
//! A single task owns the sink and receives verdicts over a channel, so the
//! dedup set is never shared. Outputs are rewritten atomically on every flush:
//! a reader sees either the previous snapshot or the new one, never a torn
//! file.

use crate::error::SinkError;
use crate::proxy::models::{ProbeResult, Verdict};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counts reported by the sink at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkSummary {
    pub active: usize,
    pub dead: usize,
    /// Results whose canonical key had already been recorded
    pub duplicates_dropped: usize,
}

/// Active/dead result sets backed by two output files
#[derive(Debug)]
pub struct ResultSink {
    active_path: PathBuf,
    dead_path: PathBuf,
    seen: HashSet<String>,
    active: Vec<String>,
    dead: Vec<String>,
    duplicates_dropped: usize,
    checkpoint_every: usize,
    since_flush: usize,
}

impl ResultSink {
    pub fn new(active_path: impl Into<PathBuf>, dead_path: impl Into<PathBuf>) -> Self {
        Self {
            active_path: active_path.into(),
            dead_path: dead_path.into(),
            seen: HashSet::new(),
            active: Vec::new(),
            dead: Vec::new(),
            duplicates_dropped: 0,
            checkpoint_every: 0,
            since_flush: 0,
        }
    }

    /// Flush after every `every` new results; 0 disables checkpoints
    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every;
        self
    }

    /// Truncate both outputs so nothing from a previous run survives
    pub fn prepare(&self) -> Result<(), SinkError> {
        for path in [&self.active_path, &self.dead_path] {
            if let Some(parent) = parent_dir(path) {
                fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::File::create(path).map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Record a verdict. Returns `false` when its canonical key was already
    /// recorded in either set.
    pub fn record(&mut self, result: &ProbeResult) -> bool {
        let key = result.candidate.canonical_key();
        if !self.seen.insert(key.clone()) {
            self.duplicates_dropped += 1;
            return false;
        }

        match result.verdict {
            Verdict::Active => self.active.push(key),
            Verdict::Dead => self.dead.push(key),
        }
        self.since_flush += 1;
        true
    }

    pub fn active_lines(&self) -> &[String] {
        &self.active
    }

    pub fn dead_lines(&self) -> &[String] {
        &self.dead
    }

    pub fn summary(&self) -> SinkSummary {
        SinkSummary {
            active: self.active.len(),
            dead: self.dead.len(),
            duplicates_dropped: self.duplicates_dropped,
        }
    }

    fn checkpoint_due(&self) -> bool {
        self.checkpoint_every > 0 && self.since_flush >= self.checkpoint_every
    }

    /// Write both sets to disk, retrying each file once
    pub fn flush(&mut self) -> Result<(), SinkError> {
        write_with_retry(&self.active_path, self.active_lines())?;
        write_with_retry(&self.dead_path, self.dead_lines())?;
        self.since_flush = 0;
        debug!(
            active = self.active.len(),
            dead = self.dead.len(),
            "flushed results"
        );
        Ok(())
    }

    /// Copy the active set over another file, e.g. the input list
    pub fn promote_active(&self, target: &Path) -> Result<(), SinkError> {
        write_with_retry(target, self.active_lines())
    }

    /// Drain `results` until every sender is gone, then flush.
    ///
    /// Logs one status line per candidate. A failed checkpoint ends the task
    /// early with the error.
    pub async fn consume(
        mut self,
        mut results: mpsc::Receiver<ProbeResult>,
    ) -> Result<(Self, SinkSummary), SinkError> {
        while let Some(result) = results.recv().await {
            if !self.record(&result) {
                debug!(candidate = %result.candidate, "duplicate result dropped");
                continue;
            }

            match &result.detail {
                Some(detail) if !result.is_active() => {
                    info!("[{}] {} ({})", result.status_label(), result.candidate, detail)
                }
                _ => info!("[{}] {}", result.status_label(), result.candidate),
            }

            if self.checkpoint_due() {
                self.flush()?;
            }
        }

        self.flush()?;
        let summary = self.summary();
        Ok((self, summary))
    }

    /// Run [`ResultSink::consume`] on its own task
    pub fn spawn(
        self,
        results: mpsc::Receiver<ProbeResult>,
    ) -> JoinHandle<Result<(Self, SinkSummary), SinkError>> {
        tokio::spawn(self.consume(results))
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn write_with_retry(path: &Path, lines: &[String]) -> Result<(), SinkError> {
    write_atomic(path, lines).or_else(|e| {
        warn!("{}, retrying once", e);
        write_atomic(path, lines)
    })
}

/// Replace `path` with `lines`, one per line, via a temp file in the same
/// directory and a rename.
pub fn write_atomic(path: &Path, lines: &[String]) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = parent_dir(path).unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut writer = std::io::BufWriter::new(tmp.as_file_mut());
        for line in lines {
            writeln!(writer, "{line}").map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
