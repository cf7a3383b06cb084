//! Bounded-concurrency fan-out of the probe policy

use crate::proxy::models::{Candidate, ProbeResult};
use crate::proxy::policy::ProbePolicy;
use futures::stream::{self, StreamExt};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters reported once a schedule finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Probes that produced a verdict
    pub probed: usize,
    /// Highest number of probes observed running at once
    pub peak_in_flight: usize,
    /// The run was cancelled before every candidate was probed
    pub cancelled: bool,
}

/// Runs the probe policy over many candidates with at most `concurrency`
/// probes in flight.
#[derive(Debug, Clone)]
pub struct ProbeScheduler {
    policy: ProbePolicy,
    concurrency: usize,
}

impl ProbeScheduler {
    pub fn new(policy: ProbePolicy, concurrency: usize) -> Self {
        Self {
            policy,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Probe every candidate once and forward each result to `results` as it
    /// completes.
    ///
    /// Returns when all candidates are done, when `cancel` fires, or when the
    /// receiving side goes away. Cancelled probes are dropped without a
    /// verdict.
    pub async fn run<I>(
        &self,
        candidates: I,
        results: mpsc::Sender<ProbeResult>,
        cancel: &CancellationToken,
    ) -> SchedulerStats
    where
        I: IntoIterator<Item = Candidate>,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let mut probed = 0;

        info!(concurrency = self.concurrency, "starting probes");

        let verdicts = stream::iter(candidates)
            .map(|candidate| {
                let sem = Arc::clone(&semaphore);
                let policy = self.policy.clone();
                let (in_flight, peak) = (&in_flight, &peak);
                async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return None;
                    };
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    let result = policy.evaluate(candidate).await;

                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Some(result)
                }
            })
            .buffer_unordered(self.concurrency)
            .take_until(cancel.cancelled());
        let mut verdicts = pin!(verdicts);

        while let Some(verdict) = verdicts.next().await {
            let Some(result) = verdict else { continue };
            probed += 1;
            if results.send(result).await.is_err() {
                warn!("result receiver closed, stopping probes");
                break;
            }
        }

        let stats = SchedulerStats {
            probed,
            peak_in_flight: peak.load(Ordering::SeqCst),
            cancelled: cancel.is_cancelled(),
        };
        debug!(?stats, "probes finished");
        stats
    }

    /// Probe every candidate and collect the results in arrival order
    #[cfg(test)]
    pub(crate) async fn check_all<I>(&self, candidates: I) -> Vec<ProbeResult>
    where
        I: IntoIterator<Item = Candidate>,
    {
        let (tx, mut rx) = mpsc::channel(self.concurrency);
        let cancel = CancellationToken::new();

        let collect = async {
            let mut out = Vec::new();
            while let Some(result) = rx.recv().await {
                out.push(result);
            }
            out
        };

        let (_, results) = tokio::join!(self.run(candidates, tx, &cancel), collect);
        results
    }

    /// Probe every candidate and split the results into active and dead
    #[cfg(test)]
    pub(crate) async fn check_and_separate<I>(&self, candidates: I) -> (Vec<ProbeResult>, Vec<ProbeResult>)
    where
        I: IntoIterator<Item = Candidate>,
    {
        self.check_all(candidates)
            .await
            .into_iter()
            .partition(|r| r.is_active())
    }
}
