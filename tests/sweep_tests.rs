use async_trait::async_trait;
use proxy_sweep::{
    run_with_policy, Candidate, ProbePolicy, ProbeStage, RunConfig, StageKind, StageOutcome,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Active when the last octet is even; tracks how many probes overlap
#[derive(Default)]
struct EvenOctets {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ProbeStage for EvenOctets {
    fn kind(&self) -> StageKind {
        StageKind::Direct
    }

    async fn probe(&self, candidate: &Candidate) -> StageOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let last: u8 = candidate
            .address
            .rsplit('.')
            .next()
            .and_then(|octet| octet.parse().ok())
            .unwrap_or(1);
        if last % 2 == 0 {
            StageOutcome::Active
        } else {
            StageOutcome::Inactive("odd".to_string())
        }
    }
}

fn input_list(n: usize) -> String {
    let mut out = String::new();
    for i in 1..=n {
        out.push_str(&format!("10.1.0.{i},8080,ID,Org {i}\n"));
    }
    // repeats and junk that must not leak into the outputs
    out.push_str("10.1.0.2,8080,ID,Org 2\n10.1.0.3,notaport\n");
    out
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn sweep_respects_concurrency_limit() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.txt"), input_list(50)).unwrap();
    let config = RunConfig::new()
        .with_input(dir.path().join("in.txt"))
        .with_outputs(dir.path().join("active.txt"), dir.path().join("dead.txt"))
        .with_concurrency(5);

    let stage = Arc::new(EvenOctets::default());
    let policy = ProbePolicy::new(vec![stage.clone() as Arc<dyn ProbeStage>]);
    let summary = run_with_policy(&config, policy, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.probed, 50);
    assert!(summary.peak_in_flight <= 5);
    assert!(stage.peak.load(Ordering::SeqCst) <= 5);
    assert_eq!(summary.active, 25);
    assert_eq!(summary.dead, 25);
}

#[tokio::test]
async fn outputs_are_disjoint_and_free_of_junk() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.txt"), input_list(20)).unwrap();
    let config = RunConfig::new()
        .with_input(dir.path().join("in.txt"))
        .with_outputs(dir.path().join("active.txt"), dir.path().join("dead.txt"))
        .with_concurrency(8);

    let policy = ProbePolicy::new(vec![Arc::new(EvenOctets::default()) as Arc<dyn ProbeStage>]);
    run_with_policy(&config, policy, CancellationToken::new())
        .await
        .unwrap();

    let active = lines(&dir.path().join("active.txt"));
    let dead = lines(&dir.path().join("dead.txt"));
    let active_set: HashSet<_> = active.iter().collect();
    let dead_set: HashSet<_> = dead.iter().collect();

    assert_eq!(active.len(), active_set.len(), "duplicate active lines");
    assert_eq!(dead.len(), dead_set.len(), "duplicate dead lines");
    assert!(active_set.is_disjoint(&dead_set));
    assert_eq!(active.len() + dead.len(), 20);
    assert!(active.iter().chain(&dead).all(|l| !l.contains("notaport")));
    assert!(active.contains(&"10.1.0.2,8080,ID,Org 2".to_string()));
}

#[tokio::test]
async fn repeated_runs_give_the_same_partition() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.txt"), input_list(30)).unwrap();
    let config = RunConfig::new()
        .with_input(dir.path().join("in.txt"))
        .with_outputs(dir.path().join("active.txt"), dir.path().join("dead.txt"))
        .with_concurrency(6);

    let mut partitions = Vec::new();
    for _ in 0..2 {
        let policy =
            ProbePolicy::new(vec![Arc::new(EvenOctets::default()) as Arc<dyn ProbeStage>]);
        run_with_policy(&config, policy, CancellationToken::new())
            .await
            .unwrap();

        let active: HashSet<_> = lines(&dir.path().join("active.txt")).into_iter().collect();
        let dead: HashSet<_> = lines(&dir.path().join("dead.txt")).into_iter().collect();
        partitions.push((active, dead));
    }

    assert_eq!(partitions[0], partitions[1]);
}
