//! Probe policy: ordered fallback over verification stages

use crate::config::ProbeConfig;
use crate::error::StageError;
use crate::proxy::models::{Candidate, ProbeResult, StageOutcome};
use crate::proxy::stages::{build_stage, ProbeStage};
use std::sync::Arc;
use tracing::debug;

/// Runs stages in order until one declares the candidate active.
///
/// A candidate is dead once every stage has been tried without success. Each
/// stage is attempted at most once per candidate.
#[derive(Clone)]
pub struct ProbePolicy {
    stages: Vec<Arc<dyn ProbeStage>>,
}

impl ProbePolicy {
    pub fn new(stages: Vec<Arc<dyn ProbeStage>>) -> Self {
        Self { stages }
    }

    /// Build the stages listed in `config.stages`, in that order
    pub fn from_config(config: &ProbeConfig) -> Result<Self, StageError> {
        let stages = config
            .stages
            .iter()
            .map(|kind| build_stage(*kind, config).map(Arc::from))
            .collect::<Result<Vec<Arc<dyn ProbeStage>>, _>>()?;
        Ok(Self::new(stages))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Decide the verdict for one candidate
    pub async fn evaluate(&self, candidate: Candidate) -> ProbeResult {
        let mut detail = None;
        let mut unreachable = !self.stages.is_empty();

        for stage in &self.stages {
            let outcome = stage.probe(&candidate).await;
            debug!(candidate = %candidate, stage = %stage.kind(), ?outcome, "stage finished");

            match outcome {
                StageOutcome::Active => return ProbeResult::active(candidate, stage.kind()),
                StageOutcome::Inactive(reason) => {
                    unreachable = false;
                    detail = Some(format!("{}: {}", stage.kind(), reason));
                }
                StageOutcome::Unreachable(error) => {
                    detail = Some(format!("{}: {}", stage.kind(), error));
                }
            }
        }

        ProbeResult::dead(candidate, detail, unreachable)
    }
}

impl std::fmt::Debug for ProbePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.kind()))
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{shared, ScriptedStage};
    use super::*;
    use crate::proxy::models::{StageKind, Verdict};

    fn candidate() -> Candidate {
        Candidate::new("1.2.3.4", 8080)
            .with_country("US")
            .with_organization("Org")
    }

    #[tokio::test]
    async fn test_first_stage_success_skips_fallback() {
        let direct = Arc::new(ScriptedStage::new(StageKind::Direct, StageOutcome::Active));
        let verify = Arc::new(ScriptedStage::new(
            StageKind::Verify,
            StageOutcome::Inactive("no".into()),
        ));
        let policy = ProbePolicy::new(vec![shared(&direct), shared(&verify)]);

        let result = policy.evaluate(candidate()).await;
        assert_eq!(result.verdict, Verdict::Active);
        assert_eq!(result.method, Some(StageKind::Direct));
        assert_eq!(direct.calls(), 1);
        assert_eq!(verify.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_stage_can_rescue() {
        let direct = Arc::new(ScriptedStage::new(
            StageKind::Direct,
            StageOutcome::Unreachable("refused".into()),
        ));
        let verify = Arc::new(ScriptedStage::new(StageKind::Verify, StageOutcome::Active));
        let policy = ProbePolicy::new(vec![shared(&direct), shared(&verify)]);

        let result = policy.evaluate(candidate()).await;
        assert!(result.is_active());
        assert_eq!(result.method, Some(StageKind::Verify));
        assert_eq!(verify.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_stages_fail_is_dead() {
        let direct = Arc::new(ScriptedStage::new(
            StageKind::Direct,
            StageOutcome::Inactive("status 200, server -".into()),
        ));
        let verify = Arc::new(ScriptedStage::new(
            StageKind::Verify,
            StageOutcome::Inactive("verification service reports inactive".into()),
        ));
        let policy = ProbePolicy::new(vec![shared(&direct), shared(&verify)]);

        let result = policy.evaluate(candidate()).await;
        assert_eq!(result.verdict, Verdict::Dead);
        assert_eq!(result.method, None);
        assert_eq!(result.status_label(), "dead");
        assert_eq!(
            result.detail.as_deref(),
            Some("verify: verification service reports inactive")
        );
    }

    #[tokio::test]
    async fn test_unreachable_only_when_every_stage_unreachable() {
        let unreachable = || {
            Arc::new(ScriptedStage::new(
                StageKind::Direct,
                StageOutcome::Unreachable("timed out".into()),
            )) as Arc<dyn ProbeStage>
        };
        let policy = ProbePolicy::new(vec![unreachable()]);
        assert_eq!(policy.evaluate(candidate()).await.status_label(), "unreachable");

        let inactive: Arc<dyn ProbeStage> = Arc::new(ScriptedStage::new(
            StageKind::Verify,
            StageOutcome::Inactive("no".into()),
        ));
        let policy = ProbePolicy::new(vec![unreachable(), inactive]);
        assert_eq!(policy.evaluate(candidate()).await.status_label(), "dead");
    }

    #[tokio::test]
    async fn test_empty_policy_is_dead() {
        let policy = ProbePolicy::new(Vec::new());
        let result = policy.evaluate(candidate()).await;
        assert_eq!(result.verdict, Verdict::Dead);
        assert!(!result.unreachable);
    }

    #[test]
    fn test_from_config_respects_order() {
        let config = ProbeConfig::new().with_stages([StageKind::Verify, StageKind::Direct]);
        let policy = ProbePolicy::from_config(&config).unwrap();
        assert_eq!(format!("{policy:?}"), "[Verify, Direct]");

        let config = ProbeConfig::new().with_stages([StageKind::Direct]);
        assert_eq!(ProbePolicy::from_config(&config).unwrap().stage_count(), 1);
    }
}
