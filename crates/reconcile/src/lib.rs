//! Rekon reconcile: keyword → image policy applied to live deployments.
//!
//! One run lists deployments once, resolves each against the policy
//! ([`resolver`]), plans the patch/restart pair ([`planner`]), issues it through
//! the injected [`ClusterMutator`] and collects per-deployment outcomes
//! ([`report`]). Runs are strictly sequential and hold no state between calls.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use rekon_core::{ClusterMutator, ClusterReadError, ClusterReader, Policy};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod planner;
pub mod report;
pub mod resolver;

pub use planner::{plan, MutationPlan, PatchRequest, RestartRequest};
pub use report::{OutcomeAggregator, OutcomeEntry, OutcomeReport, OutcomeStatus, ReconcileOutcome, ReportSummary};
pub use resolver::{resolve, MatchResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Apply,
    /// Resolve and plan only; no mutation calls are issued.
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Restrict the snapshot to one namespace (None = all namespaces).
    pub namespace: Option<String>,
}

impl RunOptions {
    pub fn dry_run() -> Self { Self { mode: RunMode::DryRun, namespace: None } }

    pub fn in_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }
}

/// Reconciliation engine over injected cluster collaborators.
#[derive(Clone)]
pub struct Reconciler {
    reader: Arc<dyn ClusterReader>,
    mutator: Arc<dyn ClusterMutator>,
}

impl Reconciler {
    pub fn new(reader: Arc<dyn ClusterReader>, mutator: Arc<dyn ClusterMutator>) -> Self {
        Self { reader, mutator }
    }

    /// Apply `policy` across all namespaces.
    pub async fn reconcile(&self, policy: &Policy) -> Result<ReconcileOutcome, ClusterReadError> {
        self.reconcile_with(policy, &RunOptions::default(), &CancellationToken::new()).await
    }

    /// Only a snapshot read failure fails the run; mutation errors are
    /// recorded on their entries. `cancel` is checked before each deployment,
    /// never between a patch and its restart.
    pub async fn reconcile_with(
        &self,
        policy: &Policy,
        opts: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ClusterReadError> {
        let t0 = Instant::now();
        counter!("reconcile_runs", 1u64);
        if policy.is_empty() {
            info!("reconcile: empty policy; nothing to do");
            return Ok(ReconcileOutcome::NoMatchPolicy);
        }

        let snapshot = match self.reader.list_deployments(opts.namespace.as_deref()).await {
            Ok(s) => s,
            Err(e) => {
                counter!("reconcile_snapshot_err", 1u64);
                warn!(error = %e, ns = ?opts.namespace, "reconcile: snapshot failed");
                return Err(e);
            }
        };
        info!(deployments = snapshot.len(), rules = policy.len(), mode = ?opts.mode, ns = ?opts.namespace, "reconcile: start");

        let mut agg = OutcomeAggregator::new();
        let mut cancelled = false;
        for dep in &snapshot.items {
            if cancel.is_cancelled() {
                warn!(processed = agg.len(), "reconcile: cancelled");
                cancelled = true;
                break;
            }
            let m = resolve(dep, policy);
            let Some(mutation_plan) = plan(&dep.namespace, &dep.name, &m) else {
                if m.is_match() {
                    debug!(ns = %dep.namespace, name = %dep.name, keyword = ?m.keyword(), "no change needed");
                }
                agg.record_unchanged(dep, &m);
                continue;
            };
            if opts.mode == RunMode::DryRun {
                info!(ns = %dep.namespace, name = %dep.name, keyword = ?m.keyword(), "dry-run: update planned");
                agg.record_planned(dep, &m);
                continue;
            }

            let (patch_res, restart_res) = self.execute(&mutation_plan).await;
            agg.record_mutation(dep, &m, patch_res, restart_res);
        }

        let outcome = agg.finish(cancelled);
        if let Some(r) = outcome.report() {
            let s = r.summary();
            counter!("reconcile_updated", s.updated as u64);
            counter!("reconcile_failed", s.failed as u64);
            info!(matched = s.matched, updated = s.updated, current = s.already_current, planned = s.planned, failed = s.failed, cancelled = r.cancelled, took_ms = %t0.elapsed().as_millis(), "reconcile: done");
        } else {
            info!(took_ms = %t0.elapsed().as_millis(), "reconcile: no deployment matched any keyword");
        }
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        Ok(outcome)
    }

    /// Patch then restart. The restart is issued whatever the patch returned.
    async fn execute(&self, plan: &MutationPlan) -> (report::StepResult, report::StepResult) {
        let PatchRequest { namespace, deployment, container, image } = &plan.patch;
        info!(ns = %namespace, name = %deployment, container = %container, image = %image, "patching container image");
        let patch_res = self.mutator.patch_container_image(namespace, deployment, container, image).await;
        if let Err(e) = &patch_res {
            counter!("reconcile_patch_err", 1u64);
            warn!(ns = %namespace, name = %deployment, error = %e, "patch failed; restart still issued");
        }

        let RestartRequest { namespace, deployment } = &plan.restart;
        info!(ns = %namespace, name = %deployment, "restarting rollout");
        let restart_res = self.mutator.restart_rollout(namespace, deployment).await;
        if let Err(e) = &restart_res {
            counter!("reconcile_restart_err", 1u64);
            warn!(ns = %namespace, name = %deployment, error = %e, "rollout restart failed");
        }
        (patch_res, restart_res)
    }
}
