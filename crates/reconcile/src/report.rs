//! Outcome entries and the aggregator that assembles them in snapshot order.

use rekon_core::{DeploymentResource, MutationError, RawResponse};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resolver::MatchResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutcomeStatus {
    AlreadyCurrent,
    Updated,
    PatchFailed,
    RestartFailed,
    /// Keyword matched a deployment without containers; nothing to patch.
    NoContainers,
    /// Dry-run: the patch/restart pair would have been issued.
    Planned,
}

impl OutcomeStatus {
    pub fn is_failure(self) -> bool { matches!(self, OutcomeStatus::PatchFailed | OutcomeStatus::RestartFailed) }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::AlreadyCurrent => "already-current",
            OutcomeStatus::Updated => "updated",
            OutcomeStatus::PatchFailed => "patch-failed",
            OutcomeStatus::RestartFailed => "restart-failed",
            OutcomeStatus::NoContainers => "no-containers",
            OutcomeStatus::Planned => "planned",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

pub type StepResult = Result<RawResponse, MutationError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeEntry {
    pub namespace: String,
    pub name: String,
    pub keyword: String,
    pub status: OutcomeStatus,
    /// Short description; carries the raw error text for failures.
    pub detail: String,
    pub container: Option<String>,
    pub from_image: Option<String>,
    pub to_image: Option<String>,
    pub patch: Option<StepResult>,
    pub restart: Option<StepResult>,
}

fn step_text(r: &StepResult) -> String {
    match r {
        Ok(raw) => raw.trim_end().to_string(),
        Err(e) => format!("error: {}", e),
    }
}

impl OutcomeEntry {
    /// Multi-line, human readable summary of this entry.
    pub fn render(&self) -> String {
        let key = format!("{}/{}", self.namespace, self.name);
        match self.status {
            OutcomeStatus::AlreadyCurrent => format!(
                "{} (matched '{}'): already using '{}'",
                key,
                self.keyword,
                self.to_image.as_deref().unwrap_or_default()
            ),
            OutcomeStatus::NoContainers => format!("{} (matched '{}'): no containers to update", key, self.keyword),
            OutcomeStatus::Planned => format!(
                "{} matched keyword '{}':\n  would update container '{}' from '{}' to '{}'",
                key,
                self.keyword,
                self.container.as_deref().unwrap_or_default(),
                self.from_image.as_deref().unwrap_or_default(),
                self.to_image.as_deref().unwrap_or_default()
            ),
            OutcomeStatus::Updated | OutcomeStatus::PatchFailed | OutcomeStatus::RestartFailed => {
                let mut out = format!(
                    "{} matched keyword '{}' [{}]:\n  image '{}' -> '{}' (container '{}')",
                    key,
                    self.keyword,
                    self.status,
                    self.from_image.as_deref().unwrap_or_default(),
                    self.to_image.as_deref().unwrap_or_default(),
                    self.container.as_deref().unwrap_or_default()
                );
                if let Some(p) = &self.patch { out.push_str(&format!("\n  Patch: {}", step_text(p))); }
                if let Some(r) = &self.restart { out.push_str(&format!("\n  Restart: {}", step_text(r))); }
                out
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub matched: usize,
    pub updated: usize,
    pub already_current: usize,
    pub planned: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct OutcomeReport {
    /// Matched deployments only, in snapshot order.
    pub entries: Vec<OutcomeEntry>,
    /// The run stopped early on cancellation.
    pub cancelled: bool,
}

impl OutcomeReport {
    pub fn summary(&self) -> ReportSummary {
        let mut s = ReportSummary { matched: self.entries.len(), ..Default::default() };
        for e in &self.entries {
            match e.status {
                OutcomeStatus::Updated => s.updated += 1,
                OutcomeStatus::AlreadyCurrent => s.already_current += 1,
                OutcomeStatus::Planned => s.planned += 1,
                OutcomeStatus::PatchFailed | OutcomeStatus::RestartFailed => s.failed += 1,
                OutcomeStatus::NoContainers => {}
            }
        }
        s
    }

    pub fn has_failures(&self) -> bool { self.entries.iter().any(|e| e.status.is_failure()) }

    pub fn render(&self) -> String {
        let mut out = self.entries.iter().map(OutcomeEntry::render).collect::<Vec<_>>().join("\n\n");
        if self.cancelled {
            if !out.is_empty() { out.push_str("\n\n"); }
            out.push_str("(run cancelled; remaining deployments were not processed)");
        }
        out
    }
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nothing in the snapshot matched any keyword (or the policy is empty).
    NoMatchPolicy,
    Reconciled(OutcomeReport),
}

impl ReconcileOutcome {
    pub fn report(&self) -> Option<&OutcomeReport> {
        match self {
            ReconcileOutcome::NoMatchPolicy => None,
            ReconcileOutcome::Reconciled(r) => Some(r),
        }
    }

    pub fn has_failures(&self) -> bool { self.report().map(|r| r.has_failures()).unwrap_or(false) }

    pub fn render(&self) -> String {
        match self {
            ReconcileOutcome::NoMatchPolicy => "No matching deployments found for any keyword.".to_string(),
            ReconcileOutcome::Reconciled(r) => r.render(),
        }
    }
}

/// Collects entries as the engine walks the snapshot. Never fails.
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    entries: Vec<OutcomeEntry>,
}

impl OutcomeAggregator {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn base(dep: &DeploymentResource, keyword: &str, status: OutcomeStatus, detail: String) -> OutcomeEntry {
        OutcomeEntry {
            namespace: dep.namespace.clone(),
            name: dep.name.clone(),
            keyword: keyword.to_string(),
            status,
            detail,
            container: None,
            from_image: None,
            to_image: None,
            patch: None,
            restart: None,
        }
    }

    /// Record a match that needs no mutation. `NoMatch` and `MatchedNeedsUpdate`
    /// are ignored; the latter goes through `record_planned` or `record_mutation`.
    pub fn record_unchanged(&mut self, dep: &DeploymentResource, m: &MatchResult) {
        match m {
            MatchResult::NoMatch => {}
            MatchResult::MatchedNoContainers { keyword } => {
                self.entries.push(Self::base(dep, keyword, OutcomeStatus::NoContainers, "deployment has no containers".into()));
            }
            MatchResult::MatchedUpToDate { keyword, image } => {
                let mut e = Self::base(dep, keyword, OutcomeStatus::AlreadyCurrent, format!("already using '{}'", image));
                e.to_image = Some(image.clone());
                self.entries.push(e);
            }
            MatchResult::MatchedNeedsUpdate { keyword, .. } => {
                debug!(ns = %dep.namespace, name = %dep.name, keyword = %keyword, "needs-update result not recorded as unchanged");
            }
        }
    }

    pub fn record_planned(&mut self, dep: &DeploymentResource, m: &MatchResult) {
        if let MatchResult::MatchedNeedsUpdate { keyword, container, current_image, target_image } = m {
            let mut e = Self::base(
                dep,
                keyword,
                OutcomeStatus::Planned,
                format!("would set container '{}' to '{}'", container, target_image),
            );
            e.container = Some(container.clone());
            e.from_image = Some(current_image.clone());
            e.to_image = Some(target_image.clone());
            self.entries.push(e);
        }
    }

    /// Record both step results; patch failure takes precedence over restart failure.
    pub fn record_mutation(&mut self, dep: &DeploymentResource, m: &MatchResult, patch: StepResult, restart: StepResult) {
        let MatchResult::MatchedNeedsUpdate { keyword, container, current_image, target_image } = m else {
            return self.record_unchanged(dep, m);
        };
        let (status, detail) = match (&patch, &restart) {
            (Err(pe), Err(re)) => (OutcomeStatus::PatchFailed, format!("patch: {}; restart: {}", pe, re)),
            (Err(pe), Ok(_)) => (OutcomeStatus::PatchFailed, format!("patch: {}", pe)),
            (Ok(_), Err(re)) => (OutcomeStatus::RestartFailed, format!("restart: {}", re)),
            (Ok(_), Ok(_)) => (
                OutcomeStatus::Updated,
                format!("image updated from '{}' to '{}'", current_image, target_image),
            ),
        };
        let mut e = Self::base(dep, keyword, status, detail);
        e.container = Some(container.clone());
        e.from_image = Some(current_image.clone());
        e.to_image = Some(target_image.clone());
        e.patch = Some(patch);
        e.restart = Some(restart);
        self.entries.push(e);
    }

    /// An uncancelled run with no entries is reported as `NoMatchPolicy`.
    pub fn finish(self, cancelled: bool) -> ReconcileOutcome {
        if self.entries.is_empty() && !cancelled {
            return ReconcileOutcome::NoMatchPolicy;
        }
        ReconcileOutcome::Reconciled(OutcomeReport { entries: self.entries, cancelled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rekon_core::Container;

    fn dep() -> DeploymentResource {
        DeploymentResource::new("default", "nginx-web", vec![Container::new("web", "repo/nginx:1.0")])
    }

    fn needs_update() -> MatchResult {
        MatchResult::MatchedNeedsUpdate {
            keyword: "nginx".into(),
            container: "web".into(),
            current_image: "repo/nginx:1.0".into(),
            target_image: "repo/nginx:2.0".into(),
        }
    }

    #[test]
    fn empty_aggregation_is_no_match_policy() {
        assert_eq!(OutcomeAggregator::new().finish(false), ReconcileOutcome::NoMatchPolicy);
        let mut agg = OutcomeAggregator::new();
        agg.record_unchanged(&dep(), &MatchResult::NoMatch);
        assert!(agg.is_empty());
        assert_eq!(agg.finish(false).render(), "No matching deployments found for any keyword.");
    }

    #[test]
    fn cancelled_empty_run_is_still_a_report() {
        let out = OutcomeAggregator::new().finish(true);
        let r = out.report().expect("report");
        assert!(r.cancelled);
        assert!(r.entries.is_empty());
    }

    #[test]
    fn status_precedence_for_step_failures() {
        let err = || MutationError::Transport("connection refused".into());
        let mut agg = OutcomeAggregator::new();
        agg.record_mutation(&dep(), &needs_update(), Err(err()), Err(err()));
        agg.record_mutation(&dep(), &needs_update(), Ok("patched".into()), Err(err()));
        agg.record_mutation(&dep(), &needs_update(), Err(err()), Ok("restarted".into()));
        agg.record_mutation(&dep(), &needs_update(), Ok("patched".into()), Ok("restarted".into()));
        let out = agg.finish(false);
        let r = out.report().unwrap();
        let statuses: Vec<_> = r.entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![OutcomeStatus::PatchFailed, OutcomeStatus::RestartFailed, OutcomeStatus::PatchFailed, OutcomeStatus::Updated]
        );
        assert!(r.entries[0].detail.contains("restart: transport: connection refused"));
        let s = r.summary();
        assert_eq!((s.matched, s.updated, s.failed), (4, 1, 3));
        assert!(out.has_failures());
    }

    #[test]
    fn needs_update_is_never_recorded_as_unchanged() {
        let mut agg = OutcomeAggregator::new();
        agg.record_unchanged(&dep(), &needs_update());
        assert!(agg.is_empty());
        agg.record_mutation(&dep(), &MatchResult::NoMatch, Ok("patched".into()), Ok("restarted".into()));
        assert!(agg.is_empty());
        assert_eq!(agg.finish(false), ReconcileOutcome::NoMatchPolicy);
    }

    #[test]
    fn render_includes_images_and_raw_responses() {
        let mut agg = OutcomeAggregator::new();
        agg.record_mutation(
            &dep(),
            &needs_update(),
            Ok("deployment.apps/nginx-web patched\n".into()),
            Err(MutationError::Rejected { code: 403, message: "forbidden".into() }),
        );
        agg.record_unchanged(
            &DeploymentResource::new("prod", "nginx-api", vec![]),
            &MatchResult::MatchedUpToDate { keyword: "nginx".into(), image: "repo/nginx:2.0".into() },
        );
        let text = agg.finish(false).render();
        assert!(text.contains("default/nginx-web matched keyword 'nginx' [restart-failed]"), "{text}");
        assert!(text.contains("'repo/nginx:1.0' -> 'repo/nginx:2.0'"));
        assert!(text.contains("Patch: deployment.apps/nginx-web patched"));
        assert!(text.contains("Restart: error: rejected (403): forbidden"));
        assert!(text.contains("prod/nginx-api (matched 'nginx'): already using 'repo/nginx:2.0'"));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let v = serde_json::to_value(ReconcileOutcome::NoMatchPolicy).unwrap();
        assert_eq!(v, serde_json::json!({"outcome": "no_match_policy"}));
    }
}
