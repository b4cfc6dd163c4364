//! Turns a needs-update match into the ordered patch/restart pair.

use serde::{Deserialize, Serialize};

use crate::resolver::MatchResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchRequest {
    pub namespace: String,
    pub deployment: String,
    pub container: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestartRequest {
    pub namespace: String,
    pub deployment: String,
}

/// Patch first, restart second. Both are issued once planned; the restart
/// does not depend on the patch outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationPlan {
    pub patch: PatchRequest,
    pub restart: RestartRequest,
}

/// Returns a plan only for `MatchedNeedsUpdate`.
pub fn plan(namespace: &str, deployment: &str, m: &MatchResult) -> Option<MutationPlan> {
    match m {
        MatchResult::MatchedNeedsUpdate { container, target_image, .. } => Some(MutationPlan {
            patch: PatchRequest {
                namespace: namespace.to_string(),
                deployment: deployment.to_string(),
                container: container.clone(),
                image: target_image.clone(),
            },
            restart: RestartRequest { namespace: namespace.to_string(), deployment: deployment.to_string() },
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_patch_then_restart_for_same_deployment() {
        let m = MatchResult::MatchedNeedsUpdate {
            keyword: "nginx".into(),
            container: "web".into(),
            current_image: "repo/nginx:1.0".into(),
            target_image: "repo/nginx:2.0".into(),
        };
        let p = plan("default", "nginx-web", &m).expect("plan");
        assert_eq!(
            p.patch,
            PatchRequest {
                namespace: "default".into(),
                deployment: "nginx-web".into(),
                container: "web".into(),
                image: "repo/nginx:2.0".into(),
            }
        );
        assert_eq!(p.restart, RestartRequest { namespace: "default".into(), deployment: "nginx-web".into() });
    }

    #[test]
    fn nothing_planned_for_other_results() {
        assert!(plan("ns", "d", &MatchResult::NoMatch).is_none());
        assert!(plan("ns", "d", &MatchResult::MatchedUpToDate { keyword: "k".into(), image: "i".into() }).is_none());
        assert!(plan("ns", "d", &MatchResult::MatchedNoContainers { keyword: "k".into() }).is_none());
    }
}
