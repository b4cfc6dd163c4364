//! Policy resolution for a single deployment. Pure; no I/O.

use rekon_core::{DeploymentResource, Policy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// A keyword matched but the pod template has no containers.
    MatchedNoContainers { keyword: String },
    MatchedUpToDate { keyword: String, image: String },
    MatchedNeedsUpdate {
        keyword: String,
        container: String,
        current_image: String,
        target_image: String,
    },
}

impl MatchResult {
    pub fn keyword(&self) -> Option<&str> {
        match self {
            MatchResult::NoMatch => None,
            MatchResult::MatchedNoContainers { keyword }
            | MatchResult::MatchedUpToDate { keyword, .. }
            | MatchResult::MatchedNeedsUpdate { keyword, .. } => Some(keyword),
        }
    }

    pub fn is_match(&self) -> bool { !matches!(self, MatchResult::NoMatch) }
}

/// First rule (declared order) whose keyword is contained in the deployment
/// name decides; then the first container whose image differs from the rule's
/// target is the one to update. Further outdated containers are left for a
/// later run.
pub fn resolve(deployment: &DeploymentResource, policy: &Policy) -> MatchResult {
    let Some(rule) = policy.first_match(&deployment.name) else {
        return MatchResult::NoMatch;
    };
    if deployment.containers.is_empty() {
        return MatchResult::MatchedNoContainers { keyword: rule.keyword.clone() };
    }
    match deployment.containers.iter().find(|c| c.image != rule.image) {
        Some(c) => MatchResult::MatchedNeedsUpdate {
            keyword: rule.keyword.clone(),
            container: c.name.clone(),
            current_image: c.image.clone(),
            target_image: rule.image.clone(),
        },
        None => MatchResult::MatchedUpToDate { keyword: rule.keyword.clone(), image: rule.image.clone() },
    }
}
