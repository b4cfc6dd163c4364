//! Rekon core types: deployment snapshot model, collaborator traits and errors.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod patch;
pub mod policy;

pub use policy::{Policy, PolicyError, PolicyRule};

/// Raw textual response returned by the cluster tooling for a mutation.
pub type RawResponse = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    /// Image locator, e.g. `registry/repo:tag`.
    pub image: String,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self { name: name.into(), image: image.into() }
    }
}

/// One live deployment as seen at the start of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentResource {
    pub namespace: String,
    pub name: String,
    /// Pod template containers in declared order.
    pub containers: Vec<Container>,
}

impl DeploymentResource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, containers: Vec<Container>) -> Self {
        Self { namespace: namespace.into(), name: name.into(), containers }
    }

    /// `namespace/name`, the key used in logs and reports.
    pub fn key(&self) -> String { format!("{}/{}", self.namespace, self.name) }
}

/// All deployments retrieved for one run. Never cached across runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub items: Vec<DeploymentResource>,
}

impl ClusterSnapshot {
    pub fn new(items: Vec<DeploymentResource>) -> Self { Self { items } }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

impl FromIterator<DeploymentResource> for ClusterSnapshot {
    fn from_iter<I: IntoIterator<Item = DeploymentResource>>(iter: I) -> Self {
        Self { items: iter.into_iter().collect() }
    }
}

/// Snapshot retrieval failures. Fatal to a whole run.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClusterReadError {
    #[error("cluster unreachable: {0}")]
    Unreachable(String),
    #[error("cluster auth error: {0}")]
    Auth(String),
}

/// Failure of a single patch or restart call. Recorded per entry, never fatal.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum MutationError {
    /// The API server answered and refused the request.
    #[error("rejected ({code}): {message}")]
    Rejected { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

/// Reads live deployments from the cluster.
#[async_trait::async_trait]
pub trait ClusterReader: Send + Sync {
    /// List deployments; `namespace = None` means all namespaces.
    async fn list_deployments(&self, namespace: Option<&str>) -> Result<ClusterSnapshot, ClusterReadError>;
}

/// Issues the two mutations a reconciliation run may need.
#[async_trait::async_trait]
pub trait ClusterMutator: Send + Sync {
    /// Strategic merge patch setting `container`'s image on the deployment's pod template.
    async fn patch_container_image(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        image: &str,
    ) -> Result<RawResponse, MutationError>;

    /// Rollout restart of the deployment.
    async fn restart_rollout(&self, namespace: &str, deployment: &str) -> Result<RawResponse, MutationError>;
}

pub mod prelude {
    pub use super::{
        ClusterMutator, ClusterReadError, ClusterReader, ClusterSnapshot, Container, DeploymentResource,
        MutationError, Policy, PolicyError, PolicyRule, RawResponse,
    };
}
