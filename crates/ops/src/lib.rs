//! Rekon Ops: imperative deployment mutations (image patch, rollout restart, scale).

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use metrics::{counter, histogram};
use rekon_core::{
    patch::{image_patch, replicas_patch, restart_patch},
    ClusterMutator, MutationError, RawResponse,
};
use tracing::{info, warn};

/// Field manager recorded on patches issued by this crate.
pub const FIELD_MANAGER: &str = "rekon";

/// Map a kube error from a mutation call. API refusals keep their status code.
pub fn mutation_error(err: kube::Error) -> MutationError {
    match err {
        kube::Error::Api(ae) => MutationError::Rejected { code: ae.code, message: ae.message },
        other => MutationError::Transport(other.to_string()),
    }
}

/// kube-backed mutator for apps/v1 Deployments.
#[derive(Clone)]
pub struct KubeOps {
    client: Client,
}

impl KubeOps {
    pub fn new(client: Client) -> Self { Self { client } }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn patch_params() -> PatchParams {
        PatchParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() }
    }

    /// Set `spec.replicas`, preferring the scale subresource and falling back
    /// to a merge patch of the deployment spec.
    pub async fn scale(&self, namespace: &str, name: &str, replicas: i32, use_subresource: bool) -> Result<RawResponse> {
        if replicas < 0 {
            return Err(anyhow!("replicas must be >= 0 (got {})", replicas));
        }
        let api = self.deployments(namespace);
        let payload = replicas_patch(replicas);
        if use_subresource {
            match api.patch_scale(name, &Self::patch_params(), &Patch::Merge(&payload)).await {
                Ok(_) => {
                    counter!("ops_scale_ok", 1u64);
                    info!(ns = %namespace, name = %name, replicas, "scaled via subresource");
                    return Ok(format!("deployment.apps/{} scaled", name));
                }
                Err(e) => warn!(error = %e, "patch_scale failed; falling back to spec.replicas"),
            }
        }
        api.patch(name, &Self::patch_params(), &Patch::Merge(&payload))
            .await
            .with_context(|| format!("scaling deployment {}/{}", namespace, name))?;
        counter!("ops_scale_ok", 1u64);
        info!(ns = %namespace, name = %name, replicas, "scaled via spec.replicas");
        Ok(format!("deployment.apps/{} scaled", name))
    }
}

#[async_trait::async_trait]
impl ClusterMutator for KubeOps {
    async fn patch_container_image(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
        image: &str,
    ) -> std::result::Result<RawResponse, MutationError> {
        let t0 = Instant::now();
        let body = image_patch(container, image);
        let res = self.deployments(namespace).patch(deployment, &Self::patch_params(), &Patch::Strategic(&body)).await;
        histogram!("ops_patch_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(obj) => {
                counter!("ops_patch_ok", 1u64);
                let generation = obj.metadata.generation.unwrap_or_default();
                Ok(format!("deployment.apps/{} patched (generation {})", deployment, generation))
            }
            Err(e) => {
                counter!("ops_patch_err", 1u64);
                Err(mutation_error(e))
            }
        }
    }

    async fn restart_rollout(&self, namespace: &str, deployment: &str) -> std::result::Result<RawResponse, MutationError> {
        let t0 = Instant::now();
        let ts = chrono::Utc::now().to_rfc3339();
        let body = restart_patch(&ts);
        let res = self.deployments(namespace).patch(deployment, &Self::patch_params(), &Patch::Merge(&body)).await;
        histogram!("ops_restart_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(_) => {
                counter!("ops_restart_ok", 1u64);
                Ok(format!("deployment.apps/{} restarted", deployment))
            }
            Err(e) => {
                counter!("ops_restart_err", 1u64);
                Err(mutation_error(e))
            }
        }
    }
}
