//! Rekon kubehub: client bootstrap and live deployment snapshots.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, ListParams},
    Client,
};
use metrics::{counter, histogram};
use rekon_core::{ClusterReadError, ClusterReader, ClusterSnapshot, Container, DeploymentResource};
use tracing::{debug, info, warn};

/// Namespace assumed when a listed object carries none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Client from the inferred kube config (in-cluster env or kubeconfig context).
pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from inferred config")
}

/// Map a kube client error onto the run-fatal snapshot taxonomy.
/// 401/403 and credential plugin failures are auth errors; everything else
/// (transport, config inference, server errors) is treated as unreachable.
pub fn classify_error(err: &kube::Error) -> ClusterReadError {
    match err {
        kube::Error::Api(ae) if ae.code == 401 || ae.code == 403 => {
            ClusterReadError::Auth(format!("{} ({})", ae.message, ae.reason))
        }
        kube::Error::Auth(e) => ClusterReadError::Auth(e.to_string()),
        other => ClusterReadError::Unreachable(other.to_string()),
    }
}

/// Project a kube Deployment onto the engine's model. Objects without a name
/// are dropped.
pub fn deployment_resource(d: &Deployment) -> Option<DeploymentResource> {
    let name = d.metadata.name.clone()?;
    let namespace = d.metadata.namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let containers: Vec<Container> = d
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|ps| {
            ps.containers
                .iter()
                .map(|c| Container::new(c.name.clone(), c.image.clone().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();
    Some(DeploymentResource { namespace, name, containers })
}

/// `ClusterReader` backed by the apps/v1 Deployment API.
#[derive(Clone)]
pub struct KubeReader {
    client: Client,
}

impl KubeReader {
    pub fn new(client: Client) -> Self { Self { client } }

    pub async fn try_default() -> std::result::Result<Self, ClusterReadError> {
        let client = Client::try_default().await.map_err(|e| classify_error(&e))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> Client { self.client.clone() }
}

#[async_trait::async_trait]
impl ClusterReader for KubeReader {
    async fn list_deployments(&self, namespace: Option<&str>) -> std::result::Result<ClusterSnapshot, ClusterReadError> {
        let t0 = Instant::now();
        let api: Api<Deployment> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = match api.list(&ListParams::default()).await {
            Ok(l) => l,
            Err(e) => {
                counter!("kubehub_list_err", 1u64);
                let mapped = classify_error(&e);
                warn!(error = %e, ns = ?namespace, "deployment list failed");
                return Err(mapped);
            }
        };
        let mut items = Vec::with_capacity(list.items.len());
        for d in &list.items {
            match deployment_resource(d) {
                Some(r) => items.push(r),
                None => warn!(ns = ?d.metadata.namespace, "skipping deployment without metadata.name"),
            }
        }
        debug!(count = items.len(), "deployments projected");
        histogram!("kubehub_list_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(count = items.len(), ns = ?namespace, took_ms = %t0.elapsed().as_millis(), "deployment snapshot listed");
        Ok(ClusterSnapshot::new(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("{} message", reason), reason: reason.into(), code })
    }

    #[test]
    fn classifies_auth_and_unreachable() {
        assert!(matches!(classify_error(&api_err(401, "Unauthorized")), ClusterReadError::Auth(_)));
        assert!(matches!(classify_error(&api_err(403, "Forbidden")), ClusterReadError::Auth(_)));
        assert!(matches!(classify_error(&api_err(503, "ServiceUnavailable")), ClusterReadError::Unreachable(_)));
    }

    #[test]
    fn projects_deployment_containers_in_order() {
        let d: Deployment = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nginx-web", "namespace": "shop"},
            "spec": {
                "selector": {"matchLabels": {"app": "nginx"}},
                "template": {
                    "metadata": {"labels": {"app": "nginx"}},
                    "spec": {"containers": [
                        {"name": "web", "image": "repo/nginx:1.0"},
                        {"name": "metrics", "image": "repo/exporter:0.3"}
                    ]}
                }
            }
        }))
        .unwrap();
        let r = deployment_resource(&d).expect("projected");
        assert_eq!(r.key(), "shop/nginx-web");
        assert_eq!(r.containers, vec![Container::new("web", "repo/nginx:1.0"), Container::new("metrics", "repo/exporter:0.3")]);
    }

    #[test]
    fn missing_namespace_defaults_and_missing_name_is_dropped() {
        let d: Deployment = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "bare"}
        }))
        .unwrap();
        let r = deployment_resource(&d).unwrap();
        assert_eq!(r.namespace, DEFAULT_NAMESPACE);
        assert!(r.containers.is_empty());

        let unnamed: Deployment = serde_json::from_value(serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {}})).unwrap();
        assert!(deployment_resource(&unnamed).is_none());
    }
}
