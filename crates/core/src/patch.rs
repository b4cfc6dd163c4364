//! Patch bodies shared by the planner and the kube mutator.

use serde_json::{json, Value as Json};

/// Annotation bumped on the pod template to trigger a rollout restart.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Strategic merge patch touching only the named container's image.
pub fn image_patch(container: &str, image: &str) -> Json {
    json!({
        "spec": {"template": {"spec": {"containers": [{"name": container, "image": image}]}}}
    })
}

/// Merge patch stamping the restart marker with `ts` (RFC 3339).
pub fn restart_patch(ts: &str) -> Json {
    json!({
        "spec": {"template": {"metadata": {"annotations": {RESTARTED_AT_ANNOTATION: ts}}}}
    })
}

pub fn replicas_patch(replicas: i32) -> Json {
    json!({"spec": {"replicas": replicas}})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_patch_sets_annotation_on_template() {
        let p = restart_patch("2024-05-01T10:00:00+00:00");
        assert_eq!(
            p.pointer("/spec/template/metadata/annotations/kubectl.kubernetes.io~1restartedAt").and_then(|v| v.as_str()),
            Some("2024-05-01T10:00:00+00:00")
        );
    }

    #[test]
    fn image_patch_names_container() {
        let p = image_patch("web", "repo/nginx:2.0");
        assert_eq!(p.pointer("/spec/template/spec/containers/0/name").and_then(|v| v.as_str()), Some("web"));
        assert_eq!(p.pointer("/spec/template/spec/containers/0/image").and_then(|v| v.as_str()), Some("repo/nginx:2.0"));
    }
}
