use crate::container::Container;
use crate::enums::{DnsPolicy, RestartPolicy, WhenUnsatisfiable};
use crate::security::PodSecurityContext;
use crate::volume::Volume;
use podwright_core::{PodId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared intent for one pod
///
/// Unset optional fields stay unset; the cluster's own defaults are only
/// reconciled at the translation boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automount_service_account_token: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_gates: Vec<ReadinessGate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_service_links: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<DnsPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

impl PodSpec {
    /// Identity of the pod this spec declares
    pub fn id(&self) -> PodId {
        PodId::with_default_namespace(self.metadata.namespace.as_deref(), self.metadata.name.clone())
    }

    /// Load a spec from a YAML (or JSON) document
    pub fn from_yaml(data: &str) -> Result<Self> {
        podwright_core::from_yaml(data)
    }

    /// Condition types of the declared readiness gates
    pub fn readiness_gate_types(&self) -> Vec<String> {
        self.readiness_gates
            .iter()
            .map(|g| g.condition_type.clone())
            .collect()
    }

    /// Iterate over init containers followed by regular containers
    pub fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.init_containers.iter().chain(self.containers.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Extra condition that must be `True` before the pod counts as ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessGate {
    pub condition_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpreadConstraint {
    pub max_skew: i32,
    pub topology_key: String,
    pub when_unsatisfiable: WhenUnsatisfiable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalObjectReference {
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const NGINX: &str = r#"
metadata:
  name: nginx
  labels:
    app: web
containers:
  - name: containername
    image: nginx:1.27
    args: ["-listen=:80", "-text='before'"]
readinessGates:
  - conditionType: haha
"#;

    #[test]
    fn test_load_from_yaml() {
        let spec = PodSpec::from_yaml(NGINX).unwrap();
        assert_eq!(spec.metadata.name, "nginx");
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.containers[0].args.len(), 2);
        assert_eq!(spec.readiness_gate_types(), vec!["haha".to_string()]);
        assert!(spec.security_context.is_none());
    }

    #[test]
    fn test_id_defaults_namespace() {
        let spec = PodSpec::from_yaml(NGINX).unwrap();
        assert_eq!(spec.id().to_string(), "default/nginx");
    }

    #[test]
    fn test_empty_block_is_distinct_from_absent() {
        let spec = PodSpec::from_yaml(
            "metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {}}]\nsecurityContext: {}\n",
        )
        .unwrap();
        assert_eq!(spec.containers[0].resources, Some(Default::default()));
        assert_eq!(spec.security_context, Some(PodSecurityContext::default()));
    }

    #[test]
    fn test_load_env_references_and_hooks() {
        let spec = PodSpec::from_yaml(
            r#"
metadata: {name: p}
containers:
  - name: c
    image: i
    env:
      - name: POD_NAME
        valueFrom: {fieldRef: {fieldPath: metadata.name}}
      - name: TOKEN
        valueFrom:
          secretKeyRef: {name: creds, key: token}
    lifecycle:
      postStart:
        exec: {command: [touch, /tmp/ready]}
"#,
        )
        .unwrap();
        let container = &spec.containers[0];
        assert!(container.env.iter().all(|e| e.value_from.is_some()));
        assert!(container.lifecycle.as_ref().and_then(|l| l.post_start.as_ref()).is_some());
    }

    #[test]
    fn test_all_containers_order() {
        let spec = PodSpec::from_yaml(
            "metadata: {name: p}\ninitContainers: [{name: init, image: busybox}]\ncontainers: [{name: main, image: nginx}]\n",
        )
        .unwrap();
        let names: Vec<&str> = spec.all_containers().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["init", "main"]);
    }
}
