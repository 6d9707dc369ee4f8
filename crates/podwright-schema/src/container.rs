use crate::enums::{MountPropagation, PullPolicy, TerminationMessagePolicy};
use crate::security::SecurityContext;
use podwright_core::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single container of the pod
///
/// `name` and `image` default to empty so that a structurally empty block
/// deserializes and is then rejected by validation instead of by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<PullPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_message_policy: Option<TerminationMessagePolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
}

/// Environment variable with either a literal value or a reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(
        default,
        with = "serde_yaml::with::singleton_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub value_from: Option<EnvVarSource>,
}

/// Where a referenced environment value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvVarSource {
    SecretKeyRef(KeySelector),
    ConfigMapKeyRef(KeySelector),
    FieldRef(ObjectFieldSelector),
    ResourceFieldRef(ResourceFieldSelector),
}

/// Selects a key of a config map or secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySelector {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

/// Selects a field of the pod, e.g. `metadata.name`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFieldSelector {
    #[serde(default)]
    pub field_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Selects a resource limit or request of a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFieldSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divisor: Option<Quantity>,
}

/// Bulk import of a config map or secret as environment variables
///
/// Exactly one of `config_map_ref` and `secret_ref` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<EnvFromRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<EnvFromRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvFromRef {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

/// Compute resource requests and limits
///
/// `resources: {}` is kept distinct from an absent block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,
}

impl ResourceRequirements {
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_propagation: Option<MountPropagation>,
}

/// Health probe: one handler plus timing knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    #[serde(flatten)]
    pub handler: ProbeHandler,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
}

impl Probe {
    pub fn new(handler: ProbeHandler) -> Self {
        Self {
            handler,
            initial_delay_seconds: None,
            period_seconds: None,
            timeout_seconds: None,
            success_threshold: None,
            failure_threshold: None,
        }
    }
}

/// Mechanism a probe uses to check the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProbeHandler {
    Exec(ExecAction),
    HttpGet(HttpGetAction),
    TcpSocket(TcpSocketAction),
    Grpc(GrpcAction),
}

/// Lifecycle hooks run around container start and stop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    #[serde(
        default,
        with = "serde_yaml::with::singleton_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_start: Option<LifecycleHandler>,
    #[serde(
        default,
        with = "serde_yaml::with::singleton_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_stop: Option<LifecycleHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleHandler {
    Exec(ExecAction),
    HttpGet(HttpGetAction),
    TcpSocket(TcpSocketAction),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecAction {
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub port: PortRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_headers: Vec<HttpHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSocketAction {
    pub port: PortRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcAction {
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// Port given by number or by the name of a container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(i32),
    Name(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_handler_is_flattened() {
        let yaml = r#"
httpGet:
  path: /healthz
  port: 8080
  httpHeaders:
    - name: X-Custom-Header
      value: Awesome
initialDelaySeconds: 3
periodSeconds: 1
"#;
        let probe: Probe = serde_yaml::from_str(yaml).unwrap();
        match &probe.handler {
            ProbeHandler::HttpGet(action) => {
                assert_eq!(action.port, PortRef::Number(8080));
                assert_eq!(action.http_headers.len(), 1);
            }
            other => panic!("unexpected handler {:?}", other),
        }
        assert_eq!(probe.initial_delay_seconds, Some(3));

        let json = serde_json::to_value(&probe).unwrap();
        assert_eq!(json["httpGet"]["path"], "/healthz");
        assert_eq!(json["periodSeconds"], 1);
    }

    #[test]
    fn test_named_port() {
        let action: TcpSocketAction = serde_json::from_str(r#"{"port":"http"}"#).unwrap();
        assert_eq!(action.port, PortRef::Name("http".to_string()));
    }

    #[test]
    fn test_env_value_from() {
        let yaml = r#"
name: EXPORTED_VARIABLE_FROM_SECRET
valueFrom:
  secretKeyRef:
    name: my-secret
    key: one
    optional: true
"#;
        let env: EnvVar = serde_yaml::from_str(yaml).unwrap();
        match env.value_from {
            Some(EnvVarSource::SecretKeyRef(sel)) => {
                assert_eq!(sel.name, "my-secret");
                assert_eq!(sel.optional, Some(true));
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_env_value_from_flow_style() {
        let env: EnvVar =
            serde_yaml::from_str("{name: POD_NAME, valueFrom: {fieldRef: {fieldPath: metadata.name}}}").unwrap();
        assert_eq!(
            env.value_from,
            Some(EnvVarSource::FieldRef(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                api_version: None,
            }))
        );

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["valueFrom"]["fieldRef"]["fieldPath"], "metadata.name");
        let back: EnvVar = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_lifecycle_hooks_load_in_both_styles() {
        let block = r#"
postStart:
  exec:
    command: [/bin/sh, -c, "echo started"]
preStop:
  httpGet:
    path: /shutdown
    port: 8080
"#;
        let lifecycle: Lifecycle = serde_yaml::from_str(block).unwrap();
        assert!(matches!(&lifecycle.post_start, Some(LifecycleHandler::Exec(exec)) if exec.command.len() == 3));
        assert!(matches!(&lifecycle.pre_stop, Some(LifecycleHandler::HttpGet(action)) if action.port == PortRef::Number(8080)));

        let flow: Lifecycle = serde_yaml::from_str("{preStop: {tcpSocket: {port: http}}}").unwrap();
        assert!(flow.post_start.is_none());
        assert!(matches!(&flow.pre_stop, Some(LifecycleHandler::TcpSocket(action)) if action.port == PortRef::Name("http".to_string())));

        let json = serde_json::to_value(&lifecycle).unwrap();
        assert_eq!(json["preStop"]["httpGet"]["path"], "/shutdown");
        assert_eq!(serde_json::from_value::<Lifecycle>(json).unwrap(), lifecycle);
    }

    #[test]
    fn test_empty_container_block_deserializes() {
        let container: Container = serde_yaml::from_str("{}").unwrap();
        assert!(container.name.is_empty());
        assert!(container.image.is_empty());
    }

    #[test]
    fn test_resource_quantities_compare_numerically() {
        let a: ResourceRequirements =
            serde_yaml::from_str("limits:\n  memory: 1024Mi\n  cpu: \"0.5\"\n").unwrap();
        let b: ResourceRequirements =
            serde_yaml::from_str("limits:\n  memory: 1Gi\n  cpu: 500m\n").unwrap();
        assert_eq!(a, b);
    }
}
