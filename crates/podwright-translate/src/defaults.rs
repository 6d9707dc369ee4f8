//! Values the API server fills in for fields a request left unset
//!
//! [`apply_server_defaults`] writes them onto a cluster object the way the
//! API server does on admission. [`suppress_server_defaults`] removes them
//! again from a flattened spec wherever the prior request left the field
//! unset, so a read after an apply does not register as drift.

use crate::expand::expand_toleration;
use k8s_openapi::api::core::v1 as k8s;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use podwright_core::{Pod, Quantity, DEFAULT_NAMESPACE};
use podwright_schema as schema;
use podwright_schema::{PullPolicy, RestartPolicy, TerminationMessagePolicy};
use std::collections::BTreeMap;

pub const DEFAULT_RESTART_POLICY: RestartPolicy = RestartPolicy::Always;
pub const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;
pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";
pub const DEFAULT_SERVICE_ACCOUNT_NAME: &str = "default";
pub const DEFAULT_DNS_POLICY: schema::DnsPolicy = schema::DnsPolicy::ClusterFirst;
pub const DEFAULT_FILE_MODE: i32 = 0o644;
pub const DEFAULT_TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";
pub const DEFAULT_FIELD_REF_API_VERSION: &str = "v1";
pub const DEFAULT_PORT_PROTOCOL: &str = "TCP";
pub const DEFAULT_HTTP_SCHEME: &str = "HTTP";
pub const DEFAULT_HTTP_PATH: &str = "/";
pub const DEFAULT_VOLUME_MODE: &str = "Filesystem";

pub const DEFAULT_PROBE_TIMEOUT_SECONDS: i32 = 1;
pub const DEFAULT_PROBE_PERIOD_SECONDS: i32 = 10;
pub const DEFAULT_PROBE_SUCCESS_THRESHOLD: i32 = 1;
pub const DEFAULT_PROBE_FAILURE_THRESHOLD: i32 = 3;

/// Where the service-account token volume is mounted in every container
pub const SERVICE_ACCOUNT_MOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Name prefixes of the token volumes the cluster injects
pub const INJECTED_VOLUME_PREFIXES: [&str; 2] = ["kube-api-access-", "default-token-"];

/// Taints every pod tolerates for five minutes unless it says otherwise
const DEFAULT_NO_EXECUTE_TAINTS: [&str; 2] = ["node.kubernetes.io/not-ready", "node.kubernetes.io/unreachable"];
const DEFAULT_TOLERATION_SECONDS: i64 = 300;

/// Whether a volume name belongs to an injected service-account token volume
pub fn is_injected_volume(name: &str) -> bool {
    INJECTED_VOLUME_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Pull policy the cluster picks for an image when none is declared
pub fn default_pull_policy(image: &str) -> PullPolicy {
    if image.contains('@') {
        return PullPolicy::IfNotPresent;
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.rsplit_once(':') {
        Some((_, "latest")) | None => PullPolicy::Always,
        Some(_) => PullPolicy::IfNotPresent,
    }
}

/// The NoExecute tolerations added to every pod
pub fn default_tolerations() -> Vec<schema::Toleration> {
    DEFAULT_NO_EXECUTE_TAINTS
        .iter()
        .map(|key| schema::Toleration {
            key: Some(key.to_string()),
            operator: Some("Exists".to_string()),
            value: None,
            effect: Some("NoExecute".to_string()),
            toleration_seconds: Some(DEFAULT_TOLERATION_SECONDS),
        })
        .collect()
}

/// Apply the API server's defaults to a pod object
///
/// `token_volume` names the service-account token volume to inject; it is
/// skipped when the pod opts out of token automounting.
pub fn apply_server_defaults(pod: &mut Pod, token_volume: Option<&str>) {
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
    }
    let spec = pod.spec.get_or_insert_with(Default::default);

    spec.restart_policy
        .get_or_insert_with(|| DEFAULT_RESTART_POLICY.as_str().to_string());
    spec.termination_grace_period_seconds
        .get_or_insert(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS);
    spec.scheduler_name
        .get_or_insert_with(|| DEFAULT_SCHEDULER_NAME.to_string());
    spec.service_account_name
        .get_or_insert_with(|| DEFAULT_SERVICE_ACCOUNT_NAME.to_string());
    spec.dns_policy
        .get_or_insert_with(|| DEFAULT_DNS_POLICY.as_str().to_string());
    spec.enable_service_links.get_or_insert(true);
    spec.security_context.get_or_insert_with(Default::default);

    let tolerations = spec.tolerations.get_or_insert_with(Vec::new);
    for default in default_tolerations() {
        let present = tolerations
            .iter()
            .any(|t| t.key == default.key && t.effect == default.effect);
        if !present {
            tolerations.push(expand_toleration(&default));
        }
    }

    for container in spec
        .init_containers
        .iter_mut()
        .flatten()
        .chain(spec.containers.iter_mut())
    {
        apply_container_defaults(container);
    }

    for volume in spec.volumes.iter_mut().flatten() {
        apply_volume_defaults(volume);
    }

    let automount = spec.automount_service_account_token != Some(false);
    if let (true, Some(name)) = (automount, token_volume) {
        spec.volumes
            .get_or_insert_with(Vec::new)
            .push(token_volume_for(name));
        for container in spec
            .init_containers
            .iter_mut()
            .flatten()
            .chain(spec.containers.iter_mut())
        {
            container
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .push(k8s::VolumeMount {
                    name: name.to_string(),
                    mount_path: SERVICE_ACCOUNT_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                });
        }
    }
}

fn apply_container_defaults(container: &mut k8s::Container) {
    container
        .termination_message_policy
        .get_or_insert_with(|| TerminationMessagePolicy::File.as_str().to_string());
    container
        .termination_message_path
        .get_or_insert_with(|| DEFAULT_TERMINATION_MESSAGE_PATH.to_string());
    if container.image_pull_policy.is_none() {
        let image = container.image.as_deref().unwrap_or_default();
        container.image_pull_policy = Some(default_pull_policy(image).as_str().to_string());
    }

    let resources = container.resources.get_or_insert_with(Default::default);
    if let Some(limits) = &resources.limits {
        let requests = resources.requests.get_or_insert_with(BTreeMap::new);
        for (name, limit) in limits {
            requests.entry(name.clone()).or_insert_with(|| limit.clone());
        }
    }

    for port in container.ports.iter_mut().flatten() {
        port.protocol
            .get_or_insert_with(|| DEFAULT_PORT_PROTOCOL.to_string());
    }

    for probe in [
        &mut container.liveness_probe,
        &mut container.readiness_probe,
        &mut container.startup_probe,
    ]
    .into_iter()
    .flatten()
    {
        probe.timeout_seconds.get_or_insert(DEFAULT_PROBE_TIMEOUT_SECONDS);
        probe.period_seconds.get_or_insert(DEFAULT_PROBE_PERIOD_SECONDS);
        probe.success_threshold.get_or_insert(DEFAULT_PROBE_SUCCESS_THRESHOLD);
        probe.failure_threshold.get_or_insert(DEFAULT_PROBE_FAILURE_THRESHOLD);
        if let Some(http_get) = &mut probe.http_get {
            http_get.scheme.get_or_insert_with(|| DEFAULT_HTTP_SCHEME.to_string());
            http_get.path.get_or_insert_with(|| DEFAULT_HTTP_PATH.to_string());
        }
    }

    for env in container.env.iter_mut().flatten() {
        if let Some(source) = &mut env.value_from {
            if let Some(field_ref) = &mut source.field_ref {
                apply_field_ref_defaults(field_ref);
            }
            if let Some(resource_ref) = &mut source.resource_field_ref {
                apply_resource_ref_defaults(resource_ref);
            }
        }
    }
}

fn apply_volume_defaults(volume: &mut k8s::Volume) {
    if let Some(secret) = &mut volume.secret {
        secret.default_mode.get_or_insert(DEFAULT_FILE_MODE);
    }
    if let Some(config_map) = &mut volume.config_map {
        config_map.default_mode.get_or_insert(DEFAULT_FILE_MODE);
    }
    if let Some(downward) = &mut volume.downward_api {
        downward.default_mode.get_or_insert(DEFAULT_FILE_MODE);
        downward.items.iter_mut().flatten().for_each(apply_downward_file_defaults);
    }
    if let Some(projected) = &mut volume.projected {
        projected.default_mode.get_or_insert(DEFAULT_FILE_MODE);
        for source in projected.sources.iter_mut().flatten() {
            if let Some(downward) = &mut source.downward_api {
                downward.items.iter_mut().flatten().for_each(apply_downward_file_defaults);
            }
        }
    }
    if let Some(host_path) = &mut volume.host_path {
        host_path.type_.get_or_insert_with(String::new);
    }
    if let Some(template) = volume
        .ephemeral
        .as_mut()
        .and_then(|e| e.volume_claim_template.as_mut())
    {
        template
            .spec
            .volume_mode
            .get_or_insert_with(|| DEFAULT_VOLUME_MODE.to_string());
    }
}

fn apply_downward_file_defaults(file: &mut k8s::DownwardAPIVolumeFile) {
    if let Some(field_ref) = &mut file.field_ref {
        apply_field_ref_defaults(field_ref);
    }
    if let Some(resource_ref) = &mut file.resource_field_ref {
        apply_resource_ref_defaults(resource_ref);
    }
}

fn apply_field_ref_defaults(field_ref: &mut k8s::ObjectFieldSelector) {
    field_ref
        .api_version
        .get_or_insert_with(|| DEFAULT_FIELD_REF_API_VERSION.to_string());
}

fn apply_resource_ref_defaults(resource_ref: &mut k8s::ResourceFieldSelector) {
    resource_ref
        .divisor
        .get_or_insert_with(|| K8sQuantity("1".to_string()));
}

fn token_volume_for(name: &str) -> k8s::Volume {
    k8s::Volume {
        name: name.to_string(),
        projected: Some(k8s::ProjectedVolumeSource {
            default_mode: Some(DEFAULT_FILE_MODE),
            sources: Some(vec![
                k8s::VolumeProjection {
                    service_account_token: Some(k8s::ServiceAccountTokenProjection {
                        audience: None,
                        expiration_seconds: Some(3607),
                        path: "token".to_string(),
                    }),
                    ..Default::default()
                },
                k8s::VolumeProjection {
                    config_map: Some(k8s::ConfigMapProjection {
                        name: "kube-root-ca.crt".to_string(),
                        items: Some(vec![k8s::KeyToPath {
                            key: "ca.crt".to_string(),
                            path: "ca.crt".to_string(),
                            mode: None,
                        }]),
                        optional: None,
                    }),
                    ..Default::default()
                },
                k8s::VolumeProjection {
                    downward_api: Some(k8s::DownwardAPIProjection {
                        items: Some(vec![k8s::DownwardAPIVolumeFile {
                            path: "namespace".to_string(),
                            field_ref: Some(k8s::ObjectFieldSelector {
                                api_version: Some(DEFAULT_FIELD_REF_API_VERSION.to_string()),
                                field_path: "metadata.namespace".to_string(),
                            }),
                            resource_field_ref: None,
                            mode: None,
                        }]),
                    }),
                    ..Default::default()
                },
            ]),
        }),
        ..Default::default()
    }
}

/// Clear a field the prior request left unset when it holds the server default
fn clear_default<T: PartialEq>(live: &mut Option<T>, prior: &Option<T>, default: T) {
    if prior.is_none() && live.as_ref() == Some(&default) {
        *live = None;
    }
}

/// Remove server-populated values from a flattened spec
pub fn suppress_server_defaults(live: &mut schema::PodSpec, prior: &schema::PodSpec) {
    if prior.metadata.namespace.is_none()
        && live.metadata.namespace.as_deref() == Some(DEFAULT_NAMESPACE)
    {
        live.metadata.namespace = None;
    }

    clear_default(&mut live.restart_policy, &prior.restart_policy, DEFAULT_RESTART_POLICY);
    clear_default(
        &mut live.termination_grace_period_seconds,
        &prior.termination_grace_period_seconds,
        DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS,
    );
    clear_default(
        &mut live.scheduler_name,
        &prior.scheduler_name,
        DEFAULT_SCHEDULER_NAME.to_string(),
    );
    clear_default(
        &mut live.service_account_name,
        &prior.service_account_name,
        DEFAULT_SERVICE_ACCOUNT_NAME.to_string(),
    );
    clear_default(&mut live.dns_policy, &prior.dns_policy, DEFAULT_DNS_POLICY);
    clear_default(&mut live.enable_service_links, &prior.enable_service_links, true);
    clear_default(
        &mut live.security_context,
        &prior.security_context,
        schema::PodSecurityContext::default(),
    );

    for default in default_tolerations() {
        if !prior.tolerations.contains(&default) {
            live.tolerations.retain(|t| *t != default);
        }
    }

    suppress_containers(&mut live.init_containers, &prior.init_containers);
    suppress_containers(&mut live.containers, &prior.containers);

    for volume in &mut live.volumes {
        if let Some(prior_volume) = prior.volumes.iter().find(|v| v.name == volume.name) {
            suppress_volume(&mut volume.source, &prior_volume.source);
        }
    }
}

fn suppress_containers(live: &mut [schema::Container], prior: &[schema::Container]) {
    for container in live {
        if let Some(prior_container) = prior.iter().find(|c| c.name == container.name) {
            suppress_container(container, prior_container);
        }
    }
}

fn suppress_container(live: &mut schema::Container, prior: &schema::Container) {
    clear_default(
        &mut live.termination_message_policy,
        &prior.termination_message_policy,
        TerminationMessagePolicy::File,
    );
    let pull_policy = default_pull_policy(&live.image);
    clear_default(&mut live.image_pull_policy, &prior.image_pull_policy, pull_policy);

    if let Some(resources) = &mut live.resources {
        let prior_requests = prior.resources.as_ref().map(|r| &r.requests);
        let limits = resources.limits.clone();
        resources.requests.retain(|name, request| {
            let declared = prior_requests.is_some_and(|r| r.contains_key(name));
            declared || limits.get(name) != Some(&*request)
        });
    }
    if prior.resources.is_none() && live.resources.as_ref().is_some_and(|r| r.is_empty()) {
        live.resources = None;
    }

    for port in &mut live.ports {
        let prior_port = prior
            .ports
            .iter()
            .find(|p| p.container_port == port.container_port);
        if let Some(prior_port) = prior_port {
            clear_default(
                &mut port.protocol,
                &prior_port.protocol,
                DEFAULT_PORT_PROTOCOL.to_string(),
            );
        }
    }

    for (probe, prior_probe) in [
        (&mut live.liveness_probe, &prior.liveness_probe),
        (&mut live.readiness_probe, &prior.readiness_probe),
        (&mut live.startup_probe, &prior.startup_probe),
    ] {
        if let (Some(probe), Some(prior_probe)) = (probe, prior_probe) {
            suppress_probe(probe, prior_probe);
        }
    }

    for env in &mut live.env {
        let prior_source = prior
            .env
            .iter()
            .find(|e| e.name == env.name)
            .and_then(|e| e.value_from.as_ref());
        match (&mut env.value_from, prior_source) {
            (
                Some(schema::EnvVarSource::FieldRef(sel)),
                Some(schema::EnvVarSource::FieldRef(prior_sel)),
            ) => suppress_field_ref(sel, prior_sel),
            (
                Some(schema::EnvVarSource::ResourceFieldRef(sel)),
                Some(schema::EnvVarSource::ResourceFieldRef(prior_sel)),
            ) => suppress_resource_ref(sel, prior_sel),
            _ => {}
        }
    }
}

fn suppress_probe(live: &mut schema::Probe, prior: &schema::Probe) {
    clear_default(&mut live.timeout_seconds, &prior.timeout_seconds, DEFAULT_PROBE_TIMEOUT_SECONDS);
    clear_default(&mut live.period_seconds, &prior.period_seconds, DEFAULT_PROBE_PERIOD_SECONDS);
    clear_default(
        &mut live.success_threshold,
        &prior.success_threshold,
        DEFAULT_PROBE_SUCCESS_THRESHOLD,
    );
    clear_default(
        &mut live.failure_threshold,
        &prior.failure_threshold,
        DEFAULT_PROBE_FAILURE_THRESHOLD,
    );
    if let (schema::ProbeHandler::HttpGet(action), schema::ProbeHandler::HttpGet(prior_action)) =
        (&mut live.handler, &prior.handler)
    {
        clear_default(&mut action.scheme, &prior_action.scheme, DEFAULT_HTTP_SCHEME.to_string());
        clear_default(&mut action.path, &prior_action.path, DEFAULT_HTTP_PATH.to_string());
    }
}

fn suppress_field_ref(live: &mut schema::ObjectFieldSelector, prior: &schema::ObjectFieldSelector) {
    clear_default(
        &mut live.api_version,
        &prior.api_version,
        DEFAULT_FIELD_REF_API_VERSION.to_string(),
    );
}

fn suppress_resource_ref(
    live: &mut schema::ResourceFieldSelector,
    prior: &schema::ResourceFieldSelector,
) {
    clear_default(&mut live.divisor, &prior.divisor, Quantity::from_millis(1000));
}

fn suppress_volume(live: &mut schema::VolumeSource, prior: &schema::VolumeSource) {
    let file_mode = schema::FileMode(DEFAULT_FILE_MODE);
    match (live, prior) {
        (schema::VolumeSource::Secret(l), schema::VolumeSource::Secret(p)) => {
            clear_default(&mut l.default_mode, &p.default_mode, file_mode)
        }
        (schema::VolumeSource::ConfigMap(l), schema::VolumeSource::ConfigMap(p)) => {
            clear_default(&mut l.default_mode, &p.default_mode, file_mode)
        }
        (schema::VolumeSource::DownwardApi(l), schema::VolumeSource::DownwardApi(p)) => {
            clear_default(&mut l.default_mode, &p.default_mode, file_mode);
            suppress_downward_files(&mut l.items, &p.items);
        }
        (schema::VolumeSource::Projected(l), schema::VolumeSource::Projected(p)) => {
            clear_default(&mut l.default_mode, &p.default_mode, file_mode);
            for (source, prior_source) in l.sources.iter_mut().zip(&p.sources) {
                if let (
                    schema::VolumeProjection::DownwardApi(d),
                    schema::VolumeProjection::DownwardApi(prior_d),
                ) = (source, prior_source)
                {
                    suppress_downward_files(&mut d.items, &prior_d.items);
                }
            }
        }
        (schema::VolumeSource::HostPath(l), schema::VolumeSource::HostPath(p)) => {
            clear_default(&mut l.type_, &p.type_, String::new())
        }
        (schema::VolumeSource::Ephemeral(l), schema::VolumeSource::Ephemeral(p)) => clear_default(
            &mut l.spec.volume_mode,
            &p.spec.volume_mode,
            DEFAULT_VOLUME_MODE.to_string(),
        ),
        _ => {}
    }
}

fn suppress_downward_files(live: &mut [schema::DownwardApiFile], prior: &[schema::DownwardApiFile]) {
    for file in live {
        let Some(prior_file) = prior.iter().find(|f| f.path == file.path) else {
            continue;
        };
        if let (Some(sel), Some(prior_sel)) = (&mut file.field_ref, &prior_file.field_ref) {
            suppress_field_ref(sel, prior_sel);
        }
        if let (Some(sel), Some(prior_sel)) =
            (&mut file.resource_field_ref, &prior_file.resource_field_ref)
        {
            suppress_resource_ref(sel, prior_sel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pull_policy() {
        assert_eq!(default_pull_policy("nginx"), PullPolicy::Always);
        assert_eq!(default_pull_policy("nginx:latest"), PullPolicy::Always);
        assert_eq!(default_pull_policy("nginx:1.27"), PullPolicy::IfNotPresent);
        assert_eq!(default_pull_policy("localhost:5000/nginx"), PullPolicy::Always);
        assert_eq!(default_pull_policy("localhost:5000/nginx:1.0"), PullPolicy::IfNotPresent);
        assert_eq!(default_pull_policy("nginx@sha256:abcd"), PullPolicy::IfNotPresent);
    }

    #[test]
    fn test_injected_volume_names() {
        assert!(is_injected_volume("kube-api-access-x7f2k"));
        assert!(is_injected_volume("default-token-abcde"));
        assert!(!is_injected_volume("config"));
    }

    #[test]
    fn test_apply_server_defaults() {
        let spec = schema::PodSpec::from_yaml(
            r#"
metadata: {name: p}
containers:
  - name: c
    image: nginx:1.27
    resources:
      limits: {cpu: 500m}
    ports: [{containerPort: 80}]
"#,
        )
        .unwrap();
        let mut pod = crate::expand(&spec);
        apply_server_defaults(&mut pod, Some("kube-api-access-abcde"));

        let pod_spec = pod.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Always"));
        assert_eq!(pod_spec.termination_grace_period_seconds, Some(30));
        assert_eq!(pod_spec.tolerations.as_ref().map(Vec::len), Some(2));
        let container = &pod_spec.containers[0];
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(container.ports.as_ref().unwrap()[0].protocol.as_deref(), Some("TCP"));
        let requests = container.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["cpu"].0, "500m");
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, SERVICE_ACCOUNT_MOUNT_PATH);
        assert_eq!(pod_spec.volumes.unwrap()[0].name, "kube-api-access-abcde");
    }

    #[test]
    fn test_no_token_volume_when_automount_disabled() {
        let spec = schema::PodSpec::from_yaml(
            "metadata: {name: p}\nautomountServiceAccountToken: false\ncontainers: [{name: c, image: i}]\n",
        )
        .unwrap();
        let mut pod = crate::expand(&spec);
        apply_server_defaults(&mut pod, Some("kube-api-access-abcde"));
        let pod_spec = pod.spec.unwrap();
        assert!(pod_spec.volumes.is_none());
        assert!(pod_spec.containers[0].volume_mounts.is_none());
    }

    #[test]
    fn test_suppress_keeps_declared_values() {
        let prior = schema::PodSpec::from_yaml(
            "metadata: {name: p}\nrestartPolicy: Always\ncontainers: [{name: c, image: i}]\n",
        )
        .unwrap();
        let mut live = prior.clone();
        live.metadata.namespace = Some("default".to_string());
        live.scheduler_name = Some("default-scheduler".to_string());
        suppress_server_defaults(&mut live, &prior);
        assert_eq!(live, prior);
    }

    #[test]
    fn test_suppress_keeps_drift_from_non_default_values() {
        let prior =
            schema::PodSpec::from_yaml("metadata: {name: p}\ncontainers: [{name: c, image: i}]\n").unwrap();
        let mut live = prior.clone();
        live.restart_policy = Some(RestartPolicy::Never);
        suppress_server_defaults(&mut live, &prior);
        assert_eq!(live.restart_policy, Some(RestartPolicy::Never));
    }
}
