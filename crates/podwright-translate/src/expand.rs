//! Schema model to cluster object
//!
//! Expansion is total: it runs on a spec that already passed validation.
//! Ordered sequences keep declaration order, empty sequences and maps are
//! omitted, and an explicitly empty block becomes a present-but-empty
//! substructure.

use k8s_openapi::api::core::v1 as k8s;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use podwright_core::{Pod, Quantity, DEFAULT_NAMESPACE};
use podwright_schema as schema;
use std::collections::BTreeMap;

/// Expand a validated spec into the cluster-native pod object
pub fn expand(spec: &schema::PodSpec) -> Pod {
    let meta = &spec.metadata;
    Pod {
        metadata: ObjectMeta {
            name: Some(meta.name.clone()),
            namespace: Some(
                meta.namespace
                    .clone()
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            ),
            labels: opt_map(&meta.labels),
            annotations: opt_map(&meta.annotations),
            ..Default::default()
        },
        spec: Some(k8s::PodSpec {
            containers: spec.containers.iter().map(expand_container).collect(),
            init_containers: opt_vec(&spec.init_containers, expand_container),
            volumes: opt_vec(&spec.volumes, expand_volume),
            security_context: spec.security_context.as_ref().map(expand_pod_security_context),
            scheduler_name: spec.scheduler_name.clone(),
            service_account_name: spec.service_account_name.clone(),
            automount_service_account_token: spec.automount_service_account_token,
            node_selector: opt_map(&spec.node_selector),
            restart_policy: spec.restart_policy.map(|p| p.as_str().to_string()),
            termination_grace_period_seconds: spec.termination_grace_period_seconds,
            active_deadline_seconds: spec.active_deadline_seconds,
            readiness_gates: opt_vec(&spec.readiness_gates, |g| k8s::PodReadinessGate {
                condition_type: g.condition_type.clone(),
            }),
            topology_spread_constraints: opt_vec(&spec.topology_spread_constraints, |c| {
                k8s::TopologySpreadConstraint {
                    max_skew: c.max_skew,
                    topology_key: c.topology_key.clone(),
                    when_unsatisfiable: c.when_unsatisfiable.as_str().to_string(),
                    label_selector: c.label_selector.as_ref().map(|s| LabelSelector {
                        match_labels: opt_map(&s.match_labels),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            }),
            tolerations: opt_vec(&spec.tolerations, expand_toleration),
            runtime_class_name: spec.runtime_class_name.clone(),
            enable_service_links: spec.enable_service_links,
            priority_class_name: spec.priority_class_name.clone(),
            dns_policy: spec.dns_policy.map(|p| p.as_str().to_string()),
            host_network: spec.host_network,
            image_pull_secrets: opt_vec(&spec.image_pull_secrets, expand_local_ref),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn expand_toleration(t: &schema::Toleration) -> k8s::Toleration {
    k8s::Toleration {
        key: t.key.clone(),
        operator: t.operator.clone(),
        value: t.value.clone(),
        effect: t.effect.clone(),
        toleration_seconds: t.toleration_seconds,
    }
}

fn expand_container(c: &schema::Container) -> k8s::Container {
    k8s::Container {
        name: c.name.clone(),
        image: Some(c.image.clone()),
        image_pull_policy: c.image_pull_policy.map(|p| p.as_str().to_string()),
        command: opt_vec(&c.command, Clone::clone),
        args: opt_vec(&c.args, Clone::clone),
        working_dir: c.working_dir.clone(),
        ports: opt_vec(&c.ports, |p| k8s::ContainerPort {
            container_port: p.container_port,
            name: p.name.clone(),
            protocol: p.protocol.clone(),
            host_port: p.host_port,
            ..Default::default()
        }),
        env: opt_vec(&c.env, expand_env_var),
        env_from: opt_vec(&c.env_from, |e| k8s::EnvFromSource {
            prefix: e.prefix.clone(),
            config_map_ref: e.config_map_ref.as_ref().map(|r| k8s::ConfigMapEnvSource {
                name: r.name.clone(),
                optional: r.optional,
            }),
            secret_ref: e.secret_ref.as_ref().map(|r| k8s::SecretEnvSource {
                name: r.name.clone(),
                optional: r.optional,
            }),
        }),
        resources: c.resources.as_ref().map(|r| k8s::ResourceRequirements {
            limits: opt_quantities(&r.limits),
            requests: opt_quantities(&r.requests),
            ..Default::default()
        }),
        volume_mounts: opt_vec(&c.volume_mounts, |m| k8s::VolumeMount {
            name: m.name.clone(),
            mount_path: m.mount_path.clone(),
            sub_path: m.sub_path.clone(),
            read_only: m.read_only,
            mount_propagation: m.mount_propagation.map(|p| p.as_str().to_string()),
            ..Default::default()
        }),
        liveness_probe: c.liveness_probe.as_ref().map(expand_probe),
        readiness_probe: c.readiness_probe.as_ref().map(expand_probe),
        startup_probe: c.startup_probe.as_ref().map(expand_probe),
        lifecycle: c.lifecycle.as_ref().map(|l| k8s::Lifecycle {
            post_start: l.post_start.as_ref().map(expand_lifecycle_handler),
            pre_stop: l.pre_stop.as_ref().map(expand_lifecycle_handler),
        }),
        security_context: c.security_context.as_ref().map(expand_security_context),
        termination_message_policy: c.termination_message_policy.map(|p| p.as_str().to_string()),
        ..Default::default()
    }
}

fn expand_env_var(e: &schema::EnvVar) -> k8s::EnvVar {
    let value_from = e.value_from.as_ref().map(|source| match source {
        schema::EnvVarSource::SecretKeyRef(sel) => k8s::EnvVarSource {
            secret_key_ref: Some(k8s::SecretKeySelector {
                name: sel.name.clone(),
                key: sel.key.clone(),
                optional: sel.optional,
            }),
            ..Default::default()
        },
        schema::EnvVarSource::ConfigMapKeyRef(sel) => k8s::EnvVarSource {
            config_map_key_ref: Some(k8s::ConfigMapKeySelector {
                name: sel.name.clone(),
                key: sel.key.clone(),
                optional: sel.optional,
            }),
            ..Default::default()
        },
        schema::EnvVarSource::FieldRef(sel) => k8s::EnvVarSource {
            field_ref: Some(expand_field_selector(sel)),
            ..Default::default()
        },
        schema::EnvVarSource::ResourceFieldRef(sel) => k8s::EnvVarSource {
            resource_field_ref: Some(expand_resource_field_selector(sel)),
            ..Default::default()
        },
    });

    k8s::EnvVar {
        name: e.name.clone(),
        value: e.value.clone(),
        value_from,
    }
}

fn expand_field_selector(sel: &schema::ObjectFieldSelector) -> k8s::ObjectFieldSelector {
    k8s::ObjectFieldSelector {
        field_path: sel.field_path.clone(),
        api_version: sel.api_version.clone(),
    }
}

fn expand_resource_field_selector(sel: &schema::ResourceFieldSelector) -> k8s::ResourceFieldSelector {
    k8s::ResourceFieldSelector {
        container_name: sel.container_name.clone(),
        resource: sel.resource.clone(),
        divisor: sel.divisor.as_ref().map(Quantity::to_k8s),
    }
}

fn expand_probe(p: &schema::Probe) -> k8s::Probe {
    let mut probe = k8s::Probe {
        initial_delay_seconds: p.initial_delay_seconds,
        period_seconds: p.period_seconds,
        timeout_seconds: p.timeout_seconds,
        success_threshold: p.success_threshold,
        failure_threshold: p.failure_threshold,
        ..Default::default()
    };
    match &p.handler {
        schema::ProbeHandler::Exec(exec) => probe.exec = Some(expand_exec(exec)),
        schema::ProbeHandler::HttpGet(action) => probe.http_get = Some(expand_http_get(action)),
        schema::ProbeHandler::TcpSocket(action) => probe.tcp_socket = Some(expand_tcp_socket(action)),
        schema::ProbeHandler::Grpc(action) => {
            probe.grpc = Some(k8s::GRPCAction {
                port: action.port,
                service: action.service.clone(),
            })
        }
    }
    probe
}

fn expand_lifecycle_handler(h: &schema::LifecycleHandler) -> k8s::LifecycleHandler {
    match h {
        schema::LifecycleHandler::Exec(exec) => k8s::LifecycleHandler {
            exec: Some(expand_exec(exec)),
            ..Default::default()
        },
        schema::LifecycleHandler::HttpGet(action) => k8s::LifecycleHandler {
            http_get: Some(expand_http_get(action)),
            ..Default::default()
        },
        schema::LifecycleHandler::TcpSocket(action) => k8s::LifecycleHandler {
            tcp_socket: Some(expand_tcp_socket(action)),
            ..Default::default()
        },
    }
}

fn expand_exec(exec: &schema::ExecAction) -> k8s::ExecAction {
    k8s::ExecAction {
        command: Some(exec.command.clone()),
    }
}

fn expand_http_get(action: &schema::HttpGetAction) -> k8s::HTTPGetAction {
    k8s::HTTPGetAction {
        path: action.path.clone(),
        port: expand_port(&action.port),
        host: action.host.clone(),
        scheme: action.scheme.clone(),
        http_headers: opt_vec(&action.http_headers, |h| k8s::HTTPHeader {
            name: h.name.clone(),
            value: h.value.clone(),
        }),
    }
}

fn expand_tcp_socket(action: &schema::TcpSocketAction) -> k8s::TCPSocketAction {
    k8s::TCPSocketAction {
        port: expand_port(&action.port),
        host: action.host.clone(),
    }
}

fn expand_port(port: &schema::PortRef) -> IntOrString {
    match port {
        schema::PortRef::Number(n) => IntOrString::Int(*n),
        schema::PortRef::Name(name) => IntOrString::String(name.clone()),
    }
}

fn expand_security_context(s: &schema::SecurityContext) -> k8s::SecurityContext {
    k8s::SecurityContext {
        privileged: s.privileged,
        allow_privilege_escalation: s.allow_privilege_escalation,
        read_only_root_filesystem: s.read_only_root_filesystem,
        run_as_user: s.run_as_user,
        run_as_group: s.run_as_group,
        run_as_non_root: s.run_as_non_root,
        capabilities: s.capabilities.as_ref().map(|c| k8s::Capabilities {
            add: opt_vec(&c.add, Clone::clone),
            drop: opt_vec(&c.drop, Clone::clone),
        }),
        se_linux_options: s.se_linux_options.as_ref().map(expand_se_linux),
        seccomp_profile: s.seccomp_profile.as_ref().map(expand_seccomp),
        ..Default::default()
    }
}

fn expand_pod_security_context(s: &schema::PodSecurityContext) -> k8s::PodSecurityContext {
    k8s::PodSecurityContext {
        fs_group: s.fs_group,
        fs_group_change_policy: s.fs_group_change_policy.map(|p| p.as_str().to_string()),
        run_as_user: s.run_as_user,
        run_as_group: s.run_as_group,
        run_as_non_root: s.run_as_non_root,
        supplemental_groups: opt_vec(&s.supplemental_groups, |g| *g),
        se_linux_options: s.se_linux_options.as_ref().map(expand_se_linux),
        seccomp_profile: s.seccomp_profile.as_ref().map(expand_seccomp),
        sysctls: opt_vec(&s.sysctls, |s| k8s::Sysctl {
            name: s.name.clone(),
            value: s.value.clone(),
        }),
        ..Default::default()
    }
}

fn expand_se_linux(o: &schema::SeLinuxOptions) -> k8s::SELinuxOptions {
    k8s::SELinuxOptions {
        level: o.level.clone(),
        role: o.role.clone(),
        type_: o.type_.clone(),
        user: o.user.clone(),
    }
}

fn expand_seccomp(p: &schema::SeccompProfile) -> k8s::SeccompProfile {
    k8s::SeccompProfile {
        type_: p.type_.as_str().to_string(),
        localhost_profile: p.localhost_profile.clone(),
    }
}

fn expand_volume(v: &schema::Volume) -> k8s::Volume {
    let mut volume = k8s::Volume {
        name: v.name.clone(),
        ..Default::default()
    };
    match &v.source {
        schema::VolumeSource::Secret(s) => {
            volume.secret = Some(k8s::SecretVolumeSource {
                secret_name: Some(s.secret_name.clone()),
                items: opt_vec(&s.items, expand_key_to_path),
                default_mode: s.default_mode.map(|m| m.bits()),
                optional: s.optional,
            })
        }
        schema::VolumeSource::ConfigMap(c) => {
            volume.config_map = Some(k8s::ConfigMapVolumeSource {
                name: c.name.clone(),
                items: opt_vec(&c.items, expand_key_to_path),
                default_mode: c.default_mode.map(|m| m.bits()),
                optional: c.optional,
            })
        }
        schema::VolumeSource::EmptyDir(e) => {
            volume.empty_dir = Some(k8s::EmptyDirVolumeSource {
                medium: e.medium.clone(),
                size_limit: e.size_limit.as_ref().map(Quantity::to_k8s),
            })
        }
        schema::VolumeSource::Csi(c) => {
            volume.csi = Some(k8s::CSIVolumeSource {
                driver: c.driver.clone(),
                read_only: c.read_only,
                fs_type: c.fs_type.clone(),
                volume_attributes: opt_map(&c.volume_attributes),
                node_publish_secret_ref: c.node_publish_secret_ref.as_ref().map(expand_local_ref),
            })
        }
        schema::VolumeSource::Projected(p) => {
            volume.projected = Some(k8s::ProjectedVolumeSource {
                default_mode: p.default_mode.map(|m| m.bits()),
                sources: Some(p.sources.iter().map(expand_projection).collect()),
            })
        }
        schema::VolumeSource::Ephemeral(e) => {
            volume.ephemeral = Some(k8s::EphemeralVolumeSource {
                volume_claim_template: Some(k8s::PersistentVolumeClaimTemplate {
                    metadata: e.metadata.as_ref().map(|m| ObjectMeta {
                        labels: opt_map(&m.labels),
                        annotations: opt_map(&m.annotations),
                        ..Default::default()
                    }),
                    spec: k8s::PersistentVolumeClaimSpec {
                        access_modes: opt_vec(&e.spec.access_modes, Clone::clone),
                        storage_class_name: e.spec.storage_class_name.clone(),
                        volume_mode: e.spec.volume_mode.clone(),
                        resources: Some(k8s::VolumeResourceRequirements {
                            limits: opt_quantities(&e.spec.resources.limits),
                            requests: opt_quantities(&e.spec.resources.requests),
                        }),
                        ..Default::default()
                    },
                }),
            })
        }
        schema::VolumeSource::HostPath(h) => {
            volume.host_path = Some(k8s::HostPathVolumeSource {
                path: h.path.clone(),
                type_: h.type_.clone(),
            })
        }
        schema::VolumeSource::PersistentVolumeClaim(p) => {
            volume.persistent_volume_claim = Some(k8s::PersistentVolumeClaimVolumeSource {
                claim_name: p.claim_name.clone(),
                read_only: p.read_only,
            })
        }
        schema::VolumeSource::DownwardApi(d) => {
            volume.downward_api = Some(k8s::DownwardAPIVolumeSource {
                items: opt_vec(&d.items, expand_downward_file),
                default_mode: d.default_mode.map(|m| m.bits()),
            })
        }
    }
    volume
}

fn expand_projection(p: &schema::VolumeProjection) -> k8s::VolumeProjection {
    match p {
        schema::VolumeProjection::ConfigMap(c) => k8s::VolumeProjection {
            config_map: Some(k8s::ConfigMapProjection {
                name: c.name.clone(),
                items: opt_vec(&c.items, expand_key_to_path),
                optional: c.optional,
            }),
            ..Default::default()
        },
        schema::VolumeProjection::Secret(s) => k8s::VolumeProjection {
            secret: Some(k8s::SecretProjection {
                name: s.name.clone(),
                items: opt_vec(&s.items, expand_key_to_path),
                optional: s.optional,
            }),
            ..Default::default()
        },
        schema::VolumeProjection::DownwardApi(d) => k8s::VolumeProjection {
            downward_api: Some(k8s::DownwardAPIProjection {
                items: opt_vec(&d.items, expand_downward_file),
            }),
            ..Default::default()
        },
        schema::VolumeProjection::ServiceAccountToken(t) => k8s::VolumeProjection {
            service_account_token: Some(k8s::ServiceAccountTokenProjection {
                audience: t.audience.clone(),
                expiration_seconds: t.expiration_seconds,
                path: t.path.clone(),
            }),
            ..Default::default()
        },
    }
}

fn expand_key_to_path(k: &schema::KeyToPath) -> k8s::KeyToPath {
    k8s::KeyToPath {
        key: k.key.clone(),
        path: k.path.clone(),
        mode: k.mode.map(|m| m.bits()),
    }
}

fn expand_downward_file(f: &schema::DownwardApiFile) -> k8s::DownwardAPIVolumeFile {
    k8s::DownwardAPIVolumeFile {
        path: f.path.clone(),
        field_ref: f.field_ref.as_ref().map(expand_field_selector),
        resource_field_ref: f.resource_field_ref.as_ref().map(expand_resource_field_selector),
        mode: f.mode.map(|m| m.bits()),
    }
}

fn expand_local_ref(r: &schema::LocalObjectReference) -> k8s::LocalObjectReference {
    k8s::LocalObjectReference {
        name: r.name.clone(),
    }
}

fn opt_vec<T, U>(items: &[T], f: impl FnMut(&T) -> U) -> Option<Vec<U>> {
    if items.is_empty() {
        None
    } else {
        Some(items.iter().map(f).collect())
    }
}

fn opt_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

fn opt_quantities(map: &BTreeMap<String, Quantity>) -> Option<BTreeMap<String, K8sQuantity>> {
    if map.is_empty() {
        None
    } else {
        Some(map.iter().map(|(k, v)| (k.clone(), v.to_k8s())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> schema::PodSpec {
        schema::PodSpec::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_expand_minimal() {
        let pod = expand(&spec("metadata: {name: nginx}\ncontainers: [{name: nginx, image: nginx:1.27}]\n"));
        assert_eq!(pod.metadata.name.as_deref(), Some("nginx"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
        assert!(pod.metadata.labels.is_none());

        let pod_spec = pod.spec.unwrap();
        assert_eq!(pod_spec.containers.len(), 1);
        assert_eq!(pod_spec.containers[0].image.as_deref(), Some("nginx:1.27"));
        assert!(pod_spec.containers[0].args.is_none());
        assert!(pod_spec.restart_policy.is_none());
        assert!(pod_spec.volumes.is_none());
    }

    #[test]
    fn test_expand_keeps_declaration_order() {
        let pod = expand(&spec(
            r#"
metadata: {name: p}
containers:
  - {name: zeta, image: a, args: ["-b", "-a"]}
  - {name: alpha, image: b}
"#,
        ));
        let containers = pod.spec.unwrap().containers;
        assert_eq!(containers[0].name, "zeta");
        assert_eq!(containers[1].name, "alpha");
        assert_eq!(containers[0].args.as_deref(), Some(&["-b".to_string(), "-a".to_string()][..]));
    }

    #[test]
    fn test_expand_empty_resources_block_is_present() {
        let pod = expand(&spec("metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {}}]\n"));
        let resources = pod.spec.unwrap().containers[0].resources.clone().unwrap();
        assert!(resources.limits.is_none());
        assert!(resources.requests.is_none());
    }

    #[test]
    fn test_expand_canonicalises_quantities() {
        let pod = expand(&spec(
            "metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {limits: {cpu: \"0.5\", memory: 1024Mi}}}]\n",
        ));
        let limits = pod.spec.unwrap().containers[0]
            .resources
            .clone()
            .unwrap()
            .limits
            .unwrap();
        assert_eq!(limits["cpu"].0, "500m");
        assert_eq!(limits["memory"].0, "1Gi");
    }

    #[test]
    fn test_expand_polymorphic_variants() {
        let pod = expand(&spec(
            r#"
metadata: {name: p}
containers:
  - name: c
    image: i
    readinessProbe:
      grpc: {port: 9000}
    env:
      - name: POD_NAME
        valueFrom:
          fieldRef: {fieldPath: metadata.name}
volumes:
  - name: cfg
    configMap: {name: settings, defaultMode: "0777"}
  - name: scratch
    emptyDir: {medium: Memory, sizeLimit: 1Gi}
"#,
        ));
        let pod_spec = pod.spec.unwrap();
        let container = &pod_spec.containers[0];
        assert_eq!(container.readiness_probe.as_ref().unwrap().grpc.as_ref().unwrap().port, 9000);
        let env = &container.env.as_ref().unwrap()[0];
        assert_eq!(
            env.value_from.as_ref().unwrap().field_ref.as_ref().unwrap().field_path,
            "metadata.name"
        );

        let volumes = pod_spec.volumes.unwrap();
        assert_eq!(volumes[0].config_map.as_ref().unwrap().default_mode, Some(0o777));
        assert!(volumes[0].secret.is_none());
        let empty_dir = volumes[1].empty_dir.as_ref().unwrap();
        assert_eq!(empty_dir.size_limit.as_ref().unwrap().0, "1Gi");
    }
}
