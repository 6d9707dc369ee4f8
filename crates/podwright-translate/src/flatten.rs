//! Cluster object back to the schema model

use crate::defaults::{is_injected_volume, suppress_server_defaults, SERVICE_ACCOUNT_MOUNT_PATH};
use k8s_openapi::api::core::v1 as k8s;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use podwright_core::{Pod, PodwrightError, Quantity, Result};
use podwright_schema as schema;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use tracing::debug;

/// Map a live pod onto the schema model
///
/// Server-computed fields (uid, resourceVersion, generation, status) have no
/// counterpart in the schema and are dropped. Injected service-account token
/// volumes and their mounts are filtered unless `prior` declares them. With
/// a `prior` request, values the server defaulted for fields the request
/// left unset are removed as well.
pub fn flatten(pod: &Pod, prior: Option<&schema::PodSpec>) -> Result<schema::PodSpec> {
    let object = object_name(pod);
    let name = pod
        .metadata
        .name
        .clone()
        .ok_or_else(|| PodwrightError::translation_failed(&object, "pod has no name"))?;
    let pod_spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| PodwrightError::translation_failed(&object, "pod has no spec"))?;
    let cx = Cx { object: &object };

    let declared_volumes: HashSet<&str> = prior
        .map(|p| p.volumes.iter().map(|v| v.name.as_str()).collect())
        .unwrap_or_default();
    let injected: HashSet<&str> = pod_spec
        .volumes
        .iter()
        .flatten()
        .map(|v| v.name.as_str())
        .filter(|name| is_injected_volume(name) && !declared_volumes.contains(name))
        .collect();
    if !injected.is_empty() {
        debug!("Filtering injected volumes {:?} from {}", injected, object);
    }

    let mut spec = schema::PodSpec {
        metadata: schema::Metadata {
            name,
            namespace: pod.metadata.namespace.clone(),
            labels: pod.metadata.labels.clone().unwrap_or_default(),
            annotations: pod.metadata.annotations.clone().unwrap_or_default(),
        },
        containers: pod_spec
            .containers
            .iter()
            .map(|c| cx.container(c, &injected))
            .collect::<Result<_>>()?,
        init_containers: pod_spec
            .init_containers
            .iter()
            .flatten()
            .map(|c| cx.container(c, &injected))
            .collect::<Result<_>>()?,
        volumes: pod_spec
            .volumes
            .iter()
            .flatten()
            .filter(|v| !injected.contains(v.name.as_str()))
            .map(|v| cx.volume(v))
            .collect::<Result<_>>()?,
        security_context: pod_spec
            .security_context
            .as_ref()
            .map(|s| cx.pod_security_context(s))
            .transpose()?,
        scheduler_name: pod_spec.scheduler_name.clone(),
        service_account_name: pod_spec.service_account_name.clone(),
        automount_service_account_token: pod_spec.automount_service_account_token,
        node_selector: pod_spec.node_selector.clone().unwrap_or_default(),
        restart_policy: parse_opt(pod_spec.restart_policy.as_deref())?,
        termination_grace_period_seconds: pod_spec.termination_grace_period_seconds,
        active_deadline_seconds: pod_spec.active_deadline_seconds,
        readiness_gates: pod_spec
            .readiness_gates
            .iter()
            .flatten()
            .map(|g| schema::ReadinessGate {
                condition_type: g.condition_type.clone(),
            })
            .collect(),
        topology_spread_constraints: pod_spec
            .topology_spread_constraints
            .iter()
            .flatten()
            .map(|c| -> Result<schema::TopologySpreadConstraint> {
                Ok(schema::TopologySpreadConstraint {
                    max_skew: c.max_skew,
                    topology_key: c.topology_key.clone(),
                    when_unsatisfiable: c.when_unsatisfiable.parse()?,
                    label_selector: c.label_selector.as_ref().map(|s| schema::LabelSelector {
                        match_labels: s.match_labels.clone().unwrap_or_default(),
                    }),
                })
            })
            .collect::<Result<_>>()?,
        tolerations: pod_spec
            .tolerations
            .iter()
            .flatten()
            .map(|t| schema::Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
        runtime_class_name: pod_spec.runtime_class_name.clone(),
        enable_service_links: pod_spec.enable_service_links,
        priority_class_name: pod_spec.priority_class_name.clone(),
        dns_policy: parse_opt(pod_spec.dns_policy.as_deref())?,
        host_network: pod_spec.host_network,
        image_pull_secrets: pod_spec
            .image_pull_secrets
            .iter()
            .flatten()
            .map(flatten_local_ref)
            .collect(),
    };

    if let Some(prior) = prior {
        suppress_server_defaults(&mut spec, prior);
    }

    Ok(spec)
}

fn object_name(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("<none>"),
        pod.metadata.name.as_deref().unwrap_or("<unnamed>")
    )
}

fn parse_opt<T: FromStr<Err = PodwrightError>>(value: Option<&str>) -> Result<Option<T>> {
    value.map(str::parse).transpose()
}

/// Flattening context, carries the object name for error messages
struct Cx<'a> {
    object: &'a str,
}

impl Cx<'_> {
    fn fail(&self, message: impl Into<String>) -> PodwrightError {
        PodwrightError::translation_failed(self.object, message)
    }

    fn container(&self, c: &k8s::Container, injected: &HashSet<&str>) -> Result<schema::Container> {
        Ok(schema::Container {
            name: c.name.clone(),
            image: c.image.clone().unwrap_or_default(),
            image_pull_policy: parse_opt(c.image_pull_policy.as_deref())?,
            command: c.command.clone().unwrap_or_default(),
            args: c.args.clone().unwrap_or_default(),
            working_dir: c.working_dir.clone(),
            ports: c
                .ports
                .iter()
                .flatten()
                .map(|p| schema::ContainerPort {
                    container_port: p.container_port,
                    name: p.name.clone(),
                    protocol: p.protocol.clone(),
                    host_port: p.host_port,
                })
                .collect(),
            env: c
                .env
                .iter()
                .flatten()
                .map(|e| self.env_var(&c.name, e))
                .collect::<Result<_>>()?,
            env_from: c
                .env_from
                .iter()
                .flatten()
                .map(|e| schema::EnvFromSource {
                    prefix: e.prefix.clone(),
                    config_map_ref: e.config_map_ref.as_ref().map(|r| schema::EnvFromRef {
                        name: r.name.clone(),
                        optional: r.optional,
                    }),
                    secret_ref: e.secret_ref.as_ref().map(|r| schema::EnvFromRef {
                        name: r.name.clone(),
                        optional: r.optional,
                    }),
                })
                .collect(),
            resources: c
                .resources
                .as_ref()
                .map(|r| {
                    Ok::<_, PodwrightError>(schema::ResourceRequirements {
                        limits: quantities(r.limits.as_ref())?,
                        requests: quantities(r.requests.as_ref())?,
                    })
                })
                .transpose()?,
            volume_mounts: c
                .volume_mounts
                .iter()
                .flatten()
                .filter(|m| {
                    !(injected.contains(m.name.as_str()) && m.mount_path == SERVICE_ACCOUNT_MOUNT_PATH)
                })
                .map(|m| -> Result<schema::VolumeMount> {
                    Ok(schema::VolumeMount {
                        name: m.name.clone(),
                        mount_path: m.mount_path.clone(),
                        sub_path: m.sub_path.clone(),
                        read_only: m.read_only,
                        mount_propagation: parse_opt(m.mount_propagation.as_deref())?,
                    })
                })
                .collect::<Result<_>>()?,
            liveness_probe: self.probe(&c.name, c.liveness_probe.as_ref())?,
            readiness_probe: self.probe(&c.name, c.readiness_probe.as_ref())?,
            startup_probe: self.probe(&c.name, c.startup_probe.as_ref())?,
            lifecycle: c
                .lifecycle
                .as_ref()
                .map(|l| {
                    Ok::<_, PodwrightError>(schema::Lifecycle {
                        post_start: l
                            .post_start
                            .as_ref()
                            .map(|h| self.lifecycle_handler(&c.name, h))
                            .transpose()?,
                        pre_stop: l
                            .pre_stop
                            .as_ref()
                            .map(|h| self.lifecycle_handler(&c.name, h))
                            .transpose()?,
                    })
                })
                .transpose()?,
            security_context: c
                .security_context
                .as_ref()
                .map(|s| self.security_context(s))
                .transpose()?,
            termination_message_policy: parse_opt(c.termination_message_policy.as_deref())?,
        })
    }

    fn env_var(&self, container: &str, e: &k8s::EnvVar) -> Result<schema::EnvVar> {
        let value_from = match &e.value_from {
            None => None,
            Some(source) => Some(match source {
                k8s::EnvVarSource {
                    secret_key_ref: Some(sel),
                    ..
                } => schema::EnvVarSource::SecretKeyRef(schema::KeySelector {
                    name: sel.name.clone(),
                    key: sel.key.clone(),
                    optional: sel.optional,
                }),
                k8s::EnvVarSource {
                    config_map_key_ref: Some(sel),
                    ..
                } => schema::EnvVarSource::ConfigMapKeyRef(schema::KeySelector {
                    name: sel.name.clone(),
                    key: sel.key.clone(),
                    optional: sel.optional,
                }),
                k8s::EnvVarSource {
                    field_ref: Some(sel),
                    ..
                } => schema::EnvVarSource::FieldRef(flatten_field_selector(sel)),
                k8s::EnvVarSource {
                    resource_field_ref: Some(sel),
                    ..
                } => schema::EnvVarSource::ResourceFieldRef(flatten_resource_field_selector(sel)?),
                _ => {
                    return Err(self.fail(format!(
                        "env var '{}' of container '{}' has an empty valueFrom",
                        e.name, container
                    )))
                }
            }),
        };

        Ok(schema::EnvVar {
            name: e.name.clone(),
            value: e.value.clone(),
            value_from,
        })
    }

    fn probe(&self, container: &str, probe: Option<&k8s::Probe>) -> Result<Option<schema::Probe>> {
        let Some(p) = probe else {
            return Ok(None);
        };
        let handler = if let Some(exec) = &p.exec {
            schema::ProbeHandler::Exec(flatten_exec(exec))
        } else if let Some(action) = &p.http_get {
            schema::ProbeHandler::HttpGet(flatten_http_get(action))
        } else if let Some(action) = &p.tcp_socket {
            schema::ProbeHandler::TcpSocket(flatten_tcp_socket(action))
        } else if let Some(action) = &p.grpc {
            schema::ProbeHandler::Grpc(schema::GrpcAction {
                port: action.port,
                service: action.service.clone(),
            })
        } else {
            return Err(self.fail(format!("probe of container '{}' has no handler", container)));
        };

        Ok(Some(schema::Probe {
            handler,
            initial_delay_seconds: p.initial_delay_seconds,
            period_seconds: p.period_seconds,
            timeout_seconds: p.timeout_seconds,
            success_threshold: p.success_threshold,
            failure_threshold: p.failure_threshold,
        }))
    }

    fn lifecycle_handler(
        &self,
        container: &str,
        h: &k8s::LifecycleHandler,
    ) -> Result<schema::LifecycleHandler> {
        if let Some(exec) = &h.exec {
            Ok(schema::LifecycleHandler::Exec(flatten_exec(exec)))
        } else if let Some(action) = &h.http_get {
            Ok(schema::LifecycleHandler::HttpGet(flatten_http_get(action)))
        } else if let Some(action) = &h.tcp_socket {
            Ok(schema::LifecycleHandler::TcpSocket(flatten_tcp_socket(action)))
        } else {
            Err(self.fail(format!(
                "lifecycle hook of container '{}' uses an unsupported handler",
                container
            )))
        }
    }

    fn security_context(&self, s: &k8s::SecurityContext) -> Result<schema::SecurityContext> {
        Ok(schema::SecurityContext {
            privileged: s.privileged,
            allow_privilege_escalation: s.allow_privilege_escalation,
            read_only_root_filesystem: s.read_only_root_filesystem,
            run_as_user: s.run_as_user,
            run_as_group: s.run_as_group,
            run_as_non_root: s.run_as_non_root,
            capabilities: s.capabilities.as_ref().map(|c| schema::Capabilities {
                add: c.add.clone().unwrap_or_default(),
                drop: c.drop.clone().unwrap_or_default(),
            }),
            se_linux_options: s.se_linux_options.as_ref().map(flatten_se_linux),
            seccomp_profile: s
                .seccomp_profile
                .as_ref()
                .map(flatten_seccomp)
                .transpose()?,
        })
    }

    fn pod_security_context(&self, s: &k8s::PodSecurityContext) -> Result<schema::PodSecurityContext> {
        Ok(schema::PodSecurityContext {
            fs_group: s.fs_group,
            fs_group_change_policy: parse_opt(s.fs_group_change_policy.as_deref())?,
            run_as_user: s.run_as_user,
            run_as_group: s.run_as_group,
            run_as_non_root: s.run_as_non_root,
            supplemental_groups: s.supplemental_groups.clone().unwrap_or_default(),
            se_linux_options: s.se_linux_options.as_ref().map(flatten_se_linux),
            seccomp_profile: s
                .seccomp_profile
                .as_ref()
                .map(flatten_seccomp)
                .transpose()?,
            sysctls: s
                .sysctls
                .iter()
                .flatten()
                .map(|s| schema::Sysctl {
                    name: s.name.clone(),
                    value: s.value.clone(),
                })
                .collect(),
        })
    }

    fn volume(&self, v: &k8s::Volume) -> Result<schema::Volume> {
        let source = if let Some(s) = &v.secret {
            schema::VolumeSource::Secret(schema::SecretVolumeSource {
                secret_name: s.secret_name.clone().unwrap_or_default(),
                items: flatten_items(s.items.as_ref()),
                default_mode: s.default_mode.map(schema::FileMode),
                optional: s.optional,
            })
        } else if let Some(c) = &v.config_map {
            schema::VolumeSource::ConfigMap(schema::ConfigMapVolumeSource {
                name: c.name.clone(),
                items: flatten_items(c.items.as_ref()),
                default_mode: c.default_mode.map(schema::FileMode),
                optional: c.optional,
            })
        } else if let Some(e) = &v.empty_dir {
            schema::VolumeSource::EmptyDir(schema::EmptyDirVolumeSource {
                medium: e.medium.clone(),
                size_limit: e.size_limit.as_ref().map(Quantity::from_k8s).transpose()?,
            })
        } else if let Some(c) = &v.csi {
            schema::VolumeSource::Csi(schema::CsiVolumeSource {
                driver: c.driver.clone(),
                read_only: c.read_only,
                fs_type: c.fs_type.clone(),
                volume_attributes: c.volume_attributes.clone().unwrap_or_default(),
                node_publish_secret_ref: c.node_publish_secret_ref.as_ref().map(flatten_local_ref),
            })
        } else if let Some(p) = &v.projected {
            schema::VolumeSource::Projected(schema::ProjectedVolumeSource {
                default_mode: p.default_mode.map(schema::FileMode),
                sources: p
                    .sources
                    .iter()
                    .flatten()
                    .map(|s| self.projection(&v.name, s))
                    .collect::<Result<_>>()?,
            })
        } else if let Some(e) = &v.ephemeral {
            let template = e.volume_claim_template.as_ref().ok_or_else(|| {
                self.fail(format!("ephemeral volume '{}' has no claim template", v.name))
            })?;
            let resources = template.spec.resources.as_ref();
            schema::VolumeSource::Ephemeral(schema::EphemeralVolumeSource {
                metadata: template.metadata.as_ref().map(|m| schema::ClaimMetadata {
                    labels: m.labels.clone().unwrap_or_default(),
                    annotations: m.annotations.clone().unwrap_or_default(),
                }),
                spec: schema::ClaimSpec {
                    access_modes: template.spec.access_modes.clone().unwrap_or_default(),
                    storage_class_name: template.spec.storage_class_name.clone(),
                    volume_mode: template.spec.volume_mode.clone(),
                    resources: schema::ResourceRequirements {
                        limits: quantities(resources.and_then(|r| r.limits.as_ref()))?,
                        requests: quantities(resources.and_then(|r| r.requests.as_ref()))?,
                    },
                },
            })
        } else if let Some(h) = &v.host_path {
            schema::VolumeSource::HostPath(schema::HostPathVolumeSource {
                path: h.path.clone(),
                type_: h.type_.clone(),
            })
        } else if let Some(p) = &v.persistent_volume_claim {
            schema::VolumeSource::PersistentVolumeClaim(schema::PersistentVolumeClaimVolumeSource {
                claim_name: p.claim_name.clone(),
                read_only: p.read_only,
            })
        } else if let Some(d) = &v.downward_api {
            schema::VolumeSource::DownwardApi(schema::DownwardApiVolumeSource {
                items: flatten_downward_files(d.items.as_ref())?,
                default_mode: d.default_mode.map(schema::FileMode),
            })
        } else {
            return Err(self.fail(format!("volume '{}' uses an unsupported source", v.name)));
        };

        Ok(schema::Volume {
            name: v.name.clone(),
            source,
        })
    }

    fn projection(&self, volume: &str, p: &k8s::VolumeProjection) -> Result<schema::VolumeProjection> {
        if let Some(c) = &p.config_map {
            Ok(schema::VolumeProjection::ConfigMap(schema::ConfigMapProjection {
                name: c.name.clone(),
                items: flatten_items(c.items.as_ref()),
                optional: c.optional,
            }))
        } else if let Some(s) = &p.secret {
            Ok(schema::VolumeProjection::Secret(schema::SecretProjection {
                name: s.name.clone(),
                items: flatten_items(s.items.as_ref()),
                optional: s.optional,
            }))
        } else if let Some(d) = &p.downward_api {
            Ok(schema::VolumeProjection::DownwardApi(schema::DownwardApiProjection {
                items: flatten_downward_files(d.items.as_ref())?,
            }))
        } else if let Some(t) = &p.service_account_token {
            Ok(schema::VolumeProjection::ServiceAccountToken(
                schema::ServiceAccountTokenProjection {
                    audience: t.audience.clone(),
                    expiration_seconds: t.expiration_seconds,
                    path: t.path.clone(),
                },
            ))
        } else {
            Err(self.fail(format!(
                "projected volume '{}' has a source of an unsupported kind",
                volume
            )))
        }
    }
}

fn quantities(map: Option<&BTreeMap<String, K8sQuantity>>) -> Result<BTreeMap<String, Quantity>> {
    map.into_iter()
        .flatten()
        .map(|(k, v)| -> Result<(String, Quantity)> { Ok((k.clone(), Quantity::from_k8s(v)?)) })
        .collect()
}

fn flatten_exec(exec: &k8s::ExecAction) -> schema::ExecAction {
    schema::ExecAction {
        command: exec.command.clone().unwrap_or_default(),
    }
}

fn flatten_http_get(action: &k8s::HTTPGetAction) -> schema::HttpGetAction {
    schema::HttpGetAction {
        path: action.path.clone(),
        port: flatten_port(&action.port),
        host: action.host.clone(),
        scheme: action.scheme.clone(),
        http_headers: action
            .http_headers
            .iter()
            .flatten()
            .map(|h| schema::HttpHeader {
                name: h.name.clone(),
                value: h.value.clone(),
            })
            .collect(),
    }
}

fn flatten_tcp_socket(action: &k8s::TCPSocketAction) -> schema::TcpSocketAction {
    schema::TcpSocketAction {
        port: flatten_port(&action.port),
        host: action.host.clone(),
    }
}

fn flatten_port(port: &IntOrString) -> schema::PortRef {
    match port {
        IntOrString::Int(n) => schema::PortRef::Number(*n),
        IntOrString::String(name) => schema::PortRef::Name(name.clone()),
    }
}

fn flatten_se_linux(o: &k8s::SELinuxOptions) -> schema::SeLinuxOptions {
    schema::SeLinuxOptions {
        level: o.level.clone(),
        role: o.role.clone(),
        type_: o.type_.clone(),
        user: o.user.clone(),
    }
}

fn flatten_seccomp(p: &k8s::SeccompProfile) -> Result<schema::SeccompProfile> {
    Ok(schema::SeccompProfile {
        type_: p.type_.parse()?,
        localhost_profile: p.localhost_profile.clone(),
    })
}

fn flatten_field_selector(sel: &k8s::ObjectFieldSelector) -> schema::ObjectFieldSelector {
    schema::ObjectFieldSelector {
        field_path: sel.field_path.clone(),
        api_version: sel.api_version.clone(),
    }
}

fn flatten_resource_field_selector(
    sel: &k8s::ResourceFieldSelector,
) -> Result<schema::ResourceFieldSelector> {
    Ok(schema::ResourceFieldSelector {
        container_name: sel.container_name.clone(),
        resource: sel.resource.clone(),
        divisor: sel.divisor.as_ref().map(Quantity::from_k8s).transpose()?,
    })
}

fn flatten_items(items: Option<&Vec<k8s::KeyToPath>>) -> Vec<schema::KeyToPath> {
    items
        .into_iter()
        .flatten()
        .map(|k| schema::KeyToPath {
            key: k.key.clone(),
            path: k.path.clone(),
            mode: k.mode.map(schema::FileMode),
        })
        .collect()
}

fn flatten_downward_files(
    items: Option<&Vec<k8s::DownwardAPIVolumeFile>>,
) -> Result<Vec<schema::DownwardApiFile>> {
    items
        .into_iter()
        .flatten()
        .map(|f| -> Result<schema::DownwardApiFile> {
            Ok(schema::DownwardApiFile {
                path: f.path.clone(),
                field_ref: f.field_ref.as_ref().map(flatten_field_selector),
                resource_field_ref: f
                    .resource_field_ref
                    .as_ref()
                    .map(flatten_resource_field_selector)
                    .transpose()?,
                mode: f.mode.map(schema::FileMode),
            })
        })
        .collect()
}

fn flatten_local_ref(r: &k8s::LocalObjectReference) -> schema::LocalObjectReference {
    schema::LocalObjectReference {
        name: r.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::apply_server_defaults;
    use crate::expand;

    fn spec(yaml: &str) -> schema::PodSpec {
        schema::PodSpec::from_yaml(yaml).unwrap()
    }

    const FULL: &str = r#"
metadata:
  name: full
  namespace: apps
  labels: {app: web}
  annotations: {team: core}
initContainers:
  - name: init
    image: busybox:1.36
    command: ["sh", "-c", "echo init"]
containers:
  - name: web
    image: nginx:1.27
    imagePullPolicy: IfNotPresent
    args: ["-listen=:80", "-text='before'"]
    workingDir: /srv
    ports: [{containerPort: 80, name: http, protocol: TCP}]
    env:
      - {name: PLAIN, value: "1"}
      - name: FROM_SECRET
        valueFrom: {secretKeyRef: {name: creds, key: password, optional: true}}
      - name: LIMIT
        valueFrom: {resourceFieldRef: {containerName: web, resource: limits.memory, divisor: 1Mi}}
    envFrom:
      - {prefix: CFG_, configMapRef: {name: settings}}
    resources:
      limits: {cpu: 500m, memory: 512Mi}
      requests: {cpu: 250m, memory: 256Mi}
    volumeMounts:
      - {name: secret-volume, mountPath: /etc/secret, readOnly: true}
      - {name: cache, mountPath: /cache, subPath: web, mountPropagation: HostToContainer}
    livenessProbe:
      httpGet:
        path: /healthz
        port: 8080
        httpHeaders: [{name: X-Custom-Header, value: Awesome}]
      initialDelaySeconds: 3
      periodSeconds: 1
    readinessProbe:
      tcpSocket: {port: http}
    lifecycle:
      preStop:
        exec: {command: ["nginx", "-s", "quit"]}
    securityContext:
      runAsNonRoot: true
      capabilities: {add: [NET_BIND_SERVICE], drop: [ALL]}
      seccompProfile: {type: Localhost, localhostProfile: profiles/audit.json}
    terminationMessagePolicy: FallbackToLogsOnError
volumes:
  - name: secret-volume
    secret: {secretName: creds, defaultMode: "0777", items: [{key: one, path: path/to/one}]}
  - name: cache
    emptyDir: {medium: Memory, sizeLimit: 128Mi}
  - name: projected
    projected:
      sources:
        - configMap: {name: settings}
        - downwardAPI: {items: [{path: labels, fieldRef: {fieldPath: metadata.labels}}]}
        - serviceAccountToken: {audience: vault, expirationSeconds: 3600, path: token}
  - name: scratch
    ephemeral:
      spec:
        accessModes: [ReadWriteOnce]
        storageClassName: fast
        resources: {requests: {storage: 1Gi}}
  - name: csi
    csi: {driver: secrets-store.csi.k8s.io, readOnly: true, volumeAttributes: {secretProviderClass: vault}}
securityContext:
  fsGroup: 2000
  fsGroupChangePolicy: OnRootMismatch
  supplementalGroups: [3000]
schedulerName: custom-scheduler
automountServiceAccountToken: false
nodeSelector: {disk: ssd}
restartPolicy: OnFailure
terminationGracePeriodSeconds: 10
activeDeadlineSeconds: 600
readinessGates: [{conditionType: haha}]
topologySpreadConstraints:
  - maxSkew: 1
    topologyKey: kubernetes.io/hostname
    whenUnsatisfiable: ScheduleAnyway
    labelSelector: {matchLabels: {app: web}}
tolerations:
  - {key: dedicated, operator: Equal, value: web, effect: NoSchedule}
runtimeClassName: gvisor
enableServiceLinks: false
priorityClassName: high
dnsPolicy: ClusterFirstWithHostNet
hostNetwork: false
imagePullSecrets: [{name: registry}]
"#;

    #[test]
    fn test_round_trip_full_spec() {
        let original = spec(FULL);
        original.validate().unwrap();
        let flattened = flatten(&expand(&original), None).unwrap();
        assert_eq!(flattened, original);
    }

    #[test]
    fn test_round_trip_with_default_namespace() {
        let original = spec("metadata: {name: nginx}\ncontainers: [{name: nginx, image: nginx}]\n");
        let pod = expand(&original);

        let without_prior = flatten(&pod, None).unwrap();
        assert_eq!(without_prior.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(expand(&without_prior), pod);

        let with_prior = flatten(&pod, Some(&original)).unwrap();
        assert_eq!(with_prior, original);
    }

    #[test]
    fn test_expand_flatten_expand_is_idempotent() {
        for yaml in [
            FULL,
            "metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {}}]\n",
            "metadata: {name: p}\ncontainers: [{name: c, image: i}]\nsecurityContext: {}\n",
        ] {
            let original = spec(yaml);
            let expanded = expand(&original);
            assert_eq!(expand(&flatten(&expanded, None).unwrap()), expanded);
            assert_eq!(expand(&flatten(&expanded, Some(&original)).unwrap()), expanded);
        }
    }

    #[test]
    fn test_server_defaults_are_suppressed_against_prior() {
        let original = spec(FULL);
        let mut pod = expand(&original);
        apply_server_defaults(&mut pod, Some("kube-api-access-x7f2k"));

        let flattened = flatten(&pod, Some(&original)).unwrap();
        assert_eq!(flattened, original);
    }

    #[test]
    fn test_server_defaults_on_minimal_pod() {
        let original = spec(
            r#"
metadata: {name: nginx}
containers:
  - name: nginx
    image: nginx
    resources:
      limits: {cpu: "0.5", memory: 1024Mi}
    readinessProbe:
      httpGet: {port: 80}
    env:
      - name: POD_NAME
        valueFrom: {fieldRef: {fieldPath: metadata.name}}
volumes:
  - name: cfg
    configMap: {name: settings}
  - name: info
    downwardAPI:
      items:
        - path: cpu
          resourceFieldRef: {containerName: nginx, resource: limits.cpu}
"#,
        );
        let mut pod = expand(&original);
        apply_server_defaults(&mut pod, Some("kube-api-access-x7f2k"));

        let flattened = flatten(&pod, Some(&original)).unwrap();
        assert_eq!(flattened, original);
    }

    #[test]
    fn test_import_keeps_server_defaults_but_drops_token_volume() {
        let original = spec("metadata: {name: nginx}\ncontainers: [{name: nginx, image: nginx:1.27}]\n");
        let mut pod = expand(&original);
        apply_server_defaults(&mut pod, Some("kube-api-access-x7f2k"));

        let imported = flatten(&pod, None).unwrap();
        assert_eq!(imported.restart_policy, Some(schema::RestartPolicy::Always));
        assert_eq!(imported.scheduler_name.as_deref(), Some("default-scheduler"));
        assert!(imported.volumes.is_empty());
        assert!(imported.containers[0].volume_mounts.is_empty());
    }

    #[test]
    fn test_declared_volume_with_injected_prefix_is_kept() {
        let original = spec(
            r#"
metadata: {name: p}
containers: [{name: c, image: i, volumeMounts: [{name: default-token-mine, mountPath: /var/run/secrets/kubernetes.io/serviceaccount}]}]
volumes: [{name: default-token-mine, secret: {secretName: mine}}]
"#,
        );
        let flattened = flatten(&expand(&original), Some(&original)).unwrap();
        assert_eq!(flattened, original);
    }

    #[test]
    fn test_resources_cleared_back_to_empty() {
        let empty = spec("metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {}}]\n");
        let populated = spec(
            "metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {requests: {cpu: 250m}, limits: {cpu: 500m}}}]\n",
        );

        let flat_populated = flatten(&expand(&populated), Some(&populated)).unwrap();
        assert_eq!(flat_populated, populated);

        let flat_empty = flatten(&expand(&empty), Some(&empty)).unwrap();
        let resources = flat_empty.containers[0].resources.clone().unwrap();
        assert!(resources.limits.is_empty());
        assert!(resources.requests.is_empty());
        assert_eq!(flat_empty, empty);
    }

    #[test]
    fn test_equal_quantities_flatten_equal() {
        let a = spec("metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {limits: {cpu: \"0.5\"}}}]\n");
        let b = spec("metadata: {name: p}\ncontainers: [{name: c, image: i, resources: {limits: {cpu: 500m}}}]\n");
        assert_eq!(expand(&a), expand(&b));
        assert_eq!(flatten(&expand(&a), Some(&a)).unwrap(), b);
    }

    #[test]
    fn test_missing_spec_is_translation_error() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        let err = flatten(&pod, None).unwrap_err();
        assert!(matches!(err, PodwrightError::TranslationFailed { .. }));
    }

    #[test]
    fn test_unknown_enum_value_is_translation_error() {
        let mut pod = expand(&spec("metadata: {name: p}\ncontainers: [{name: c, image: i}]\n"));
        if let Some(s) = pod.spec.as_mut() {
            s.restart_policy = Some("Sometimes".to_string());
        }
        let err = flatten(&pod, None).unwrap_err();
        assert!(matches!(err, PodwrightError::TranslationFailed { .. }));
    }
}
