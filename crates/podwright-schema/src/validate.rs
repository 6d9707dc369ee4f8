//! Structural validation of a declared pod
//!
//! Everything here runs before any cluster call. Validation never fills in
//! defaults: a block that is missing a mandatory field is rejected.

use crate::container::{
    Container, EnvVarSource, LifecycleHandler, PortRef, Probe, ProbeHandler, ResourceRequirements,
};
use crate::pod::PodSpec;
use crate::volume::{DownwardApiFile, FileMode, KeyToPath, VolumeProjection, VolumeSource};
use podwright_core::{is_valid_label_name, is_valid_name, PodwrightError, Quantity, Result};
use std::collections::HashSet;

impl PodSpec {
    /// Validate the declared pod, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        validate_metadata(self)?;

        if self.containers.is_empty() {
            return Err(PodwrightError::validation_failed(
                "spec.containers",
                "at least one container is required",
                "Declare a container with a name and an image",
            ));
        }

        let mut names = HashSet::new();
        for (i, container) in self.init_containers.iter().enumerate() {
            validate_container(&format!("spec.initContainers[{}]", i), container, &mut names)?;
        }
        for (i, container) in self.containers.iter().enumerate() {
            validate_container(&format!("spec.containers[{}]", i), container, &mut names)?;
        }

        let mut volume_names = HashSet::new();
        for (i, volume) in self.volumes.iter().enumerate() {
            let field = format!("spec.volumes[{}]", i);
            if volume.name.is_empty() {
                return Err(missing(&format!("{}.name", field)));
            }
            if !is_valid_label_name(&volume.name) {
                return Err(invalid_name(&format!("{}.name", field), &volume.name));
            }
            if !volume_names.insert(volume.name.as_str()) {
                return Err(PodwrightError::validation_failed(
                    format!("{}.name", field),
                    format!("duplicate volume name '{}'", volume.name),
                    "Volume names must be unique within the pod",
                ));
            }
            validate_volume_source(&format!("{}.{}", field, volume.source.kind()), &volume.source)?;
        }

        if let Some(grace) = self.termination_grace_period_seconds {
            if grace < 0 {
                return Err(PodwrightError::validation_failed(
                    "spec.terminationGracePeriodSeconds",
                    "must be zero or positive",
                    "Use 0 to kill containers immediately",
                ));
            }
        }
        if let Some(deadline) = self.active_deadline_seconds {
            if deadline <= 0 {
                return Err(PodwrightError::validation_failed(
                    "spec.activeDeadlineSeconds",
                    "must be positive",
                    "Omit the field to let the pod run without a deadline",
                ));
            }
        }

        for (i, gate) in self.readiness_gates.iter().enumerate() {
            if gate.condition_type.is_empty() {
                return Err(missing(&format!("spec.readinessGates[{}].conditionType", i)));
            }
        }

        for (i, constraint) in self.topology_spread_constraints.iter().enumerate() {
            let field = format!("spec.topologySpreadConstraints[{}]", i);
            if constraint.max_skew <= 0 {
                return Err(PodwrightError::validation_failed(
                    format!("{}.maxSkew", field),
                    "must be greater than zero",
                    "maxSkew is the largest allowed difference in pod count between topology domains",
                ));
            }
            if constraint.topology_key.is_empty() {
                return Err(missing(&format!("{}.topologyKey", field)));
            }
        }

        for (i, secret) in self.image_pull_secrets.iter().enumerate() {
            if secret.name.is_empty() {
                return Err(missing(&format!("spec.imagePullSecrets[{}].name", i)));
            }
        }

        Ok(())
    }
}

fn validate_metadata(spec: &PodSpec) -> Result<()> {
    let meta = &spec.metadata;
    if meta.name.is_empty() {
        return Err(missing("metadata.name"));
    }
    if !is_valid_name(&meta.name) {
        return Err(invalid_name("metadata.name", &meta.name));
    }
    if let Some(namespace) = &meta.namespace {
        if !is_valid_label_name(namespace) {
            return Err(invalid_name("metadata.namespace", namespace));
        }
    }
    if meta.labels.keys().chain(meta.annotations.keys()).any(|k| k.is_empty()) {
        return Err(PodwrightError::validation_failed(
            "metadata",
            "label and annotation keys must not be empty",
            "Remove the empty key",
        ));
    }
    Ok(())
}

fn validate_container<'a>(
    field: &str,
    container: &'a Container,
    names: &mut HashSet<&'a str>,
) -> Result<()> {
    if container.name.is_empty() {
        return Err(missing(&format!("{}.name", field)));
    }
    if !is_valid_label_name(&container.name) {
        return Err(invalid_name(&format!("{}.name", field), &container.name));
    }
    if !names.insert(container.name.as_str()) {
        return Err(PodwrightError::validation_failed(
            format!("{}.name", field),
            format!("duplicate container name '{}'", container.name),
            "Container and init container names must be unique within the pod",
        ));
    }
    if container.image.is_empty() {
        return Err(missing(&format!("{}.image", field)));
    }

    for (i, port) in container.ports.iter().enumerate() {
        check_port(&format!("{}.ports[{}].containerPort", field, i), port.container_port)?;
        if let Some(host_port) = port.host_port {
            check_port(&format!("{}.ports[{}].hostPort", field, i), host_port)?;
        }
    }

    for (i, env) in container.env.iter().enumerate() {
        let env_field = format!("{}.env[{}]", field, i);
        if env.name.is_empty() {
            return Err(missing(&format!("{}.name", env_field)));
        }
        if env.value.is_some() && env.value_from.is_some() {
            return Err(PodwrightError::validation_failed(
                env_field,
                format!("'{}' sets both value and valueFrom", env.name),
                "Set either a literal value or a valueFrom reference, not both",
            ));
        }
        if let Some(source) = &env.value_from {
            let source_field = format!("{}.valueFrom", env_field);
            match source {
                EnvVarSource::SecretKeyRef(sel) | EnvVarSource::ConfigMapKeyRef(sel) => {
                    if sel.name.is_empty() {
                        return Err(missing(&format!("{}.name", source_field)));
                    }
                    if sel.key.is_empty() {
                        return Err(missing(&format!("{}.key", source_field)));
                    }
                }
                EnvVarSource::FieldRef(sel) => {
                    if sel.field_path.is_empty() {
                        return Err(missing(&format!("{}.fieldRef.fieldPath", source_field)));
                    }
                }
                EnvVarSource::ResourceFieldRef(sel) => {
                    if sel.resource.is_empty() {
                        return Err(missing(&format!("{}.resourceFieldRef.resource", source_field)));
                    }
                }
            }
        }
    }

    for (i, env_from) in container.env_from.iter().enumerate() {
        let env_field = format!("{}.envFrom[{}]", field, i);
        let reference = match (&env_from.config_map_ref, &env_from.secret_ref) {
            (Some(r), None) | (None, Some(r)) => r,
            _ => {
                return Err(PodwrightError::validation_failed(
                    env_field,
                    "exactly one of configMapRef or secretRef is required",
                    "Reference a single config map or secret per envFrom entry",
                ))
            }
        };
        if reference.name.is_empty() {
            return Err(missing(&format!("{}.name", env_field)));
        }
    }

    if let Some(resources) = &container.resources {
        check_resources(&format!("{}.resources", field), resources)?;
    }

    for (i, mount) in container.volume_mounts.iter().enumerate() {
        let mount_field = format!("{}.volumeMounts[{}]", field, i);
        if mount.name.is_empty() {
            return Err(missing(&format!("{}.name", mount_field)));
        }
        if mount.mount_path.is_empty() {
            return Err(missing(&format!("{}.mountPath", mount_field)));
        }
    }

    for (name, probe) in [
        ("livenessProbe", &container.liveness_probe),
        ("readinessProbe", &container.readiness_probe),
        ("startupProbe", &container.startup_probe),
    ] {
        if let Some(probe) = probe {
            check_probe(&format!("{}.{}", field, name), probe)?;
        }
    }

    if let Some(lifecycle) = &container.lifecycle {
        for (name, handler) in [("postStart", &lifecycle.post_start), ("preStop", &lifecycle.pre_stop)] {
            let handler_field = format!("{}.lifecycle.{}", field, name);
            match handler {
                Some(LifecycleHandler::Exec(exec)) if exec.command.is_empty() => {
                    return Err(missing(&format!("{}.exec.command", handler_field)));
                }
                Some(LifecycleHandler::HttpGet(action)) => {
                    check_port_ref(&format!("{}.httpGet.port", handler_field), &action.port)?
                }
                Some(LifecycleHandler::TcpSocket(action)) => {
                    check_port_ref(&format!("{}.tcpSocket.port", handler_field), &action.port)?
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn check_probe(field: &str, probe: &Probe) -> Result<()> {
    match &probe.handler {
        ProbeHandler::Exec(exec) if exec.command.is_empty() => {
            Err(missing(&format!("{}.exec.command", field)))
        }
        ProbeHandler::Exec(_) => Ok(()),
        ProbeHandler::HttpGet(action) => check_port_ref(&format!("{}.httpGet.port", field), &action.port),
        ProbeHandler::TcpSocket(action) => {
            check_port_ref(&format!("{}.tcpSocket.port", field), &action.port)
        }
        ProbeHandler::Grpc(action) => check_port(&format!("{}.grpc.port", field), action.port),
    }
}

fn check_resources(field: &str, resources: &ResourceRequirements) -> Result<()> {
    let zero = Quantity::from_millis(0);
    for (kind, map) in [("limits", &resources.limits), ("requests", &resources.requests)] {
        for (name, quantity) in map {
            if name.is_empty() {
                return Err(missing(&format!("{}.{}", field, kind)));
            }
            if *quantity < zero {
                return Err(PodwrightError::validation_failed(
                    format!("{}.{}.{}", field, kind, name),
                    format!("quantity '{}' must not be negative", quantity),
                    "Resource quantities are amounts such as '250m' or '512Mi'",
                ));
            }
        }
    }
    Ok(())
}

fn validate_volume_source(field: &str, source: &VolumeSource) -> Result<()> {
    match source {
        VolumeSource::Secret(secret) => {
            if secret.secret_name.is_empty() {
                return Err(missing(&format!("{}.secretName", field)));
            }
            check_mode(&format!("{}.defaultMode", field), secret.default_mode)?;
            check_items(field, &secret.items)
        }
        VolumeSource::ConfigMap(config_map) => {
            if config_map.name.is_empty() {
                return Err(missing(&format!("{}.name", field)));
            }
            check_mode(&format!("{}.defaultMode", field), config_map.default_mode)?;
            check_items(field, &config_map.items)
        }
        VolumeSource::EmptyDir(_) => Ok(()),
        VolumeSource::Csi(csi) => {
            if csi.driver.is_empty() {
                return Err(missing(&format!("{}.driver", field)));
            }
            Ok(())
        }
        VolumeSource::Projected(projected) => {
            check_mode(&format!("{}.defaultMode", field), projected.default_mode)?;
            for (i, projection) in projected.sources.iter().enumerate() {
                let source_field = format!("{}.sources[{}]", field, i);
                match projection {
                    VolumeProjection::ConfigMap(p) => {
                        if p.name.is_empty() {
                            return Err(missing(&format!("{}.configMap.name", source_field)));
                        }
                        check_items(&source_field, &p.items)?;
                    }
                    VolumeProjection::Secret(p) => {
                        if p.name.is_empty() {
                            return Err(missing(&format!("{}.secret.name", source_field)));
                        }
                        check_items(&source_field, &p.items)?;
                    }
                    VolumeProjection::DownwardApi(p) => {
                        check_downward_items(&format!("{}.downwardAPI", source_field), &p.items)?;
                    }
                    VolumeProjection::ServiceAccountToken(p) => {
                        if p.path.is_empty() {
                            return Err(missing(&format!("{}.serviceAccountToken.path", source_field)));
                        }
                    }
                }
            }
            Ok(())
        }
        VolumeSource::Ephemeral(ephemeral) => {
            if ephemeral.spec.access_modes.is_empty() {
                return Err(missing(&format!("{}.spec.accessModes", field)));
            }
            check_resources(&format!("{}.spec.resources", field), &ephemeral.spec.resources)
        }
        VolumeSource::HostPath(host_path) => {
            if host_path.path.is_empty() {
                return Err(missing(&format!("{}.path", field)));
            }
            Ok(())
        }
        VolumeSource::PersistentVolumeClaim(claim) => {
            if claim.claim_name.is_empty() {
                return Err(missing(&format!("{}.claimName", field)));
            }
            Ok(())
        }
        VolumeSource::DownwardApi(downward) => {
            check_mode(&format!("{}.defaultMode", field), downward.default_mode)?;
            check_downward_items(field, &downward.items)
        }
    }
}

fn check_items(field: &str, items: &[KeyToPath]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        let item_field = format!("{}.items[{}]", field, i);
        if item.key.is_empty() {
            return Err(missing(&format!("{}.key", item_field)));
        }
        if item.path.is_empty() {
            return Err(missing(&format!("{}.path", item_field)));
        }
        check_mode(&format!("{}.mode", item_field), item.mode)?;
    }
    Ok(())
}

fn check_downward_items(field: &str, items: &[DownwardApiFile]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        let item_field = format!("{}.items[{}]", field, i);
        if item.path.is_empty() {
            return Err(missing(&format!("{}.path", item_field)));
        }
        match (&item.field_ref, &item.resource_field_ref) {
            (Some(sel), None) if sel.field_path.is_empty() => {
                return Err(missing(&format!("{}.fieldRef.fieldPath", item_field)));
            }
            (None, Some(sel)) if sel.resource.is_empty() => {
                return Err(missing(&format!("{}.resourceFieldRef.resource", item_field)));
            }
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(PodwrightError::validation_failed(
                    item_field,
                    "exactly one of fieldRef or resourceFieldRef is required",
                    "Each downward API file exposes a single pod field or container resource",
                ))
            }
        }
        check_mode(&format!("{}.mode", item_field), item.mode)?;
    }
    Ok(())
}

fn check_mode(field: &str, mode: Option<FileMode>) -> Result<()> {
    match mode {
        Some(mode) if !(0..=FileMode::MAX).contains(&mode.bits()) => Err(PodwrightError::validation_failed(
            field,
            format!("file mode {} is out of range", mode.bits()),
            "File modes are octal permission bits between 0000 and 0777",
        )),
        _ => Ok(()),
    }
}

fn check_port(field: &str, port: i32) -> Result<()> {
    if !(1..=65535).contains(&port) {
        return Err(PodwrightError::validation_failed(
            field,
            format!("port {} is out of range", port),
            "Ports must be between 1 and 65535",
        ));
    }
    Ok(())
}

fn check_port_ref(field: &str, port: &PortRef) -> Result<()> {
    match port {
        PortRef::Number(n) => check_port(field, *n),
        PortRef::Name(name) if name.is_empty() => Err(missing(field)),
        PortRef::Name(_) => Ok(()),
    }
}

fn missing(field: &str) -> PodwrightError {
    PodwrightError::validation_failed(
        field,
        "missing required argument",
        "Empty blocks are not defaulted; set the field explicitly",
    )
}

fn invalid_name(field: &str, name: &str) -> PodwrightError {
    PodwrightError::validation_failed(
        field,
        format!("'{}' is not a valid name", name),
        "Names must be lowercase alphanumeric or '-', and start and end with an alphanumeric character",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> PodSpec {
        PodSpec::from_yaml(yaml).unwrap()
    }

    fn assert_rejected(yaml: &str, field: &str) {
        match spec(yaml).validate() {
            Err(PodwrightError::ValidationFailed { field: f, .. }) => assert_eq!(f, field),
            other => panic!("expected validation failure on {}, got {:?}", field, other),
        }
    }

    #[test]
    fn test_minimal_pod_is_valid() {
        spec("metadata: {name: nginx}\ncontainers: [{name: nginx, image: nginx}]\n")
            .validate()
            .unwrap();
    }

    #[test]
    fn test_container_without_name_and_image_is_rejected() {
        assert_rejected("metadata: {name: nginx}\ncontainers: [{}]\n", "spec.containers[0].name");
        assert_rejected(
            "metadata: {name: nginx}\ncontainers: [{name: nginx}]\n",
            "spec.containers[0].image",
        );
    }

    #[test]
    fn test_no_containers_is_rejected() {
        assert_rejected("metadata: {name: nginx}\n", "spec.containers");
        assert_rejected("containers: [{name: a, image: b}]\n", "metadata.name");
    }

    #[test]
    fn test_duplicate_container_names_across_init_containers() {
        assert_rejected(
            "metadata: {name: p}\ninitContainers: [{name: a, image: busybox}]\ncontainers: [{name: a, image: nginx}]\n",
            "spec.containers[0].name",
        );
    }

    #[test]
    fn test_empty_env_blocks_are_rejected() {
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b, env: [{}]}]\n",
            "spec.containers[0].env[0].name",
        );
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b, envFrom: [{configMapRef: {}}]}]\n",
            "spec.containers[0].envFrom[0].name",
        );
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b, envFrom: [{}]}]\n",
            "spec.containers[0].envFrom[0]",
        );
    }

    #[test]
    fn test_ambiguous_env_value_is_rejected() {
        assert_rejected(
            r#"
metadata: {name: p}
containers:
  - name: a
    image: b
    env:
      - name: X
        value: "1"
        valueFrom:
          fieldRef: {fieldPath: metadata.name}
"#,
            "spec.containers[0].env[0]",
        );
    }

    #[test]
    fn test_empty_volume_sources_are_rejected() {
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b}]\nvolumes: [{name: v, secret: {}}]\n",
            "spec.volumes[0].secret.secretName",
        );
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b}]\nvolumes: [{name: v, configMap: {}}]\n",
            "spec.volumes[0].configMap.name",
        );
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b}]\nvolumes: [{name: v, downwardAPI: {items: [{path: x}]}}]\n",
            "spec.volumes[0].downwardAPI.items[0]",
        );
    }

    #[test]
    fn test_empty_dir_block_is_valid() {
        spec("metadata: {name: p}\ncontainers: [{name: a, image: b}]\nvolumes: [{name: cache, emptyDir: {}}]\n")
            .validate()
            .unwrap();
    }

    #[test]
    fn test_duplicate_volume_names() {
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b}]\nvolumes: [{name: v, emptyDir: {}}, {name: v, emptyDir: {}}]\n",
            "spec.volumes[1].name",
        );
    }

    #[test]
    fn test_negative_quantity_is_rejected() {
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b, resources: {limits: {cpu: -1}}}]\n",
            "spec.containers[0].resources.limits.cpu",
        );
    }

    #[test]
    fn test_probe_port_range() {
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b, livenessProbe: {tcpSocket: {port: 70000}}}]\n",
            "spec.containers[0].livenessProbe.tcpSocket.port",
        );
    }

    #[test]
    fn test_file_mode_range() {
        assert_rejected(
            "metadata: {name: p}\ncontainers: [{name: a, image: b}]\nvolumes: [{name: v, secret: {secretName: s, defaultMode: 4096}}]\n",
            "spec.volumes[0].secret.defaultMode",
        );
    }
}
