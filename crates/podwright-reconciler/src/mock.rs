use crate::client::ClusterClient;
use crate::error::{ClusterError, ClusterResult};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use podwright_core::{Pod, PodId};
use podwright_translate::apply_server_defaults;
use podwright_translate::defaults::DEFAULT_SCHEDULER_NAME;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Server-side behaviour of the [`MockCluster`]
#[derive(Debug, Clone)]
pub struct MockClusterOptions {
    /// Number of reads after create (or an image change) before containers report ready
    pub ready_after_polls: u32,
    /// Number of reads a deleted pod stays visible while terminating
    pub deletion_lag_polls: u32,
    /// Deleted pods never go away
    pub stuck_deletion: bool,
    /// Containers stay unready forever
    pub containers_never_ready: bool,
    /// Pods move to the Failed phase on first read
    pub fail_pods: bool,
}

impl Default for MockClusterOptions {
    fn default() -> Self {
        Self {
            ready_after_polls: 1,
            deletion_lag_polls: 0,
            stuck_deletion: false,
            containers_never_ready: false,
            fail_pods: false,
        }
    }
}

/// A request received by the [`MockCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(PodId),
    Get(PodId),
    Update(PodId),
    Delete(PodId),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Get(_))
    }
}

/// In-memory pod state for MockCluster
#[derive(Debug, Clone)]
struct MockPod {
    pod: Pod,
    /// Reads since the containers were last (re)started
    polls: u32,
    /// Remaining reads before a terminating pod disappears
    terminating: Option<u32>,
}

/// In-memory cluster for testing
///
/// Behaves like an API server plus kubelet for the calls the reconciler
/// makes: it assigns uid, resourceVersion and generation, enforces
/// optimistic concurrency and pod-spec immutability, applies server
/// defaults (including the service-account token volume) and advances pod
/// status each time a pod is read.
pub struct MockCluster {
    pods: Arc<RwLock<HashMap<PodId, MockPod>>>,
    next_version: Arc<RwLock<u64>>,
    schedulers: Arc<RwLock<HashSet<String>>>,
    rejections: Arc<RwLock<Vec<String>>>,
    calls: Arc<RwLock<Vec<Call>>>,
    options: MockClusterOptions,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::with_options(MockClusterOptions::default())
    }

    pub fn with_options(options: MockClusterOptions) -> Self {
        Self {
            pods: Arc::new(RwLock::new(HashMap::new())),
            next_version: Arc::new(RwLock::new(1)),
            schedulers: Arc::new(RwLock::new(HashSet::new())),
            rejections: Arc::new(RwLock::new(Vec::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            options,
        }
    }

    /// Make a custom scheduler available so its pods get scheduled
    pub async fn register_scheduler(&self, name: &str) {
        self.schedulers.write().await.insert(name.to_string());
    }

    /// Refuse the next create with a policy error
    pub async fn reject_next_create(&self, message: &str) {
        self.rejections.write().await.push(message.to_string());
    }

    /// Set a status condition the way a third-party controller would
    pub async fn set_condition(&self, id: &PodId, condition_type: &str, status: &str) -> ClusterResult<()> {
        let mut pods = self.pods.write().await;
        let entry = pods
            .get_mut(id)
            .ok_or_else(|| ClusterError::not_found(&id.namespace, &id.name))?;
        let pod_status = entry.pod.status.get_or_insert_with(Default::default);
        upsert_condition(pod_status, condition_type, status);
        entry.pod.metadata.resource_version = Some(self.bump_version().await);
        debug!("Mock: condition {}={} set on {}", condition_type, status, id);
        Ok(())
    }

    /// Delete and re-create a pod behind the reconciler's back
    pub async fn recreate(&self, id: &PodId) -> ClusterResult<String> {
        let mut pods = self.pods.write().await;
        let entry = pods
            .get_mut(id)
            .ok_or_else(|| ClusterError::not_found(&id.namespace, &id.name))?;
        let uid = uuid::Uuid::new_v4().to_string();
        entry.pod.metadata.uid = Some(uid.clone());
        entry.pod.metadata.resource_version = Some(self.bump_version().await);
        entry.pod.status = Some(pending_status());
        entry.polls = 0;
        debug!("Mock: pod re-created externally: {}", id);
        Ok(uid)
    }

    /// Remove a pod immediately, as an out-of-band deletion
    pub async fn remove(&self, id: &PodId) {
        self.pods.write().await.remove(id);
        debug!("Mock: pod removed externally: {}", id);
    }

    pub async fn contains(&self, id: &PodId) -> bool {
        self.pods.read().await.contains_key(id)
    }

    /// Stored object without advancing its status
    pub async fn peek(&self, id: &PodId) -> Option<Pod> {
        self.pods.read().await.get(id).map(|entry| entry.pod.clone())
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.read().await.clone()
    }

    pub async fn mutating_calls(&self) -> usize {
        self.calls.read().await.iter().filter(|c| c.is_mutating()).count()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    async fn record(&self, call: Call) {
        self.calls.write().await.push(call);
    }

    async fn bump_version(&self) -> String {
        let mut next = self.next_version.write().await;
        let version = next.to_string();
        *next += 1;
        version
    }

    /// Simulated kubelet: move the pod towards readiness
    async fn advance(&self, entry: &mut MockPod) {
        let scheduler = entry
            .pod
            .spec
            .as_ref()
            .and_then(|s| s.scheduler_name.clone())
            .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string());
        let schedulable =
            scheduler == DEFAULT_SCHEDULER_NAME || self.schedulers.read().await.contains(&scheduler);
        let gates: Vec<String> = entry
            .pod
            .spec
            .as_ref()
            .and_then(|s| s.readiness_gates.as_ref())
            .map(|gates| gates.iter().map(|g| g.condition_type.clone()).collect())
            .unwrap_or_default();

        entry.polls = entry.polls.saturating_add(1);
        let started = entry.polls >= self.options.ready_after_polls;
        let containers_ready = started && !self.options.containers_never_ready;

        let before = entry.pod.status.clone();
        let status = entry.pod.status.get_or_insert_with(pending_status);

        if !schedulable {
            status.phase = Some("Pending".to_string());
            upsert_condition(status, "PodScheduled", "False");
        } else if self.options.fail_pods {
            status.phase = Some("Failed".to_string());
            status.reason = Some("Error".to_string());
            upsert_condition(status, "PodScheduled", "True");
            upsert_condition(status, "ContainersReady", "False");
            upsert_condition(status, "Ready", "False");
        } else {
            let flag = if containers_ready { "True" } else { "False" };
            status.phase = Some(if started { "Running" } else { "Pending" }.to_string());
            upsert_condition(status, "PodScheduled", "True");
            upsert_condition(status, "Initialized", "True");
            upsert_condition(status, "ContainersReady", flag);

            let gates_ready = gates.iter().all(|gate| condition_is_true(status, gate));
            let ready = if containers_ready && gates_ready { "True" } else { "False" };
            upsert_condition(status, "Ready", ready);
        }

        if entry.pod.status != before {
            entry.pod.metadata.resource_version = Some(self.bump_version().await);
        }
    }
}

fn pending_status() -> PodStatus {
    PodStatus {
        phase: Some("Pending".to_string()),
        ..Default::default()
    }
}

fn upsert_condition(status: &mut PodStatus, condition_type: &str, value: &str) {
    let conditions = status.conditions.get_or_insert_with(Vec::new);
    match conditions.iter_mut().find(|c| c.type_ == condition_type) {
        Some(existing) if existing.status == value => {}
        Some(existing) => {
            existing.status = value.to_string();
            existing.last_transition_time = Some(Time(Utc::now()));
        }
        None => conditions.push(PodCondition {
            type_: condition_type.to_string(),
            status: value.to_string(),
            last_transition_time: Some(Time(Utc::now())),
            ..Default::default()
        }),
    }
}

fn condition_is_true(status: &PodStatus, condition_type: &str) -> bool {
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == condition_type && c.status == "True")
}

fn pod_id(pod: &Pod) -> PodId {
    PodId::with_default_namespace(
        pod.metadata.namespace.as_deref(),
        pod.metadata.name.clone().unwrap_or_default(),
    )
}

/// Mounts naming a volume the pod does not declare
fn dangling_mount(pod: &Pod) -> Option<String> {
    let spec = pod.spec.as_ref()?;
    let volumes: HashSet<&str> = spec
        .volumes
        .iter()
        .flatten()
        .map(|v| v.name.as_str())
        .collect();

    let groups = [
        ("initContainers", spec.init_containers.as_deref().unwrap_or_default()),
        ("containers", spec.containers.as_slice()),
    ];
    for (field, containers) in groups {
        for (i, container) in containers.iter().enumerate() {
            for (j, mount) in container.volume_mounts.iter().flatten().enumerate() {
                if !volumes.contains(mount.name.as_str()) {
                    return Some(format!(
                        "spec.{}[{}].volumeMounts[{}].name: Not found: \"{}\"",
                        field, i, j, mount.name
                    ));
                }
            }
        }
    }
    None
}

/// The spec with the fields a pod update may change blanked out
fn immutable_view(pod: &Pod) -> Option<k8s_openapi::api::core::v1::PodSpec> {
    let mut spec = pod.spec.clone()?;
    for container in spec
        .init_containers
        .iter_mut()
        .flatten()
        .chain(spec.containers.iter_mut())
    {
        container.image = None;
    }
    spec.active_deadline_seconds = None;
    Some(spec)
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn create(&self, pod: &Pod) -> ClusterResult<Pod> {
        let id = pod_id(pod);
        self.record(Call::Create(id.clone())).await;

        if let Some(message) = self.rejections.write().await.pop() {
            debug!("Mock: create rejected by policy: {}", id);
            return Err(ClusterError::rejected(403, "Forbidden", message));
        }
        if let Some(message) = dangling_mount(pod) {
            return Err(ClusterError::rejected(422, "Invalid", message));
        }

        let mut pods = self.pods.write().await;
        if pods.contains_key(&id) {
            return Err(ClusterError::already_exists(&id.namespace, &id.name));
        }

        let uid = uuid::Uuid::new_v4().to_string();
        let token_volume = format!("kube-api-access-{}", &uid[..5]);

        let mut stored = pod.clone();
        apply_server_defaults(&mut stored, Some(&token_volume));
        stored.metadata.uid = Some(uid);
        stored.metadata.resource_version = Some(self.bump_version().await);
        stored.metadata.generation = Some(1);
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        stored.status = Some(pending_status());

        pods.insert(
            id.clone(),
            MockPod {
                pod: stored.clone(),
                polls: 0,
                terminating: None,
            },
        );
        debug!("Mock: pod created: {}", id);
        Ok(stored)
    }

    async fn get(&self, namespace: &str, name: &str) -> ClusterResult<Pod> {
        let id = PodId::new(namespace, name);
        self.record(Call::Get(id.clone())).await;

        let mut pods = self.pods.write().await;
        let entry = pods
            .get_mut(&id)
            .ok_or_else(|| ClusterError::not_found(namespace, name))?;

        if let Some(remaining) = entry.terminating {
            if self.options.stuck_deletion {
                return Ok(entry.pod.clone());
            }
            if remaining == 0 {
                pods.remove(&id);
                debug!("Mock: pod terminated: {}", id);
                return Err(ClusterError::not_found(namespace, name));
            }
            entry.terminating = Some(remaining - 1);
            return Ok(entry.pod.clone());
        }

        self.advance(entry).await;
        Ok(entry.pod.clone())
    }

    async fn update(&self, pod: &Pod) -> ClusterResult<Pod> {
        let id = pod_id(pod);
        self.record(Call::Update(id.clone())).await;

        let mut pods = self.pods.write().await;
        let entry = pods
            .get_mut(&id)
            .ok_or_else(|| ClusterError::not_found(&id.namespace, &id.name))?;

        if entry.terminating.is_some() {
            return Err(ClusterError::conflict(format!("pod {} is terminating", id)));
        }
        let Some(version) = pod.metadata.resource_version.as_deref() else {
            return Err(ClusterError::rejected(
                422,
                "Invalid",
                "metadata.resourceVersion: Invalid value: must be specified for an update",
            ));
        };
        if entry.pod.metadata.resource_version.as_deref() != Some(version) {
            return Err(ClusterError::conflict(format!(
                "Operation cannot be fulfilled on pods \"{}\": the object has been modified; please apply your changes to the latest version and try again",
                id.name
            )));
        }
        if let Some(uid) = pod.metadata.uid.as_deref() {
            if entry.pod.metadata.uid.as_deref() != Some(uid) {
                return Err(ClusterError::conflict(format!(
                    "Precondition failed: UID in precondition: {}, UID in object meta: {}",
                    uid,
                    entry.pod.metadata.uid.as_deref().unwrap_or_default()
                )));
            }
        }
        if immutable_view(pod) != immutable_view(&entry.pod) {
            return Err(ClusterError::rejected(
                422,
                "Invalid",
                "spec: Forbidden: pod updates may not change fields other than `spec.containers[*].image`, `spec.initContainers[*].image`, `spec.activeDeadlineSeconds`, `spec.tolerations` (only additions to existing tolerations) or `spec.terminationGracePeriodSeconds`",
            ));
        }

        let spec_changed = pod.spec != entry.pod.spec;
        let images = |p: &Pod| -> Vec<Option<String>> {
            p.spec
                .iter()
                .flat_map(|s| s.init_containers.iter().flatten().chain(s.containers.iter()))
                .map(|c| c.image.clone())
                .collect()
        };
        let restart = images(pod) != images(&entry.pod);

        entry.pod.metadata.labels = pod.metadata.labels.clone();
        entry.pod.metadata.annotations = pod.metadata.annotations.clone();
        entry.pod.spec = pod.spec.clone();
        entry.pod.metadata.resource_version = Some(self.bump_version().await);
        if spec_changed {
            let generation = entry.pod.metadata.generation.unwrap_or(1);
            entry.pod.metadata.generation = Some(generation + 1);
        }
        if restart {
            entry.polls = 0;
            if let Some(status) = entry.pod.status.as_mut() {
                upsert_condition(status, "ContainersReady", "False");
                upsert_condition(status, "Ready", "False");
            }
        }

        debug!("Mock: pod updated: {}", id);
        Ok(entry.pod.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let id = PodId::new(namespace, name);
        self.record(Call::Delete(id.clone())).await;

        let mut pods = self.pods.write().await;
        let entry = pods
            .get_mut(&id)
            .ok_or_else(|| ClusterError::not_found(namespace, name))?;
        if entry.terminating.is_some() {
            return Ok(());
        }

        if self.options.deletion_lag_polls == 0 && !self.options.stuck_deletion {
            pods.remove(&id);
            debug!("Mock: pod deleted: {}", id);
            return Ok(());
        }

        entry.terminating = Some(self.options.deletion_lag_polls);
        entry.pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
        entry.pod.metadata.deletion_grace_period_seconds = Some(30);
        entry.pod.metadata.resource_version = Some(self.bump_version().await);
        debug!("Mock: pod terminating: {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podwright_schema::PodSpec;
    use podwright_translate::expand;

    fn pod(yaml: &str) -> Pod {
        expand(&PodSpec::from_yaml(yaml).unwrap())
    }

    const NGINX: &str = "metadata: {name: nginx}\ncontainers: [{name: nginx, image: 'nginx:1.25'}]\n";

    fn id() -> PodId {
        PodId::new("default", "nginx")
    }

    fn condition(pod: &Pod, condition_type: &str) -> Option<String> {
        pod.status
            .as_ref()?
            .conditions
            .iter()
            .flatten()
            .find(|c| c.type_ == condition_type)
            .map(|c| c.status.clone())
    }

    #[tokio::test]
    async fn test_create_assigns_server_fields() {
        let cluster = MockCluster::new();
        let created = cluster.create(&pod(NGINX)).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(created.metadata.generation, Some(1));

        let spec = created.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Always"));
        let volumes = spec.volumes.unwrap();
        assert!(volumes[0].name.starts_with("kube-api-access-"));
    }

    #[tokio::test]
    async fn test_create_twice_already_exists() {
        let cluster = MockCluster::new();
        cluster.create(&pod(NGINX)).await.unwrap();
        let err = cluster.create(&pod(NGINX)).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_get_advances_readiness() {
        let cluster = MockCluster::with_options(MockClusterOptions {
            ready_after_polls: 2,
            ..Default::default()
        });
        cluster.create(&pod(NGINX)).await.unwrap();

        let first = cluster.get("default", "nginx").await.unwrap();
        assert_eq!(condition(&first, "ContainersReady").as_deref(), Some("False"));

        let second = cluster.get("default", "nginx").await.unwrap();
        assert_eq!(condition(&second, "ContainersReady").as_deref(), Some("True"));
        assert_eq!(condition(&second, "Ready").as_deref(), Some("True"));
        assert_eq!(second.status.unwrap().phase.as_deref(), Some("Running"));
    }

    #[tokio::test]
    async fn test_ready_waits_for_gate() {
        let cluster = MockCluster::new();
        let yaml = format!("{}readinessGates: [{{conditionType: 'example.com/gate'}}]\n", NGINX);
        cluster.create(&pod(&yaml)).await.unwrap();

        let live = cluster.get("default", "nginx").await.unwrap();
        assert_eq!(condition(&live, "ContainersReady").as_deref(), Some("True"));
        assert_eq!(condition(&live, "Ready").as_deref(), Some("False"));

        cluster.set_condition(&id(), "example.com/gate", "True").await.unwrap();
        let live = cluster.get("default", "nginx").await.unwrap();
        assert_eq!(condition(&live, "Ready").as_deref(), Some("True"));
    }

    #[tokio::test]
    async fn test_unknown_scheduler_stays_pending() {
        let cluster = MockCluster::new();
        let yaml = format!("{}schedulerName: my-scheduler\n", NGINX);
        cluster.create(&pod(&yaml)).await.unwrap();

        let live = cluster.get("default", "nginx").await.unwrap();
        assert_eq!(live.status.unwrap().phase.as_deref(), Some("Pending"));

        cluster.register_scheduler("my-scheduler").await;
        let live = cluster.get("default", "nginx").await.unwrap();
        assert_eq!(live.status.unwrap().phase.as_deref(), Some("Running"));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let cluster = MockCluster::new();
        let created = cluster.create(&pod(NGINX)).await.unwrap();
        cluster.set_condition(&id(), "example.com/gate", "True").await.unwrap();

        let err = cluster.update(&created).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_rejects_immutable_change() {
        let cluster = MockCluster::new();
        let mut live = cluster.create(&pod(NGINX)).await.unwrap();
        live.spec.as_mut().unwrap().containers[0].args = Some(vec!["-v".to_string()]);

        let err = cluster.update(&live).await.unwrap_err();
        assert!(matches!(err, ClusterError::Rejected { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_image_update_restarts_containers() {
        let cluster = MockCluster::new();
        cluster.create(&pod(NGINX)).await.unwrap();
        let mut live = cluster.get("default", "nginx").await.unwrap();
        assert_eq!(condition(&live, "ContainersReady").as_deref(), Some("True"));

        live.spec.as_mut().unwrap().containers[0].image = Some("nginx:1.27".to_string());
        let updated = cluster.update(&live).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(2));
        assert_eq!(condition(&updated, "ContainersReady").as_deref(), Some("False"));
    }

    #[tokio::test]
    async fn test_dangling_mount_rejected() {
        let cluster = MockCluster::new();
        let yaml = "metadata: {name: nginx}\ncontainers:\n  - name: nginx\n    image: nginx\n    volumeMounts: [{name: data, mountPath: /data}]\n";
        let err = cluster.create(&pod(yaml)).await.unwrap_err();
        match err {
            ClusterError::Rejected { status, message, .. } => {
                assert_eq!(status, 422);
                assert!(message.contains("spec.containers[0].volumeMounts[0].name"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!cluster.contains(&id()).await);
    }

    #[tokio::test]
    async fn test_deletion_lag() {
        let cluster = MockCluster::with_options(MockClusterOptions {
            deletion_lag_polls: 1,
            ..Default::default()
        });
        cluster.create(&pod(NGINX)).await.unwrap();
        cluster.delete("default", "nginx").await.unwrap();

        let terminating = cluster.get("default", "nginx").await.unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());
        assert!(cluster.get("default", "nginx").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_calls_recorded() {
        let cluster = MockCluster::new();
        cluster.create(&pod(NGINX)).await.unwrap();
        cluster.get("default", "nginx").await.unwrap();
        cluster.delete("default", "nginx").await.unwrap();

        assert_eq!(cluster.mutating_calls().await, 2);
        assert_eq!(cluster.calls().await[1], Call::Get(id()));
    }
}
