//! Readiness waiter
//!
//! Polls the cluster at a fixed interval until a [`ReadinessCheck`] passes,
//! the deadline elapses or the caller's token is cancelled. The deadline
//! bounds every wait, including waits on conditions written by third
//! parties.

use crate::client::ClusterClient;
use crate::config::ReadinessPolicy;
use crate::error::{ClusterResult, ReconcileError, Result};
use k8s_openapi::api::core::v1::PodStatus;
use podwright_core::{Pod, PodId};
use podwright_schema::PodSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of evaluating a readiness check against a live pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready yet, with a description of what is missing
    Pending(String),
    /// Will never become ready
    Failed(String),
}

/// Predicate over a pod's status
pub trait ReadinessCheck: Send + Sync {
    fn check(&self, pod: &Pod) -> Readiness;
}

/// Every container reports ready
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainersReady;

impl ReadinessCheck for ContainersReady {
    fn check(&self, pod: &Pod) -> Readiness {
        let phase = phase(pod);
        match phase {
            "Failed" => Readiness::Failed(failure_reason(pod)),
            // Run-to-completion pods are done, which is as ready as they get
            "Succeeded" => Readiness::Ready,
            _ => match condition(pod, "ContainersReady") {
                Some("True") => Readiness::Ready,
                Some(status) => Readiness::Pending(format!("phase {}, ContainersReady={}", phase, status)),
                None => Readiness::Pending(format!("phase {}, ContainersReady not reported", phase)),
            },
        }
    }
}

/// The pod left the Pending phase
///
/// Used for pods handed to a custom scheduler, which may legitimately keep
/// them unscheduled for a long time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseNotPending;

impl ReadinessCheck for PhaseNotPending {
    fn check(&self, pod: &Pod) -> Readiness {
        match phase(pod) {
            "Pending" => Readiness::Pending("phase Pending".to_string()),
            "Failed" => Readiness::Failed(failure_reason(pod)),
            _ => Readiness::Ready,
        }
    }
}

/// Another check plus every declared readiness gate being `True`
pub struct WithReadinessGates {
    inner: Box<dyn ReadinessCheck>,
    gates: Vec<String>,
}

impl WithReadinessGates {
    pub fn new(inner: Box<dyn ReadinessCheck>, gates: Vec<String>) -> Self {
        Self { inner, gates }
    }
}

impl ReadinessCheck for WithReadinessGates {
    fn check(&self, pod: &Pod) -> Readiness {
        match self.inner.check(pod) {
            Readiness::Ready => {}
            other => return other,
        }
        let waiting: Vec<&str> = self
            .gates
            .iter()
            .filter(|gate| condition(pod, gate) != Some("True"))
            .map(String::as_str)
            .collect();
        if waiting.is_empty() {
            Readiness::Ready
        } else {
            Readiness::Pending(format!("readiness gates not True: {}", waiting.join(", ")))
        }
    }
}

/// Build the check for a pod under the given policy
pub fn readiness_check(policy: ReadinessPolicy, spec: &PodSpec) -> Box<dyn ReadinessCheck> {
    let base: Box<dyn ReadinessCheck> = match policy.resolve(spec) {
        ReadinessPolicy::PhaseNotPending => Box::new(PhaseNotPending),
        ReadinessPolicy::Auto | ReadinessPolicy::ContainersReady => Box::new(ContainersReady),
    };
    let gates = spec.readiness_gate_types();
    if gates.is_empty() {
        base
    } else {
        Box::new(WithReadinessGates::new(base, gates))
    }
}

fn status(pod: &Pod) -> Option<&PodStatus> {
    pod.status.as_ref()
}

fn phase(pod: &Pod) -> &str {
    status(pod).and_then(|s| s.phase.as_deref()).unwrap_or("Pending")
}

fn condition<'a>(pod: &'a Pod, condition_type: &str) -> Option<&'a str> {
    status(pod)?
        .conditions
        .iter()
        .flatten()
        .find(|c| c.type_ == condition_type)
        .map(|c| c.status.as_str())
}

fn failure_reason(pod: &Pod) -> String {
    let status = status(pod);
    let reason = status.and_then(|s| s.reason.as_deref()).unwrap_or("unknown reason");
    match status.and_then(|s| s.message.as_deref()) {
        Some(message) => format!("pod failed: {}: {}", reason, message),
        None => format!("pod failed: {}", reason),
    }
}

/// What a single poll concluded
enum Step<T> {
    Done(T),
    Continue(String),
}

/// Polls a pod until it is ready or gone
pub struct ReadinessWaiter {
    client: Arc<dyn ClusterClient>,
    poll_interval: Duration,
}

impl ReadinessWaiter {
    pub fn new(client: Arc<dyn ClusterClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Wait until `check` passes for the pod with the given uid
    ///
    /// A different uid or a disappearing pod means someone else replaced
    /// or deleted it and is reported as a conflict.
    pub async fn wait_ready(
        &self,
        id: &PodId,
        uid: Option<&str>,
        check: &dyn ReadinessCheck,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Pod> {
        self.poll(id, "become ready", timeout, token, |observed| match observed {
            Ok(pod) => {
                if let Some(message) = uid_changed(uid, &pod) {
                    return Err(ReconcileError::conflict(id, message));
                }
                match check.check(&pod) {
                    Readiness::Ready => Ok(Step::Done(pod)),
                    Readiness::Pending(status) => Ok(Step::Continue(status)),
                    Readiness::Failed(reason) => Err(ReconcileError::fatal(id, "become ready", reason)),
                }
            }
            Err(e) if e.is_not_found() => Err(ReconcileError::conflict(
                id,
                "pod was deleted while waiting for it to become ready",
            )),
            Err(e) => Err(ReconcileError::cluster("get", id, e)),
        })
        .await
    }

    /// Wait until the pod is gone
    ///
    /// Running out of time here leaves a pod behind, which is fatal rather
    /// than a timeout.
    pub async fn wait_deleted(
        &self,
        id: &PodId,
        uid: Option<&str>,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<()> {
        let result = self
            .poll(id, "be deleted", timeout, token, |observed| match observed {
                Ok(pod) => {
                    if let Some(message) = uid_changed(uid, &pod) {
                        return Err(ReconcileError::conflict(
                            id,
                            format!("pod was re-created while waiting for deletion: {}", message),
                        ));
                    }
                    let state = if pod.metadata.deletion_timestamp.is_some() {
                        "terminating"
                    } else {
                        "still present"
                    };
                    Ok(Step::Continue(state.to_string()))
                }
                Err(e) if e.is_not_found() => Ok(Step::Done(())),
                Err(e) => Err(ReconcileError::cluster("get", id, e)),
            })
            .await;

        match result {
            Err(ReconcileError::Timeout { waited, last_status, .. }) => Err(ReconcileError::fatal(
                id,
                "delete",
                format!(
                    "pod {} after {:?} and may be orphaned",
                    last_status, waited
                ),
            )),
            other => other,
        }
    }

    async fn poll<T, F>(
        &self,
        id: &PodId,
        operation: &str,
        timeout: Duration,
        token: &CancellationToken,
        mut step: F,
    ) -> Result<T>
    where
        F: FnMut(ClusterResult<Pod>) -> Result<Step<T>>,
    {
        info!(
            "Waiting for pod {} to {} (interval: {:?}, timeout: {:?})",
            id, operation, self.poll_interval, timeout
        );

        let started = Instant::now();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_status = "not observed yet".to_string();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Wait for pod {} cancelled", id);
                    return Err(ReconcileError::cancelled(id, operation));
                }
                _ = &mut deadline => {
                    return Err(ReconcileError::timeout(id, operation, started.elapsed(), last_status));
                }
                _ = interval.tick() => {}
            }

            let observed = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Wait for pod {} cancelled", id);
                    return Err(ReconcileError::cancelled(id, operation));
                }
                _ = &mut deadline => {
                    return Err(ReconcileError::timeout(id, operation, started.elapsed(), last_status));
                }
                observed = self.client.get(&id.namespace, &id.name) => observed,
            };

            match step(observed)? {
                Step::Done(value) => {
                    info!("Pod {} did {} after {:?}", id, operation, started.elapsed());
                    return Ok(value);
                }
                Step::Continue(status) => {
                    debug!("Pod {} not done: {}", id, status);
                    last_status = status;
                }
            }
        }
    }
}

fn uid_changed(expected: Option<&str>, pod: &Pod) -> Option<String> {
    let expected = expected?;
    let observed = pod.metadata.uid.as_deref().unwrap_or_default();
    (observed != expected).then(|| format!("uid changed from {} to {}", expected, observed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{MockCluster, MockClusterOptions};
    use podwright_translate::expand;

    const NGINX: &str = "metadata: {name: nginx}\ncontainers: [{name: nginx, image: 'nginx:1.25'}]\n";

    fn spec(yaml: &str) -> PodSpec {
        PodSpec::from_yaml(yaml).unwrap()
    }

    fn id() -> PodId {
        PodId::new("default", "nginx")
    }

    async fn setup(options: MockClusterOptions, yaml: &str) -> (Arc<MockCluster>, ReadinessWaiter, String) {
        let cluster = Arc::new(MockCluster::with_options(options));
        let created = cluster.create(&expand(&spec(yaml))).await.unwrap();
        let waiter = ReadinessWaiter::new(cluster.clone(), Duration::from_secs(1));
        (cluster, waiter, created.metadata.uid.unwrap())
    }

    fn pod_with(phase: &str, conditions: &[(&str, &str)]) -> Pod {
        let mut pod = Pod::default();
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            conditions: Some(
                conditions
                    .iter()
                    .map(|(t, s)| k8s_openapi::api::core::v1::PodCondition {
                        type_: t.to_string(),
                        status: s.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        });
        pod
    }

    #[test]
    fn test_containers_ready_check() {
        let check = ContainersReady;
        assert_eq!(check.check(&pod_with("Running", &[("ContainersReady", "True")])), Readiness::Ready);
        assert!(matches!(check.check(&pod_with("Pending", &[])), Readiness::Pending(_)));
        assert!(matches!(check.check(&pod_with("Failed", &[])), Readiness::Failed(_)));
        assert_eq!(check.check(&pod_with("Succeeded", &[])), Readiness::Ready);
    }

    #[test]
    fn test_phase_not_pending_check() {
        let check = PhaseNotPending;
        assert!(matches!(check.check(&pod_with("Pending", &[])), Readiness::Pending(_)));
        assert_eq!(check.check(&pod_with("Running", &[])), Readiness::Ready);
        assert_eq!(check.check(&Pod::default()), Readiness::Pending("phase Pending".to_string()));
    }

    #[test]
    fn test_gates_extend_base_check() {
        let check = WithReadinessGates::new(Box::new(ContainersReady), vec!["example.com/gate".to_string()]);

        let without_gate = pod_with("Running", &[("ContainersReady", "True")]);
        assert!(matches!(check.check(&without_gate), Readiness::Pending(s) if s.contains("example.com/gate")));

        let gate_only = pod_with("Pending", &[("example.com/gate", "True")]);
        assert!(matches!(check.check(&gate_only), Readiness::Pending(_)));

        let both = pod_with("Running", &[("ContainersReady", "True"), ("example.com/gate", "True")]);
        assert_eq!(check.check(&both), Readiness::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready() {
        let options = MockClusterOptions {
            ready_after_polls: 3,
            ..Default::default()
        };
        let (_cluster, waiter, uid) = setup(options, NGINX).await;
        let token = CancellationToken::new();

        let pod = waiter
            .wait_ready(&id(), Some(&uid), &ContainersReady, Duration::from_secs(30), &token)
            .await
            .unwrap();
        assert_eq!(pod.metadata.uid.as_deref(), Some(uid.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let options = MockClusterOptions {
            containers_never_ready: true,
            ..Default::default()
        };
        let (_cluster, waiter, uid) = setup(options, NGINX).await;
        let token = CancellationToken::new();

        let err = waiter
            .wait_ready(&id(), Some(&uid), &ContainersReady, Duration::from_secs(5), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("ContainersReady=False"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled_not_timeout() {
        let options = MockClusterOptions {
            containers_never_ready: true,
            ..Default::default()
        };
        let (_cluster, waiter, uid) = setup(options, NGINX).await;
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = waiter
            .wait_ready(&id(), Some(&uid), &ContainersReady, Duration::from_secs(60), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_written_by_third_party() {
        let yaml = format!("{}readinessGates: [{{conditionType: 'example.com/gate'}}]\n", NGINX);
        let (cluster, waiter, uid) = setup(MockClusterOptions::default(), &yaml).await;
        let check = readiness_check(ReadinessPolicy::Auto, &spec(&yaml));
        let token = CancellationToken::new();

        let writer = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            writer.set_condition(&id(), "example.com/gate", "True").await.unwrap();
        });

        let pod = waiter
            .wait_ready(&id(), Some(&uid), check.as_ref(), Duration::from_secs(30), &token)
            .await
            .unwrap();
        let ready = pod
            .status
            .unwrap()
            .conditions
            .unwrap()
            .into_iter()
            .any(|c| c.type_ == "Ready" && c.status == "True");
        assert!(ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uid_change_is_conflict() {
        let options = MockClusterOptions {
            containers_never_ready: true,
            ..Default::default()
        };
        let (cluster, waiter, uid) = setup(options, NGINX).await;
        cluster.recreate(&id()).await.unwrap();
        let token = CancellationToken::new();

        let err = waiter
            .wait_ready(&id(), Some(&uid), &ContainersReady, Duration::from_secs(30), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pod_is_fatal() {
        let options = MockClusterOptions {
            fail_pods: true,
            ..Default::default()
        };
        let (_cluster, waiter, uid) = setup(options, NGINX).await;
        let token = CancellationToken::new();

        let err = waiter
            .wait_ready(&id(), Some(&uid), &ContainersReady, Duration::from_secs(30), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_deleted() {
        let options = MockClusterOptions {
            deletion_lag_polls: 2,
            ..Default::default()
        };
        let (cluster, waiter, uid) = setup(options, NGINX).await;
        cluster.delete("default", "nginx").await.unwrap();
        let token = CancellationToken::new();

        waiter
            .wait_deleted(&id(), Some(&uid), Duration::from_secs(30), &token)
            .await
            .unwrap();
        assert!(!cluster.contains(&id()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_deletion_is_fatal() {
        let options = MockClusterOptions {
            stuck_deletion: true,
            ..Default::default()
        };
        let (cluster, waiter, uid) = setup(options, NGINX).await;
        cluster.delete("default", "nginx").await.unwrap();
        let token = CancellationToken::new();

        let err = waiter
            .wait_deleted(&id(), Some(&uid), Duration::from_secs(10), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().contains("orphaned"));
    }
}
