use crate::classify::{apply_changes, classify, Classification};
use crate::client::ClusterClient;
use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result};
use crate::waiter::{readiness_check, ReadinessWaiter};
use podwright_core::{Pod, PodId};
use podwright_schema::PodSpec;
use podwright_translate::{expand, flatten};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a pod is in its reconcile lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Absent,
    Creating,
    Ready,
    Updating,
    Deleting,
    /// The last wait did not reach readiness
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A live pod together with its flattened spec
#[derive(Debug, Clone)]
pub struct ReconciledPod {
    pub id: PodId,
    pub uid: String,
    pub resource_version: String,
    pub generation: Option<i64>,
    /// Live state in schema form, reconciled against the request it came from
    pub spec: PodSpec,
    /// The object as returned by the cluster
    pub live: Pod,
}

impl ReconciledPod {
    pub fn from_live(live: Pod, prior: Option<&PodSpec>) -> Result<Self> {
        let spec = flatten(&live, prior)?;
        Ok(Self {
            id: spec.id(),
            uid: live.metadata.uid.clone().unwrap_or_default(),
            resource_version: live.metadata.resource_version.clone().unwrap_or_default(),
            generation: live.metadata.generation,
            spec,
            live,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Created,
    NoChange,
    Updated,
    Replaced,
}

/// Result of an update or apply
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub pod: ReconciledPod,
    pub action: UpdateAction,
    /// Uid of the pod before the call, if one existed
    pub previous_uid: Option<String>,
}

impl UpdateOutcome {
    /// Whether the call left a different pod object behind
    pub fn identity_changed(&self) -> bool {
        self.previous_uid.as_deref() != Some(self.pod.uid.as_str())
    }
}

/// Drives pods towards their declared spec
///
/// Calls for different pods may run concurrently. Calls for the same pod
/// are expected to be serialized by the caller.
pub struct PodReconciler {
    client: Arc<dyn ClusterClient>,
    waiter: ReadinessWaiter,
    config: ReconcilerConfig,
    states: RwLock<HashMap<PodId, LifecycleState>>,
}

impl PodReconciler {
    pub fn new(client: Arc<dyn ClusterClient>, config: ReconcilerConfig) -> Self {
        let waiter = ReadinessWaiter::new(client.clone(), config.poll_interval);
        Self {
            client,
            waiter,
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Last known lifecycle state of a pod
    pub async fn state(&self, id: &PodId) -> LifecycleState {
        self.states
            .read()
            .await
            .get(id)
            .copied()
            .unwrap_or(LifecycleState::Absent)
    }

    async fn transition(&self, id: &PodId, next: LifecycleState) {
        let mut states = self.states.write().await;
        let previous = states.get(id).copied().unwrap_or(LifecycleState::Absent);
        if previous != next {
            info!("Pod {} {} -> {}", id, previous, next);
        }
        if next == LifecycleState::Absent {
            states.remove(id);
        } else {
            states.insert(id.clone(), next);
        }
    }

    async fn get_live(&self, id: &PodId) -> Result<Option<Pod>> {
        match self.client.get(&id.namespace, &id.name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ReconcileError::cluster("get", id, e)),
        }
    }

    /// Create a pod and wait for it to become ready
    ///
    /// A pod that already exists with the same declared state is adopted
    /// without any write; a different one is a conflict.
    pub async fn create(&self, spec: &PodSpec, token: &CancellationToken) -> Result<ReconciledPod> {
        spec.validate()?;
        let id = spec.id();
        let desired = expand(spec);

        if let Some(existing) = self.get_live(&id).await? {
            return self.adopt(&id, spec, &desired, existing, token).await;
        }

        info!("Creating pod {}", id);
        self.transition(&id, LifecycleState::Creating).await;
        let created = match self.client.create(&desired).await {
            Ok(pod) => pod,
            Err(e) => {
                warn!("Create of pod {} failed: {}", id, e);
                self.transition(&id, LifecycleState::Absent).await;
                return Err(ReconcileError::cluster("create", &id, e));
            }
        };

        self.await_ready(&id, spec, created, self.config.create_timeout, token)
            .await
    }

    async fn adopt(
        &self,
        id: &PodId,
        spec: &PodSpec,
        desired: &Pod,
        existing: Pod,
        token: &CancellationToken,
    ) -> Result<ReconciledPod> {
        if existing.metadata.deletion_timestamp.is_some() {
            return Err(ReconcileError::conflict(id, "pod is being deleted"));
        }
        let observed = expand(&flatten(&existing, Some(spec))?);
        let classification = classify(&observed, desired)?;
        if classification != Classification::NoChange {
            let paths: Vec<&str> = classification.changes().iter().map(|c| c.path.as_str()).collect();
            return Err(ReconcileError::conflict(
                id,
                format!("a different pod with this name already exists (differs at {})", paths.join(", ")),
            ));
        }

        info!("Pod {} already exists with the declared state, adopting it", id);
        self.await_ready(id, spec, existing, self.config.create_timeout, token)
            .await
    }

    async fn await_ready(
        &self,
        id: &PodId,
        spec: &PodSpec,
        submitted: Pod,
        timeout: std::time::Duration,
        token: &CancellationToken,
    ) -> Result<ReconciledPod> {
        let check = readiness_check(self.config.readiness, spec);
        let uid = submitted.metadata.uid.clone();
        match self
            .waiter
            .wait_ready(id, uid.as_deref(), check.as_ref(), timeout, token)
            .await
        {
            Ok(live) => {
                self.transition(id, LifecycleState::Ready).await;
                ReconciledPod::from_live(live, Some(spec))
            }
            Err(e) => {
                self.transition(id, LifecycleState::Failed).await;
                Err(e)
            }
        }
    }

    /// Refresh a pod from the cluster
    ///
    /// A missing pod is `Ok(None)`: drift, not a failure. With a prior spec,
    /// server defaults the prior left unset are filtered out.
    pub async fn read(&self, id: &PodId, prior: Option<&PodSpec>) -> Result<Option<ReconciledPod>> {
        debug!("Reading pod {}", id);
        match self.get_live(id).await? {
            Some(live) => ReconciledPod::from_live(live, prior).map(Some),
            None => {
                self.transition(id, LifecycleState::Absent).await;
                Ok(None)
            }
        }
    }

    /// Read a pod by its `<namespace>/<name>` identity
    pub async fn import(&self, id: &str) -> Result<ReconciledPod> {
        let id = PodId::parse(id)?;
        info!("Importing pod {}", id);
        self.read(&id, None)
            .await?
            .ok_or_else(|| ReconcileError::not_found(&id))
    }

    /// Whether moving from `old` to `new` replaces the pod
    pub fn diff(&self, old: &PodSpec, new: &PodSpec) -> Result<bool> {
        Ok(self.plan(old, new)?.requires_replace())
    }

    /// Classify the change from `old` to `new` without touching the cluster
    pub fn plan(&self, old: &PodSpec, new: &PodSpec) -> Result<Classification> {
        new.validate()?;
        Ok(classify(&expand(old), &expand(new))?)
    }

    /// Move a pod from `old` to `new`, in place when possible
    pub async fn update(
        &self,
        old: &PodSpec,
        new: &PodSpec,
        token: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let classification = self.plan(old, new)?;
        let id = old.id();

        match classification {
            Classification::NoChange => {
                debug!("Pod {} unchanged", id);
                let pod = self
                    .read(&id, Some(new))
                    .await?
                    .ok_or_else(|| ReconcileError::not_found(&id))?;
                Ok(UpdateOutcome {
                    previous_uid: Some(pod.uid.clone()),
                    pod,
                    action: UpdateAction::NoChange,
                })
            }
            Classification::Replace(_) => {
                info!(
                    "Replacing pod {} (immutable fields changed: {})",
                    id,
                    classification.replace_paths().join(", ")
                );
                let previous_uid = self
                    .get_live(&id)
                    .await?
                    .and_then(|live| live.metadata.uid);
                self.transition(&id, LifecycleState::Updating).await;
                self.delete(&id, token).await?;
                let pod = self.create(new, token).await?;
                Ok(UpdateOutcome {
                    pod,
                    action: UpdateAction::Replaced,
                    previous_uid,
                })
            }
            Classification::InPlaceUpdate(changes) => {
                info!("Updating pod {} in place ({} changes)", id, changes.len());
                let live = self
                    .get_live(&id)
                    .await?
                    .ok_or_else(|| ReconcileError::not_found(&id))?;
                let previous_uid = live.metadata.uid.clone();

                self.transition(&id, LifecycleState::Updating).await;
                let patched = apply_changes(&live, &changes)?;
                let updated = match self.client.update(&patched).await {
                    Ok(pod) => pod,
                    Err(e) => {
                        warn!("Update of pod {} failed: {}", id, e);
                        self.transition(&id, LifecycleState::Failed).await;
                        return Err(ReconcileError::cluster("update", &id, e));
                    }
                };

                let pod = if changes.iter().any(|c| c.touches_spec()) {
                    self.await_ready(&id, new, updated, self.config.update_timeout, token)
                        .await?
                } else {
                    self.transition(&id, LifecycleState::Ready).await;
                    ReconciledPod::from_live(updated, Some(new))?
                };
                Ok(UpdateOutcome {
                    pod,
                    action: UpdateAction::Updated,
                    previous_uid,
                })
            }
        }
    }

    /// Create the pod if it is missing, otherwise update it to `spec`
    ///
    /// The live pod, flattened against `spec`, stands in for the old state.
    pub async fn apply(&self, spec: &PodSpec, token: &CancellationToken) -> Result<UpdateOutcome> {
        spec.validate()?;
        match self.read(&spec.id(), Some(spec)).await? {
            None => {
                let pod = self.create(spec, token).await?;
                Ok(UpdateOutcome {
                    pod,
                    action: UpdateAction::Created,
                    previous_uid: None,
                })
            }
            Some(current) => self.update(&current.spec, spec, token).await,
        }
    }

    /// Delete a pod and wait until it is gone
    ///
    /// Deleting a pod that does not exist succeeds.
    pub async fn delete(&self, id: &PodId, token: &CancellationToken) -> Result<()> {
        let Some(live) = self.get_live(id).await? else {
            debug!("Pod {} already absent", id);
            self.transition(id, LifecycleState::Absent).await;
            return Ok(());
        };

        info!("Deleting pod {}", id);
        self.transition(id, LifecycleState::Deleting).await;
        match self.client.delete(&id.namespace, &id.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!("Delete of pod {} failed: {}", id, e);
                self.transition(id, LifecycleState::Failed).await;
                return Err(ReconcileError::cluster("delete", id, e));
            }
        }

        match self
            .waiter
            .wait_deleted(id, live.metadata.uid.as_deref(), self.config.delete_timeout, token)
            .await
        {
            Ok(()) => {
                self.transition(id, LifecycleState::Absent).await;
                Ok(())
            }
            Err(e) => {
                self.transition(id, LifecycleState::Failed).await;
                Err(e)
            }
        }
    }
}
