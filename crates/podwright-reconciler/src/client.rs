use crate::error::ClusterResult;
use async_trait::async_trait;
use podwright_core::Pod;

/// Capability the reconciler needs from a cluster
///
/// Writes carry `metadata.resourceVersion` as the optimistic concurrency
/// token; a stale token surfaces as [`ClusterError::Conflict`](crate::ClusterError::Conflict).
/// Implementations must be safe for concurrent use across pod identities.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Submit a new pod, returning the object as stored by the cluster
    async fn create(&self, pod: &Pod) -> ClusterResult<Pod>;

    /// Fetch a pod by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> ClusterResult<Pod>;

    /// Replace the mutable parts of an existing pod
    async fn update(&self, pod: &Pod) -> ClusterResult<Pod>;

    /// Request deletion; the pod may linger while it terminates
    async fn delete(&self, namespace: &str, name: &str) -> ClusterResult<()>;
}
