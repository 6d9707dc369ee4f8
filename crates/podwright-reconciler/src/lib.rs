//! Podwright Reconciler - drives pods on a cluster towards their declared spec
//!
//! The [`PodReconciler`] exposes create/read/update/delete/import plus
//! [`diff`](PodReconciler::diff) for planners. It talks to the cluster only
//! through a [`ClusterClient`] handed in at construction: [`ApiClient`] for a
//! real API server, [`MockCluster`] for tests.

pub mod api_client;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod mock;
pub mod reconciler;
pub mod waiter;

pub use api_client::ApiClient;
pub use classify::{classify, Classification, FieldChange, UpdatePolicy};
pub use client::ClusterClient;
pub use config::{ReadinessPolicy, ReconcilerConfig};
pub use error::{ClusterError, ClusterResult, ErrorKind, ReconcileError, Result};
pub use mock::{MockCluster, MockClusterOptions};
pub use reconciler::{LifecycleState, PodReconciler, ReconciledPod, UpdateAction, UpdateOutcome};
pub use waiter::{
    readiness_check, ContainersReady, PhaseNotPending, Readiness, ReadinessCheck, ReadinessWaiter,
    WithReadinessGates,
};
