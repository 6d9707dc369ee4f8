//! Podwright Schema - the declarative pod model
//!
//! Pure data mirroring the cluster's pod shape. Polymorphic blocks (volume
//! sources, projections, probe handlers, env value sources) are closed sum
//! types. The only behaviour is [`PodSpec::validate`].

pub mod container;
pub mod enums;
pub mod pod;
pub mod security;
pub mod validate;
pub mod volume;

pub use container::{
    Container, ContainerPort, EnvFromRef, EnvFromSource, EnvVar, EnvVarSource, ExecAction,
    GrpcAction, HttpGetAction, HttpHeader, KeySelector, Lifecycle, LifecycleHandler,
    ObjectFieldSelector, PortRef, Probe, ProbeHandler, ResourceFieldSelector, ResourceRequirements,
    TcpSocketAction, VolumeMount,
};
pub use enums::{
    DnsPolicy, FsGroupChangePolicy, MountPropagation, PullPolicy, RestartPolicy,
    SeccompProfileType, TerminationMessagePolicy, WhenUnsatisfiable,
};
pub use pod::{
    LabelSelector, LocalObjectReference, Metadata, PodSpec, ReadinessGate, Toleration,
    TopologySpreadConstraint,
};
pub use security::{Capabilities, PodSecurityContext, SeLinuxOptions, SeccompProfile, SecurityContext, Sysctl};
pub use volume::{
    ClaimMetadata, ClaimSpec, ConfigMapProjection, ConfigMapVolumeSource, CsiVolumeSource,
    DownwardApiFile, DownwardApiProjection, DownwardApiVolumeSource, EmptyDirVolumeSource,
    EphemeralVolumeSource, FileMode, HostPathVolumeSource, KeyToPath,
    PersistentVolumeClaimVolumeSource, ProjectedVolumeSource, SecretProjection, SecretVolumeSource,
    ServiceAccountTokenProjection, Volume, VolumeProjection, VolumeSource,
};
