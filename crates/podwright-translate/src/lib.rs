//! Podwright Translate - schema model to cluster object and back
//!
//! - [`expand`] turns a validated [`PodSpec`](podwright_schema::PodSpec) into a
//!   cluster-native [`Pod`](podwright_core::Pod)
//! - [`flatten`] maps a live pod back, reconciling server defaults against the
//!   prior request so that `expand(flatten(expand(x))) == expand(x)`

pub mod defaults;
pub mod expand;
pub mod flatten;

pub use defaults::{apply_server_defaults, is_injected_volume, SERVICE_ACCOUNT_MOUNT_PATH};
pub use expand::expand;
pub use flatten::flatten;
