//! Podwright Core - Shared primitives for the Podwright pod reconciler
//!
//! This crate provides:
//! - Error types with miette diagnostics
//! - Pod identities in `<namespace>/<name>` form
//! - Canonical resource quantities
//! - Serialization helpers

pub mod error;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{PodwrightError, Result};
pub use resources::{is_valid_label_name, is_valid_name, Quantity, QuantityFormat};
pub use types::{PodId, DEFAULT_NAMESPACE};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::Pod;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a value to YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        PodwrightError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        PodwrightError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Convert between two serde representations of the same document
pub fn convert<S: serde::Serialize, T: for<'de> serde::Deserialize<'de>>(value: &S) -> Result<T> {
    let json = serde_json::to_value(value).map_err(|e| {
        PodwrightError::serialization_error(
            format!("Failed to encode value: {}", e),
            Some(Box::new(e)),
        )
    })?;
    serde_json::from_value(json).map_err(|e| {
        PodwrightError::serialization_error(
            format!("Failed to decode value: {}", e),
            Some(Box::new(e)),
        )
    })
}
