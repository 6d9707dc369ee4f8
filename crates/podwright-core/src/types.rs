use crate::error::{PodwrightError, Result};
use crate::resources::is_valid_name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace used when a pod does not declare one
pub const DEFAULT_NAMESPACE: &str = "default";

/// PodId uniquely identifies a pod within a cluster
///
/// The declarative identity string is `<namespace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodId {
    /// Namespace the pod lives in
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodId {
    /// Create a new PodId
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a PodId, falling back to the default namespace when none is given
    pub fn with_default_namespace(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self::new(namespace.unwrap_or(DEFAULT_NAMESPACE), name)
    }

    /// Parse the `<namespace>/<name>` import form
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = id.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(name), None) => (ns, name),
            _ => {
                return Err(PodwrightError::invalid_identity(
                    id,
                    "expected exactly one '/' separating namespace and name",
                ))
            }
        };

        if namespace.is_empty() || name.is_empty() {
            return Err(PodwrightError::invalid_identity(
                id,
                "namespace and name must both be non-empty",
            ));
        }
        if !is_valid_name(namespace) {
            return Err(PodwrightError::invalid_identity(
                id,
                format!("'{}' is not a valid namespace name", namespace),
            ));
        }
        if !is_valid_name(name) {
            return Err(PodwrightError::invalid_identity(
                id,
                format!("'{}' is not a valid pod name", name),
            ));
        }

        Ok(Self::new(namespace, name))
    }

    /// Get the API path for this pod
    pub fn api_path(&self) -> String {
        format!("/api/v1/namespaces/{}/pods/{}", self.namespace, self.name)
    }

    /// Get the API path for the pod collection of this namespace
    pub fn collection_path(&self) -> String {
        format!("/api/v1/namespaces/{}/pods", self.namespace)
    }
}

impl FromStr for PodId {
    type Err = PodwrightError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
