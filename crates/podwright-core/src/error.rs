// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Podwright operations
#[derive(Error, Debug, Diagnostic)]
pub enum PodwrightError {
    /// The declarative pod tree is malformed or ambiguous
    #[error("Validation failed for {field}: {details}")]
    #[diagnostic(
        code(podwright::validation_failed),
        help("{help_text}")
    )]
    ValidationFailed {
        #[allow(unused)]
        field: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// Quantity string could not be parsed
    #[error("Invalid quantity '{value}': {reason}")]
    #[diagnostic(
        code(podwright::invalid_quantity),
        help("Use a Kubernetes quantity such as '250m', '0.5', '512Mi', '1Gi' or '1e3'")
    )]
    InvalidQuantity {
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// Import identity is not of the form `<namespace>/<name>`
    #[error("Invalid pod identity '{id}': {reason}")]
    #[diagnostic(
        code(podwright::invalid_identity),
        help("Pod identities take the form '<namespace>/<name>', e.g. 'default/nginx'")
    )]
    InvalidIdentity {
        #[allow(unused)]
        id: String,
        #[allow(unused)]
        reason: String,
    },

    /// Cluster object could not be mapped back onto the schema
    #[error("Translation failed for {object}: {message}")]
    #[diagnostic(
        code(podwright::translation_failed),
        help("The live object carries a shape Podwright does not model. Inspect it with `podwright read`")
    )]
    TranslationFailed {
        #[allow(unused)]
        object: String,
        #[allow(unused)]
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(podwright::serialization_error),
        help("Ensure the document is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(podwright::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Podwright operations
pub type Result<T> = std::result::Result<T, PodwrightError>;

impl PodwrightError {
    /// Create a ValidationFailed error
    pub fn validation_failed(
        field: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            field: field.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidIdentity error
    pub fn invalid_identity(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a TranslationFailed error
    pub fn translation_failed(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TranslationFailed {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether this error was raised before any cluster call could be made
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. }
                | Self::InvalidQuantity { .. }
                | Self::InvalidIdentity { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PodwrightError::invalid_identity("nginx", "missing namespace");
        assert!(matches!(err, PodwrightError::InvalidIdentity { .. }));
        assert!(err.is_validation());

        let err = PodwrightError::validation_failed(
            "spec.containers",
            "at least one container is required",
            "Add a container block to the pod",
        );
        assert!(matches!(err, PodwrightError::ValidationFailed { .. }));
        assert!(err.is_validation());

        let err = PodwrightError::translation_failed("default/nginx", "pod has no spec");
        assert!(!err.is_validation());
    }

    #[test]
    fn test_error_display_names_the_field() {
        let err = PodwrightError::validation_failed(
            "spec.containers[0].name",
            "must not be empty",
            "Give every container a name",
        );
        assert_eq!(
            err.to_string(),
            "Validation failed for spec.containers[0].name: must not be empty"
        );
    }
}
