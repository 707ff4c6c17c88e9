// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for nodeprobe data model operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// A spec failed local validation before reaching the control plane
    #[error("Invalid {resource} spec: {reason}")]
    #[diagnostic(code(nodeprobe::invalid_spec), help("{suggestion}"))]
    InvalidSpec {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// A control-plane object lacks a field the harness relies on
    #[error("{resource} is missing required field: {field}")]
    #[diagnostic(
        code(nodeprobe::missing_field),
        help("The control plane returned an incomplete object. Inspect it with `kubectl get -o yaml`")
    )]
    MissingField {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        field: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(nodeprobe::serialization_error),
        help("Ensure the document is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidSpec error
    pub fn invalid_spec(
        resource: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidSpec {
            resource: resource.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(resource: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            resource: resource.into(),
            field: field.into(),
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
}
