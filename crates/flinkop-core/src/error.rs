// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for flinkop resource handling
#[derive(Error, Debug, Diagnostic)]
pub enum FlinkopError {
    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(flinkop::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Validation failed
    #[error("Validation failed for {resource_type}: {details}")]
    #[diagnostic(code(flinkop::validation_failed), help("{help_text}"))]
    ValidationFailed {
        #[allow(unused)]
        resource_type: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// Unrecognized service access scope
    #[error("Unknown service access scope: {value}")]
    #[diagnostic(
        code(flinkop::invalid_access_scope),
        help("Set spec.jobManager.accessScope to one of: Cluster, VPC, External")
    )]
    InvalidAccessScope {
        #[allow(unused)]
        value: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(flinkop::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Manifest could not be read
    #[error("Failed to read manifest '{path}': {message}")]
    #[diagnostic(
        code(flinkop::manifest_unreadable),
        help("Check that the file exists and is readable")
    )]
    ManifestUnreadable {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, FlinkopError>;

impl FlinkopError {
    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a ValidationFailed error
    pub fn validation_failed(
        resource_type: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            resource_type: resource_type.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    pub fn invalid_access_scope(value: impl Into<String>) -> Self {
        Self::InvalidAccessScope {
            value: value.into(),
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

    pub fn manifest_unreadable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ManifestUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = FlinkopError::invalid_access_scope("Public");
        assert!(matches!(err, FlinkopError::InvalidAccessScope { .. }));
        assert_eq!(err.to_string(), "Unknown service access scope: Public");

        let err = FlinkopError::validation_failed(
            "FlinkCluster",
            "taskManager.replicas must not be negative",
            "Set spec.taskManager.replicas to 0 or more",
        );
        assert!(matches!(err, FlinkopError::ValidationFailed { .. }));
    }
}
