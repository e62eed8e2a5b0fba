use miette::Diagnostic;
use thiserror::Error;

/// Error type for observation, reconciliation and gateway operations
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Object does not exist in the remote store
    #[error("Resource not found: {key}")]
    #[diagnostic(
        code(flinkop::controller::not_found),
        help("The object may not have been created yet, or was deleted concurrently")
    )]
    NotFound {
        #[allow(unused)]
        key: String,
    },

    /// Write rejected because the object changed or already exists
    #[error("Conflict writing {key}: {message}")]
    #[diagnostic(
        code(flinkop::controller::conflict),
        help("The object was modified concurrently. The next pass re-reads it and retries")
    )]
    Conflict {
        #[allow(unused)]
        key: String,
        #[allow(unused)]
        message: String,
    },

    /// Transport or server error from the remote store
    #[error("Gateway request failed: {message}")]
    #[diagnostic(
        code(flinkop::controller::gateway_error),
        help("Check that the API server at the configured URL is reachable and the credentials are valid")
    )]
    Gateway {
        #[allow(unused)]
        message: String,
    },

    /// Observed state breaks an assumption the controller relies on
    #[error("Invariant violated for cluster '{cluster}': {message}")]
    #[diagnostic(
        code(flinkop::controller::invariant_violation),
        help("Inspect the resources labelled cluster={cluster} and remove the unexpected ones")
    )]
    InvariantViolation {
        #[allow(unused)]
        cluster: String,
        #[allow(unused)]
        message: String,
    },

    /// The cluster spec cannot be turned into resources
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(flinkop::controller::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// The JobManager REST API could not be queried
    #[error("JobManager request to {url} failed: {message}")]
    #[diagnostic(
        code(flinkop::controller::probe_failed),
        help("Check that the JobManager service is up and its UI port is reachable")
    )]
    ProbeFailed {
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        message: String,
    },

    /// A savepoint could not be taken
    #[error("Savepoint for job {job_id} failed: {message}")]
    #[diagnostic(
        code(flinkop::controller::savepoint_failed),
        help("The job keeps running. Check the JobManager logs and spec.job.savepointsDir")
    )]
    SavepointFailed {
        #[allow(unused)]
        job_id: String,
        #[allow(unused)]
        message: String,
    },

    /// An operation ran past its deadline
    #[error("{operation} did not finish within {timeout_secs}s")]
    #[diagnostic(
        code(flinkop::controller::deadline_exceeded),
        help("Writes already issued are kept and retried on the next pass")
    )]
    DeadlineExceeded {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        timeout_secs: u64,
    },

    /// Encoding or decoding a remote object failed
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(flinkop::controller::serialization_error),
        help("The remote object does not match the expected schema")
    )]
    Serialization {
        #[allow(unused)]
        message: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] flinkop_core::FlinkopError),

    /// Internal error
    #[error("Internal controller error: {message}")]
    #[diagnostic(
        code(flinkop::controller::internal_error),
        help("This is likely a bug in flinkop-controller. Please report it with the full error details")
    )]
    Internal {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn conflict(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway {
            message: message.into(),
        }
    }

    pub fn invariant_violation(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn probe_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProbeFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn savepoint_failed(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SavepointFailed {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    pub fn deadline_exceeded(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            timeout_secs,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Errors that no retry can fix until the user edits the cluster
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::Core(flinkop_core::FlinkopError::InvalidAccessScope { .. })
                | Self::Core(flinkop_core::FlinkopError::ValidationFailed { .. })
                | Self::Core(flinkop_core::FlinkopError::InvalidResource { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err = ControllerError::not_found("v1/Service/flink/wc-jobmanager");
        assert!(err.is_not_found());
        assert!(!err.is_config_error());
        assert!(!ControllerError::gateway("connection refused").is_not_found());
    }

    #[test]
    fn test_config_errors() {
        let err: ControllerError = flinkop_core::FlinkopError::invalid_access_scope("Public").into();
        assert!(err.is_config_error());
        assert_eq!(err.to_string(), "Unknown service access scope: Public");

        assert!(ControllerError::invalid_config("bad", "fix it").is_config_error());
        assert!(!ControllerError::invariant_violation("wc", "2 job pods").is_config_error());
    }
}
