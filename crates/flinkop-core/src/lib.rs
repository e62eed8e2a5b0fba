//! Flinkop Core - Resource model for the Flink cluster operator
//!
//! This crate provides:
//! - The `FlinkCluster` custom resource and its status types
//! - A common `Resource` trait over the Kubernetes objects the operator manages
//! - Error types with miette diagnostics
//! - Type-safe resource keys, names and labels
//! - Serialization helpers

pub mod cluster;
pub mod error;
pub mod naming;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use cluster::{
    AccessScope, ClusterComponentsStatus, ClusterPhase, ComponentState, ComponentStatus,
    DesiredPhase, FlinkCluster, FlinkClusterSpec, FlinkClusterStatus, ImageSpec,
    JobManagerPorts, JobManagerSpec, JobPhase, JobRestartPolicy, JobSpec, JobStatus,
    TaskManagerPorts, TaskManagerSpec,
};
pub use error::{FlinkopError, Result};
pub use resources::{is_valid_name, Resource, ResourceError, ResourceQuantities};
pub use types::{GroupVersionKind, ResourceKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::apps::v1::Deployment;
pub use k8s_openapi::api::batch::v1::Job;
pub use k8s_openapi::api::core::v1::{Pod, Service};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        FlinkopError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        FlinkopError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_errors_are_diagnostics() {
        let result: Result<FlinkCluster> = from_yaml("spec: [unclosed");
        assert!(matches!(
            result,
            Err(FlinkopError::SerializationError { .. })
        ));
    }
}
