//! The `FlinkCluster` custom resource: spec, status and lifecycle enums.

use crate::error::{FlinkopError, Result};
use crate::resources::Resource;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// API group of the custom resource
pub const GROUP: &str = "flinkoperator.k8s.io";
/// API version of the custom resource
pub const VERSION: &str = "v1alpha1";

fn default_api_version() -> String {
    FlinkCluster::API_VERSION.to_string()
}

fn default_kind() -> String {
    FlinkCluster::KIND.to_string()
}

/// A Flink cluster: one JobManager, a pool of TaskManagers and an optional job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlinkCluster {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: FlinkClusterSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FlinkClusterStatus>,
}

impl Resource for FlinkCluster {
    const API_VERSION: &'static str = "flinkoperator.k8s.io/v1alpha1";
    const KIND: &'static str = "FlinkCluster";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> std::result::Result<(), crate::ResourceError> {
        crate::resources::validate_base(&self.metadata)?;
        if self.spec.task_manager.replicas < 0 {
            return Err(crate::ResourceError::ValidationFailed(
                "spec.taskManager.replicas must not be negative".to_string(),
            ));
        }
        if let Some(job) = &self.spec.job {
            if job.jar_file.is_empty() {
                return Err(crate::ResourceError::MissingField(
                    "spec.job.jarFile".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl FlinkCluster {
    pub fn new(namespace: &str, name: &str, spec: FlinkClusterSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    /// Namespace, or "default" when unset
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Current lifecycle phase, if a status has been recorded
    pub fn phase(&self) -> Option<ClusterPhase> {
        self.status.as_ref().map(|s| s.state)
    }

    /// Load a manifest from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| FlinkopError::manifest_unreadable(path.display().to_string(), e.to_string()))?;
        let cluster: FlinkCluster = crate::from_yaml(&data)?;

        if cluster.kind != Self::KIND {
            return Err(FlinkopError::invalid_resource(
                format!("expected kind {}, found {}", Self::KIND, cluster.kind),
                "Pass a FlinkCluster manifest",
            ));
        }
        cluster.validate().map_err(|e| {
            FlinkopError::validation_failed(Self::KIND, e.to_string(), "Fix the manifest and retry")
        })?;

        Ok(cluster)
    }
}

/// Desired state of a Flink cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlinkClusterSpec {
    pub image: ImageSpec,
    #[serde(default)]
    pub job_manager: JobManagerSpec,
    pub task_manager: TaskManagerSpec,
    /// Present for job clusters, absent for session clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSpec>,
    /// Extra environment variables for every Flink container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvVar>,
    /// Entries rendered into `flink-conf.yaml` through FLINK_PROPERTIES
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flink_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub desired_phase: DesiredPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secrets: Option<Vec<LocalObjectReference>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManagerSpec {
    #[serde(default = "default_job_manager_replicas")]
    pub replicas: i32,
    /// One of `Cluster`, `VPC`, `External`; parsed with [`AccessScope::from_str`]
    #[serde(default = "default_access_scope")]
    pub access_scope: String,
    #[serde(default)]
    pub ports: JobManagerPorts,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

fn default_job_manager_replicas() -> i32 {
    1
}

fn default_access_scope() -> String {
    AccessScope::Cluster.to_string()
}

impl Default for JobManagerSpec {
    fn default() -> Self {
        Self {
            replicas: default_job_manager_replicas(),
            access_scope: default_access_scope(),
            ports: JobManagerPorts::default(),
            resources: ResourceRequirements::default(),
            volumes: Vec::new(),
            mounts: Vec::new(),
            node_selector: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManagerPorts {
    #[serde(default = "JobManagerPorts::default_rpc")]
    pub rpc: i32,
    #[serde(default = "JobManagerPorts::default_blob")]
    pub blob: i32,
    #[serde(default = "JobManagerPorts::default_query")]
    pub query: i32,
    #[serde(default = "JobManagerPorts::default_ui")]
    pub ui: i32,
}

impl JobManagerPorts {
    fn default_rpc() -> i32 {
        6123
    }
    fn default_blob() -> i32 {
        6124
    }
    fn default_query() -> i32 {
        6125
    }
    fn default_ui() -> i32 {
        8081
    }
}

impl Default for JobManagerPorts {
    fn default() -> Self {
        Self {
            rpc: Self::default_rpc(),
            blob: Self::default_blob(),
            query: Self::default_query(),
            ui: Self::default_ui(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskManagerSpec {
    pub replicas: i32,
    #[serde(default)]
    pub ports: TaskManagerPorts,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Containers appended after the TaskManager container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Container>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskManagerPorts {
    #[serde(default = "TaskManagerPorts::default_data")]
    pub data: i32,
    #[serde(default = "TaskManagerPorts::default_rpc")]
    pub rpc: i32,
    #[serde(default = "TaskManagerPorts::default_query")]
    pub query: i32,
}

impl TaskManagerPorts {
    fn default_data() -> i32 {
        6121
    }
    fn default_rpc() -> i32 {
        6122
    }
    fn default_query() -> i32 {
        6125
    }
}

impl Default for TaskManagerPorts {
    fn default() -> Self {
        Self {
            data: Self::default_data(),
            rpc: Self::default_rpc(),
            query: Self::default_query(),
        }
    }
}

/// The one-shot job submitted to a job cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Local path inside the image, or a remote URI such as `gs://bucket/app.jar`
    pub jar_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<i32>,
    /// Savepoint to restore the job from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savepoint: Option<String>,
    /// Target directory for savepoints taken by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savepoints_dir: Option<String>,
    #[serde(default)]
    pub allow_non_restored_state: bool,
    #[serde(default)]
    pub no_logging_to_stdout: bool,
    #[serde(default)]
    pub restart_policy: JobRestartPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<VolumeMount>,
}

/// Restart policy of the job submitter pod
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRestartPolicy {
    Never,
    #[default]
    OnFailure,
}

impl JobRestartPolicy {
    /// Pod restartPolicy string
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRestartPolicy::Never => "Never",
            JobRestartPolicy::OnFailure => "OnFailure",
        }
    }
}

/// Phase the user wants the cluster in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredPhase {
    #[default]
    Running,
    Stopped,
}

/// How the JobManager service is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    /// Reachable only inside the cluster
    Cluster,
    /// Internal load balancer, reachable from the VPC
    Vpc,
    /// External load balancer
    External,
}

impl FromStr for AccessScope {
    type Err = FlinkopError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Cluster" => Ok(AccessScope::Cluster),
            "VPC" => Ok(AccessScope::Vpc),
            "External" => Ok(AccessScope::External),
            other => Err(FlinkopError::invalid_access_scope(other)),
        }
    }
}

impl fmt::Display for AccessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessScope::Cluster => "Cluster",
            AccessScope::Vpc => "VPC",
            AccessScope::External => "External",
        };
        write!(f, "{}", s)
    }
}

/// Cluster lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterPhase {
    #[default]
    Creating,
    Running,
    Updating,
    Stopping,
    Stopped,
    Failed,
}

impl ClusterPhase {
    pub const ALL: [ClusterPhase; 6] = [
        ClusterPhase::Creating,
        ClusterPhase::Running,
        ClusterPhase::Updating,
        ClusterPhase::Stopping,
        ClusterPhase::Stopped,
        ClusterPhase::Failed,
    ];

    /// Phases in which no managed resource should exist
    pub fn is_shut_down(&self) -> bool {
        matches!(self, ClusterPhase::Stopping | ClusterPhase::Stopped)
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterPhase::Creating => "Creating",
            ClusterPhase::Running => "Running",
            ClusterPhase::Updating => "Updating",
            ClusterPhase::Stopping => "Stopping",
            ClusterPhase::Stopped => "Stopped",
            ClusterPhase::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Execution phase of the submitted job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Succeeded | JobPhase::Failed | JobPhase::Cancelled
        )
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Pending => "Pending",
            JobPhase::Running => "Running",
            JobPhase::Succeeded => "Succeeded",
            JobPhase::Failed => "Failed",
            JobPhase::Cancelled => "Cancelled",
            JobPhase::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Readiness of a single managed component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    Ready,
    #[default]
    NotReady,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub name: String,
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub name: String,
    /// Flink job ID, permanent for the lifetime of one submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub state: JobPhase,
    /// Savepoint taken by the operator that the next submission restores from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_savepoint: Option<String>,
    /// `spec.job.savepoint` at the time `restore_savepoint` was recorded.
    /// Editing the spec savepoint afterwards makes the spec value win again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_savepoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterComponentsStatus {
    pub job_manager_deployment: ComponentStatus,
    pub job_manager_service: ComponentStatus,
    pub task_manager_deployment: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobStatus>,
}

/// Observed state of a Flink cluster, persisted across passes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlinkClusterStatus {
    pub state: ClusterPhase,
    #[serde(default)]
    pub components: ClusterComponentsStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Consecutive passes whose writes failed
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl FlinkClusterStatus {
    /// Equality that ignores the update timestamp
    pub fn same_as(&self, other: &FlinkClusterStatus) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.last_update_time = None;
        b.last_update_time = None;
        a == b
    }

    /// Recorded Flink job ID, if any
    pub fn job_id(&self) -> Option<&str> {
        self.components
            .job
            .as_ref()
            .and_then(|j| j.id.as_deref())
            .filter(|id| !id.is_empty())
    }
}
