//! Derives component readiness and job progress from observed resources.

use crate::observer::ObservedClusterState;
use flinkop_core::k8s_openapi::api::apps::v1::Deployment;
use flinkop_core::k8s_openapi::api::batch::v1::Job;
use flinkop_core::k8s_openapi::api::core::v1::Pod;
use flinkop_core::naming;
use flinkop_core::{ComponentState, ComponentStatus, FlinkCluster, JobPhase};

/// Ready replicas cover the desired count and no rollout is pending
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = &deployment.status else {
        return desired == 0;
    };

    let rollout_current = match (deployment.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    };
    let updated = status.updated_replicas.map_or(true, |u| u >= desired);

    status.ready_replicas.unwrap_or(0) >= desired && rollout_current && updated
}

fn ready_replicas(deployment: Option<&Deployment>) -> Option<i32> {
    deployment
        .and_then(|d| d.status.as_ref())
        .map(|s| s.ready_replicas.unwrap_or(0))
}

fn deployment_status(name: String, deployment: Option<&Deployment>, with_replicas: bool) -> ComponentStatus {
    ComponentStatus {
        name,
        state: match deployment {
            Some(d) if deployment_ready(d) => ComponentState::Ready,
            _ => ComponentState::NotReady,
        },
        ready_replicas: if with_replicas {
            ready_replicas(deployment)
        } else {
            None
        },
    }
}

pub fn job_manager_deployment_status(cluster: &FlinkCluster, observed: &ObservedClusterState) -> ComponentStatus {
    deployment_status(
        naming::job_manager_deployment_name(cluster_name(cluster)),
        observed.jm_deployment.as_ref(),
        false,
    )
}

pub fn job_manager_service_status(cluster: &FlinkCluster, observed: &ObservedClusterState) -> ComponentStatus {
    ComponentStatus {
        name: naming::job_manager_service_name(cluster_name(cluster)),
        state: if observed.jm_service.is_some() {
            ComponentState::Ready
        } else {
            ComponentState::NotReady
        },
        ready_replicas: None,
    }
}

pub fn task_manager_deployment_status(cluster: &FlinkCluster, observed: &ObservedClusterState) -> ComponentStatus {
    deployment_status(
        naming::task_manager_deployment_name(cluster_name(cluster)),
        observed.tm_deployment.as_ref(),
        true,
    )
}

fn cluster_name(cluster: &FlinkCluster) -> &str {
    cluster.metadata.name.as_deref().unwrap_or_default()
}

fn condition_true(job: &Job, condition: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == condition && c.status == "True")
}

/// Execution phase of the submitted job
///
/// Terminal conditions on the batch Job win; otherwise an active submitter
/// with a known Flink job ID means the job runs.
pub fn job_phase(job: &Job, pod: Option<&Pod>, flink_job_id: Option<&str>) -> JobPhase {
    if condition_true(job, "Complete") {
        return JobPhase::Succeeded;
    }
    if condition_true(job, "Failed") {
        return JobPhase::Failed;
    }

    let status = job.status.as_ref();
    if status.and_then(|s| s.succeeded).unwrap_or(0) > 0 {
        return JobPhase::Succeeded;
    }

    let pod_phase = pod
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.as_deref());
    if pod_phase == Some("Unknown") {
        return JobPhase::Unknown;
    }

    let active = status.and_then(|s| s.active).unwrap_or(0) > 0;
    if active && flink_job_id.is_some() {
        JobPhase::Running
    } else {
        JobPhase::Pending
    }
}
