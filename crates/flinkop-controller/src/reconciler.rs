use crate::controller::ControllerConfig;
use crate::converter::{self, DesiredClusterState};
use crate::diff::{self, JobChange};
use crate::error::{ControllerError, Result};
use crate::gateway::{DeletePropagation, StateGateway, TypedGateway};
use crate::manager_api::{JobManagerApi, JobManagerEndpoint};
use crate::observer::{ClusterObserver, ObservedClusterState};
use crate::prober::{JobStatusProber, SavepointTaker};
use crate::state_machine::{self, PassFacts};
use crate::status;
use flinkop_core::k8s_openapi::api::batch::v1::Job;
use flinkop_core::k8s_openapi::api::core::v1::Service;
use flinkop_core::naming;
use flinkop_core::{
    ClusterComponentsStatus, ClusterPhase, ComponentState, DesiredPhase, FlinkCluster,
    FlinkClusterStatus, JobPhase, JobRestartPolicy, JobStatus, Resource,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a single reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Phase after the pass, `None` if the cluster no longer exists
    pub phase: Option<ClusterPhase>,
    /// Child resources created, updated or deleted
    pub resource_writes: usize,
    pub status_written: bool,
}

/// Why the job was deleted during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
enum JobRestart {
    Resubmit,
    FromSavepoint(String),
}

#[derive(Debug, Default)]
struct Applied {
    writes: usize,
    job_restart: Option<JobRestart>,
}

/// Drives one cluster from its observed state towards its desired state
///
/// A pass observes, converts, applies the difference and records the
/// outcome in the cluster's status. Passes are idempotent: once the
/// children match the spec, a pass performs no writes at all.
pub struct ClusterReconciler {
    gateway: Arc<dyn StateGateway>,
    observer: ClusterObserver,
    savepoints: SavepointTaker,
    max_write_retries: u32,
}

impl ClusterReconciler {
    pub fn new(
        gateway: Arc<dyn StateGateway>,
        manager: Arc<dyn JobManagerApi>,
        config: &ControllerConfig,
    ) -> Self {
        let prober = JobStatusProber::new(manager.clone(), config.probe_timeout);
        Self {
            observer: ClusterObserver::new(gateway.clone(), prober),
            savepoints: SavepointTaker::new(
                manager,
                config.savepoint_timeout,
                config.savepoint_poll_interval,
            ),
            gateway,
            max_write_retries: config.max_write_retries,
        }
    }

    /// Run one pass for the named cluster
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<PassOutcome> {
        let observed = self.observer.observe(namespace, name).await?;
        let Some(mut cluster) = observed.cluster.clone() else {
            debug!(cluster = %name, namespace = %namespace, "Cluster is gone, nothing to do");
            return Ok(PassOutcome::default());
        };

        let desired = match converter::desired_state(Some(&cluster)) {
            Ok(desired) => desired,
            Err(e) => {
                if e.is_config_error() {
                    warn!(cluster = %name, "Cannot convert cluster spec: {}", e);
                    self.record_message(&cluster, e.to_string()).await?;
                }
                return Err(e);
            }
        };

        let applied = match self.apply(&mut cluster, &observed, &desired).await {
            Ok(applied) => applied,
            Err(e) => {
                self.record_failure(&cluster, &e).await;
                return Err(e);
            }
        };

        let next = self.next_status(&cluster, &observed, &applied);
        let phase = next.state;
        let status_written = self.write_status(&cluster, next).await?;

        Ok(PassOutcome {
            phase: Some(phase),
            resource_writes: applied.writes,
            status_written,
        })
    }

    /// Converge the children. The job goes first so a savepoint is taken
    /// before deployment updates restart the JobManager under it.
    ///
    /// `cluster` is replaced with the stored object if its status is written
    /// mid-pass.
    async fn apply(
        &self,
        cluster: &mut FlinkCluster,
        observed: &ObservedClusterState,
        desired: &DesiredClusterState,
    ) -> Result<Applied> {
        let mut applied = Applied::default();
        self.sync_job(cluster, observed, desired.job.as_ref(), &mut applied)
            .await?;

        let namespace = cluster.namespace();
        applied.writes += self
            .sync_object(
                namespace,
                observed.jm_deployment.as_ref(),
                desired.jm_deployment.as_ref(),
                diff::deployment_differs,
                diff::merge_deployment,
            )
            .await?;
        applied.writes += self
            .sync_object::<Service>(
                namespace,
                observed.jm_service.as_ref(),
                desired.jm_service.as_ref(),
                diff::service_differs,
                diff::merge_service,
            )
            .await?;
        applied.writes += self
            .sync_object(
                namespace,
                observed.tm_deployment.as_ref(),
                desired.tm_deployment.as_ref(),
                diff::deployment_differs,
                diff::merge_deployment,
            )
            .await?;

        Ok(applied)
    }

    async fn sync_object<T: Resource + 'static>(
        &self,
        namespace: &str,
        observed: Option<&T>,
        desired: Option<&T>,
        differs: fn(&T, &T) -> bool,
        merge: fn(&T, &T) -> T,
    ) -> Result<usize> {
        match (observed, desired) {
            (None, None) => Ok(0),
            (None, Some(desired)) => {
                info!(kind = T::KIND, name = desired.name(), "Creating");
                self.gateway.create_typed(desired).await?;
                Ok(1)
            }
            (Some(observed), None) => {
                if being_deleted(observed) {
                    return Ok(0);
                }
                info!(kind = T::KIND, name = observed.name(), "Deleting");
                let deleted = self
                    .gateway
                    .delete_opt::<T>(namespace, observed.name(), DeletePropagation::Background)
                    .await?;
                Ok(usize::from(deleted))
            }
            (Some(observed), Some(desired)) => {
                if being_deleted(observed) || !differs(observed, desired) {
                    return Ok(0);
                }
                info!(kind = T::KIND, name = observed.name(), "Updating");
                self.gateway.update_typed(&merge(observed, desired)).await?;
                Ok(1)
            }
        }
    }

    async fn sync_job(
        &self,
        cluster: &mut FlinkCluster,
        observed: &ObservedClusterState,
        desired: Option<&Job>,
        applied: &mut Applied,
    ) -> Result<()> {
        let namespace = cluster.namespace().to_string();
        match (observed.job.as_ref(), desired) {
            (None, None) => {}
            (Some(job), None) => {
                if !being_deleted(job) {
                    info!(cluster = %cluster.name(), job = job.name(), "Deleting job");
                    applied.writes += self.delete_job(&namespace, job).await?;
                }
            }
            (None, Some(desired)) => {
                if job_submittable(observed) {
                    info!(cluster = %cluster.name(), job = desired.name(), "Submitting job");
                    self.gateway.create_typed(desired).await?;
                    applied.writes += 1;
                } else {
                    debug!(cluster = %cluster.name(), "Job submission waits for components");
                }
            }
            (Some(job), Some(desired)) => {
                if being_deleted(job) {
                    return Ok(());
                }
                match diff::job_change(job, desired) {
                    JobChange::None => {}
                    JobChange::SavepointOnly => {
                        info!(cluster = %cluster.name(), "Restore savepoint changed, resubmitting job");
                        applied.writes += self.delete_job(&namespace, job).await?;
                        applied.job_restart = Some(JobRestart::Resubmit);
                    }
                    JobChange::Submission => {
                        let restart = self.stop_for_resubmission(cluster, observed, job).await?;
                        // The savepoint must be stored before the cancelled job is deleted
                        if let JobRestart::FromSavepoint(location) = &restart {
                            self.record_restore_savepoint(cluster, location).await?;
                        }
                        applied.writes += self.delete_job(&namespace, job).await?;
                        applied.job_restart = Some(restart);
                    }
                }
            }
        }
        Ok(())
    }

    /// Take a savepoint of a running job before its submission is replaced.
    /// A job that is not running is simply resubmitted.
    async fn stop_for_resubmission(
        &self,
        cluster: &FlinkCluster,
        observed: &ObservedClusterState,
        job: &Job,
    ) -> Result<JobRestart> {
        if let Some(location) = pending_restore(cluster) {
            info!(cluster = %cluster.name(), savepoint = %location, "Job already cancelled with a savepoint, resubmitting from it");
            return Ok(JobRestart::FromSavepoint(location));
        }

        let job_id = observed.flink_job_id.as_deref();
        let phase = status::job_phase(job, observed.job_pod.as_ref(), job_id);

        match (job_id, phase, observed.jm_service.as_ref()) {
            (Some(job_id), JobPhase::Running, Some(service)) => {
                info!(cluster = %cluster.name(), job_id, "Job changed, taking savepoint before resubmission");
                let endpoint = JobManagerEndpoint::for_service(
                    service.name(),
                    cluster.namespace(),
                    cluster.spec.job_manager.ports.ui,
                );
                let target = cluster
                    .spec
                    .job
                    .as_ref()
                    .and_then(|j| j.savepoints_dir.as_deref());
                let location = self.savepoints.take(&endpoint, job_id, target).await?;
                Ok(JobRestart::FromSavepoint(location))
            }
            _ => {
                info!(cluster = %cluster.name(), job_phase = %phase, "Job changed, resubmitting");
                Ok(JobRestart::Resubmit)
            }
        }
    }

    /// Store the savepoint a cancelled job restores from, replacing
    /// `cluster` with the updated object
    async fn record_restore_savepoint(&self, cluster: &mut FlinkCluster, location: &str) -> Result<()> {
        let mut status = cluster.status.clone().unwrap_or_default();
        let job = status.components.job.get_or_insert_with(|| JobStatus {
            name: naming::job_name(cluster.name()),
            ..Default::default()
        });
        job.id = None;
        job.state = JobPhase::Cancelled;
        job.restore_savepoint = Some(location.to_string());
        job.requested_savepoint = cluster.spec.job.as_ref().and_then(|j| j.savepoint.clone());
        if cluster.status.as_ref() == Some(&status) {
            return Ok(());
        }

        status.last_update_time = Some(chrono::Utc::now().to_rfc3339());
        let mut updated = cluster.clone();
        updated.status = Some(status);
        *cluster = self.gateway.update_status_typed(&updated).await?;
        info!(cluster = %cluster.name(), savepoint = %location, "Recorded restore savepoint");
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, job: &Job) -> Result<usize> {
        let deleted = self
            .gateway
            .delete_opt::<Job>(namespace, job.name(), DeletePropagation::Foreground)
            .await?;
        Ok(usize::from(deleted))
    }

    fn next_status(
        &self,
        cluster: &FlinkCluster,
        observed: &ObservedClusterState,
        applied: &Applied,
    ) -> FlinkClusterStatus {
        let previous = cluster.status.clone().unwrap_or_default();
        let phase = previous.state;

        let components = ClusterComponentsStatus {
            job_manager_deployment: status::job_manager_deployment_status(cluster, observed),
            job_manager_service: status::job_manager_service_status(cluster, observed),
            task_manager_deployment: status::task_manager_deployment_status(cluster, observed),
            job: cluster
                .spec
                .job
                .as_ref()
                .map(|_| job_status(cluster, observed, applied, &previous)),
        };

        let job_state = match &applied.job_restart {
            Some(_) => None,
            None => components.job.as_ref().map(|j| j.state),
        };
        let restart_policy = cluster.spec.job.as_ref().map(|j| j.restart_policy);

        let facts = PassFacts {
            stop_requested: cluster.spec.desired_phase == DesiredPhase::Stopped,
            retries_exhausted: false,
            job_failed: observed.job.is_some() && job_state == Some(JobPhase::Failed),
            job_succeeded_final: observed.job.is_some()
                && job_state == Some(JobPhase::Succeeded)
                && restart_policy == Some(JobRestartPolicy::Never),
            resources_gone: resources_gone(observed),
            job_restarting: applied.job_restart.is_some(),
            spec_changed: spec_changed(cluster, &previous),
            infra_ready: infra_ready(cluster, observed, &components),
        };

        let state = match state_machine::next_phase(phase, &facts) {
            Some((event, next)) => {
                info!(cluster = %cluster.name(), from = %phase, to = %next, event = %event, "Cluster phase transition");
                next
            }
            None => phase,
        };

        FlinkClusterStatus {
            state,
            components,
            observed_generation: cluster.metadata.generation,
            failed_attempts: 0,
            message: None,
            last_update_time: previous.last_update_time,
        }
    }

    /// Persist `next` if it differs from the recorded status
    async fn write_status(&self, cluster: &FlinkCluster, mut next: FlinkClusterStatus) -> Result<bool> {
        let previous = cluster.status.clone().unwrap_or_default();
        if cluster.status.is_some() && next.same_as(&previous) {
            debug!(cluster = %cluster.name(), "Status unchanged");
            return Ok(false);
        }

        next.last_update_time = Some(chrono::Utc::now().to_rfc3339());
        let mut updated = cluster.clone();
        updated.status = Some(next);
        self.gateway.update_status_typed(&updated).await?;
        debug!(cluster = %cluster.name(), "Status updated");
        Ok(true)
    }

    /// Record a configuration problem without touching anything else
    async fn record_message(&self, cluster: &FlinkCluster, message: String) -> Result<bool> {
        let mut next = cluster.status.clone().unwrap_or_default();
        next.message = Some(message);
        self.write_status(cluster, next).await
    }

    /// Count a failed pass. Once the count passes the retry limit the
    /// cluster is moved to Failed. Best effort: a write error is only logged.
    async fn record_failure(&self, cluster: &FlinkCluster, error: &ControllerError) {
        let mut next = cluster.status.clone().unwrap_or_default();
        next.failed_attempts += 1;
        next.message = Some(error.to_string());
        warn!(
            cluster = %cluster.name(),
            failed_attempts = next.failed_attempts,
            "Reconciliation pass failed: {}",
            error
        );

        if next.failed_attempts > self.max_write_retries {
            let facts = PassFacts {
                retries_exhausted: true,
                ..Default::default()
            };
            if let Some((event, phase)) = state_machine::next_phase(next.state, &facts) {
                info!(cluster = %cluster.name(), from = %next.state, to = %phase, event = %event, "Cluster phase transition");
                next.state = phase;
            }
        }

        if let Err(e) = self.write_status(cluster, next).await {
            warn!(cluster = %cluster.name(), "Failed to record pass failure: {}", e);
        }
    }
}

fn being_deleted<T: Resource>(object: &T) -> bool {
    object.metadata().deletion_timestamp.is_some()
}

/// No job resource exists, the previous submitter pod is gone and the
/// cluster is up
fn job_submittable(observed: &ObservedClusterState) -> bool {
    observed.job.is_none()
        && observed.job_pod.is_none()
        && observed.jm_service.is_some()
        && observed
            .jm_deployment
            .as_ref()
            .is_some_and(status::deployment_ready)
        && observed
            .tm_deployment
            .as_ref()
            .is_some_and(status::deployment_ready)
}

/// Savepoint recorded for a job that was cancelled but not yet replaced
fn pending_restore(cluster: &FlinkCluster) -> Option<String> {
    let requested = cluster.spec.job.as_ref().and_then(|j| j.savepoint.as_ref());
    cluster
        .status
        .as_ref()
        .and_then(|s| s.components.job.as_ref())
        .filter(|j| j.state == JobPhase::Cancelled && j.requested_savepoint.as_ref() == requested)
        .and_then(|j| j.restore_savepoint.clone())
}

fn job_status(
    cluster: &FlinkCluster,
    observed: &ObservedClusterState,
    applied: &Applied,
    previous: &FlinkClusterStatus,
) -> JobStatus {
    let previous_job = previous.components.job.clone();
    let requested = cluster.spec.job.as_ref().and_then(|j| j.savepoint.clone());
    // A recorded savepoint is dropped once the spec savepoint is edited
    let (restore_savepoint, requested_savepoint) = match &applied.job_restart {
        Some(JobRestart::FromSavepoint(location)) => (Some(location.clone()), requested),
        _ => previous_job
            .as_ref()
            .filter(|j| j.requested_savepoint == requested)
            .map(|j| (j.restore_savepoint.clone(), j.requested_savepoint.clone()))
            .unwrap_or_default(),
    };
    let name = naming::job_name(cluster.name());

    let (id, state) = match (&applied.job_restart, &observed.job) {
        (Some(JobRestart::FromSavepoint(_)), _) => (None, JobPhase::Cancelled),
        (Some(JobRestart::Resubmit), _) => (None, JobPhase::Pending),
        (None, Some(job)) => {
            let id = observed.flink_job_id.clone();
            let state = status::job_phase(job, observed.job_pod.as_ref(), id.as_deref());
            (id, state)
        }
        // A shut-down cluster keeps the last known job outcome
        (None, None) if previous.state.is_shut_down() => {
            if let Some(job) = previous_job {
                return job;
            }
            (None, JobPhase::Pending)
        }
        (None, None) => (None, JobPhase::Pending),
    };

    JobStatus {
        name,
        id,
        state,
        restore_savepoint,
        requested_savepoint,
    }
}

fn resources_gone(observed: &ObservedClusterState) -> bool {
    observed.jm_deployment.is_none()
        && observed.jm_service.is_none()
        && observed.tm_deployment.is_none()
        && observed.job.is_none()
        && observed.job_pod.is_none()
}

fn spec_changed(cluster: &FlinkCluster, previous: &FlinkClusterStatus) -> bool {
    match (previous.observed_generation, cluster.metadata.generation) {
        (Some(seen), Some(current)) => seen != current,
        _ => false,
    }
}

fn infra_ready(
    cluster: &FlinkCluster,
    observed: &ObservedClusterState,
    components: &ClusterComponentsStatus,
) -> bool {
    components.job_manager_deployment.state == ComponentState::Ready
        && components.job_manager_service.state == ComponentState::Ready
        && components.task_manager_deployment.state == ComponentState::Ready
        && (cluster.spec.job.is_none() || observed.job.is_some())
}
