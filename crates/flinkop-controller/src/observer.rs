use crate::error::{ControllerError, Result};
use crate::gateway::{StateGateway, TypedGateway};
use crate::manager_api::JobManagerEndpoint;
use crate::prober::JobStatusProber;
use flinkop_core::k8s_openapi::api::apps::v1::Deployment;
use flinkop_core::k8s_openapi::api::batch::v1::Job;
use flinkop_core::k8s_openapi::api::core::v1::{Pod, Service};
use flinkop_core::naming;
use flinkop_core::{FlinkCluster, Resource};
use std::sync::Arc;
use tracing::{debug, info};

/// Live state of a cluster and its children, gathered once per pass
#[derive(Debug, Clone, Default)]
pub struct ObservedClusterState {
    pub cluster: Option<FlinkCluster>,
    pub jm_deployment: Option<Deployment>,
    pub jm_service: Option<Service>,
    pub tm_deployment: Option<Deployment>,
    pub job: Option<Job>,
    pub job_pod: Option<Pod>,
    /// Flink job ID, from status or freshly probed
    pub flink_job_id: Option<String>,
}

/// Reads the current state of one cluster through the gateway
pub struct ClusterObserver {
    gateway: Arc<dyn StateGateway>,
    prober: JobStatusProber,
}

impl ClusterObserver {
    pub fn new(gateway: Arc<dyn StateGateway>, prober: JobStatusProber) -> Self {
        Self { gateway, prober }
    }

    /// Observe a cluster. NotFound is normal and yields `None` fields,
    /// any other gateway error aborts the observation.
    pub async fn observe(&self, namespace: &str, name: &str) -> Result<ObservedClusterState> {
        let gateway = self.gateway.as_ref();
        let jm_name = naming::job_manager_deployment_name(name);
        let svc_name = naming::job_manager_service_name(name);
        let tm_name = naming::task_manager_deployment_name(name);

        let (cluster, jm_deployment, jm_service, tm_deployment) = tokio::try_join!(
            gateway.get_opt::<FlinkCluster>(namespace, name),
            gateway.get_opt::<Deployment>(namespace, &jm_name),
            gateway.get_opt::<Service>(namespace, &svc_name),
            gateway.get_opt::<Deployment>(namespace, &tm_name),
        )?;

        debug!(
            cluster = %name,
            namespace = %namespace,
            cluster_found = cluster.is_some(),
            jm_deployment = jm_deployment.is_some(),
            jm_service = jm_service.is_some(),
            tm_deployment = tm_deployment.is_some(),
            "Observed cluster components"
        );

        let mut observed = ObservedClusterState {
            cluster,
            jm_deployment,
            jm_service,
            tm_deployment,
            ..Default::default()
        };
        self.observe_job(namespace, name, &mut observed).await?;
        Ok(observed)
    }

    async fn observe_job(
        &self,
        namespace: &str,
        name: &str,
        observed: &mut ObservedClusterState,
    ) -> Result<()> {
        // Deleted cluster or session cluster
        let Some(cluster) = observed.cluster.as_ref().filter(|c| c.spec.job.is_some()) else {
            return Ok(());
        };

        let gateway = self.gateway.as_ref();
        let selector = naming::job_pod_selector(name);
        let job_name = naming::job_name(name);
        let (job, pods) = tokio::try_join!(
            gateway.get_opt::<Job>(namespace, &job_name),
            gateway.list_typed::<Pod>(namespace, &selector),
        )?;

        if pods.len() > 1 {
            let names: Vec<&str> = pods.iter().map(|p| p.name()).collect();
            return Err(ControllerError::invariant_violation(
                name,
                format!(
                    "exactly one job pod is expected, found {}: {}",
                    pods.len(),
                    names.join(", ")
                ),
            ));
        }
        let job_pod = pods.into_iter().next();
        debug!(
            cluster = %name,
            job = job.is_some(),
            job_pod = job_pod.as_ref().map(|p| p.name()).unwrap_or("none"),
            "Observed job"
        );

        let recorded_id = cluster
            .status
            .as_ref()
            .and_then(|s| s.job_id())
            .map(str::to_string);

        let flink_job_id = match recorded_id {
            Some(id) => {
                debug!(cluster = %name, job_id = %id, "Flink job ID is already available");
                Some(id)
            }
            None => {
                let pod_started = job_pod
                    .as_ref()
                    .and_then(|p| p.status.as_ref())
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase != "Pending" && phase != "Unknown");

                match (&job, &observed.jm_service) {
                    (Some(_), Some(service)) if pod_started => {
                        let endpoint = JobManagerEndpoint::for_service(
                            service.name(),
                            service.metadata.namespace.as_deref().unwrap_or(namespace),
                            cluster.spec.job_manager.ports.ui,
                        );
                        let id = self.prober.probe(&endpoint).await;
                        if let Some(id) = &id {
                            info!(cluster = %name, job_id = %id, "Discovered Flink job ID");
                        }
                        id
                    }
                    _ => {
                        debug!(cluster = %name, "Skip getting Flink job ID");
                        None
                    }
                }
            }
        };

        observed.job = job;
        observed.job_pod = job_pod;
        observed.flink_job_id = flink_job_id;
        Ok(())
    }
}
