use crate::error::{ControllerError, Result};
use crate::gateway::{StateGateway, TypedGateway};
use crate::manager_api::JobManagerApi;
use crate::prober::DEFAULT_PROBE_TIMEOUT;
use crate::reconciler::{ClusterReconciler, PassOutcome};
use flinkop_core::{FlinkCluster, Resource};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the cluster controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Only reconcile clusters in this namespace. Empty watches all namespaces.
    pub namespace: String,
    /// Interval between full resyncs
    pub resync_interval: Duration,
    /// Upper bound on a single reconciliation pass
    pub pass_timeout: Duration,
    /// Timeout for JobManager job listing
    pub probe_timeout: Duration,
    /// How long to wait for a savepoint to complete
    pub savepoint_timeout: Duration,
    pub savepoint_poll_interval: Duration,
    /// Failed passes tolerated before the cluster is marked Failed
    pub max_write_retries: u32,
    pub max_concurrent_passes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            resync_interval: Duration::from_secs(10),
            // Must leave room for a full savepoint
            pass_timeout: Duration::from_secs(360),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            savepoint_timeout: Duration::from_secs(300),
            savepoint_poll_interval: Duration::from_secs(2),
            max_write_retries: 5,
            max_concurrent_passes: 4,
        }
    }
}

type ClusterRef = (String, String);

/// Clusters with a pass in progress. At most one pass runs per cluster.
#[derive(Default, Clone)]
struct InFlight(Arc<Mutex<HashSet<ClusterRef>>>);

/// Removes its cluster from the in-flight set when dropped
struct InFlightGuard {
    set: InFlight,
    key: ClusterRef,
}

impl InFlight {
    fn try_begin(&self, namespace: &str, name: &str) -> Option<InFlightGuard> {
        let key = (namespace.to_string(), name.to_string());
        let inserted = self
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone());
        inserted.then(|| InFlightGuard {
            set: self.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Periodically lists FlinkClusters and runs a reconciliation pass for each
pub struct ClusterController {
    gateway: Arc<dyn StateGateway>,
    reconciler: Arc<ClusterReconciler>,
    config: ControllerConfig,
    in_flight: InFlight,
    permits: Arc<Semaphore>,
}

impl ClusterController {
    pub fn new(
        gateway: Arc<dyn StateGateway>,
        manager: Arc<dyn JobManagerApi>,
        config: ControllerConfig,
    ) -> Self {
        let reconciler = Arc::new(ClusterReconciler::new(gateway.clone(), manager, &config));
        Self {
            gateway,
            reconciler,
            permits: Arc::new(Semaphore::new(config.max_concurrent_passes.max(1))),
            in_flight: InFlight::default(),
            config,
        }
    }

    /// Run the controller loop until cancelled. Passes in progress are
    /// allowed to finish before returning.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting FlinkCluster controller (namespace: {}, resync: {:?}, pass timeout: {:?})",
            if self.config.namespace.is_empty() {
                "<all>"
            } else {
                self.config.namespace.as_str()
            },
            self.config.resync_interval,
            self.config.pass_timeout
        );

        let mut interval = tokio::time::interval(self.config.resync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("FlinkCluster controller shutting down");
                    while tasks.join_next().await.is_some() {}
                    return Ok(());
                }
                _ = interval.tick() => {
                    match self.resync(&mut tasks).await {
                        Ok(started) => debug!("Resync started {} passes", started),
                        Err(e) => error!("FlinkCluster resync failed: {}", e),
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Reconciliation task aborted: {}", e);
                    }
                }
            }
        }
    }

    /// List clusters and spawn a pass for each one without a pass in
    /// progress. Returns the number of passes started.
    pub async fn resync(&self, tasks: &mut JoinSet<()>) -> Result<usize> {
        let clusters = self
            .gateway
            .list_typed::<FlinkCluster>(&self.config.namespace, &BTreeMap::new())
            .await?;

        let mut started = 0;
        for cluster in clusters {
            let namespace = cluster.namespace().to_string();
            let name = cluster.name().to_string();
            let Some(guard) = self.in_flight.try_begin(&namespace, &name) else {
                debug!(cluster = %name, namespace = %namespace, "Previous pass still running");
                continue;
            };

            let reconciler = self.reconciler.clone();
            let permits = self.permits.clone();
            let timeout = self.config.pass_timeout;
            tasks.spawn(async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if let Err(e) = run_pass(&reconciler, timeout, &namespace, &name).await {
                    warn!(cluster = %name, namespace = %namespace, "Reconciliation failed: {}", e);
                }
            });
            started += 1;
        }

        Ok(started)
    }

    /// Run a single pass for one cluster, bounded by the pass timeout
    pub async fn reconcile_once(&self, namespace: &str, name: &str) -> Result<PassOutcome> {
        run_pass(&self.reconciler, self.config.pass_timeout, namespace, name).await
    }
}

async fn run_pass(
    reconciler: &ClusterReconciler,
    timeout: Duration,
    namespace: &str,
    name: &str,
) -> Result<PassOutcome> {
    match tokio::time::timeout(timeout, reconciler.reconcile(namespace, name)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ControllerError::deadline_exceeded(
            format!("reconciliation of {}/{}", namespace, name),
            timeout.as_secs(),
        )),
    }
}
