use crate::error::{ControllerError, Result};
use crate::manager_api::{JobManagerApi, JobManagerEndpoint, SavepointStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default bound on a single JobManager status query
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Discovers the Flink job ID of a running cluster
///
/// Every failure (unreachable service, timeout, bad body, empty list) is
/// logged and reported as "unknown" so a pass never fails because of it.
pub struct JobStatusProber {
    api: Arc<dyn JobManagerApi>,
    timeout: Duration,
}

impl JobStatusProber {
    pub fn new(api: Arc<dyn JobManagerApi>, timeout: Duration) -> Self {
        Self { api, timeout }
    }

    /// ID of the first job listed by the JobManager, if any
    pub async fn probe(&self, endpoint: &JobManagerEndpoint) -> Option<String> {
        let url = endpoint.jobs_url();
        debug!(url = %url, "Polling job status from Flink API");

        match tokio::time::timeout(self.timeout, self.api.list_jobs(endpoint)).await {
            Ok(Ok(jobs)) => {
                debug!(url = %url, jobs = jobs.len(), "Flink job status list");
                let id = jobs.into_iter().next().map(|job| job.id);
                if id.is_none() {
                    debug!(url = %url, "JobManager reports no jobs yet");
                }
                id
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Failed to get Flink job ID");
                None
            }
            Err(_) => {
                warn!(
                    url = %url,
                    "Flink job status request timed out after {}s",
                    self.timeout.as_secs()
                );
                None
            }
        }
    }
}

/// Takes a savepoint of a running job and waits for its location
pub struct SavepointTaker {
    api: Arc<dyn JobManagerApi>,
    timeout: Duration,
    poll_interval: Duration,
}

impl SavepointTaker {
    pub fn new(api: Arc<dyn JobManagerApi>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            api,
            timeout,
            poll_interval,
        }
    }

    /// Trigger a savepoint with cancel-job and poll until it completes.
    ///
    /// Returns the savepoint location. Errors if the trigger fails, the
    /// JobManager reports a failure, or `timeout` passes first.
    pub async fn take(
        &self,
        endpoint: &JobManagerEndpoint,
        job_id: &str,
        target_directory: Option<&str>,
    ) -> Result<String> {
        let deadline = Instant::now() + self.timeout;
        let request_id = self
            .api
            .trigger_savepoint(endpoint, job_id, target_directory, true)
            .await?;
        info!(job_id, request_id = %request_id, "Savepoint triggered");

        loop {
            match self.api.savepoint_status(endpoint, job_id, &request_id).await? {
                SavepointStatus::Completed { location } => {
                    info!(job_id, location = %location, "Savepoint completed");
                    return Ok(location);
                }
                SavepointStatus::Failed { cause } => {
                    return Err(ControllerError::savepoint_failed(job_id, cause));
                }
                SavepointStatus::InProgress => {}
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ControllerError::deadline_exceeded(
                    format!("savepoint of job {}", job_id),
                    self.timeout.as_secs(),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager_api::FlinkRestClient;
    use crate::mock::{MockJobManager, SavepointBehavior};

    fn endpoint() -> JobManagerEndpoint {
        JobManagerEndpoint::for_service("wc-jobmanager", "flink", 8081)
    }

    #[tokio::test]
    async fn test_probe_returns_first_job() {
        let api = Arc::new(MockJobManager::with_jobs(&["a1b2c3", "d4e5f6"]));
        let prober = JobStatusProber::new(api.clone(), DEFAULT_PROBE_TIMEOUT);

        assert_eq!(prober.probe(&endpoint()).await.as_deref(), Some("a1b2c3"));
        assert_eq!(api.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_empty_list_is_unknown() {
        let prober = JobStatusProber::new(Arc::new(MockJobManager::new()), DEFAULT_PROBE_TIMEOUT);
        assert_eq!(prober.probe(&endpoint()).await, None);
    }

    #[tokio::test]
    async fn test_probe_error_is_unknown() {
        let api = MockJobManager::new();
        api.set_unreachable(true);
        let prober = JobStatusProber::new(Arc::new(api), DEFAULT_PROBE_TIMEOUT);
        assert_eq!(prober.probe(&endpoint()).await, None);
    }

    #[tokio::test]
    async fn test_probe_unreachable_service() {
        let client = FlinkRestClient::new(Duration::from_secs(1)).unwrap();
        let prober = JobStatusProber::new(Arc::new(client), Duration::from_secs(2));
        let endpoint = JobManagerEndpoint::new("http://127.0.0.1:1");
        assert_eq!(prober.probe(&endpoint).await, None);
    }

    #[tokio::test]
    async fn test_probe_malformed_body_is_unknown() {
        let (endpoint, _server) = crate::manager_api::tests::serve_json("<html>not json</html>").await;
        let client = FlinkRestClient::new(Duration::from_secs(5)).unwrap();
        let prober = JobStatusProber::new(Arc::new(client), DEFAULT_PROBE_TIMEOUT);
        assert_eq!(prober.probe(&endpoint).await, None);
    }

    #[tokio::test]
    async fn test_savepoint_completes() {
        let api = Arc::new(MockJobManager::with_jobs(&["a1b2c3"]));
        api.set_savepoint_behavior(SavepointBehavior::CompleteAfter {
            polls: 2,
            location: "gs://bucket/sp-1".to_string(),
        });
        let taker = SavepointTaker::new(api.clone(), Duration::from_secs(5), Duration::from_millis(10));

        let location = taker.take(&endpoint(), "a1b2c3", Some("gs://bucket")).await.unwrap();
        assert_eq!(location, "gs://bucket/sp-1");
        assert_eq!(api.savepoint_triggers(), 1);
    }

    #[tokio::test]
    async fn test_savepoint_failure() {
        let api = Arc::new(MockJobManager::with_jobs(&["a1b2c3"]));
        api.set_savepoint_behavior(SavepointBehavior::Fail("checkpoint declined".to_string()));
        let taker = SavepointTaker::new(api, Duration::from_secs(5), Duration::from_millis(10));

        let err = taker.take(&endpoint(), "a1b2c3", None).await.unwrap_err();
        assert!(matches!(err, ControllerError::SavepointFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_savepoint_timeout() {
        let api = Arc::new(MockJobManager::with_jobs(&["a1b2c3"]));
        api.set_savepoint_behavior(SavepointBehavior::NeverComplete);
        let taker = SavepointTaker::new(api, Duration::from_secs(60), Duration::from_secs(1));

        let err = taker.take(&endpoint(), "a1b2c3", None).await.unwrap_err();
        assert!(matches!(err, ControllerError::DeadlineExceeded { .. }));
    }
}
