use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Address of a cluster's JobManager REST endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobManagerEndpoint {
    pub base_url: String,
}

impl JobManagerEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Endpoint reached through the in-cluster DNS name of the JobManager service
    pub fn for_service(service: &str, namespace: &str, ui_port: i32) -> Self {
        Self::new(format!(
            "http://{}:{}",
            flinkop_core::naming::service_dns_name(service, namespace),
            ui_port
        ))
    }

    pub fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }
}

/// One entry of the `/jobs` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlinkJobSummary {
    pub id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<FlinkJobSummary>,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    #[serde(rename = "request-id")]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct SavepointStatusResponse {
    status: QueueStatus,
    #[serde(default)]
    operation: Option<SavepointOperation>,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SavepointOperation {
    #[serde(default)]
    location: Option<String>,
    #[serde(rename = "failure-cause", default)]
    failure_cause: Option<serde_json::Value>,
}

/// Progress of an asynchronous savepoint operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavepointStatus {
    InProgress,
    Completed { location: String },
    Failed { cause: String },
}

/// Operations the controller needs from a JobManager
#[async_trait]
pub trait JobManagerApi: Send + Sync {
    /// List the jobs known to the JobManager
    async fn list_jobs(&self, endpoint: &JobManagerEndpoint) -> Result<Vec<FlinkJobSummary>>;

    /// Start a savepoint, returning the request id to poll
    async fn trigger_savepoint(
        &self,
        endpoint: &JobManagerEndpoint,
        job_id: &str,
        target_directory: Option<&str>,
        cancel_job: bool,
    ) -> Result<String>;

    async fn savepoint_status(
        &self,
        endpoint: &JobManagerEndpoint,
        job_id: &str,
        request_id: &str,
    ) -> Result<SavepointStatus>;
}

/// reqwest client for the Flink REST API
pub struct FlinkRestClient {
    client: Client,
}

impl FlinkRestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ControllerError::internal_error(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, "flink-operator")
            .send()
            .await
            .map_err(|e| ControllerError::probe_failed(url, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ControllerError::probe_failed(
                url,
                format!("status {}", resp.status()),
            ));
        }

        resp.json::<T>()
            .await
            .map_err(|e| ControllerError::probe_failed(url, format!("invalid response: {}", e)))
    }
}

#[async_trait]
impl JobManagerApi for FlinkRestClient {
    async fn list_jobs(&self, endpoint: &JobManagerEndpoint) -> Result<Vec<FlinkJobSummary>> {
        let list: JobList = self.get_json(&endpoint.jobs_url()).await?;
        Ok(list.jobs)
    }

    async fn trigger_savepoint(
        &self,
        endpoint: &JobManagerEndpoint,
        job_id: &str,
        target_directory: Option<&str>,
        cancel_job: bool,
    ) -> Result<String> {
        let url = format!("{}/jobs/{}/savepoints", endpoint.base_url, job_id);
        let mut body = serde_json::json!({ "cancel-job": cancel_job });
        if let Some(dir) = target_directory {
            body["target-directory"] = serde_json::json!(dir);
        }
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, "flink-operator")
            .json(&body)
            .send()
            .await
            .map_err(|e| ControllerError::savepoint_failed(job_id, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ControllerError::savepoint_failed(
                job_id,
                format!("trigger returned status {}: {}", status, text),
            ));
        }

        let trigger: TriggerResponse = resp
            .json()
            .await
            .map_err(|e| ControllerError::savepoint_failed(job_id, e.to_string()))?;
        Ok(trigger.request_id)
    }

    async fn savepoint_status(
        &self,
        endpoint: &JobManagerEndpoint,
        job_id: &str,
        request_id: &str,
    ) -> Result<SavepointStatus> {
        let url = format!(
            "{}/jobs/{}/savepoints/{}",
            endpoint.base_url, job_id, request_id
        );
        let resp: SavepointStatusResponse = self.get_json(&url).await?;

        if resp.status.id != "COMPLETED" {
            return Ok(SavepointStatus::InProgress);
        }

        match resp.operation {
            Some(SavepointOperation {
                location: Some(location),
                ..
            }) => Ok(SavepointStatus::Completed { location }),
            Some(SavepointOperation {
                failure_cause: Some(cause),
                ..
            }) => Ok(SavepointStatus::Failed {
                cause: cause
                    .get("stack-trace")
                    .and_then(|s| s.as_str())
                    .and_then(|s| s.lines().next())
                    .map(str::to_string)
                    .unwrap_or_else(|| cause.to_string()),
            }),
            _ => Ok(SavepointStatus::Failed {
                cause: "savepoint completed without a location".to_string(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal JobManager that answers every request with the same body
    pub(crate) async fn serve_json(body: &'static str) -> (JobManagerEndpoint, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        (JobManagerEndpoint::new(format!("http://127.0.0.1:{}", port)), server)
    }

    #[test]
    fn test_endpoint_for_service() {
        let endpoint = JobManagerEndpoint::for_service("wc-jobmanager", "flink", 8081);
        assert_eq!(
            endpoint.jobs_url(),
            "http://wc-jobmanager.flink.svc.cluster.local:8081/jobs"
        );
    }

    #[tokio::test]
    async fn test_list_jobs_sends_headers() {
        let (endpoint, server) =
            serve_json(r#"{"jobs":[{"id":"a1b2c3","status":"RUNNING"},{"id":"d4e5","status":"FINISHED"}]}"#)
                .await;
        let client = FlinkRestClient::new(Duration::from_secs(5)).unwrap();

        let jobs = client.list_jobs(&endpoint).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "a1b2c3");
        assert_eq!(jobs[0].status, "RUNNING");

        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("get /jobs "));
        assert!(request.contains("accept: application/json"));
        assert!(request.contains("user-agent: flink-operator"));
    }

    #[tokio::test]
    async fn test_trigger_savepoint() {
        let (endpoint, server) = serve_json(r#"{"request-id":"req-1"}"#).await;
        let client = FlinkRestClient::new(Duration::from_secs(5)).unwrap();

        let request_id = client
            .trigger_savepoint(&endpoint, "a1b2c3", Some("gs://bucket/savepoints"), true)
            .await
            .unwrap();
        assert_eq!(request_id, "req-1");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /jobs/a1b2c3/savepoints "));
    }

    #[tokio::test]
    async fn test_savepoint_status_completed() {
        let (endpoint, _server) = serve_json(
            r#"{"status":{"id":"COMPLETED"},"operation":{"location":"gs://bucket/savepoints/savepoint-a1b2c3"}}"#,
        )
        .await;
        let client = FlinkRestClient::new(Duration::from_secs(5)).unwrap();

        let status = client
            .savepoint_status(&endpoint, "a1b2c3", "req-1")
            .await
            .unwrap();
        assert_eq!(
            status,
            SavepointStatus::Completed {
                location: "gs://bucket/savepoints/savepoint-a1b2c3".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_savepoint_status_in_progress() {
        let (endpoint, _server) = serve_json(r#"{"status":{"id":"IN_PROGRESS"}}"#).await;
        let client = FlinkRestClient::new(Duration::from_secs(5)).unwrap();

        let status = client
            .savepoint_status(&endpoint, "a1b2c3", "req-1")
            .await
            .unwrap();
        assert_eq!(status, SavepointStatus::InProgress);
    }

    #[tokio::test]
    async fn test_savepoint_status_failure_cause() {
        let (endpoint, _server) = serve_json(
            r#"{"status":{"id":"COMPLETED"},"operation":{"failure-cause":{"class":"java.lang.Exception","stack-trace":"java.lang.Exception: disk full\n\tat Foo"}}}"#,
        )
        .await;
        let client = FlinkRestClient::new(Duration::from_secs(5)).unwrap();

        let status = client
            .savepoint_status(&endpoint, "a1b2c3", "req-1")
            .await
            .unwrap();
        assert_eq!(
            status,
            SavepointStatus::Failed {
                cause: "java.lang.Exception: disk full".to_string()
            }
        );
    }
}
