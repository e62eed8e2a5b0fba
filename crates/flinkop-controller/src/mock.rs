use crate::error::{ControllerError, Result};
use crate::gateway::{DeletePropagation, StateGateway};
use crate::manager_api::{FlinkJobSummary, JobManagerApi, JobManagerEndpoint, SavepointStatus};
use async_trait::async_trait;
use flinkop_core::{Resource, ResourceKey};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory object store for tests and dry runs
///
/// Behaves like the API server where the controller can tell: uids and
/// resource versions are assigned on write, stale resource versions are
/// rejected with Conflict, spec changes bump `metadata.generation`, and
/// `update` never touches `status` while `update_status` touches nothing else.
/// Deletes do not cascade. Tests remove dependents explicitly with
/// [`MockGateway::remove`].
pub struct MockGateway {
    objects: Arc<RwLock<BTreeMap<ResourceKey, Value>>>,
    operations: Arc<RwLock<Vec<String>>>,
    next_version: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    failing_kinds: Mutex<HashSet<String>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            operations: Arc::new(RwLock::new(Vec::new())),
            next_version: AtomicUsize::new(1),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            failing_kinds: Mutex::new(HashSet::new()),
        }
    }

    /// Make every write fail with a gateway error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes of one kind (e.g. "Deployment") fail with a gateway error
    pub fn fail_writes_of_kind(&self, kind: &str) {
        self.failing_kinds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind.to_string());
    }

    /// Stop failing writes injected with [`MockGateway::set_fail_writes`]
    /// or [`MockGateway::fail_writes_of_kind`]
    pub fn clear_write_failures(&self) {
        self.fail_writes.store(false, Ordering::SeqCst);
        self.failing_kinds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Make every read fail with a gateway error
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Store an object directly, bypassing the write log
    pub async fn insert<T: Resource>(&self, object: &T) -> Result<()> {
        let key = object
            .resource_key()
            .map_err(|e| ControllerError::internal_error(e.to_string()))?;
        let mut value =
            serde_json::to_value(object).map_err(|e| ControllerError::serialization(e.to_string()))?;
        self.stamp_new(&key, &mut value);
        self.objects.write().await.insert(key, value);
        Ok(())
    }

    /// Overwrite an object's status directly, bypassing the write log
    pub async fn set_status(&self, key: &ResourceKey, status: Value) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| ControllerError::not_found(key.to_string()))?;
        stored["status"] = status;
        Ok(())
    }

    /// Remove an object directly, as the platform's garbage collector would
    pub async fn remove(&self, key: &ResourceKey) -> Option<Value> {
        self.objects.write().await.remove(key)
    }

    /// Raw stored object
    pub async fn object(&self, key: &ResourceKey) -> Option<Value> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &ResourceKey) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Writes issued through the gateway, as `<verb> <Kind>/<name>`
    pub async fn operations(&self) -> Vec<String> {
        self.operations.read().await.clone()
    }

    pub async fn writes(&self) -> usize {
        self.operations.read().await.len()
    }

    pub async fn clear_operations(&self) {
        self.operations.write().await.clear();
    }

    fn bump_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn stamp_new(&self, key: &ResourceKey, value: &mut Value) {
        let version = self.bump_version();
        let metadata = &mut value["metadata"];
        if metadata.get("uid").and_then(Value::as_str).is_none() {
            metadata["uid"] = json!(uuid::Uuid::new_v4().to_string());
        }
        if metadata.get("generation").and_then(Value::as_i64).is_none() {
            metadata["generation"] = json!(1);
        }
        metadata["namespace"] = json!(key.namespace);
        metadata["name"] = json!(key.name);
        metadata["resourceVersion"] = json!(version);
    }

    async fn record(&self, verb: &str, key: &ResourceKey) -> Result<()> {
        let kind_fails = self
            .failing_kinds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key.gvk.kind);
        if kind_fails || self.fail_writes.load(Ordering::SeqCst) {
            return Err(ControllerError::gateway(format!(
                "injected write failure: {} {}",
                verb, key
            )));
        }
        debug!("Mock: {} {}", verb, key);
        self.operations
            .write()
            .await
            .push(format!("{} {}/{}", verb, key.gvk.kind, key.name));
        Ok(())
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ControllerError::gateway("injected read failure"));
        }
        Ok(())
    }

    fn check_version(key: &ResourceKey, stored: &Value, incoming: &Value) -> Result<()> {
        let incoming_version = incoming["metadata"]["resourceVersion"].as_str();
        let stored_version = stored["metadata"]["resourceVersion"].as_str();
        match incoming_version {
            Some(v) if Some(v) != stored_version => Err(ControllerError::conflict(
                key.to_string(),
                format!(
                    "resourceVersion {} is stale (current {})",
                    v,
                    stored_version.unwrap_or_default()
                ),
            )),
            _ => Ok(()),
        }
    }
}

fn object_labels(value: &Value) -> BTreeMap<String, String> {
    value["metadata"]["labels"]
        .as_object()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl StateGateway for MockGateway {
    async fn get(&self, key: &ResourceKey) -> Result<Value> {
        self.check_reads()?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(key.to_string()))
    }

    async fn list(
        &self,
        collection: &ResourceKey,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>> {
        self.check_reads()?;
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.gvk == collection.gvk)
            .filter(|(key, _)| collection.namespace.is_empty() || key.namespace == collection.namespace)
            .filter(|(_, value)| {
                flinkop_core::naming::labels_match(selector, Some(&object_labels(value)))
            })
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn create(&self, key: &ResourceKey, object: &Value) -> Result<Value> {
        if self.objects.read().await.contains_key(key) {
            return Err(ControllerError::conflict(key.to_string(), "already exists"));
        }
        self.record("create", key).await?;

        let mut value = object.clone();
        if let Some(metadata) = value["metadata"].as_object_mut() {
            metadata.remove("resourceVersion");
        }
        self.stamp_new(key, &mut value);
        self.objects.write().await.insert(key.clone(), value.clone());
        Ok(value)
    }

    async fn update(&self, key: &ResourceKey, object: &Value) -> Result<Value> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(key)
            .ok_or_else(|| ControllerError::not_found(key.to_string()))?;
        Self::check_version(key, stored, object)?;
        self.record("update", key).await?;

        let mut value = object.clone();
        let mut generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
        if stored.get("spec") != value.get("spec") {
            generation += 1;
        }
        value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        value["metadata"]["generation"] = json!(generation);
        value["metadata"]["resourceVersion"] = json!(self.bump_version());
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("status");
                }
            }
        }

        objects.insert(key.clone(), value.clone());
        Ok(value)
    }

    async fn update_status(&self, key: &ResourceKey, object: &Value) -> Result<Value> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(key)
            .ok_or_else(|| ControllerError::not_found(key.to_string()))?;
        Self::check_version(key, stored, object)?;
        self.record("update_status", key).await?;

        let mut value = stored.clone();
        value["status"] = object.get("status").cloned().unwrap_or(Value::Null);
        value["metadata"]["resourceVersion"] = json!(self.bump_version());

        objects.insert(key.clone(), value.clone());
        Ok(value)
    }

    async fn delete(&self, key: &ResourceKey, propagation: DeletePropagation) -> Result<()> {
        if !self.objects.read().await.contains_key(key) {
            return Err(ControllerError::not_found(key.to_string()));
        }
        self.record("delete", key).await?;
        debug!("Mock: deleted {} with {} propagation", key, propagation);
        self.objects.write().await.remove(key);
        Ok(())
    }
}

/// Scripted outcome of savepoint requests against [`MockJobManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavepointBehavior {
    /// Report in-progress for `polls` status queries, then complete
    CompleteAfter { polls: usize, location: String },
    Fail(String),
    NeverComplete,
}

/// Scripted JobManager for tests
pub struct MockJobManager {
    jobs: Mutex<Vec<FlinkJobSummary>>,
    unreachable: AtomicBool,
    savepoint: Mutex<SavepointBehavior>,
    polls: Mutex<HashMap<String, usize>>,
    list_calls: AtomicUsize,
    savepoint_triggers: AtomicUsize,
}

impl Default for MockJobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJobManager {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            unreachable: AtomicBool::new(false),
            savepoint: Mutex::new(SavepointBehavior::CompleteAfter {
                polls: 0,
                location: "file:///tmp/savepoints/savepoint-mock".to_string(),
            }),
            polls: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            savepoint_triggers: AtomicUsize::new(0),
        }
    }

    pub fn with_jobs(ids: &[&str]) -> Self {
        let manager = Self::new();
        manager.set_jobs(ids);
        manager
    }

    pub fn set_jobs(&self, ids: &[&str]) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        *jobs = ids
            .iter()
            .map(|id| FlinkJobSummary {
                id: id.to_string(),
                status: "RUNNING".to_string(),
            })
            .collect();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_savepoint_behavior(&self, behavior: SavepointBehavior) {
        *self.savepoint.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    /// Number of `/jobs` queries received
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn savepoint_triggers(&self) -> usize {
        self.savepoint_triggers.load(Ordering::SeqCst)
    }

    fn check_reachable(&self, endpoint: &JobManagerEndpoint) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ControllerError::probe_failed(
                endpoint.jobs_url(),
                "connection refused",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl JobManagerApi for MockJobManager {
    async fn list_jobs(&self, endpoint: &JobManagerEndpoint) -> Result<Vec<FlinkJobSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable(endpoint)?;
        Ok(self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn trigger_savepoint(
        &self,
        endpoint: &JobManagerEndpoint,
        job_id: &str,
        _target_directory: Option<&str>,
        _cancel_job: bool,
    ) -> Result<String> {
        self.check_reachable(endpoint)?;
        let count = self.savepoint_triggers.fetch_add(1, Ordering::SeqCst) + 1;
        let request_id = format!("{}-savepoint-{}", job_id, count);
        self.polls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), 0);
        Ok(request_id)
    }

    async fn savepoint_status(
        &self,
        endpoint: &JobManagerEndpoint,
        _job_id: &str,
        request_id: &str,
    ) -> Result<SavepointStatus> {
        self.check_reachable(endpoint)?;
        let polled = {
            let mut polls = self.polls.lock().unwrap_or_else(|e| e.into_inner());
            let entry = polls.entry(request_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let behavior = self.savepoint.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(match behavior {
            SavepointBehavior::CompleteAfter { polls, location } if polled > polls => {
                SavepointStatus::Completed { location }
            }
            SavepointBehavior::CompleteAfter { .. } | SavepointBehavior::NeverComplete => {
                SavepointStatus::InProgress
            }
            SavepointBehavior::Fail(cause) => SavepointStatus::Failed { cause },
        })
    }
}
