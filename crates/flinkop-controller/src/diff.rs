//! Semantic comparison and merging of observed and desired resources.
//!
//! The API server fills in defaults and normalizes quantities, so a literal
//! comparison of what we sent with what we read back never converges. Only
//! the fields the converter manages are compared, and updates copy those
//! fields onto the observed object so everything else the server owns
//! (clusterIP, defaulted fields, resourceVersion) is kept.

use flinkop_core::k8s_openapi::api::apps::v1::Deployment;
use flinkop_core::k8s_openapi::api::batch::v1::Job;
use flinkop_core::k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, PodSpec, ResourceRequirements, Service, ServicePort,
    Volume,
};
use flinkop_core::k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use flinkop_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use flinkop_core::ResourceQuantities;
use std::collections::BTreeMap;

/// Flag whose value changes on every savepoint-based restart
const FROM_SAVEPOINT_FLAG: &str = "--fromSavepoint";

/// Mode the API server fills in for projected file volumes (0644)
const DEFAULT_VOLUME_MODE: i32 = 0o644;

fn empty_as_none(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn env_equal(observed: &[EnvVar], desired: &[EnvVar]) -> bool {
    observed.len() == desired.len()
        && observed.iter().zip(desired).all(|(o, d)| {
            o.name == d.name
                && empty_as_none(&o.value) == empty_as_none(&d.value)
                && o.value_from == d.value_from
        })
}

fn limits(r: Option<&ResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
    r.and_then(|r| r.limits.as_ref())
}

fn requests(r: Option<&ResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
    r.and_then(|r| r.requests.as_ref())
}

fn resources_equal(observed: Option<&ResourceRequirements>, desired: Option<&ResourceRequirements>) -> bool {
    ResourceQuantities::maps_equivalent(limits(observed), limits(desired))
        && ResourceQuantities::maps_equivalent(requests(observed), requests(desired))
}

fn ports_equal(observed: &Container, desired: &Container) -> bool {
    let summary = |c: &Container| {
        c.ports
            .iter()
            .flatten()
            .map(|p| (p.name.clone(), p.container_port))
            .collect::<Vec<_>>()
    };
    summary(observed) == summary(desired)
}

/// Name, mount path, read-only flag and sub-path of a volume mount
pub type MountSummary = (String, String, bool, Option<String>);

fn mount_summary(container: &Container) -> Vec<MountSummary> {
    container
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| {
            (
                m.name.clone(),
                m.mount_path.clone(),
                m.read_only.unwrap_or(false),
                empty_as_none(&m.sub_path).map(str::to_string),
            )
        })
        .collect()
}

/// Volumes with server-defaulted fields filled in the way the server does
fn normalized_volumes(volumes: Option<&Vec<Volume>>) -> Vec<Volume> {
    volumes
        .into_iter()
        .flatten()
        .map(|volume| {
            let mut volume = volume.clone();
            if let Some(source) = volume.config_map.as_mut() {
                source.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
            }
            if let Some(source) = volume.secret.as_mut() {
                source.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
            }
            if let Some(source) = volume.projected.as_mut() {
                source.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
            }
            if let Some(source) = volume.downward_api.as_mut() {
                source.default_mode.get_or_insert(DEFAULT_VOLUME_MODE);
            }
            if let Some(source) = volume.host_path.as_mut() {
                if source.type_.as_deref() == Some("") {
                    source.type_ = None;
                }
            }
            volume
        })
        .collect()
}

fn pull_secrets(pod: &PodSpec) -> &[LocalObjectReference] {
    pod.image_pull_secrets.as_deref().unwrap_or_default()
}

fn container_differs(observed: &Container, desired: &Container) -> bool {
    observed.name != desired.name
        || observed.image != desired.image
        || (desired.image_pull_policy.is_some()
            && observed.image_pull_policy != desired.image_pull_policy)
        || observed.args.as_deref().unwrap_or_default() != desired.args.as_deref().unwrap_or_default()
        || !ports_equal(observed, desired)
        || !env_equal(
            observed.env.as_deref().unwrap_or_default(),
            desired.env.as_deref().unwrap_or_default(),
        )
        || !resources_equal(observed.resources.as_ref(), desired.resources.as_ref())
        || mount_summary(observed) != mount_summary(desired)
}

fn pod_differs(observed: &PodSpec, desired: &PodSpec) -> bool {
    let node_selector = |p: &PodSpec| p.node_selector.clone().unwrap_or_default();

    observed.containers.len() != desired.containers.len()
        || observed
            .containers
            .iter()
            .zip(&desired.containers)
            .any(|(o, d)| container_differs(o, d))
        || normalized_volumes(observed.volumes.as_ref()) != normalized_volumes(desired.volumes.as_ref())
        || node_selector(observed) != node_selector(desired)
        || pull_secrets(observed) != pull_secrets(desired)
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

/// Whether a deployment's managed fields differ from the desired ones
pub fn deployment_differs(observed: &Deployment, desired: &Deployment) -> bool {
    let replicas = |d: &Deployment| d.spec.as_ref().and_then(|s| s.replicas);
    if replicas(observed) != replicas(desired) {
        return true;
    }

    let (Some(observed_pod), Some(desired_pod)) = (pod_spec(observed), pod_spec(desired)) else {
        return pod_spec(observed).is_some() != pod_spec(desired).is_some();
    };

    pod_differs(observed_pod, desired_pod)
}

fn merge_metadata(observed: &mut ObjectMeta, desired: &ObjectMeta) {
    if let Some(labels) = &desired.labels {
        observed
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
    if desired.owner_references.is_some() {
        observed.owner_references = desired.owner_references.clone();
    }
}

/// Copy the managed fields of `desired` onto `observed`
pub fn merge_deployment(observed: &Deployment, desired: &Deployment) -> Deployment {
    let mut merged = observed.clone();
    merged.status = None;
    merge_metadata(&mut merged.metadata, &desired.metadata);

    let Some(desired_spec) = &desired.spec else {
        return merged;
    };
    let spec = merged.spec.get_or_insert_with(Default::default);
    spec.replicas = desired_spec.replicas;
    spec.selector = desired_spec.selector.clone();
    spec.template.metadata = desired_spec.template.metadata.clone();

    match (spec.template.spec.as_mut(), desired_spec.template.spec.as_ref()) {
        (Some(pod), Some(desired_pod)) => {
            pod.containers = desired_pod.containers.clone();
            pod.volumes = desired_pod.volumes.clone();
            pod.node_selector = desired_pod.node_selector.clone();
            pod.image_pull_secrets = desired_pod.image_pull_secrets.clone();
        }
        (_, desired_pod) => spec.template.spec = desired_pod.cloned(),
    }
    merged
}

fn service_port_summary(ports: Option<&Vec<ServicePort>>) -> Vec<(Option<String>, i32, Option<String>)> {
    ports
        .into_iter()
        .flatten()
        .map(|p| {
            let target = p.target_port.as_ref().map(|t| match t {
                flinkop_core::k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(i) => {
                    i.to_string()
                }
                flinkop_core::k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::String(s) => {
                    s.clone()
                }
            });
            (p.name.clone(), p.port, target)
        })
        .collect()
}

/// Whether a service's type, managed annotations, selector or ports differ
pub fn service_differs(observed: &Service, desired: &Service) -> bool {
    let spec_type = |s: &Service| s.spec.as_ref().and_then(|s| s.type_.clone());
    let selector = |s: &Service| s.spec.as_ref().and_then(|s| s.selector.clone());
    let ports = |s: &Service| service_port_summary(s.spec.as_ref().and_then(|s| s.ports.as_ref()));

    spec_type(observed) != spec_type(desired)
        || selector(observed) != selector(desired)
        || ports(observed) != ports(desired)
        || managed_annotation(observed) != managed_annotation(desired)
}

fn managed_annotation(service: &Service) -> Option<&String> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(crate::converter::INTERNAL_LB_ANNOTATION))
}

/// Copy the managed fields of `desired` onto `observed`, keeping the
/// allocated cluster IP and node ports
pub fn merge_service(observed: &Service, desired: &Service) -> Service {
    let mut merged = observed.clone();
    merged.status = None;
    merge_metadata(&mut merged.metadata, &desired.metadata);

    let annotations = merged.metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.remove(crate::converter::INTERNAL_LB_ANNOTATION);
    if let Some(desired_annotations) = &desired.metadata.annotations {
        annotations.extend(desired_annotations.clone());
    }
    if annotations.is_empty() {
        merged.metadata.annotations = None;
    }

    let Some(desired_spec) = &desired.spec else {
        return merged;
    };
    let spec = merged.spec.get_or_insert_with(Default::default);
    let old_ports = spec.ports.take().unwrap_or_default();
    spec.type_ = desired_spec.type_.clone();
    spec.selector = desired_spec.selector.clone();
    spec.ports = desired_spec.ports.as_ref().map(|ports| {
        ports
            .iter()
            .map(|p| {
                let mut port = p.clone();
                if spec.type_.as_deref() != Some("ClusterIP") {
                    port.node_port = old_ports
                        .iter()
                        .find(|o| o.name == p.name)
                        .and_then(|o| o.node_port);
                }
                port
            })
            .collect()
    });
    merged
}

/// The parts of a job submission that, when changed, warrant a savepoint
#[derive(Debug, Clone, PartialEq)]
pub struct JobFingerprint {
    pub args: Vec<String>,
    pub image: Option<String>,
    pub env: Vec<(String, Option<String>)>,
    pub mounts: Vec<MountSummary>,
    pub restart_policy: Option<String>,
    pub volumes: Vec<Volume>,
    pub pull_secrets: Vec<LocalObjectReference>,
}

fn job_pod(job: &Job) -> Option<&PodSpec> {
    job.spec.as_ref()?.template.spec.as_ref()
}

fn job_container(job: &Job) -> Option<&Container> {
    job_pod(job)?.containers.first()
}

/// Full argument vector of a job's submitter container
pub fn job_args(job: &Job) -> Vec<String> {
    job_container(job)
        .and_then(|c| c.args.clone())
        .unwrap_or_default()
}

/// Strip `--fromSavepoint <path>` from an argument vector
pub fn strip_savepoint_args(args: &[String]) -> Vec<String> {
    let mut stripped = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == FROM_SAVEPOINT_FLAG {
            iter.next();
            continue;
        }
        stripped.push(arg.clone());
    }
    stripped
}

pub fn job_fingerprint(job: &Job) -> JobFingerprint {
    let container = job_container(job);
    let pod = job_pod(job);
    JobFingerprint {
        args: strip_savepoint_args(&job_args(job)),
        image: container.and_then(|c| c.image.clone()),
        env: container
            .and_then(|c| c.env.as_ref())
            .into_iter()
            .flatten()
            .map(|e| (e.name.clone(), empty_as_none(&e.value).map(str::to_string)))
            .collect(),
        mounts: container.map(mount_summary).unwrap_or_default(),
        restart_policy: pod.and_then(|p| p.restart_policy.clone()),
        volumes: normalized_volumes(pod.and_then(|p| p.volumes.as_ref())),
        pull_secrets: pod.map(pull_secrets).unwrap_or_default().to_vec(),
    }
}

/// How an existing job relates to the desired one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobChange {
    /// Same submission
    None,
    /// Only the restore savepoint differs
    SavepointOnly,
    /// The submission itself changed
    Submission,
}

pub fn job_change(observed: &Job, desired: &Job) -> JobChange {
    if job_fingerprint(observed) != job_fingerprint(desired) {
        JobChange::Submission
    } else if job_args(observed) != job_args(desired) {
        JobChange::SavepointOnly
    } else {
        JobChange::None
    }
}
