//! Computes the resources a cluster should have from its spec and phase.
//!
//! Everything here is pure: the same cluster always yields byte-identical
//! output, so a pass over a converged cluster produces an empty plan.

use crate::error::Result;
use flinkop_core::cluster::{AccessScope, FlinkCluster, ImageSpec};
use flinkop_core::k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use flinkop_core::k8s_openapi::api::batch::v1::{Job, JobSpec as BatchJobSpec};
use flinkop_core::k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    ResourceFieldSelector, Service, ServicePort, ServiceSpec,
};
use flinkop_core::k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use flinkop_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use flinkop_core::k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use flinkop_core::naming::{self, COMPONENT_JOB_MANAGER, COMPONENT_TASK_MANAGER};
use flinkop_core::Resource;
use serde::Serialize;
use std::collections::BTreeMap;

/// Directory the container entrypoint downloads remote jars into
pub const REMOTE_JAR_DIR: &str = "/opt/flink/job";

pub const ENV_JOB_MANAGER_RPC_ADDRESS: &str = "JOB_MANAGER_RPC_ADDRESS";
pub const ENV_FLINK_PROPERTIES: &str = "FLINK_PROPERTIES";
pub const ENV_FLINK_JOB_JAR_URI: &str = "FLINK_JOB_JAR_URI";

/// Annotation requesting an internal load balancer on GKE
pub const INTERNAL_LB_ANNOTATION: &str = "cloud.google.com/load-balancer-type";

/// Resources a cluster should have. `None` means the resource must not exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DesiredClusterState {
    pub jm_deployment: Option<Deployment>,
    pub jm_service: Option<Service>,
    pub tm_deployment: Option<Deployment>,
    pub job: Option<Job>,
}

impl DesiredClusterState {
    /// Render the present resources as a multi-document YAML stream
    pub fn to_yaml(&self) -> flinkop_core::Result<String> {
        let mut docs = Vec::new();
        if let Some(d) = &self.jm_deployment {
            docs.push(flinkop_core::to_yaml(d)?);
        }
        if let Some(s) = &self.jm_service {
            docs.push(flinkop_core::to_yaml(s)?);
        }
        if let Some(d) = &self.tm_deployment {
            docs.push(flinkop_core::to_yaml(d)?);
        }
        if let Some(j) = &self.job {
            docs.push(flinkop_core::to_yaml(j)?);
        }
        Ok(docs.join("---\n"))
    }
}

/// Compute the desired state of a cluster
///
/// An absent cluster, or one that is stopping or stopped, wants nothing.
pub fn desired_state(cluster: Option<&FlinkCluster>) -> Result<DesiredClusterState> {
    let cluster = match cluster {
        Some(c) if !c.phase().is_some_and(|p| p.is_shut_down()) => c,
        _ => return Ok(DesiredClusterState::default()),
    };

    Ok(DesiredClusterState {
        jm_deployment: Some(job_manager_deployment(cluster)),
        jm_service: Some(job_manager_service(cluster)?),
        tm_deployment: Some(task_manager_deployment(cluster)),
        job: desired_job(cluster),
    })
}

fn child_metadata(
    cluster: &FlinkCluster,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(cluster.namespace().to_string()),
        labels: Some(labels),
        owner_references: Some(vec![cluster.controller_owner_ref()]),
        ..Default::default()
    }
}

/// `key: value` lines in key order, as consumed by the image entrypoint
pub fn flink_properties(properties: &BTreeMap<String, String>) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{}: {}\n", k, v))
        .collect()
}

fn resource_env(name: &str, container: &str, resource: &str, divisor: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            resource_field_ref: Some(ResourceFieldSelector {
                container_name: Some(container.to_string()),
                resource: resource.to_string(),
                divisor: Some(Quantity(divisor.to_string())),
            }),
            ..Default::default()
        }),
    }
}

fn value_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Env shared by the JobManager and TaskManager containers. `role` is
/// `JOB_MANAGER` or `TASK_MANAGER`.
fn flink_env(cluster: &FlinkCluster, role: &str, container: &str) -> Vec<EnvVar> {
    let mut env = vec![
        value_env(
            ENV_JOB_MANAGER_RPC_ADDRESS,
            naming::job_manager_deployment_name(cluster.name()),
        ),
        resource_env(&format!("{}_CPU_LIMIT", role), container, "limits.cpu", "1m"),
        resource_env(
            &format!("{}_MEMORY_LIMIT", role),
            container,
            "limits.memory",
            "1Mi",
        ),
        value_env(
            ENV_FLINK_PROPERTIES,
            flink_properties(&cluster.spec.flink_properties),
        ),
    ];
    env.extend(cluster.spec.env_vars.iter().cloned());
    env
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        ..Default::default()
    }
}

fn non_empty<T>(items: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}

fn non_empty_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

fn image_container(image: &ImageSpec, name: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.name.clone()),
        image_pull_policy: image.pull_policy.clone(),
        ..Default::default()
    }
}

fn deployment(
    cluster: &FlinkCluster,
    name: String,
    component: &str,
    replicas: i32,
    pod_spec: PodSpec,
) -> Deployment {
    let labels = naming::component_labels(cluster.name(), component);
    Deployment {
        metadata: child_metadata(cluster, name, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Deployment running the JobManager
pub fn job_manager_deployment(cluster: &FlinkCluster) -> Deployment {
    let spec = &cluster.spec.job_manager;
    let ports = spec.ports;

    let container = Container {
        args: Some(vec![COMPONENT_JOB_MANAGER.to_string()]),
        ports: Some(vec![
            container_port("rpc", ports.rpc),
            container_port("blob", ports.blob),
            container_port("query", ports.query),
            container_port("ui", ports.ui),
        ]),
        resources: Some(spec.resources.clone()),
        env: Some(flink_env(cluster, "JOB_MANAGER", COMPONENT_JOB_MANAGER)),
        volume_mounts: non_empty(&spec.mounts),
        ..image_container(&cluster.spec.image, COMPONENT_JOB_MANAGER)
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        volumes: non_empty(&spec.volumes),
        node_selector: non_empty_map(&spec.node_selector),
        image_pull_secrets: cluster.spec.image.pull_secrets.clone(),
        ..Default::default()
    };

    deployment(
        cluster,
        naming::job_manager_deployment_name(cluster.name()),
        COMPONENT_JOB_MANAGER,
        spec.replicas,
        pod_spec,
    )
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::String(name.to_string())),
        ..Default::default()
    }
}

/// Service in front of the JobManager, exposed according to its access scope
pub fn job_manager_service(cluster: &FlinkCluster) -> Result<Service> {
    let spec = &cluster.spec.job_manager;
    let ports = spec.ports;
    let scope: AccessScope = spec.access_scope.parse()?;

    let labels = naming::component_labels(cluster.name(), COMPONENT_JOB_MANAGER);
    let mut metadata = child_metadata(
        cluster,
        naming::job_manager_service_name(cluster.name()),
        labels.clone(),
    );

    let service_type = match scope {
        AccessScope::Cluster => "ClusterIP",
        AccessScope::Vpc => {
            metadata.annotations = Some(BTreeMap::from([(
                INTERNAL_LB_ANNOTATION.to_string(),
                "Internal".to_string(),
            )]));
            "LoadBalancer"
        }
        AccessScope::External => "LoadBalancer",
    };

    Ok(Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            selector: Some(labels),
            ports: Some(vec![
                service_port("rpc", ports.rpc),
                service_port("blob", ports.blob),
                service_port("query", ports.query),
                service_port("ui", ports.ui),
            ]),
            ..Default::default()
        }),
        status: None,
    })
}

/// Deployment running the TaskManager pool
pub fn task_manager_deployment(cluster: &FlinkCluster) -> Deployment {
    let spec = &cluster.spec.task_manager;
    let ports = spec.ports;

    let container = Container {
        args: Some(vec![COMPONENT_TASK_MANAGER.to_string()]),
        ports: Some(vec![
            container_port("data", ports.data),
            container_port("rpc", ports.rpc),
            container_port("query", ports.query),
        ]),
        resources: Some(spec.resources.clone()),
        env: Some(flink_env(cluster, "TASK_MANAGER", COMPONENT_TASK_MANAGER)),
        volume_mounts: non_empty(&spec.mounts),
        ..image_container(&cluster.spec.image, COMPONENT_TASK_MANAGER)
    };

    let mut containers = vec![container];
    containers.extend(spec.sidecars.iter().cloned());

    let pod_spec = PodSpec {
        containers,
        volumes: non_empty(&spec.volumes),
        node_selector: non_empty_map(&spec.node_selector),
        image_pull_secrets: cluster.spec.image.pull_secrets.clone(),
        ..Default::default()
    };

    deployment(
        cluster,
        naming::task_manager_deployment_name(cluster.name()),
        COMPONENT_TASK_MANAGER,
        spec.replicas,
        pod_spec,
    )
}

/// Path handed to `flink run`, plus the URI to download when the jar is remote
pub fn resolve_jar(jar_file: &str) -> (String, Option<String>) {
    if jar_file.contains("://") {
        let file = jar_file.rsplit('/').next().unwrap_or_default();
        (
            format!("{}/{}", REMOTE_JAR_DIR, file),
            Some(jar_file.to_string()),
        )
    } else {
        (jar_file.to_string(), None)
    }
}

/// Savepoint the next submission restores from. One the operator took
/// during a restart wins over the spec savepoint it superseded, but not
/// over a spec savepoint edited since.
pub fn restore_savepoint(cluster: &FlinkCluster) -> Option<String> {
    let requested = cluster.spec.job.as_ref().and_then(|j| j.savepoint.clone());
    let recorded = cluster
        .status
        .as_ref()
        .and_then(|s| s.components.job.as_ref())
        .filter(|j| j.requested_savepoint == requested)
        .and_then(|j| j.restore_savepoint.clone());
    recorded.or(requested)
}

/// Argument vector of the job submitter container
pub fn job_args(cluster: &FlinkCluster) -> Option<Vec<String>> {
    let job = cluster.spec.job.as_ref()?;
    let ui_port = cluster.spec.job_manager.ports.ui;

    let mut args = vec![
        "./bin/flink".to_string(),
        "run".to_string(),
        "--jobmanager".to_string(),
        format!(
            "{}:{}",
            naming::job_manager_service_name(cluster.name()),
            ui_port
        ),
    ];
    if let Some(class_name) = &job.class_name {
        args.push("--class".to_string());
        args.push(class_name.clone());
    }
    if let Some(savepoint) = restore_savepoint(cluster) {
        args.push("--fromSavepoint".to_string());
        args.push(savepoint);
    }
    if job.allow_non_restored_state {
        args.push("--allowNonRestoredState".to_string());
    }
    if let Some(parallelism) = job.parallelism {
        args.push("--parallelism".to_string());
        args.push(parallelism.to_string());
    }
    if job.no_logging_to_stdout {
        args.push("--sysoutLogging".to_string());
    }

    let (jar_path, _) = resolve_jar(&job.jar_file);
    args.push(jar_path);
    args.extend(job.args.iter().cloned());
    Some(args)
}

/// One-shot batch Job submitting the Flink job
pub fn desired_job(cluster: &FlinkCluster) -> Option<Job> {
    let job = cluster.spec.job.as_ref()?;
    let args = job_args(cluster)?;

    let mut env: Vec<EnvVar> = cluster.spec.env_vars.clone();
    if let (_, Some(uri)) = resolve_jar(&job.jar_file) {
        env.push(value_env(ENV_FLINK_JOB_JAR_URI, uri));
    }

    let labels = naming::cluster_labels(cluster.name());
    let container = Container {
        args: Some(args),
        env: non_empty(&env),
        volume_mounts: non_empty(&job.mounts),
        ..image_container(&cluster.spec.image, "main")
    };

    Some(Job {
        metadata: child_metadata(cluster, naming::job_name(cluster.name()), labels.clone()),
        spec: Some(BatchJobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some(job.restart_policy.as_str().to_string()),
                    volumes: non_empty(&job.volumes),
                    image_pull_secrets: cluster.spec.image.pull_secrets.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flinkop_core::cluster::{
        ClusterPhase, FlinkClusterSpec, FlinkClusterStatus, JobManagerSpec, JobSpec, JobStatus,
        TaskManagerSpec,
    };

    pub(crate) fn wordcount_cluster() -> FlinkCluster {
        let mut cluster = FlinkCluster::new(
            "flink",
            "wordcount",
            FlinkClusterSpec {
                image: ImageSpec {
                    name: "flink:1.8.1".to_string(),
                    pull_policy: Some("Always".to_string()),
                    pull_secrets: None,
                },
                job_manager: JobManagerSpec::default(),
                task_manager: TaskManagerSpec {
                    replicas: 2,
                    ports: Default::default(),
                    resources: Default::default(),
                    volumes: vec![],
                    mounts: vec![],
                    node_selector: BTreeMap::new(),
                    sidecars: vec![],
                },
                job: Some(JobSpec {
                    jar_file: "./examples/batch/WordCount.jar".to_string(),
                    class_name: Some(
                        "org.apache.flink.examples.java.wordcount.WordCount".to_string(),
                    ),
                    args: vec![],
                    parallelism: Some(2),
                    savepoint: None,
                    savepoints_dir: None,
                    allow_non_restored_state: false,
                    no_logging_to_stdout: false,
                    restart_policy: Default::default(),
                    volumes: vec![],
                    mounts: vec![],
                }),
                env_vars: vec![],
                flink_properties: BTreeMap::new(),
                desired_phase: Default::default(),
            },
        );
        cluster.metadata.uid = Some("c0ffee".to_string());
        cluster
    }

    fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a EnvVar> {
        env.iter().find(|e| e.name == name)
    }

    #[test]
    fn test_wordcount_job_args() {
        let cluster = wordcount_cluster();
        let job = desired_job(&cluster).unwrap();
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];

        assert_eq!(container.name, "main");
        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec![
                "./bin/flink",
                "run",
                "--jobmanager",
                "wordcount-jobmanager:8081",
                "--class",
                "org.apache.flink.examples.java.wordcount.WordCount",
                "--parallelism",
                "2",
                "./examples/batch/WordCount.jar",
            ]
        );
        assert!(container.env.is_none());
    }

    #[test]
    fn test_job_args_optional_flags_and_user_args() {
        let mut cluster = wordcount_cluster();
        let job = cluster.spec.job.as_mut().unwrap();
        job.savepoint = Some("gs://bucket/sp-0".to_string());
        job.allow_non_restored_state = true;
        job.no_logging_to_stdout = true;
        job.args = vec!["--input".to_string(), "/data/in.txt".to_string()];

        let args = job_args(&cluster).unwrap();
        assert_eq!(
            &args[4..],
            &[
                "--class",
                "org.apache.flink.examples.java.wordcount.WordCount",
                "--fromSavepoint",
                "gs://bucket/sp-0",
                "--allowNonRestoredState",
                "--parallelism",
                "2",
                "--sysoutLogging",
                "./examples/batch/WordCount.jar",
                "--input",
                "/data/in.txt",
            ]
        );
    }

    #[test]
    fn test_recorded_savepoint_wins() {
        let mut cluster = wordcount_cluster();
        cluster.spec.job.as_mut().unwrap().savepoint = Some("gs://bucket/sp-0".to_string());
        cluster.status = Some(FlinkClusterStatus {
            components: flinkop_core::ClusterComponentsStatus {
                job: Some(JobStatus {
                    name: "wordcount-job".to_string(),
                    id: None,
                    state: Default::default(),
                    restore_savepoint: Some("gs://bucket/sp-7".to_string()),
                    requested_savepoint: Some("gs://bucket/sp-0".to_string()),
                }),
                ..Default::default()
            },
            ..Default::default()
        });

        let args = job_args(&cluster).unwrap();
        let pos = args.iter().position(|a| a == "--fromSavepoint").unwrap();
        assert_eq!(args[pos + 1], "gs://bucket/sp-7");
    }

    #[test]
    fn test_edited_spec_savepoint_overrides_recorded() {
        let mut cluster = wordcount_cluster();
        cluster.status = Some(FlinkClusterStatus {
            components: flinkop_core::ClusterComponentsStatus {
                job: Some(JobStatus {
                    name: "wordcount-job".to_string(),
                    id: None,
                    state: Default::default(),
                    restore_savepoint: Some("gs://op/sp-1".to_string()),
                    requested_savepoint: None,
                }),
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(restore_savepoint(&cluster).as_deref(), Some("gs://op/sp-1"));

        cluster.spec.job.as_mut().unwrap().savepoint = Some("gs://user/sp-9".to_string());
        let args = job_args(&cluster).unwrap();
        let pos = args.iter().position(|a| a == "--fromSavepoint").unwrap();
        assert_eq!(args[pos + 1], "gs://user/sp-9");
        assert!(!args.contains(&"gs://op/sp-1".to_string()));
    }

    #[test]
    fn test_remote_jar_rewrite() {
        let mut cluster = wordcount_cluster();
        cluster.spec.job.as_mut().unwrap().jar_file = "s3://bucket/path/app.jar".to_string();

        let job = desired_job(&cluster).unwrap();
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let args = container.args.as_ref().unwrap();
        assert!(args.contains(&"/opt/flink/job/app.jar".to_string()));
        assert!(!args.contains(&"s3://bucket/path/app.jar".to_string()));

        let env = container.env.as_ref().unwrap();
        assert_eq!(
            env_value(env, ENV_FLINK_JOB_JAR_URI).unwrap().value.as_deref(),
            Some("s3://bucket/path/app.jar")
        );
    }

    #[test]
    fn test_local_jar_untouched() {
        assert_eq!(
            resolve_jar("./local/app.jar"),
            ("./local/app.jar".to_string(), None)
        );
    }

    #[test]
    fn test_access_scope_mapping() {
        let mut cluster = wordcount_cluster();

        let service = job_manager_service(&cluster).unwrap();
        assert_eq!(service.spec.as_ref().unwrap().type_.as_deref(), Some("ClusterIP"));
        assert!(service.metadata.annotations.is_none());

        cluster.spec.job_manager.access_scope = "VPC".to_string();
        let service = job_manager_service(&cluster).unwrap();
        assert_eq!(service.spec.as_ref().unwrap().type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(
            service.metadata.annotations.as_ref().unwrap()[INTERNAL_LB_ANNOTATION],
            "Internal"
        );

        cluster.spec.job_manager.access_scope = "External".to_string();
        let service = job_manager_service(&cluster).unwrap();
        assert_eq!(service.spec.as_ref().unwrap().type_.as_deref(), Some("LoadBalancer"));
        assert!(service.metadata.annotations.is_none());

        cluster.spec.job_manager.access_scope = "Internet".to_string();
        let err = desired_state(Some(&cluster)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_service_ports_target_names() {
        let service = job_manager_service(&wordcount_cluster()).unwrap();
        let ports = service.spec.unwrap().ports.unwrap();
        let summary: Vec<(String, i32)> = ports
            .iter()
            .map(|p| (p.name.clone().unwrap(), p.port))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("rpc".to_string(), 6123),
                ("blob".to_string(), 6124),
                ("query".to_string(), 6125),
                ("ui".to_string(), 8081),
            ]
        );
        assert_eq!(
            ports[3].target_port,
            Some(IntOrString::String("ui".to_string()))
        );
    }

    #[test]
    fn test_job_manager_env_order() {
        let mut cluster = wordcount_cluster();
        cluster.spec.flink_properties = BTreeMap::from([
            ("taskmanager.numberOfTaskSlots".to_string(), "2".to_string()),
            ("jobmanager.heap.size".to_string(), "1024m".to_string()),
        ]);
        cluster.spec.env_vars = vec![value_env("EXTRA", "1")];

        let deployment = job_manager_deployment(&cluster);
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "JOB_MANAGER_RPC_ADDRESS",
                "JOB_MANAGER_CPU_LIMIT",
                "JOB_MANAGER_MEMORY_LIMIT",
                "FLINK_PROPERTIES",
                "EXTRA",
            ]
        );
        assert_eq!(env[0].value.as_deref(), Some("wordcount-jobmanager"));
        assert_eq!(
            env[3].value.as_deref(),
            Some("jobmanager.heap.size: 1024m\ntaskmanager.numberOfTaskSlots: 2\n")
        );

        let cpu = env[1].value_from.as_ref().unwrap().resource_field_ref.as_ref().unwrap();
        assert_eq!(cpu.resource, "limits.cpu");
        assert_eq!(cpu.divisor, Some(Quantity("1m".to_string())));
        let memory = env[2].value_from.as_ref().unwrap().resource_field_ref.as_ref().unwrap();
        assert_eq!(memory.divisor, Some(Quantity("1Mi".to_string())));
    }

    #[test]
    fn test_task_manager_sidecars_follow_main_container() {
        let mut cluster = wordcount_cluster();
        cluster.spec.task_manager.sidecars = vec![Container {
            name: "log-shipper".to_string(),
            ..Default::default()
        }];

        let deployment = task_manager_deployment(&cluster);
        assert_eq!(deployment.metadata.name.as_deref(), Some("wordcount-taskmanager"));
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));

        let containers = spec.template.spec.unwrap().containers;
        assert_eq!(containers[0].name, "taskmanager");
        assert_eq!(containers[0].args, Some(vec!["taskmanager".to_string()]));
        assert_eq!(containers[1].name, "log-shipper");

        let env = containers[0].env.as_ref().unwrap();
        assert!(env_value(env, "TASK_MANAGER_CPU_LIMIT").is_some());
        assert!(env_value(env, "TASK_MANAGER_MEMORY_LIMIT").is_some());
    }

    #[test]
    fn test_owner_reference() {
        let deployment = job_manager_deployment(&wordcount_cluster());
        let owner = &deployment.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "FlinkCluster");
        assert_eq!(owner.api_version, "flinkoperator.k8s.io/v1alpha1");
        assert_eq!(owner.name, "wordcount");
        assert_eq!(owner.uid, "c0ffee");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(false));
    }

    #[test]
    fn test_stopping_cluster_wants_nothing() {
        for phase in [ClusterPhase::Stopping, ClusterPhase::Stopped] {
            let mut cluster = wordcount_cluster();
            cluster.status = Some(FlinkClusterStatus {
                state: phase,
                ..Default::default()
            });
            assert_eq!(
                desired_state(Some(&cluster)).unwrap(),
                DesiredClusterState::default()
            );
        }
        assert_eq!(desired_state(None).unwrap(), DesiredClusterState::default());
    }

    #[test]
    fn test_session_cluster_has_no_job() {
        let mut cluster = wordcount_cluster();
        cluster.spec.job = None;
        let desired = desired_state(Some(&cluster)).unwrap();
        assert!(desired.job.is_none());
        assert!(desired.jm_deployment.is_some());
    }

    #[test]
    fn test_deterministic_output() {
        let mut cluster = wordcount_cluster();
        cluster.spec.flink_properties = (0..20)
            .map(|i| (format!("key.{}", i), format!("value-{}", i)))
            .collect();

        let first = serde_json::to_vec(&desired_state(Some(&cluster)).unwrap()).unwrap();
        let second = serde_json::to_vec(&desired_state(Some(&cluster.clone())).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_to_yaml_documents() {
        let yaml = desired_state(Some(&wordcount_cluster()))
            .unwrap()
            .to_yaml()
            .unwrap();
        assert_eq!(yaml.matches("---\n").count(), 3);
        assert!(yaml.contains("kind: Job"));
    }
}
