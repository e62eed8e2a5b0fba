//! Names and labels of the resources created for a cluster.

use std::collections::BTreeMap;

pub const LABEL_APP: &str = "app";
pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_COMPONENT: &str = "component";
/// Set on job pods by the platform's job controller
pub const LABEL_JOB_NAME: &str = "job-name";

pub const APP_NAME: &str = "flink";
pub const COMPONENT_JOB_MANAGER: &str = "jobmanager";
pub const COMPONENT_TASK_MANAGER: &str = "taskmanager";

pub fn job_manager_deployment_name(cluster: &str) -> String {
    format!("{}-jobmanager", cluster)
}

pub fn job_manager_service_name(cluster: &str) -> String {
    format!("{}-jobmanager", cluster)
}

pub fn task_manager_deployment_name(cluster: &str) -> String {
    format!("{}-taskmanager", cluster)
}

pub fn job_name(cluster: &str) -> String {
    format!("{}-job", cluster)
}

/// Labels shared by every resource of a cluster
pub fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), APP_NAME.to_string()),
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
    ])
}

/// Labels of one component (jobmanager or taskmanager)
pub fn component_labels(cluster: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster);
    labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
    labels
}

/// Selector matching the pods of the cluster's job
pub fn job_pod_selector(cluster: &str) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster);
    labels.insert(LABEL_JOB_NAME.to_string(), job_name(cluster));
    labels
}

/// Render a label map as a `k=v,k=v` selector string
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Check whether `labels` contains every entry of `selector`
pub fn labels_match(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    selector.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// In-cluster DNS name of a service
pub fn service_dns_name(service: &str, namespace: &str) -> String {
    format!("{}.{}.svc.cluster.local", service, namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(job_manager_deployment_name("wc"), "wc-jobmanager");
        assert_eq!(job_manager_service_name("wc"), "wc-jobmanager");
        assert_eq!(task_manager_deployment_name("wc"), "wc-taskmanager");
        assert_eq!(job_name("wc"), "wc-job");
    }

    #[test]
    fn test_job_pod_selector() {
        let selector = job_pod_selector("wc");
        assert_eq!(selector_string(&selector), "app=flink,cluster=wc,job-name=wc-job");
    }

    #[test]
    fn test_labels_match() {
        let selector = cluster_labels("wc");
        let labels = component_labels("wc", COMPONENT_TASK_MANAGER);
        assert!(labels_match(&selector, Some(&labels)));
        assert!(!labels_match(&selector, Some(&cluster_labels("other"))));
        assert!(!labels_match(&selector, None));
        assert!(labels_match(&BTreeMap::new(), None));
    }
}
