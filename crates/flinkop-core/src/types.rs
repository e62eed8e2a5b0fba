use serde::{Deserialize, Serialize};
use std::fmt;

/// Group, version and kind of an API resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "apps", "batch")
    pub group: String,
    /// API version (e.g., "v1", "v1alpha1")
    pub version: String,
    /// Resource kind (e.g., "Pod", "Deployment")
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` ("v1" or "group/version") into group and version
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = if let Some(idx) = api_version.find('/') {
            let (g, v) = api_version.split_at(idx);
            (g.to_string(), v[1..].to_string())
        } else {
            (String::new(), api_version.to_string())
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// The `apiVersion` field value
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Root of the REST API serving this group: `api/v1` for the core
    /// group, `apis/<group>/<version>` otherwise
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// Plural resource name used in REST paths
    pub fn resource_name(&self) -> String {
        let lower = self.kind.to_lowercase();
        if lower.ends_with('s') {
            format!("{}es", lower)
        } else if lower.ends_with('y') {
            format!("{}ies", &lower[..lower.len() - 1])
        } else {
            format!("{}s", lower)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// ResourceKey identifies a namespaced resource instance, or a namespaced
/// collection when `name` is empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace (empty means all namespaces for collections)
    pub namespace: String,
    /// Resource name (empty for collections)
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        gvk: GroupVersionKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a key for the collection of `gvk` resources in `namespace`
    pub fn collection(gvk: GroupVersionKind, namespace: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: String::new(),
        }
    }

    /// REST path of the object
    pub fn api_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    /// REST path of the object's status subresource
    pub fn status_path(&self) -> String {
        format!("{}/status", self.api_path())
    }

    /// REST path of the collection, cluster-wide when the namespace is empty
    pub fn collection_path(&self) -> String {
        let base = self.gvk.api_path();
        let resource = self.gvk.resource_name();

        if self.namespace.is_empty() {
            format!("/{}/{}", base, resource)
        } else {
            format!("/{}/namespaces/{}/{}", base, self.namespace, resource)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.gvk, self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "Service");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.api_version(), "v1");

        let gvk = GroupVersionKind::from_api_version_kind("flinkoperator.k8s.io/v1alpha1", "FlinkCluster");
        assert_eq!(gvk.group, "flinkoperator.k8s.io");
        assert_eq!(gvk.version, "v1alpha1");
        assert_eq!(gvk.api_version(), "flinkoperator.k8s.io/v1alpha1");
    }

    #[test]
    fn test_gvk_resource_name() {
        let cases = [
            ("v1", "Pod", "pods"),
            ("v1", "Service", "services"),
            ("apps/v1", "Deployment", "deployments"),
            ("batch/v1", "Job", "jobs"),
            ("flinkoperator.k8s.io/v1alpha1", "FlinkCluster", "flinkclusters"),
        ];
        for (api_version, kind, plural) in cases {
            let gvk = GroupVersionKind::from_api_version_kind(api_version, kind);
            assert_eq!(gvk.resource_name(), plural);
        }
    }

    #[test]
    fn test_resource_key_paths() {
        let gvk = GroupVersionKind::from_api_version_kind("apps/v1", "Deployment");
        let key = ResourceKey::new(gvk.clone(), "default", "wordcount-jobmanager");
        assert_eq!(
            key.api_path(),
            "/apis/apps/v1/namespaces/default/deployments/wordcount-jobmanager"
        );

        let collection = ResourceKey::collection(gvk, "");
        assert_eq!(collection.collection_path(), "/apis/apps/v1/deployments");
    }

    #[test]
    fn test_resource_key_status_path() {
        let gvk = GroupVersionKind::from_api_version_kind("flinkoperator.k8s.io/v1alpha1", "FlinkCluster");
        let key = ResourceKey::new(gvk, "flink", "wordcount");
        assert_eq!(
            key.status_path(),
            "/apis/flinkoperator.k8s.io/v1alpha1/namespaces/flink/flinkclusters/wordcount/status"
        );
    }
}
