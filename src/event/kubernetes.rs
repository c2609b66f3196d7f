use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pod and container identity of a container log record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KubernetesMeta {
    pub namespace_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace_id: String,
    pub pod_name: String,
    pub pod_id: String,
    pub container_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container_image: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl KubernetesMeta {
    /// Pod labels as `key=value` strings, for stores that cannot index arbitrary map keys.
    pub fn flat_labels(&self) -> Vec<String> {
        flatten_labels(&self.labels)
    }

    /// Stable key of the container stream, used by per-container limits and stream state.
    pub fn container_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.namespace_name, self.pod_name, self.container_name
        )
    }
}

pub fn flatten_labels(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect()
}

/// Inverse of [`flatten_labels`]. Entries without `=` are skipped.
pub fn unflatten_labels<S: AsRef<str>>(flat: &[S]) -> BTreeMap<String, String> {
    flat.iter()
        .filter_map(|entry| {
            entry
                .as_ref()
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Label keys as stored in the log document: `.` and `/` become `_`.
pub fn dedot(key: &str) -> String {
    key.replace(['.', '/'], "_")
}

pub fn dedot_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(key, value)| (dedot(key), value.clone()))
        .collect()
}

/// Namespaces whose containers produce infrastructure logs.
pub fn is_infra_namespace(namespace: &str) -> bool {
    namespace == "default" || namespace.starts_with("openshift") || namespace.starts_with("kube")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn flat_labels_split_on_first_equals() {
        let meta = KubernetesMeta {
            labels: BTreeMap::from([
                ("app.kubernetes.io/name".to_string(), "centos".to_string()),
                ("expr".to_string(), "a=b".to_string()),
            ]),
            ..Default::default()
        };
        let flat = meta.flat_labels();
        assert_eq!(flat, vec!["app.kubernetes.io/name=centos", "expr=a=b"]);
        assert_eq!(unflatten_labels(&flat), meta.labels);
    }

    #[test]
    fn dedots_label_keys() {
        assert_eq!(dedot("app.kubernetes.io/name"), "app_kubernetes_io_name");
        assert_eq!(dedot("run"), "run");
    }

    #[test]
    fn infra_namespaces() {
        for namespace in ["default", "openshift", "openshift-logging", "kube-system", "kubelet"] {
            assert!(is_infra_namespace(namespace), "{namespace}");
        }
        for namespace in ["ns0", "my-openshift", "defaults"] {
            assert!(!is_infra_namespace(namespace), "{namespace}");
        }
    }

    proptest! {
        #[test]
        fn flat_labels_round_trip(labels in prop::collection::btree_map("[a-z0-9./_-]{1,20}", "[a-zA-Z0-9=._-]{0,20}", 0..8)) {
            let meta = KubernetesMeta { labels: labels.clone(), ..Default::default() };
            prop_assert_eq!(unflatten_labels(&meta.flat_labels()), labels);
        }
    }
}
