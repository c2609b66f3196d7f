//! Pod metadata from a node-local snapshot file.
//!
//! The daemonset keeps a JSON file with the namespaces and the pods scheduled on this node up to
//! date. The collector reloads it when it changes and looks records up by pod UID, falling back
//! to namespace and pod name.

use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use arc_swap::ArcSwap;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;

use crate::{
    event::KubernetesMeta,
    internal_events::{KubernetesLogsAnnotationFailed, PodMetadataLoadFailed, PodMetadataLoaded},
    transforms::normalize::MetadataProvider,
};

#[derive(Debug, Snafu)]
pub enum MetadataError {
    #[snafu(display("Could not read {}: {source}", path.display()))]
    Read { path: PathBuf, source: io::Error },
    #[snafu(display("Could not parse {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    namespaces: Vec<NamespaceInfo>,
    #[serde(default)]
    pods: Vec<PodInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceInfo {
    name: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodInfo {
    namespace: String,
    name: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    #[serde(default)]
    containers: Vec<ContainerInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerInfo {
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    image: String,
}

#[derive(Debug, Default)]
struct PodIndex {
    namespaces: HashMap<String, NamespaceInfo>,
    pods: Vec<PodInfo>,
    by_uid: HashMap<String, usize>,
    by_name: HashMap<(String, String), usize>,
}

impl PodIndex {
    fn new(snapshot: Snapshot) -> Self {
        let mut index = Self {
            namespaces: snapshot
                .namespaces
                .into_iter()
                .map(|namespace| (namespace.name.clone(), namespace))
                .collect(),
            ..Default::default()
        };
        for (position, pod) in snapshot.pods.iter().enumerate() {
            if !pod.uid.is_empty() {
                index.by_uid.insert(pod.uid.clone(), position);
            }
            index
                .by_name
                .insert((pod.namespace.clone(), pod.name.clone()), position);
        }
        index.pods = snapshot.pods;
        index
    }

    fn pod(&self, meta: &KubernetesMeta) -> Option<&PodInfo> {
        let position = self.by_uid.get(&meta.pod_id).or_else(|| {
            self.by_name
                .get(&(meta.namespace_name.clone(), meta.pod_name.clone()))
        })?;
        self.pods.get(*position)
    }
}

/// A [`MetadataProvider`] backed by the pods snapshot file.
pub struct PodsFile {
    path: PathBuf,
    index: ArcSwap<PodIndex>,
    modified: Mutex<Option<SystemTime>>,
}

impl PodsFile {
    /// Loads `path` once. A missing or broken file leaves the snapshot empty until it is fixed.
    pub fn open(path: &Path) -> Arc<Self> {
        let pods = Arc::new(Self {
            path: path.to_path_buf(),
            index: ArcSwap::from_pointee(PodIndex::default()),
            modified: Mutex::new(None),
        });
        pods.refresh_logged();
        pods
    }

    /// Reloads the snapshot if the file changed. Returns whether it was reloaded.
    pub fn refresh(&self) -> Result<bool, MetadataError> {
        let path = &self.path;
        let modified = fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .context(ReadSnafu { path })?;
        {
            let last = self
                .modified
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *last == Some(modified) {
                return Ok(false);
            }
        }

        let content = fs::read(path).context(ReadSnafu { path })?;
        let snapshot: Snapshot = serde_json::from_slice(&content).context(ParseSnafu { path })?;
        emit!(PodMetadataLoaded {
            path,
            pods: snapshot.pods.len(),
            namespaces: snapshot.namespaces.len(),
        });
        self.index.store(Arc::new(PodIndex::new(snapshot)));
        *self
            .modified
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(modified);
        Ok(true)
    }

    fn refresh_logged(&self) {
        if let Err(error) = self.refresh() {
            emit!(PodMetadataLoadFailed {
                path: &self.path,
                error: &error,
            });
        }
    }

    /// Polls the file until `shutdown` fires.
    pub async fn watch(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pods = Arc::clone(&self);
                    // The snapshot can be large; parse it off the runtime threads.
                    let _ = tokio::task::spawn_blocking(move || pods.refresh_logged()).await;
                }
            }
        }
    }
}

impl MetadataProvider for PodsFile {
    fn enrich(&self, meta: &mut KubernetesMeta) -> bool {
        let index = self.index.load();
        if let Some(namespace) = index.namespaces.get(&meta.namespace_name) {
            meta.namespace_id.clone_from(&namespace.uid);
            meta.namespace_labels.clone_from(&namespace.labels);
        }

        let Some(pod) = index.pod(meta) else {
            emit!(KubernetesLogsAnnotationFailed {
                namespace: &meta.namespace_name,
                pod: &meta.pod_name,
            });
            return false;
        };
        if meta.pod_id.is_empty() {
            meta.pod_id.clone_from(&pod.uid);
        }
        meta.labels.clone_from(&pod.labels);
        meta.annotations.clone_from(&pod.annotations);
        if let Some(container) = pod
            .containers
            .iter()
            .find(|container| container.name == meta.container_name)
        {
            meta.container_id.clone_from(&container.id);
            meta.container_image.clone_from(&container.image);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const SNAPSHOT: &str = r#"{
  "namespaces": [
    {"name": "e2e-71778-ns0", "uid": "ns-uid-0", "labels": {"team": "a"}}
  ],
  "pods": [
    {
      "namespace": "e2e-71778-ns0",
      "name": "centos-logtest-abc",
      "uid": "pod-uid-0",
      "labels": {"run": "centos-logtest", "app.kubernetes.io/name": "logtest"},
      "containers": [{"name": "centos-logtest", "id": "cri-o://123", "image": "quay.io/centos"}]
    }
  ]
}"#;

    fn meta(pod_id: &str, pod_name: &str) -> KubernetesMeta {
        KubernetesMeta {
            namespace_name: "e2e-71778-ns0".into(),
            pod_name: pod_name.into(),
            pod_id: pod_id.into(),
            container_name: "centos-logtest".into(),
            ..Default::default()
        }
    }

    #[test]
    fn enriches_known_pods() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pods.json");
        fs::write(&path, SNAPSHOT).unwrap();
        let pods = PodsFile::open(&path);

        let mut by_uid = meta("pod-uid-0", "renamed");
        assert!(pods.enrich(&mut by_uid));
        assert_eq!(by_uid.namespace_id, "ns-uid-0");
        assert_eq!(by_uid.container_id, "cri-o://123");
        assert_eq!(by_uid.container_image, "quay.io/centos");
        assert_eq!(
            by_uid.flat_labels(),
            vec!["app.kubernetes.io/name=logtest", "run=centos-logtest"]
        );

        let mut by_name = meta("", "centos-logtest-abc");
        assert!(pods.enrich(&mut by_name));
        assert_eq!(by_name.pod_id, "pod-uid-0");
        assert_eq!(by_name.namespace_labels["team"], "a");

        let mut unknown = meta("other", "other");
        assert!(!pods.enrich(&mut unknown));
        assert_eq!(unknown.namespace_id, "ns-uid-0");
        assert!(unknown.labels.is_empty());
    }

    #[test]
    fn missing_file_keeps_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let pods = PodsFile::open(&dir.path().join("absent.json"));
        assert!(!pods.enrich(&mut meta("pod-uid-0", "centos-logtest-abc")));
        assert!(matches!(pods.refresh(), Err(MetadataError::Read { .. })));
    }

    #[test]
    fn broken_file_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pods.json");
        fs::write(&path, SNAPSHOT).unwrap();
        let pods = PodsFile::open(&path);
        assert!(!pods.refresh().unwrap());

        fs::write(&path, "{not json").unwrap();
        // Force the modification time check to see a change.
        *pods.modified.lock().unwrap() = None;
        assert!(matches!(pods.refresh(), Err(MetadataError::Parse { .. })));
        assert!(pods.enrich(&mut meta("pod-uid-0", "centos-logtest-abc")));
    }
}
