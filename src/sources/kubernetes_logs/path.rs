//! Pod identity encoded in kubelet log paths.

use std::path::Path;

use crate::event::KubernetesMeta;

/// Parses `/var/log/pods/<namespace>_<pod>_<uid>/<container>/<n>.log`.
///
/// Namespace and pod names are DNS labels and pod UIDs are hex with dashes, so none of them
/// contain `_`.
pub fn parse_log_file_path(path: &str) -> Option<KubernetesMeta> {
    let path = Path::new(path);
    if path.extension()? != "log" {
        return None;
    }
    let container_dir = path.parent()?;
    let container_name = container_dir.file_name()?.to_str()?;
    let pod_dir = container_dir.parent()?.file_name()?.to_str()?;

    let mut parts = pod_dir.split('_');
    let (namespace, pod, uid) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || [namespace, pod, uid, container_name].contains(&"") {
        return None;
    }

    Some(KubernetesMeta {
        namespace_name: namespace.to_string(),
        pod_name: pod.to_string(),
        pod_id: uid.to_string(),
        container_name: container_name.to_string(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_kubelet_path() {
        let meta = parse_log_file_path(
            "/var/log/pods/e2e-71778-ns0_centos-logtest-8s9f2_4b2f1c8e-1d7a-4c8b-9f0e-2a6b5c3d1e0f/centos-logtest/0.log",
        )
        .unwrap();
        assert_eq!(meta.namespace_name, "e2e-71778-ns0");
        assert_eq!(meta.pod_name, "centos-logtest-8s9f2");
        assert_eq!(meta.pod_id, "4b2f1c8e-1d7a-4c8b-9f0e-2a6b5c3d1e0f");
        assert_eq!(meta.container_name, "centos-logtest");
    }

    #[rstest]
    #[case("/var/log/pods/ns_pod/c/0.log")]
    #[case("/var/log/pods/ns_pod_uid_extra/c/0.log")]
    #[case("/var/log/pods/ns__uid/c/0.log")]
    #[case("/var/log/pods/ns_pod_uid/c/0.log.gz")]
    #[case("0.log")]
    fn rejects_other_paths(#[case] path: &str) {
        assert_eq!(parse_log_file_path(path), None);
    }
}
