use std::path::Path;

use metrics::{counter, gauge};

use super::InternalEvent;

const ANNOTATION_FAILED: &str = "annotation_failed";

/// A container log line whose pod is not in the metadata snapshot.
#[derive(Debug)]
pub struct KubernetesLogsAnnotationFailed<'a> {
    pub namespace: &'a str,
    pub pod: &'a str,
}

impl InternalEvent for KubernetesLogsAnnotationFailed<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "No pod metadata for container log; forwarding with path metadata only.",
            namespace = %self.namespace,
            pod = %self.pod,
            error_code = ANNOTATION_FAILED,
            internal_log_rate_secs = 30,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_code" => ANNOTATION_FAILED,
            "error_type" => "reader_failed",
            "stage" => "processing",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct PodMetadataLoaded<'a> {
    pub path: &'a Path,
    pub pods: usize,
    pub namespaces: usize,
}

impl InternalEvent for PodMetadataLoaded<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Loaded pod metadata.",
            path = %self.path.display(),
            pods = self.pods,
            namespaces = self.namespaces,
        );
    }

    #[allow(clippy::cast_precision_loss)]
    fn emit_metrics(&self) {
        gauge!("kubernetes_metadata_pods").set(self.pods as f64);
    }
}

#[derive(Debug)]
pub struct PodMetadataLoadFailed<'a> {
    pub path: &'a Path,
    pub error: &'a dyn std::error::Error,
}

impl InternalEvent for PodMetadataLoadFailed<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Failed to load pod metadata; keeping the previous snapshot.",
            path = %self.path.display(),
            error = %self.error,
            error_type = "reader_failed",
            stage = "receiving",
            internal_log_rate_secs = 60,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "reader_failed",
            "stage" => "receiving",
        )
        .increment(1);
    }
}
