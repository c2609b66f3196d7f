use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    finalization::{EventFinalizers, Finalizable},
    kubernetes::{KubernetesMeta, dedot_labels, flatten_labels},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Application,
    Infrastructure,
    Audit,
}

impl LogType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Infrastructure => "infrastructure",
            Self::Audit => "audit",
        }
    }

    /// Short form used in default index and table names.
    pub const fn short(self) -> &'static str {
        match self {
            Self::Application => "app",
            Self::Infrastructure => "infra",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum LogSource {
    #[serde(rename = "container")]
    Container,
    #[serde(rename = "node")]
    Node,
    #[serde(rename = "auditd")]
    Auditd,
    #[serde(rename = "kubeAPI")]
    KubeApi,
    #[serde(rename = "openshiftAPI")]
    OpenshiftApi,
    #[serde(rename = "ovn")]
    Ovn,
}

impl LogSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Node => "node",
            Self::Auditd => "auditd",
            Self::KubeApi => "kubeAPI",
            Self::OpenshiftApi => "openshiftAPI",
            Self::Ovn => "ovn",
        }
    }

    pub const fn is_audit(self) -> bool {
        matches!(
            self,
            Self::Auditd | Self::KubeApi | Self::OpenshiftApi | Self::Ovn
        )
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized log entry.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    /// The original, unparsed text of the entry.
    pub message: String,
    /// The body parsed as a JSON object, when structured parsing applies.
    pub structured: Option<Map<String, Value>>,
    pub log_type: LogType,
    pub log_source: LogSource,
    pub kubernetes: Option<KubernetesMeta>,
    pub hostname: Option<String>,
    pub level: Option<String>,
    pub openshift_labels: BTreeMap<String, String>,
    /// Source specific fields that have no typed home, such as `systemd` or audit payloads.
    pub extra: Map<String, Value>,
    /// Structured parsing was requested and failed.
    pub unparsed: bool,
    pub source_id: Arc<str>,
    /// Resume position inside the source: a byte offset for files, a sequence for journals.
    pub offset: u64,
    pub finalizers: EventFinalizers,
}

impl LogRecord {
    pub fn new(
        message: impl Into<String>,
        log_type: LogType,
        log_source: LogSource,
        source_id: Arc<str>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            structured: None,
            log_type,
            log_source,
            kubernetes: None,
            hostname: None,
            level: None,
            openshift_labels: BTreeMap::new(),
            extra: Map::new(),
            unparsed: false,
            source_id,
            offset: 0,
            finalizers: EventFinalizers::default(),
        }
    }

    pub fn with_finalizers(mut self, finalizers: EventFinalizers) -> Self {
        self.finalizers = finalizers;
        self
    }

    /// Approximate in-memory size, used for buffer accounting and write limits.
    ///
    /// Counts every string the record carries, so it is never smaller than the rendered document
    /// by more than the JSON punctuation.
    pub fn size_of(&self) -> usize {
        let structured = self.structured.as_ref().map_or(0, object_size);
        let kubernetes = self.kubernetes.as_ref().map_or(0, |meta| {
            meta.namespace_name.len()
                + meta.namespace_id.len()
                + meta.pod_name.len()
                + meta.pod_id.len()
                + meta.container_name.len()
                + meta.container_id.len()
                + meta.container_image.len()
                + map_size(&meta.labels)
                + map_size(&meta.namespace_labels)
                + map_size(&meta.annotations)
        });
        std::mem::size_of::<Self>()
            + self.message.len() * 2
            + structured
            + kubernetes
            + map_size(&self.openshift_labels)
            + object_size(&self.extra)
            + self.hostname.as_ref().map_or(0, String::len)
    }

    /// The record as a JSON document, with label keys as collected.
    ///
    /// Filters and templates operate on this shape; [`LogRecord::set_document`] writes an edited
    /// document back.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = self.extra.clone();
        doc.insert(
            "@timestamp".into(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        doc.insert("message".into(), Value::String(self.message.clone()));
        doc.insert("log_type".into(), Value::String(self.log_type.to_string()));
        doc.insert(
            "log_source".into(),
            Value::String(self.log_source.to_string()),
        );
        if let Some(hostname) = &self.hostname {
            doc.insert("hostname".into(), Value::String(hostname.clone()));
        }
        if let Some(level) = &self.level {
            doc.insert("level".into(), Value::String(level.clone()));
        }
        if let Some(structured) = &self.structured {
            doc.insert("structured".into(), Value::Object(structured.clone()));
        }
        if let Some(meta) = &self.kubernetes {
            if let Ok(value) = serde_json::to_value(meta) {
                doc.insert("kubernetes".into(), value);
            }
        }
        let mut openshift = match doc.remove("openshift") {
            Some(Value::Object(openshift)) => openshift,
            _ => Map::new(),
        };
        openshift.insert("sequence".into(), Value::from(self.offset));
        if !self.openshift_labels.is_empty() {
            openshift.insert(
                "labels".into(),
                Value::Object(
                    self.openshift_labels
                        .iter()
                        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                        .collect(),
                ),
            );
        }
        doc.insert("openshift".into(), Value::Object(openshift));
        doc
    }

    /// Replaces the optional fields of the record with those in `doc`.
    ///
    /// `message`, `log_type`, `log_source` and `@timestamp` always stay as they are.
    pub fn set_document(&mut self, mut doc: Map<String, Value>) {
        for required in ["@timestamp", "message", "log_type", "log_source"] {
            doc.remove(required);
        }

        self.hostname = take_string(&mut doc, "hostname");
        self.level = take_string(&mut doc, "level");
        self.structured = match doc.remove("structured") {
            Some(Value::Object(structured)) => Some(structured),
            _ => None,
        };
        self.kubernetes = doc
            .remove("kubernetes")
            .and_then(|value| serde_json::from_value(value).ok());

        if let Some(Value::Object(mut openshift)) = doc.remove("openshift") {
            openshift.remove("sequence");
            self.openshift_labels = match openshift.remove("labels") {
                Some(Value::Object(labels)) => labels
                    .into_iter()
                    .filter_map(|(key, value)| match value {
                        Value::String(value) => Some((key, value)),
                        _ => None,
                    })
                    .collect(),
                _ => BTreeMap::new(),
            };
            if !openshift.is_empty() {
                doc.insert("openshift".into(), Value::Object(openshift));
            }
        } else {
            self.openshift_labels.clear();
        }

        self.extra = doc;
    }

    /// The document sent to outputs: label keys de-dotted and flattened labels added.
    pub fn to_viaq(&self) -> Map<String, Value> {
        let mut doc = self.to_document();
        viaq_labels(&mut doc);
        doc
    }
}

/// Rewrites `kubernetes.labels` and `kubernetes.namespace_labels` of a document the way stores
/// expect them, and adds `kubernetes.flat_labels`.
pub fn viaq_labels(doc: &mut Map<String, Value>) {
    let Some(Value::Object(kubernetes)) = doc.get_mut("kubernetes") else {
        return;
    };
    for key in ["labels", "namespace_labels"] {
        if let Some(Value::Object(labels)) = kubernetes.get_mut(key) {
            *labels = dedot_labels(&string_map(labels))
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
        }
    }
    let flat = match kubernetes.get("labels") {
        Some(Value::Object(labels)) if !labels.is_empty() => flatten_labels(&string_map(labels)),
        _ => return,
    };
    kubernetes.insert(
        "flat_labels".into(),
        Value::Array(flat.into_iter().map(Value::String).collect()),
    );
}

fn string_map(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
        .collect()
}

fn map_size(map: &BTreeMap<String, String>) -> usize {
    map.iter().map(|(key, value)| key.len() + value.len()).sum()
}

fn object_size(object: &Map<String, Value>) -> usize {
    object
        .iter()
        .map(|(key, value)| key.len() + value_size(value))
        .sum()
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => 8,
        Value::String(value) => value.len(),
        Value::Array(values) => values.iter().map(value_size).sum(),
        Value::Object(object) => object_size(object),
    }
}

fn take_string(doc: &mut Map<String, Value>, key: &str) -> Option<String> {
    match doc.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

impl Finalizable for LogRecord {
    fn take_finalizers(&mut self) -> EventFinalizers {
        std::mem::take(&mut self.finalizers)
    }
}

impl forwarder_buffers::Bufferable for LogRecord {
    fn allocated_bytes(&self) -> usize {
        self.size_of()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    fn container_record() -> LogRecord {
        let mut record = LogRecord::new(
            r#"{"level":"info","msg":"hello"}"#,
            LogType::Application,
            LogSource::Container,
            Arc::from("/var/log/pods/ns0_pod_uid/c/0.log"),
        );
        record.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        record.hostname = Some("node-1".into());
        record.level = Some("info".into());
        record.offset = 42;
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: "ns0".into(),
            pod_name: "pod".into(),
            pod_id: "uid".into(),
            container_name: "c".into(),
            labels: BTreeMap::from([("app.kubernetes.io/name".into(), "centos".into())]),
            ..Default::default()
        });
        record
    }

    #[test]
    fn viaq_document_shape() {
        let doc = Value::Object(container_record().to_viaq());
        assert_eq!(
            doc,
            json!({
                "@timestamp": "2024-05-01T12:00:00Z",
                "message": r#"{"level":"info","msg":"hello"}"#,
                "log_type": "application",
                "log_source": "container",
                "hostname": "node-1",
                "level": "info",
                "kubernetes": {
                    "namespace_name": "ns0",
                    "pod_name": "pod",
                    "pod_id": "uid",
                    "container_name": "c",
                    "labels": {"app_kubernetes_io_name": "centos"},
                    "flat_labels": ["app_kubernetes_io_name=centos"],
                },
                "openshift": {"sequence": 42},
            })
        );
    }

    #[test]
    fn document_round_trip_keeps_required_fields() {
        let mut record = container_record();
        let mut doc = record.to_document();
        doc.remove("hostname");
        doc.remove("message");
        doc.insert("systemd".into(), json!({"u": {"SYSLOG_IDENTIFIER": "kubelet"}}));
        record.set_document(doc);

        assert_eq!(record.hostname, None);
        assert_eq!(record.message, r#"{"level":"info","msg":"hello"}"#);
        assert_eq!(record.kubernetes.as_ref().unwrap().pod_name, "pod");
        assert_eq!(
            record.extra.get("systemd"),
            Some(&json!({"u": {"SYSLOG_IDENTIFIER": "kubelet"}}))
        );
    }

    #[test]
    fn log_source_names() {
        let names: Vec<String> = [LogSource::KubeApi, LogSource::OpenshiftApi, LogSource::Auditd]
            .iter()
            .map(|source| serde_json::to_string(source).unwrap())
            .collect();
        assert_eq!(names, vec![r#""kubeAPI""#, r#""openshiftAPI""#, r#""auditd""#]);
    }

    #[test]
    fn size_counts_metadata_and_extra_fields() {
        let mut record = container_record();
        let base = record.size_of();

        let meta = record.kubernetes.as_mut().unwrap();
        meta.annotations
            .insert("checksum/config".into(), "x".repeat(400 * 1024));
        meta.namespace_labels.insert("team".into(), "payments".into());
        record.openshift_labels.insert("cluster".into(), "east".into());
        record
            .extra
            .insert("systemd".into(), json!({"u": {"SYSLOG_IDENTIFIER": "kubelet"}}));

        let grown = record.size_of() - base;
        assert!(grown > 400 * 1024, "grew by {grown}");
    }
}
