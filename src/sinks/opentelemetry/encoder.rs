use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use crate::event::LogRecord;

/// Name reported in `scope.name` of every export.
const SCOPE_NAME: &str = env!("CARGO_PKG_NAME");

type Resource = Vec<KeyValue>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ExportLogsRequest {
    resource_logs: Vec<ResourceLogs>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceLogs {
    resource: ResourceAttributes,
    scope_logs: [ScopeLogs; 1],
}

#[derive(Serialize)]
struct ResourceAttributes {
    attributes: Resource,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeLogs {
    scope: Scope,
    log_records: Vec<OtlpLogRecord>,
}

#[derive(Serialize)]
struct Scope {
    name: &'static str,
    version: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub(super) struct KeyValue {
    key: String,
    value: AnyValue,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
enum AnyValue {
    StringValue(String),
}

impl KeyValue {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AnyValue::StringValue(value.into()),
        }
    }
}

/// 64 bit integers are strings in the JSON mapping of OTLP.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpLogRecord {
    time_unix_nano: String,
    observed_time_unix_nano: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity_text: Option<String>,
    severity_number: u8,
    body: AnyValue,
    attributes: Vec<KeyValue>,
}

/// Maps a normalized level onto the OTLP severity ranges.
pub(super) fn severity_number(level: Option<&str>) -> u8 {
    match level.map(str::to_ascii_lowercase).as_deref() {
        Some("trace") => 1,
        Some("debug") => 5,
        Some("info") => 9,
        Some("notice") => 10,
        Some("warn" | "warning") => 13,
        Some("error" | "err") => 17,
        Some("critical" | "crit") => 18,
        Some("alert") => 19,
        Some("emergency" | "emerg" | "fatal") => 21,
        _ => 0,
    }
}

fn resource(record: &LogRecord) -> Resource {
    let mut attributes = Vec::new();
    if let Some(host) = &record.hostname {
        attributes.push(KeyValue::new("k8s.node.name", host));
    }
    if let Some(meta) = &record.kubernetes {
        attributes.push(KeyValue::new("k8s.namespace.name", &meta.namespace_name));
        attributes.push(KeyValue::new("k8s.pod.name", &meta.pod_name));
        if !meta.pod_id.is_empty() {
            attributes.push(KeyValue::new("k8s.pod.uid", &meta.pod_id));
        }
        attributes.push(KeyValue::new("k8s.container.name", &meta.container_name));
        if !meta.container_id.is_empty() {
            attributes.push(KeyValue::new("container.id", &meta.container_id));
        }
        if !meta.container_image.is_empty() {
            attributes.push(KeyValue::new("container.image.name", &meta.container_image));
        }
        for (key, value) in &meta.labels {
            attributes.push(KeyValue::new(format!("k8s.pod.label.{key}"), value));
        }
    }
    for (key, value) in &record.openshift_labels {
        attributes.push(KeyValue::new(format!("openshift.label.{key}"), value));
    }
    attributes
}

fn log_record(record: &LogRecord, observed: &str) -> OtlpLogRecord {
    OtlpLogRecord {
        time_unix_nano: record
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string(),
        observed_time_unix_nano: observed.to_string(),
        severity_text: record.level.clone(),
        severity_number: severity_number(record.level.as_deref()),
        body: AnyValue::StringValue(record.message.clone()),
        attributes: vec![
            KeyValue::new("openshift.log.type", record.log_type.as_str()),
            KeyValue::new("openshift.log.source", record.log_source.as_str()),
        ],
    }
}

/// Groups the batch into one `ResourceLogs` per distinct resource.
pub(super) fn encode(batch: &[LogRecord]) -> ExportLogsRequest {
    let observed = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string();
    let mut resources: BTreeMap<Resource, Vec<OtlpLogRecord>> = BTreeMap::new();
    for record in batch {
        resources
            .entry(resource(record))
            .or_default()
            .push(log_record(record, &observed));
    }
    ExportLogsRequest {
        resource_logs: resources
            .into_iter()
            .map(|(attributes, log_records)| ResourceLogs {
                resource: ResourceAttributes { attributes },
                scope_logs: [ScopeLogs {
                    scope: Scope {
                        name: SCOPE_NAME,
                        version: env!("CARGO_PKG_VERSION"),
                    },
                    log_records,
                }],
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::event::{KubernetesMeta, LogSource, LogType};

    fn container(namespace: &str, message: &str) -> LogRecord {
        let mut record = LogRecord::new(
            message,
            LogType::Application,
            LogSource::Container,
            Arc::from("app"),
        );
        record.hostname = Some("node-1".into());
        record.level = Some("warn".into());
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: namespace.into(),
            pod_name: "web-0".into(),
            container_name: "web".into(),
            ..Default::default()
        });
        record
    }

    fn attribute<'a>(attributes: &'a Value, key: &str) -> Option<&'a Value> {
        attributes
            .as_array()?
            .iter()
            .find(|kv| kv["key"] == key)
            .map(|kv| &kv["value"]["stringValue"])
    }

    #[test]
    fn groups_records_by_resource() {
        let batch = [
            container("a", "one"),
            container("b", "two"),
            container("a", "three"),
        ];
        let json = serde_json::to_value(encode(&batch)).unwrap();
        let resources = json["resourceLogs"].as_array().unwrap();
        assert_eq!(resources.len(), 2);

        let first = &resources[0];
        assert_eq!(
            attribute(&first["resource"]["attributes"], "k8s.namespace.name").unwrap(),
            "a"
        );
        let records = first["scopeLogs"][0]["logRecords"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["body"]["stringValue"], "one");
        assert_eq!(records[1]["body"]["stringValue"], "three");
        assert_eq!(records[0]["severityNumber"], 13);
        assert_eq!(records[0]["severityText"], "warn");
        assert!(records[0]["timeUnixNano"].is_string());
        assert_eq!(
            attribute(&records[0]["attributes"], "openshift.log.type").unwrap(),
            "application"
        );
        assert_eq!(first["scopeLogs"][0]["scope"]["name"], SCOPE_NAME);
    }

    #[test]
    fn journal_records_carry_the_node_only() {
        let mut record = LogRecord::new(
            "kubelet started",
            LogType::Infrastructure,
            LogSource::Node,
            Arc::from("journal"),
        );
        record.hostname = Some("node-7".into());
        let json = serde_json::to_value(encode(&[record])).unwrap();
        let attributes = &json["resourceLogs"][0]["resource"]["attributes"];
        assert_eq!(attribute(attributes, "k8s.node.name").unwrap(), "node-7");
        assert!(attribute(attributes, "k8s.pod.name").is_none());
        let record = &json["resourceLogs"][0]["scopeLogs"][0]["logRecords"][0];
        assert_eq!(record["severityNumber"], 0);
        assert!(record.get("severityText").is_none());
    }

    #[test]
    fn maps_levels_to_severity_ranges() {
        assert_eq!(severity_number(Some("DEBUG")), 5);
        assert_eq!(severity_number(Some("info")), 9);
        assert_eq!(severity_number(Some("critical")), 18);
        assert_eq!(severity_number(Some("default")), 0);
        assert_eq!(severity_number(None), 0);
    }
}
