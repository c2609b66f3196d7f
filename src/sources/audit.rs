//! Audit logs of the node: auditd, the Kubernetes and OpenShift API servers, and OVN ACLs.
//!
//! Each audit log is a single well-known file tailed with the file server. Lines are forwarded
//! even when their format is not recognized; only the fields that could be extracted are added.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, LazyLock},
};

use chrono::{DateTime, TimeZone, Utc};
use file_source::{FileServerConfig, ReadEvent, paths_provider::PathsProvider};
use regex::Regex;
use serde_json::{Map, Value, json};

use super::{BuildError, FileProgress, SourceContext, send, spawn_file_server};
use crate::{
    config::{AuditSource, CollectorSettings},
    event::{LogRecord, LogSource, LogType},
    internal_events::{EventsReceived, ParseError},
};

pub const SOURCE_TYPE: &str = "audit";

/// Top-level fields of the record document that API audit events may not overwrite.
const RESERVED_FIELDS: &[&str] = &[
    "@timestamp",
    "message",
    "log_type",
    "log_source",
    "hostname",
    "level",
    "kubernetes",
    "structured",
    "openshift",
];

static AUDITD_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^type=(?P<type>\S+) msg=audit\((?P<secs>\d+)\.(?P<millis>\d+):(?P<record_id>\d+)\):")
        .expect("auditd pattern is valid")
});

/// A fixed set of files, reported only while they exist.
struct AuditPaths(Vec<PathBuf>);

impl PathsProvider for AuditPaths {
    fn paths(&self) -> Vec<PathBuf> {
        self.0.iter().filter(|path| path.is_file()).cloned().collect()
    }
}

pub struct AuditLogs {
    paths: AuditPaths,
    sources: HashMap<String, LogSource>,
    config: FileServerConfig,
    cx: SourceContext,
}

impl AuditLogs {
    pub fn new(
        settings: &CollectorSettings,
        audit: &[AuditSource],
        cx: SourceContext,
    ) -> Result<Self, BuildError> {
        let mut sources = HashMap::new();
        let mut paths = Vec::new();
        for source in audit {
            let (log_source, path) = match source {
                AuditSource::Auditd => (LogSource::Auditd, &settings.audit.auditd),
                AuditSource::KubeApi => (LogSource::KubeApi, &settings.audit.kube_api),
                AuditSource::OpenshiftApi => {
                    (LogSource::OpenshiftApi, &settings.audit.openshift_api)
                }
                AuditSource::Ovn => (LogSource::Ovn, &settings.audit.ovn),
            };
            sources.insert(path.to_string_lossy().into_owned(), log_source);
            paths.push(path.clone());
        }

        let config = FileServerConfig {
            checkpoint_interval: cx.checkpoint_interval,
            max_line_bytes: settings.container_logs.max_line_bytes,
            read_from: settings.container_logs.read_from,
            ..Default::default()
        };
        Ok(Self {
            paths: AuditPaths(paths),
            sources,
            config,
            cx,
        })
    }

    pub async fn run(self) {
        let (mut lines, server) = spawn_file_server(self.paths, self.config, &self.cx);
        let mut progress = FileProgress::new(&self.cx.checkpointer);

        while let Some(event) = lines.recv().await {
            let line = match event {
                ReadEvent::Line(line) => line,
                ReadEvent::Gap { .. } => continue,
                ReadEvent::Closed { source_id } => {
                    progress.close(&source_id);
                    continue;
                }
            };
            let Some(&log_source) = self.sources.get(&*line.source_id) else {
                continue;
            };

            emit!(EventsReceived {
                source_type: SOURCE_TYPE,
                count: 1,
                byte_size: line.text.len(),
            });
            let finalizers = progress.finalizer(&line);
            let text = String::from_utf8_lossy(&line.text);
            let mut record = parse_line(log_source, &text, &line.source_id);
            record = record.with_finalizers(finalizers);
            record.offset = line.offset;

            if !send(&self.cx.out, record).await {
                break;
            }
        }

        let _ = server.await;
    }
}

/// Builds an audit record, extracting what the line's format provides.
pub fn parse_line(log_source: LogSource, line: &str, source_id: &Arc<str>) -> LogRecord {
    let mut record = LogRecord::new(line, LogType::Audit, log_source, Arc::clone(source_id));
    let parsed = match log_source {
        LogSource::KubeApi | LogSource::OpenshiftApi => parse_api_event(&mut record),
        LogSource::Auditd => parse_auditd(&mut record),
        LogSource::Ovn => parse_ovn_acl(&mut record),
        LogSource::Container | LogSource::Node => true,
    };
    if !parsed {
        emit!(ParseError {
            source_id,
            error: "unrecognized audit line format",
            dropped: false,
        });
    }
    record
}

/// Kubernetes style audit events: one JSON object per line.
fn parse_api_event(record: &mut LogRecord) -> bool {
    let Ok(Value::Object(event)) = serde_json::from_str::<Value>(&record.message) else {
        return false;
    };
    if let Some(timestamp) = event
        .get("requestReceivedTimestamp")
        .and_then(Value::as_str)
        .and_then(|timestamp| DateTime::parse_from_rfc3339(timestamp).ok())
    {
        record.timestamp = timestamp.with_timezone(&Utc);
    }
    for (key, value) in event {
        if key == "level" {
            record.extra.insert("k8s_audit_level".into(), value);
        } else if !RESERVED_FIELDS.contains(&key.as_str()) {
            record.extra.insert(key, value);
        }
    }
    true
}

/// `type=SYSCALL msg=audit(1364481363.243:24287): ...`
fn parse_auditd(record: &mut LogRecord) -> bool {
    let Some(header) = AUDITD_HEADER.captures(&record.message) else {
        return false;
    };
    let secs = header["secs"].parse::<i64>().ok();
    let millis = header["millis"].parse::<u32>().ok();
    if let (Some(secs), Some(millis)) = (secs, millis) {
        if let Some(timestamp) = Utc
            .timestamp_opt(secs, millis.saturating_mul(1_000_000))
            .single()
        {
            record.timestamp = timestamp;
        }
    }
    let linux = json!({
        "type": &header["type"],
        "record_id": &header["record_id"],
    });
    let mut audit = Map::new();
    audit.insert("linux".into(), linux);
    record.extra.insert("audit".into(), Value::Object(audit));
    true
}

/// `2021-07-06T08:26:58.687Z|00004|acl_log(ovn_pinctrl0)|INFO|name="np", verdict=allow, ...`
fn parse_ovn_acl(record: &mut LogRecord) -> bool {
    let mut fields = record.message.splitn(5, '|');
    let (Some(timestamp), Some(_), Some(_), Some(level)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return false;
    };
    let Ok(timestamp) = DateTime::parse_from_rfc3339(timestamp) else {
        return false;
    };
    record.timestamp = timestamp.with_timezone(&Utc);
    record.level = Some(level.to_ascii_lowercase());
    true
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use file_source::Checkpointer;
    use similar_asserts::assert_eq;
    use tokio::{sync::mpsc, time::timeout};
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn source_id() -> Arc<str> {
        Arc::from("/var/log/audit/audit.log")
    }

    #[test]
    fn parses_kube_api_events() {
        let line = r#"{"kind":"Event","apiVersion":"audit.k8s.io/v1","level":"Metadata","auditID":"a1","stage":"ResponseComplete","verb":"get","requestReceivedTimestamp":"2024-05-01T10:00:00.123456Z","message":"spoofed"}"#;
        let record = parse_line(LogSource::KubeApi, line, &source_id());
        assert_eq!(record.log_type, LogType::Audit);
        assert_eq!(record.message, line);
        assert_eq!(record.extra["k8s_audit_level"], json!("Metadata"));
        assert_eq!(record.extra["verb"], json!("get"));
        assert!(!record.extra.contains_key("message"));
        assert_eq!(record.timestamp.timestamp_micros(), 1_714_557_600_123_456);
    }

    #[test]
    fn parses_auditd_header() {
        let line = "type=SYSCALL msg=audit(1364481363.243:24287): arch=c000003e syscall=2 success=no";
        let record = parse_line(LogSource::Auditd, line, &source_id());
        assert_eq!(record.timestamp.timestamp_millis(), 1_364_481_363_243);
        assert_eq!(
            record.extra["audit"],
            json!({"linux": {"type": "SYSCALL", "record_id": "24287"}})
        );
    }

    #[test]
    fn parses_ovn_acl_line() {
        let line = r#"2021-07-06T08:26:58.687Z|00004|acl_log(ovn_pinctrl0)|INFO|name="np_allow", verdict=allow, severity=alert"#;
        let record = parse_line(LogSource::Ovn, line, &source_id());
        assert_eq!(record.level.as_deref(), Some("info"));
        assert_eq!(record.timestamp.timestamp_millis(), 1_625_560_018_687);
    }

    #[test]
    fn forwards_unrecognized_lines() {
        let record = parse_line(LogSource::Auditd, "garbage", &source_id());
        assert_eq!(record.message, "garbage");
        assert!(record.extra.is_empty());
    }

    #[tokio::test]
    async fn tails_configured_audit_files() {
        let logs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let mut settings = CollectorSettings::default();
        settings.audit.ovn = logs.path().join("acl-audit-log.log");
        settings.audit.auditd = logs.path().join("audit.log");
        fs::write(
            &settings.audit.ovn,
            "2021-07-06T08:26:58.687Z|00004|acl_log(ovn_pinctrl0)|WARN|verdict=drop\n",
        )
        .unwrap();
        fs::write(&settings.audit.auditd, "type=LOGIN msg=audit(1.5:7): x\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let cx = SourceContext {
            checkpointer: Arc::new(Checkpointer::new(data.path())),
            out: tx,
            shutdown: shutdown.clone(),
            checkpoint_interval: Duration::from_millis(50),
        };
        let source = AuditLogs::new(&settings, &[AuditSource::Ovn], cx).unwrap();
        let handle = tokio::spawn(source.run());

        let record = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(record.log_source, LogSource::Ovn);
        assert_eq!(record.level.as_deref(), Some("warn"));

        shutdown.cancel();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }
}
