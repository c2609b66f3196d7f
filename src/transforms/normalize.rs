//! Brings every record read into the common shape before routing.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;

use super::{FunctionTransform, parse::parse_structured};
use crate::event::{KubernetesMeta, LogRecord, LogSource, LogType, kubernetes::is_infra_namespace};

/// Looks up what the log path does not tell about a container: labels, ids and image.
pub trait MetadataProvider: Send + Sync {
    /// Fills in `meta` from the namespace and pod name already set. Returns false if the pod is
    /// unknown.
    fn enrich(&self, meta: &mut KubernetesMeta) -> bool;
}

/// Level names in detection order with the patterns that select them.
static LEVELS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("warn", r#"Warning|WARN|^W[0-9]+|level=warn|Value:warn|"level":"warn"|<warn>"#),
        ("error", r#"Error|ERROR|^E[0-9]+|level=error|Value:error|"level":"error"|<error>"#),
        ("critical", r#"Critical|CRITICAL|^C[0-9]+|level=critical|Value:critical|"level":"critical"|<critical>"#),
        ("debug", r#"Debug|DEBUG|^D[0-9]+|level=debug|Value:debug|"level":"debug"|<debug>"#),
        ("info", r#"(?i)\binfo\b|^I[0-9]+|level=info|Value:info|"level":"info"|<info>"#),
        ("trace", r#"(?i)\btrace\b|level=trace|Value:trace|"level":"trace"|<trace>"#),
    ]
    .into_iter()
    .map(|(level, pattern)| (level, Regex::new(pattern).expect("level patterns are valid")))
    .collect()
});

pub const DEFAULT_LEVEL: &str = "default";

/// Severity of a message, from a `level` field of its parsed body or from its text.
pub fn detect_level(record: &LogRecord) -> String {
    if let Some(Value::String(level)) = record
        .structured
        .as_ref()
        .and_then(|structured| structured.get("level"))
    {
        if !level.is_empty() {
            return level.to_ascii_lowercase();
        }
    }
    LEVELS
        .iter()
        .find(|(_, pattern)| pattern.is_match(&record.message))
        .map_or(DEFAULT_LEVEL, |(level, _)| level)
        .to_string()
}

/// Stage settings derived from the active configuration.
#[derive(Clone, Default)]
pub struct NormalizeConfig {
    pub hostname: String,
    pub cluster_id: Option<String>,
    /// Parse every message as JSON, because some output or pipeline wants structured records.
    pub parse_structured: bool,
    pub metadata: Option<Arc<dyn MetadataProvider>>,
}

pub struct Normalizer {
    config: NormalizeConfig,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, mut record: LogRecord) -> LogRecord {
        record.log_type = match record.log_source {
            LogSource::Container => match &record.kubernetes {
                Some(meta) if is_infra_namespace(&meta.namespace_name) => LogType::Infrastructure,
                _ => LogType::Application,
            },
            LogSource::Node => LogType::Infrastructure,
            LogSource::Auditd | LogSource::KubeApi | LogSource::OpenshiftApi | LogSource::Ovn => {
                LogType::Audit
            }
        };

        if record.hostname.is_none() {
            record.hostname = Some(self.config.hostname.clone());
        }
        if let Some(cluster_id) = &self.config.cluster_id {
            let openshift = record
                .extra
                .entry("openshift")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(openshift) = openshift {
                openshift.insert("cluster_id".into(), Value::String(cluster_id.clone()));
            }
        }

        if let (Some(meta), Some(provider)) = (record.kubernetes.as_mut(), &self.config.metadata) {
            provider.enrich(meta);
        }

        if self.config.parse_structured && record.log_source == LogSource::Container {
            parse_structured(&mut record);
        }

        if record.level.is_none() {
            record.level = Some(detect_level(&record));
        }
        record
    }
}

impl FunctionTransform for Normalizer {
    fn transform(&mut self, output: &mut Vec<LogRecord>, record: LogRecord) {
        output.push(self.normalize(record));
    }
}
