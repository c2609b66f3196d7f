use std::{
    collections::BTreeMap,
    fmt::{self, Write},
};

use serde::Deserialize;

use crate::{
    event::{FieldPath, LogRecord, LogType},
    http::HttpAuthentication,
    sinks::util::render_template,
    templating::Template,
};

const fn default_version() -> u8 {
    8
}

/// `elasticsearch` block of an output.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ElasticsearchConfig {
    /// Index name template. Takes precedence over the structured type settings.
    pub index: Option<Template>,
    /// Field whose value selects the index `app-<value>` for records with a parsed body.
    pub structured_type_key: Option<FieldPath>,
    /// Index suffix used when `structuredTypeKey` is unset or absent from the record.
    pub structured_type_name: Option<String>,
    /// Major version of the cluster; versions before 7 get an explicit `_type`.
    #[serde(default = "default_version")]
    pub version: u8,
    /// `chrono` format appended to the index name, e.g. `%Y.%m.%d`.
    pub index_date_suffix: Option<String>,
    pub authentication: Option<HttpAuthentication>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            index: None,
            structured_type_key: None,
            structured_type_name: None,
            version: default_version(),
            index_date_suffix: None,
            authentication: None,
            headers: BTreeMap::new(),
        }
    }
}

impl ElasticsearchConfig {
    pub fn wants_structured(&self) -> bool {
        self.structured_type_key.is_some() || self.structured_type_name.is_some()
    }

    /// The index a record is written to.
    ///
    /// An explicit template wins; then application records with a parsed body go to
    /// `app-<structured type>`; everything else goes to `<app|infra|audit>-write`.
    ///
    /// Fails when the date suffix cannot be rendered for the record's timestamp.
    pub fn index_for(&self, record: &LogRecord, output: &str) -> Result<String, fmt::Error> {
        let default = default_index(record.log_type);
        let mut index = match &self.index {
            Some(template) => render_template(template, record, output, "index", Some(&default))
                .unwrap_or(default),
            None => self.structured_index(record).unwrap_or(default),
        };
        if let Some(suffix) = &self.index_date_suffix {
            write!(index, "-{}", record.timestamp.format(suffix))?;
        }
        Ok(index.to_lowercase())
    }

    fn structured_index(&self, record: &LogRecord) -> Option<String> {
        if record.log_type != LogType::Application || record.structured.is_none() {
            return None;
        }
        let from_key = self
            .structured_type_key
            .as_ref()
            .and_then(|key| key.get_string(&record.to_document()))
            .filter(|value| !value.is_empty());
        from_key
            .or_else(|| self.structured_type_name.clone())
            .map(|value| format!("app-{value}"))
    }
}

pub fn default_index(log_type: LogType) -> String {
    format!("{}-write", log_type.short())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::event::{KubernetesMeta, LogSource};

    fn app_record() -> LogRecord {
        let mut record = LogRecord::new(
            r#"{"kind":"orders"}"#,
            LogType::Application,
            LogSource::Container,
            Arc::from("test"),
        );
        record.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: "Shop".into(),
            labels: [("team".to_string(), "payments".to_string())].into(),
            ..Default::default()
        });
        record
    }

    #[test]
    fn default_index_by_log_type() {
        let config = ElasticsearchConfig::default();
        let mut record = app_record();
        assert_eq!(config.index_for(&record, "es").unwrap(), "app-write");
        record.log_type = LogType::Infrastructure;
        assert_eq!(config.index_for(&record, "es").unwrap(), "infra-write");
        record.log_type = LogType::Audit;
        assert_eq!(config.index_for(&record, "es").unwrap(), "audit-write");
    }

    #[test]
    fn structured_type_key_then_name() {
        let config = ElasticsearchConfig {
            structured_type_key: Some(FieldPath::parse(".kubernetes.labels.team").unwrap()),
            structured_type_name: Some("fallback".into()),
            ..Default::default()
        };
        let mut record = app_record();
        assert_eq!(config.index_for(&record, "es").unwrap(), "app-write");

        record.structured = Some(json!({"kind": "orders"}).as_object().unwrap().clone());
        assert_eq!(config.index_for(&record, "es").unwrap(), "app-payments");

        record.kubernetes.as_mut().unwrap().labels.clear();
        assert_eq!(config.index_for(&record, "es").unwrap(), "app-fallback");
    }

    #[test]
    fn template_with_date_suffix() {
        let config = ElasticsearchConfig {
            index: Some(Template::parse("{.kubernetes.namespace_name||\"none\"}-logs").unwrap()),
            index_date_suffix: Some("%Y.%m.%d".into()),
            ..Default::default()
        };
        assert_eq!(config.index_for(&app_record(), "es").unwrap(), "shop-logs-2024.05.01");
    }
}
