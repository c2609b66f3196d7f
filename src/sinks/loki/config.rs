use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{
    event::{FieldPath, LogRecord, PathParseError},
    http::HttpAuthentication,
    templating::Template,
};

/// Label key resolved from the record's host name rather than a document field.
pub const HOST_LABEL: &str = "kubernetes_host";

pub const DEFAULT_LABEL_KEYS: [&str; 5] = [
    "log_type",
    "kubernetes.namespace_name",
    "kubernetes.pod_name",
    "kubernetes.container_name",
    HOST_LABEL,
];

/// `loki` block of an output.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LokiConfig {
    /// Tenant of each record, sent as `X-Scope-OrgID`. A bare field path or a template.
    #[serde(default, deserialize_with = "deserialize_tenant_key")]
    pub tenant_key: Option<Template>,
    /// Document fields turned into stream labels. Empty means the default set.
    #[serde(default)]
    pub label_keys: Vec<String>,
    pub authentication: Option<HttpAuthentication>,
}

impl LokiConfig {
    pub fn labels(&self) -> Result<Vec<LabelKey>, PathParseError> {
        let keys: Vec<&str> = if self.label_keys.is_empty() {
            DEFAULT_LABEL_KEYS.to_vec()
        } else {
            self.label_keys.iter().map(String::as_str).collect()
        };
        keys.into_iter().map(LabelKey::parse).collect()
    }
}

/// One configured label: the label name and where its value comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelKey {
    Host,
    Field { name: String, path: FieldPath },
}

impl LabelKey {
    fn parse(key: &str) -> Result<Self, PathParseError> {
        if key.trim_start_matches('.') == HOST_LABEL {
            return Ok(Self::Host);
        }
        let path = FieldPath::parse(key)?;
        Ok(Self::Field {
            name: path.to_label_name(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Host => HOST_LABEL,
            Self::Field { name, .. } => name,
        }
    }

    pub fn value(&self, record: &LogRecord, doc: &Map<String, Value>) -> Option<String> {
        match self {
            Self::Host => record.hostname.clone(),
            Self::Field { path, .. } => path.get_string(doc),
        }
    }
}

fn deserialize_tenant_key<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Template>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if raw.contains('{') {
        Template::parse(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom)
    } else {
        FieldPath::parse(&raw)
            .map(|path| Some(Template::from_field(path)))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_labels() {
        let labels = LokiConfig::default().labels().unwrap();
        let names: Vec<&str> = labels.iter().map(LabelKey::name).collect();
        assert_eq!(
            names,
            vec![
                "log_type",
                "kubernetes_namespace_name",
                "kubernetes_pod_name",
                "kubernetes_container_name",
                "kubernetes_host"
            ]
        );
    }

    #[test]
    fn tenant_key_accepts_path_or_template() {
        let config: LokiConfig =
            serde_yaml::from_str("tenantKey: kubernetes.container_name").unwrap();
        assert_eq!(
            config.tenant_key.unwrap().to_string(),
            "{.kubernetes.container_name}"
        );

        let config: LokiConfig =
            serde_yaml::from_str(r#"tenantKey: '{.kubernetes.namespace_name||"none"}'"#).unwrap();
        assert!(config.tenant_key.unwrap().is_dynamic());
    }
}
