use std::collections::BTreeMap;

use http::Method;
use serde::Deserialize;

use crate::http::HttpAuthentication;

/// HTTP method used to deliver a batch.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
        }
    }
}

/// Body layout of a batch.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HttpFormat {
    /// One JSON document per line.
    #[default]
    Ndjson,
    /// A single JSON array of documents.
    JsonArray,
}

impl HttpFormat {
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Ndjson => "application/x-ndjson",
            Self::JsonArray => "application/json",
        }
    }
}

/// `http` block of an output.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub format: HttpFormat,
    pub authentication: Option<HttpAuthentication>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config() {
        let config: HttpConfig = serde_yaml::from_str(
            "method: PUT\nformat: jsonArray\nheaders:\n  X-Cluster: east\nauthentication:\n  token: abc\n",
        )
        .unwrap();
        assert_eq!(Method::from(config.method), Method::PUT);
        assert_eq!(config.format.content_type(), "application/json");
        assert_eq!(config.headers["X-Cluster"], "east");
        assert!(matches!(
            config.authentication,
            Some(HttpAuthentication::Bearer { .. })
        ));

        let config = HttpConfig::default();
        assert_eq!(config.method, HttpMethod::Post);
        assert_eq!(config.format, HttpFormat::Ndjson);
    }
}
