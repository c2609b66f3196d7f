use std::collections::BTreeMap;

use serde::Deserialize;

use crate::http::HttpAuthentication;

/// Path of the logs signal on an OTLP/HTTP receiver.
pub const LOGS_PATH: &str = "v1/logs";

/// `otlp` block of an output.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OtlpConfig {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub authentication: Option<HttpAuthentication>,
}

/// The export endpoint for an output url.
///
/// A url that already names the logs path is used as is, otherwise the path is appended.
pub fn logs_endpoint(url: &url::Url) -> String {
    if url.path().trim_end_matches('/').ends_with(LOGS_PATH) {
        url.as_str().to_string()
    } else {
        format!("{}/{LOGS_PATH}", url.as_str().trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_logs_path_once() {
        let url = |s: &str| url::Url::parse(s).unwrap();
        assert_eq!(
            logs_endpoint(&url("http://collector:4318")),
            "http://collector:4318/v1/logs"
        );
        assert_eq!(
            logs_endpoint(&url("https://gateway/otlp/")),
            "https://gateway/otlp/v1/logs"
        );
        assert_eq!(
            logs_endpoint(&url("http://collector:4318/v1/logs")),
            "http://collector:4318/v1/logs"
        );
    }

    #[test]
    fn parses_config() {
        let config: OtlpConfig =
            serde_yaml::from_str("headers:\n  X-Tenant: east\nauthentication:\n  token: abc\n")
                .unwrap();
        assert_eq!(config.headers["X-Tenant"], "east");
        assert!(config.authentication.is_some());
        assert!(serde_yaml::from_str::<OtlpConfig>("endpoint: x").is_err());
    }
}
