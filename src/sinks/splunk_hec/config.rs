use serde::Deserialize;

use crate::{config::SecretRef, templating::Template};

pub const DEFAULT_INDEX: &str = "main";

fn default_sourcetype() -> String {
    "_json".into()
}

/// `splunk` block of an output.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SplunkConfig {
    pub hec_token: SecretRef,
    /// Per record index. Records whose template does not resolve go to `main`.
    pub index: Option<Template>,
    pub source: Option<Template>,
    #[serde(default = "default_sourcetype")]
    pub sourcetype: String,
}
