use serde::Deserialize;

use crate::config::SecretRef;

fn default_host() -> String {
    "ods.opinsights.azure.com".into()
}

/// `azureMonitor` block of an output.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AzureMonitorConfig {
    /// Workspace id.
    pub customer_id: String,
    /// Base64 encoded workspace key.
    pub shared_key: SecretRef,
    /// Record type; the service stores records in the `<logType>_CL` table.
    pub log_type: String,
    pub azure_resource_id: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
}

impl AzureMonitorConfig {
    /// Log types are limited to letters, digits and underscores, at most 100 characters.
    pub fn is_valid_log_type(&self) -> bool {
        !self.log_type.is_empty()
            && self.log_type.len() <= 100
            && self
                .log_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}
