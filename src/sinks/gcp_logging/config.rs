use std::fmt::Write;

use serde::Deserialize;

use crate::{gcp::GcpAuthConfig, templating::Template};

/// The resource that owns written logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogParent {
    Project(String),
    Folder(String),
    Organization(String),
    BillingAccount(String),
}

impl LogParent {
    /// `projects/<id>` and friends, the prefix of every log name.
    pub fn path(&self) -> String {
        match self {
            Self::Project(id) => format!("projects/{id}"),
            Self::Folder(id) => format!("folders/{id}"),
            Self::Organization(id) => format!("organizations/{id}"),
            Self::BillingAccount(id) => format!("billingAccounts/{id}"),
        }
    }

    pub fn log_name(&self, log_id: &str) -> String {
        format!("{}/logs/{}", self.path(), encode_log_id(log_id))
    }
}

/// Percent-encodes a log id for use in a log name, including `/`.
pub fn encode_log_id(log_id: &str) -> String {
    let mut encoded = String::with_capacity(log_id.len());
    for byte in log_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.') {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

/// `googleCloudLogging` block of an output. Exactly one parent id must be set.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GoogleCloudLoggingConfig {
    pub project_id: Option<String>,
    pub folder_id: Option<String>,
    pub organization_id: Option<String>,
    pub billing_account_id: Option<String>,
    /// Log of each record, for example `{.log_type||"none"}-logs`.
    pub log_id: Template,
    #[serde(default)]
    pub authentication: GcpAuthConfig,
}

impl GoogleCloudLoggingConfig {
    /// The configured parent, or how many ids were set when that is not exactly one.
    pub fn parent(&self) -> Result<LogParent, usize> {
        let mut parents: Vec<LogParent> = [
            self.project_id.clone().map(LogParent::Project),
            self.folder_id.clone().map(LogParent::Folder),
            self.organization_id.clone().map(LogParent::Organization),
            self.billing_account_id.clone().map(LogParent::BillingAccount),
        ]
        .into_iter()
        .flatten()
        .collect();
        match parents.len() {
            1 => Ok(parents.remove(0)),
            n => Err(n),
        }
    }
}
