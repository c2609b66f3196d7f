use serde::Deserialize;

use crate::{aws::AwsAuthentication, templating::Template};

const fn default_true() -> bool {
    true
}

/// `cloudwatch` block of an output.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CloudwatchConfig {
    pub region: String,
    /// Log group of each record, such as
    /// `prefix-{.kubernetes.namespace_id||.log_type||"none-typed-logs"}`.
    /// Without a template records are grouped by log type.
    pub group_name: Option<Template>,
    /// Create missing groups and streams on demand.
    #[serde(default = "default_true")]
    pub create_missing: bool,
    pub authentication: Option<AwsAuthentication>,
}
