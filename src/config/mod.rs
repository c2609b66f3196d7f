//! The forwarder configuration document.
//!
//! The document is shaped like a `ClusterLogForwarder` spec (`inputs`, `outputs`, `filters` and
//! `pipelines`, camelCase keys) plus collector level settings. It is read from YAML, TOML or JSON,
//! environment variables are interpolated, and every validation problem is reported at once.

use std::{path::PathBuf, time::Duration};

use file_source::ReadFrom;
use serde::Deserialize;
use serde_with::serde_as;

pub mod filters;
mod format;
pub mod inputs;
mod loading;
pub mod outputs;
pub mod pipelines;
pub mod secret;
mod validation;
mod vars;
pub mod watcher;

pub use self::{
    filters::{DropCondition, DropTest, FilterKind, FilterSpec, PruneSpec},
    format::Format,
    inputs::{
        ApplicationInput, AuditInput, AuditSource, InfrastructureInput, InfrastructureSource,
        InputKind, InputSpec, LabelSelector, LabelSelectorRequirement, NamespaceContainerSpec,
        SelectorOperator,
    },
    loading::{ConfigError, load_from_path, load_from_str},
    outputs::{
        BufferSettings, ByteQuantity, CircuitBreakerSettings, DeliveryMode, OutputKind,
        OutputSpec, OutputTuning,
    },
    pipelines::{ParseKind, PipelineSpec},
    secret::{SecretError, SecretRef, SensitiveString},
    validation::validate,
};
pub(crate) use self::validation::REQUIRED_FIELDS;
use crate::tls::TlsSecurityProfile;

pub const DEFAULT_DATA_DIR: &str = "/var/lib/log-forwarder";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForwarderConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub tls_security_profile: TlsSecurityProfile,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub pipelines: Vec<PipelineSpec>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

impl ForwarderConfig {
    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|output| output.name == name)
    }

    pub fn filter(&self, name: &str) -> Option<&FilterSpec> {
        self.filters.iter().find(|filter| filter.name == name)
    }

    /// Declared inputs first, then the reserved ones.
    pub fn input(&self, name: &str) -> Option<InputSpec> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .cloned()
            .or_else(|| InputSpec::reserved(name))
    }
}

/// A `maxRecordsPerSecond` threshold.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LimitSpec {
    pub max_records_per_second: u64,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectorSettings {
    #[serde(default)]
    pub container_logs: ContainerLogSettings,
    #[serde(default)]
    pub journal: JournalSettings,
    #[serde(default)]
    pub audit: AuditLogSettings,
    #[serde(default)]
    pub metadata: MetadataSettings,
    /// Overrides the node name stamped on every record.
    pub hostname: Option<String>,
    pub cluster_id: Option<String>,
    /// How long a reload waits for outputs to empty their buffers before swapping.
    #[serde(default = "default_drain_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub drain_timeout: Duration,
    #[serde(default = "default_checkpoint_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub checkpoint_interval: Duration,
}

const fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            container_logs: ContainerLogSettings::default(),
            journal: JournalSettings::default(),
            audit: AuditLogSettings::default(),
            metadata: MetadataSettings::default(),
            hostname: None,
            cluster_id: None,
            drain_timeout: default_drain_timeout(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContainerLogSettings {
    #[serde(default = "default_container_include")]
    pub include: Vec<String>,
    /// Defaults exclude the collector's own logs and rotated, compressed files.
    #[serde(default = "default_container_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default)]
    pub read_from: ReadFrom,
    #[serde(default = "default_glob_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub glob_interval: Duration,
}

fn default_container_include() -> Vec<String> {
    vec!["/var/log/pods/*/*/*.log".to_string()]
}

fn default_container_exclude() -> Vec<String> {
    [
        "/var/log/pods/openshift-logging_collector-*/*/*.log",
        "/var/log/pods/openshift-logging_log-forwarder-*/*/*.log",
        "/var/log/pods/*/*/*.gz",
        "/var/log/pods/*/*/*.tmp",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

const fn default_max_line_bytes() -> usize {
    1024 * 1024
}

const fn default_glob_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for ContainerLogSettings {
    fn default() -> Self {
        Self {
            include: default_container_include(),
            exclude: default_container_exclude(),
            max_line_bytes: default_max_line_bytes(),
            read_from: ReadFrom::default(),
            glob_interval: default_glob_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JournalSettings {
    #[serde(default = "crate::config::default_true")]
    pub enabled: bool,
    #[serde(default = "default_journalctl")]
    pub command: PathBuf,
    /// Passed to `journalctl` before the follow arguments, e.g. `--directory`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_journalctl() -> PathBuf {
    PathBuf::from("journalctl")
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_journalctl(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditLogSettings {
    #[serde(default = "default_auditd_path")]
    pub auditd: PathBuf,
    #[serde(default = "default_kube_api_path")]
    pub kube_api: PathBuf,
    #[serde(default = "default_openshift_api_path")]
    pub openshift_api: PathBuf,
    #[serde(default = "default_ovn_path")]
    pub ovn: PathBuf,
}

fn default_auditd_path() -> PathBuf {
    PathBuf::from("/var/log/audit/audit.log")
}

fn default_kube_api_path() -> PathBuf {
    PathBuf::from("/var/log/kube-apiserver/audit.log")
}

fn default_openshift_api_path() -> PathBuf {
    PathBuf::from("/var/log/openshift-apiserver/audit.log")
}

fn default_ovn_path() -> PathBuf {
    PathBuf::from("/var/log/ovn/acl-audit-log.log")
}

impl Default for AuditLogSettings {
    fn default() -> Self {
        Self {
            auditd: default_auditd_path(),
            kube_api: default_kube_api_path(),
            openshift_api: default_openshift_api_path(),
            ovn: default_ovn_path(),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MetadataSettings {
    /// JSON snapshot of namespaces and pods on this node, refreshed by the daemonset.
    pub pods_file: Option<PathBuf>,
    #[serde(default = "default_metadata_refresh")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub refresh_interval: Duration,
}

const fn default_metadata_refresh() -> Duration {
    Duration::from_secs(10)
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            pods_file: None,
            refresh_interval: default_metadata_refresh(),
        }
    }
}

pub(crate) const fn default_true() -> bool {
    true
}
