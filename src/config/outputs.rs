use std::{fmt, str::FromStr, time::Duration};

use forwarder_buffers::{BufferLimits, WhenFull};
use serde::{Deserialize, Deserializer};
use serde_with::serde_as;
use url::Url;

use super::LimitSpec;
use crate::{
    sinks::{
        aws_cloudwatch_logs::CloudwatchConfig, azure_monitor_logs::AzureMonitorConfig,
        elasticsearch::ElasticsearchConfig, gcp_logging::GoogleCloudLoggingConfig,
        http::HttpConfig, kafka::KafkaConfig, loki::LokiConfig, opentelemetry::OtlpConfig,
        splunk_hec::SplunkConfig, syslog::SyslogConfig, util::Compression,
    },
    tls::TlsSpec,
};

/// A destination that pipelines refer to through `outputRefs`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: OutputKind,
    pub url: Option<Url>,
    pub tls: Option<TlsSpec>,
    #[serde(default)]
    pub tuning: OutputTuning,
    pub rate_limit: Option<LimitSpec>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutputKind {
    Elasticsearch {
        #[serde(default)]
        elasticsearch: ElasticsearchConfig,
    },
    Loki {
        #[serde(default)]
        loki: LokiConfig,
    },
    Splunk {
        splunk: SplunkConfig,
    },
    Cloudwatch {
        cloudwatch: CloudwatchConfig,
    },
    AzureMonitor {
        #[serde(rename = "azureMonitor")]
        azure_monitor: AzureMonitorConfig,
    },
    Syslog {
        #[serde(default)]
        syslog: SyslogConfig,
    },
    Http {
        #[serde(default)]
        http: HttpConfig,
    },
    Kafka {
        #[serde(default)]
        kafka: KafkaConfig,
    },
    GoogleCloudLogging {
        #[serde(rename = "googleCloudLogging")]
        google_cloud_logging: GoogleCloudLoggingConfig,
    },
    Otlp {
        #[serde(default)]
        otlp: OtlpConfig,
    },
}

impl OutputKind {
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Elasticsearch { .. } => "elasticsearch",
            Self::Loki { .. } => "loki",
            Self::Splunk { .. } => "splunk",
            Self::Cloudwatch { .. } => "cloudwatch",
            Self::AzureMonitor { .. } => "azureMonitor",
            Self::Syslog { .. } => "syslog",
            Self::Http { .. } => "http",
            Self::Kafka { .. } => "kafka",
            Self::GoogleCloudLogging { .. } => "googleCloudLogging",
            Self::Otlp { .. } => "otlp",
        }
    }

    /// CloudWatch, Azure and Google Cloud Logging have well known endpoints. Kafka may list its
    /// brokers instead.
    pub const fn requires_url(&self) -> bool {
        !matches!(
            self,
            Self::Cloudwatch { .. }
                | Self::AzureMonitor { .. }
                | Self::GoogleCloudLogging { .. }
                | Self::Kafka { .. }
        )
    }

    /// Whether records routed here need their message parsed as JSON.
    pub fn wants_structured(&self) -> bool {
        match self {
            Self::Elasticsearch { elasticsearch } => elasticsearch.wants_structured(),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Records are acknowledged once the destination accepted them.
    #[default]
    AtLeastOnce,
    /// Records are acknowledged as soon as they are queued for the output.
    AtMostOnce,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputTuning {
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    #[serde(default = "default_min_retry_duration")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub min_retry_duration: Duration,
    #[serde(default = "default_max_retry_duration")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub max_retry_duration: Duration,
    /// Upper bound for the payload of a single request, before compression.
    pub max_write: Option<ByteQuantity>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

const fn default_min_retry_duration() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_retry_duration() -> Duration {
    Duration::from_secs(30)
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

pub const DEFAULT_MAX_WRITE_BYTES: usize = 10 * 1024 * 1024;

impl Default for OutputTuning {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::default(),
            min_retry_duration: default_min_retry_duration(),
            max_retry_duration: default_max_retry_duration(),
            max_write: None,
            compression: Compression::default(),
            request_timeout: default_request_timeout(),
            buffer: BufferSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl OutputTuning {
    /// The configured overflow policy, or the one implied by the delivery mode.
    pub fn when_full(&self) -> WhenFull {
        self.buffer.when_full.unwrap_or(match self.delivery_mode {
            DeliveryMode::AtLeastOnce => WhenFull::Block,
            DeliveryMode::AtMostOnce => WhenFull::DropNewest,
        })
    }

    pub fn buffer_limits(&self) -> BufferLimits {
        BufferLimits {
            max_events: self.buffer.max_events,
            max_bytes: self.buffer.total_limit_size.map(ByteQuantity::as_usize),
        }
    }

    pub fn max_write_bytes(&self) -> usize {
        self.max_write
            .map_or(DEFAULT_MAX_WRITE_BYTES, |quantity| quantity.as_usize())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BufferSettings {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Cap on the approximate bytes of queued records.
    pub total_limit_size: Option<ByteQuantity>,
    pub when_full: Option<WhenFull>,
}

const fn default_max_events() -> usize {
    10_000
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            total_limit_size: None,
            when_full: None,
        }
    }
}

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    /// Consecutive failed attempts before the output stops sending.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub cooldown: Duration,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

/// A byte count written as an integer or a quantity such as `10M` or `512Ki`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteQuantity(pub u64);

impl ByteQuantity {
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl FromStr for ByteQuantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid quantity {s:?}"))?;
        let multiplier: u64 = match suffix {
            "" => 1,
            "k" | "K" => 1_000,
            "M" => 1_000_000,
            "G" => 1_000_000_000,
            "Ki" => 1 << 10,
            "Mi" => 1 << 20,
            "Gi" => 1 << 30,
            _ => return Err(format!("invalid quantity suffix {suffix:?} in {s:?}")),
        };
        value
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| format!("quantity {s:?} is too large"))
    }
}

impl fmt::Display for ByteQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ByteQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Quantity(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(bytes) => Ok(Self(bytes)),
            Raw::Quantity(quantity) => quantity.parse().map_err(serde::de::Error::custom),
        }
    }
}
