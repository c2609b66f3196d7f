//! Destination adapters.
//!
//! Each output is built into one [`Sink`] per configuration generation. The delivery worker owns
//! batching, retries and acknowledgements; a sink only encodes a batch, sends it and reports what
//! the destination made of every record.

use std::time::Duration;

use async_trait::async_trait;
use snafu::Snafu;

use crate::{
    aws::AwsClientError,
    config::{OutputKind, OutputSpec, SecretError},
    event::LogRecord,
    http::{HttpClient, HttpError},
    tls::{TlsError, TlsSecurityProfile, TlsSettings},
};

pub mod aws_cloudwatch_logs;
pub mod azure_monitor_logs;
pub mod elasticsearch;
pub mod gcp_logging;
pub mod http;
pub mod kafka;
pub mod loki;
pub mod opentelemetry;
pub mod splunk_hec;
pub mod syslog;
pub mod util;

/// A failed attempt to deliver a whole batch.
#[derive(Debug, Snafu)]
pub enum SinkError {
    /// The destination could not be reached or asked us to come back later.
    #[snafu(display("Transport error: {}", message))]
    Transport { message: String },
    /// The destination refused the batch and will refuse it again.
    #[snafu(display("Rejected: {}", reason))]
    Rejected { reason: String },
    /// The destination refused our credentials.
    #[snafu(display("Authentication failed: {}", message))]
    Auth { message: String },
}

impl SinkError {
    pub fn transport(message: impl ToString) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    pub fn rejected(reason: impl ToString) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
        }
    }

    pub fn auth(message: impl ToString) -> Self {
        Self::Auth {
            message: message.to_string(),
        }
    }
}

impl From<HttpError> for SinkError {
    fn from(error: HttpError) -> Self {
        Self::transport(error)
    }
}

/// Per record outcome of a batch the destination answered.
///
/// Records not listed were accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ack {
    /// Indices the destination refused permanently, with the first reason seen.
    pub rejected: Vec<usize>,
    pub reason: Option<String>,
    /// Indices that failed transiently and have to be sent again.
    pub retry: Vec<usize>,
}

impl Ack {
    pub fn accepted() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.retry.is_empty()
    }
}

#[derive(Debug, Snafu)]
pub enum HealthcheckError {
    #[snafu(display("Unexpected status: {}", status))]
    UnexpectedStatus { status: ::http::StatusCode },
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Delivers `batch`. An `Err` applies to every record of the batch.
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError>;

    /// Checks the destination is reachable and accepts our credentials.
    async fn healthcheck(&self) -> crate::Result<()>;

    /// Hard per request payload limit of the destination, if lower than `maxWrite`.
    fn max_batch_bytes(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("Output {} has no url", output))]
    MissingUrl { output: String },
    #[snafu(display("Invalid url for output {}: {}", output, reason))]
    InvalidUrl { output: String, reason: String },
    #[snafu(display("Invalid settings for output {}: {}", output, reason))]
    InvalidSettings { output: String, reason: String },
    #[snafu(display("TLS setup failed: {}", source))]
    Tls { source: TlsError },
    #[snafu(display("HTTP client setup failed: {}", source))]
    Http { source: HttpError },
    #[snafu(display("Could not load secret: {}", source))]
    Secret { source: SecretError },
    #[snafu(display("AWS client setup failed: {}", source))]
    Aws { source: AwsClientError },
    #[snafu(display("{}: {}", source, name))]
    InvalidHeaderName {
        name: String,
        source: ::http::header::InvalidHeaderName,
    },
    #[snafu(display("{}: {}", source, value))]
    InvalidHeaderValue {
        value: String,
        source: ::http::header::InvalidHeaderValue,
    },
}

/// What every sink builder gets besides its own output block.
#[derive(Clone, Debug)]
pub struct SinkContext {
    pub hostname: String,
    pub tls_security_profile: TlsSecurityProfile,
}

impl SinkContext {
    pub fn tls_settings(&self, output: &OutputSpec) -> Result<TlsSettings, BuildError> {
        TlsSettings::from_spec(output.tls.as_ref(), &self.tls_security_profile)
            .map_err(|source| BuildError::Tls { source })
    }

    pub fn http_client(&self, output: &OutputSpec) -> Result<HttpClient, BuildError> {
        let tls = self.tls_settings(output)?;
        HttpClient::new(&tls, output.tuning.request_timeout)
            .map_err(|source| BuildError::Http { source })
    }
}

/// Builds the sink for `output`, loading its TLS material and credentials.
pub async fn build(output: &OutputSpec, cx: &SinkContext) -> Result<Box<dyn Sink>, BuildError> {
    Ok(match &output.kind {
        OutputKind::Elasticsearch { elasticsearch } => {
            Box::new(elasticsearch::ElasticsearchSink::new(output, elasticsearch, cx)?)
        }
        OutputKind::Loki { loki } => Box::new(loki::LokiSink::new(output, loki, cx)?),
        OutputKind::Splunk { splunk } => Box::new(splunk_hec::SplunkSink::new(output, splunk, cx)?),
        OutputKind::Cloudwatch { cloudwatch } => Box::new(
            aws_cloudwatch_logs::CloudwatchSink::new(output, cloudwatch, cx).await?,
        ),
        OutputKind::AzureMonitor { azure_monitor } => Box::new(
            azure_monitor_logs::AzureMonitorSink::new(output, azure_monitor, cx)?,
        ),
        OutputKind::Syslog { syslog } => Box::new(syslog::SyslogSink::new(output, syslog, cx)?),
        OutputKind::Http { http } => Box::new(http::HttpSink::new(output, http, cx)?),
        OutputKind::Kafka { kafka } => Box::new(kafka::KafkaSink::new(output, kafka, cx)?),
        OutputKind::GoogleCloudLogging {
            google_cloud_logging,
        } => Box::new(
            gcp_logging::GoogleCloudLoggingSink::new(output, google_cloud_logging, cx).await?,
        ),
        OutputKind::Otlp { otlp } => Box::new(opentelemetry::OtlpSink::new(output, otlp, cx)?),
    })
}

/// Upper bound for a healthcheck so a dead destination cannot hold up startup.
pub const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn required_url<'a>(output: &'a OutputSpec) -> Result<&'a url::Url, BuildError> {
    output.url.as_ref().ok_or_else(|| BuildError::MissingUrl {
        output: output.name.clone(),
    })
}
