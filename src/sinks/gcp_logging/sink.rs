use async_trait::async_trait;
use chrono::SecondsFormat;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use hyper::Body;
use serde::Serialize;
use serde_json::{Map, Value};

use super::config::{GoogleCloudLoggingConfig, LogParent};
use crate::{
    config::OutputSpec,
    event::LogRecord,
    gcp::{GcpAuthenticator, GcpError, Scope},
    http::HttpClient,
    sinks::{
        Ack, BuildError, HealthcheckError, Sink, SinkContext, SinkError,
        util::{
            Compression,
            http::{build_request, check_response, endpoint},
            render_template,
        },
    },
    templating::Template,
};

const WRITE_ENDPOINT: &str = "https://logging.googleapis.com/v2/entries:write";

/// Request size limit of `entries.write`.
const MAX_REQUEST_BYTES: usize = 10_000_000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRequest<'a> {
    entries: Vec<Entry<'a>>,
    partial_success: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Entry<'a> {
    log_name: String,
    resource: &'a MonitoredResource,
    timestamp: String,
    severity: i64,
    json_payload: Map<String, Value>,
}

#[derive(Serialize)]
struct MonitoredResource {
    #[serde(rename = "type")]
    kind: &'static str,
    labels: Map<String, Value>,
}

/// Maps a level name onto the `LogSeverity` numbers.
pub(super) fn remap_severity(level: Option<&str>) -> i64 {
    let Some(level) = level else {
        return 0;
    };
    if let Ok(n) = level.parse::<i64>() {
        return n - n % 100;
    }
    match level.to_uppercase() {
        s if s.starts_with("EMERG") || s.starts_with("FATAL") => 800,
        s if s.starts_with("ALERT") => 700,
        s if s.starts_with("CRIT") => 600,
        s if s.starts_with("ERR") || s == "ER" => 500,
        s if s.starts_with("WARN") => 400,
        s if s.starts_with("NOTICE") => 300,
        s if s.starts_with("INFO") => 200,
        s if s.starts_with("DEBUG") || s.starts_with("TRACE") => 100,
        _ => 0,
    }
}

pub struct GoogleCloudLoggingSink {
    output: String,
    client: HttpClient,
    uri: Uri,
    parent: LogParent,
    log_id: Template,
    resource: MonitoredResource,
    compression: Compression,
    auth: GcpAuthenticator,
}

impl GoogleCloudLoggingSink {
    pub async fn new(
        output: &OutputSpec,
        config: &GoogleCloudLoggingConfig,
        cx: &SinkContext,
    ) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidSettings {
            output: output.name.clone(),
            reason,
        };
        let parent = config
            .parent()
            .map_err(|n| invalid(format!("expected one parent id, found {n}")))?;
        let uri = match &output.url {
            Some(url) => endpoint(url, "v2/entries:write"),
            None => WRITE_ENDPOINT.parse(),
        }
        .map_err(|error| BuildError::InvalidUrl {
            output: output.name.clone(),
            reason: error.to_string(),
        })?;
        let auth = config
            .authentication
            .build(Scope::LoggingWrite)
            .await
            .map_err(|error| invalid(error.to_string()))?;
        Ok(Self {
            output: output.name.clone(),
            client: cx.http_client(output)?,
            uri,
            parent,
            log_id: config.log_id.clone(),
            resource: MonitoredResource {
                kind: "global",
                labels: Map::new(),
            },
            compression: output.tuning.compression,
            auth,
        })
    }

    /// Encodes the batch; records whose log id cannot be rendered are returned separately.
    fn encode<'a>(&'a self, batch: &[LogRecord]) -> (Vec<usize>, Vec<Entry<'a>>, Vec<usize>) {
        let mut indices = Vec::with_capacity(batch.len());
        let mut entries = Vec::with_capacity(batch.len());
        let mut unnamed = Vec::new();
        for (index, record) in batch.iter().enumerate() {
            let Some(log_id) = render_template(&self.log_id, record, &self.output, "logId", None)
            else {
                unnamed.push(index);
                continue;
            };
            indices.push(index);
            entries.push(Entry {
                log_name: self.parent.log_name(&log_id),
                resource: &self.resource,
                timestamp: record
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
                severity: remap_severity(record.level.as_deref()),
                json_payload: record.to_viaq(),
            });
        }
        (indices, entries, unnamed)
    }

    async fn write(&self, body: &[u8]) -> Result<(), SinkError> {
        let mut request = build_request(
            Method::POST,
            &self.uri,
            "application/json",
            body,
            self.compression,
            &HeaderMap::new(),
            None,
        )?;
        self.auth
            .apply(&mut request)
            .await
            .map_err(SinkError::auth)?;
        let response = self.client.send(request).await?;
        check_response(&response)
    }
}

#[async_trait]
impl Sink for GoogleCloudLoggingSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let (indices, entries, unnamed) = self.encode(batch);
        let mut ack = Ack::accepted();
        if !unnamed.is_empty() {
            ack.rejected = unnamed;
            ack.reason = Some("log id could not be rendered".into());
        }
        if entries.is_empty() {
            return Ok(ack);
        }
        let body = serde_json::to_vec(&WriteRequest {
            entries,
            partial_success: false,
        })
        .map_err(SinkError::rejected)?;
        match self.write(&body).await {
            Ok(()) => Ok(ack),
            Err(SinkError::Rejected { reason }) if !ack.rejected.is_empty() => {
                ack.rejected.extend(indices);
                ack.rejected.sort_unstable();
                ack.reason = Some(reason);
                Ok(ack)
            }
            Err(error) => Err(error),
        }
    }

    /// Writes an empty entry list, which checks the endpoint and the credentials.
    async fn healthcheck(&self) -> crate::Result<()> {
        let mut request = Request::post(self.uri.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"entries":[]}"#))?;
        self.auth.apply(&mut request).await?;
        match self.client.send(request).await?.status() {
            StatusCode::FORBIDDEN => Err(GcpError::HealthcheckForbidden.into()),
            status if status.is_success() => Ok(()),
            status => Err(HealthcheckError::UnexpectedStatus { status }.into()),
        }
    }

    fn max_batch_bytes(&self) -> Option<usize> {
        Some(MAX_REQUEST_BYTES)
    }
}
