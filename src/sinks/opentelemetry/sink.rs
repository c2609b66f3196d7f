use async_trait::async_trait;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use hyper::Body;
use serde::Deserialize;

use super::{
    config::{OtlpConfig, logs_endpoint},
    encoder,
};
use crate::{
    config::OutputSpec,
    event::LogRecord,
    http::{Auth, HttpClient},
    sinks::{
        Ack, BuildError, HealthcheckError, Sink, SinkContext, SinkError, required_url,
        util::{
            Compression,
            http::{build_request, check_response, header_map},
        },
    },
};

/// The part of an export response a receiver fills in when it dropped records.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportLogsResponse {
    #[serde(default)]
    partial_success: Option<PartialSuccess>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialSuccess {
    #[serde(default, deserialize_with = "int64")]
    rejected_log_records: u64,
    #[serde(default)]
    error_message: String,
}

/// OTLP/JSON writes 64 bit integers as strings, though some receivers send numbers.
fn int64<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(u64),
        Text(String),
    }
    match Int64::deserialize(deserializer)? {
        Int64::Number(n) => Ok(n),
        Int64::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

pub struct OtlpSink {
    output: String,
    client: HttpClient,
    uri: Uri,
    compression: Compression,
    headers: HeaderMap,
    auth: Option<Auth>,
}

impl OtlpSink {
    pub fn new(output: &OutputSpec, config: &OtlpConfig, cx: &SinkContext) -> Result<Self, BuildError> {
        let uri = logs_endpoint(required_url(output)?)
            .parse()
            .map_err(|error: http::uri::InvalidUri| BuildError::InvalidUrl {
                output: output.name.clone(),
                reason: error.to_string(),
            })?;
        Ok(Self {
            output: output.name.clone(),
            client: cx.http_client(output)?,
            uri,
            compression: output.tuning.compression,
            headers: header_map(&config.headers)?,
            auth: config
                .authentication
                .as_ref()
                .map(|auth| auth.resolve())
                .transpose()
                .map_err(|source| BuildError::Secret { source })?,
        })
    }

    async fn export(&self, body: Vec<u8>) -> Result<(), SinkError> {
        let request = build_request(
            Method::POST,
            &self.uri,
            "application/json",
            &body,
            self.compression,
            &self.headers,
            self.auth.as_ref(),
        )?;
        let response = self.client.send(request).await?;
        check_response(&response)?;

        // An empty body is a full success.
        let parsed: ExportLogsResponse =
            serde_json::from_slice(response.body()).unwrap_or_default();
        if let Some(partial) = parsed.partial_success
            && partial.rejected_log_records > 0
        {
            warn!(
                message = "Receiver dropped part of an export.",
                output = %self.output,
                rejected = partial.rejected_log_records,
                reason = %partial.error_message,
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for OtlpSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let body = serde_json::to_vec(&encoder::encode(batch)).map_err(SinkError::rejected)?;
        self.export(body).await?;
        Ok(Ack::accepted())
    }

    /// An empty export is a valid request every receiver answers.
    async fn healthcheck(&self) -> crate::Result<()> {
        let mut request = Request::post(self.uri.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"resourceLogs":[]}"#))?;
        for (name, value) in &self.headers {
            request.headers_mut().insert(name, value.clone());
        }
        if let Some(auth) = &self.auth {
            auth.apply(&mut request);
        }
        let status = self.client.send(request).await?.status();
        if status.is_success() || status == StatusCode::BAD_REQUEST {
            Ok(())
        } else {
            Err(HealthcheckError::UnexpectedStatus { status }.into())
        }
    }
}
