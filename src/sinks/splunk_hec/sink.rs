use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, header::AUTHORIZATION};
use hyper::Body;
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::Snafu;

use super::config::{DEFAULT_INDEX, SplunkConfig};
use crate::{
    config::OutputSpec,
    event::LogRecord,
    http::HttpClient,
    sinks::{
        Ack, BuildError, HealthcheckError, Sink, SinkContext, SinkError, required_url,
        util::{
            Compression,
            http::{build_request, check_response, endpoint},
            render_template,
        },
    },
    templating::Template,
};

#[derive(Debug, Snafu)]
enum HecHealthcheckError {
    #[snafu(display("Invalid HEC token"))]
    InvalidToken,
    #[snafu(display("Queues are full"))]
    QueuesFull,
}

#[derive(Serialize, Debug)]
struct HecData<'a> {
    event: Map<String, Value>,
    time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    sourcetype: &'a str,
}

pub struct SplunkSink {
    output: String,
    client: HttpClient,
    event_uri: Uri,
    health_uri: Uri,
    index: Option<Template>,
    source: Option<Template>,
    sourcetype: String,
    compression: Compression,
    headers: HeaderMap,
}

impl SplunkSink {
    pub fn new(
        output: &OutputSpec,
        config: &SplunkConfig,
        cx: &SinkContext,
    ) -> Result<Self, BuildError> {
        let url = required_url(output)?;
        let invalid = |error: http::uri::InvalidUri| BuildError::InvalidUrl {
            output: output.name.clone(),
            reason: error.to_string(),
        };
        let token = config
            .hec_token
            .resolve()
            .map_err(|source| BuildError::Secret { source })?;
        let value = format!("Splunk {}", token.expose());
        let mut authorization =
            HeaderValue::from_str(&value).map_err(|source| BuildError::InvalidHeaderValue {
                value: "Splunk <redacted>".into(),
                source,
            })?;
        authorization.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);

        Ok(Self {
            output: output.name.clone(),
            client: cx.http_client(output)?,
            event_uri: endpoint(url, "services/collector/event").map_err(invalid)?,
            health_uri: endpoint(url, "services/collector/health/1.0").map_err(invalid)?,
            index: config.index.clone(),
            source: config.source.clone(),
            sourcetype: config.sourcetype.clone(),
            compression: output.tuning.compression,
            headers,
        })
    }

    /// Concatenated event objects, the framing the collector endpoint expects.
    pub(super) fn encode(&self, batch: &[LogRecord]) -> Result<Vec<u8>, SinkError> {
        let mut body = Vec::new();
        for record in batch {
            let data = HecData {
                event: record.to_viaq(),
                time: record.timestamp.timestamp_micros() as f64 / 1_000_000.0,
                host: record.hostname.as_deref(),
                index: self.index.as_ref().and_then(|template| {
                    render_template(template, record, &self.output, "index", Some(DEFAULT_INDEX))
                }),
                source: self.source.as_ref().and_then(|template| {
                    render_template(template, record, &self.output, "source", None)
                }),
                sourcetype: &self.sourcetype,
            };
            serde_json::to_writer(&mut body, &data).map_err(SinkError::rejected)?;
            body.push(b'\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl Sink for SplunkSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let body = self.encode(batch)?;
        let request = build_request(
            Method::POST,
            &self.event_uri,
            "application/json",
            &body,
            self.compression,
            &self.headers,
            None,
        )?;
        let response = self.client.send(request).await?;
        check_response(&response)?;
        Ok(Ack::accepted())
    }

    async fn healthcheck(&self) -> crate::Result<()> {
        let mut request = Request::get(self.health_uri.clone()).body(Body::empty())?;
        request.headers_mut().extend(self.headers.clone());
        let response = self.client.send(request).await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::BAD_REQUEST => Err(HecHealthcheckError::InvalidToken.into()),
            StatusCode::SERVICE_UNAVAILABLE => Err(HecHealthcheckError::QueuesFull.into()),
            status => Err(HealthcheckError::UnexpectedStatus { status }.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;
    use crate::{
        config::OutputKind,
        event::{KubernetesMeta, LogSource, LogType},
        tls::TlsSecurityProfile,
    };

    fn output(url: &str) -> OutputSpec {
        serde_yaml::from_str(&format!(
            "name: splunk\ntype: splunk\nurl: {url}\nsplunk:\n  hecToken: token\n  index: '{{.kubernetes.labels.index}}'\n"
        ))
        .unwrap()
    }

    fn sink(output: &OutputSpec) -> SplunkSink {
        let OutputKind::Splunk { splunk } = &output.kind else {
            unreachable!()
        };
        let cx = SinkContext {
            hostname: "node-1".into(),
            tls_security_profile: TlsSecurityProfile::default(),
        };
        SplunkSink::new(output, splunk, &cx).unwrap()
    }

    fn record(index_label: Option<&str>) -> LogRecord {
        let mut record = LogRecord::new(
            "hello",
            LogType::Application,
            LogSource::Container,
            Arc::from("test"),
        );
        record.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        record.hostname = Some("node-1".into());
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: "test".into(),
            labels: index_label
                .map(|index| [("index".to_string(), index.to_string())].into())
                .unwrap_or_default(),
            ..Default::default()
        });
        record
    }

    #[test]
    fn unresolved_index_falls_back_to_main() {
        let output = output("http://localhost:8088");
        let body = sink(&output)
            .encode(&[record(Some("audit-idx")), record(None)])
            .unwrap();
        let events: Vec<Value> = serde_json::Deserializer::from_slice(&body)
            .into_iter::<Value>()
            .map(Result::unwrap)
            .collect();
        assert_eq!(events[0]["index"], "audit-idx");
        assert_eq!(events[1]["index"], DEFAULT_INDEX);
        assert_eq!(events[0]["sourcetype"], "_json");
        assert_eq!(events[0]["host"], "node-1");
        assert_eq!(events[0]["time"], json!(1714564800.0));
        assert_eq!(events[0]["event"]["message"], "hello");
    }

    #[tokio::test]
    async fn sends_with_splunk_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/collector/event"))
            .and(header("Authorization", "Splunk token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"text":"Success","code":0}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let output = output(&server.uri());
        let ack = sink(&output).send(&[record(None)]).await.unwrap();
        assert_eq!(ack, Ack::accepted());
    }

    #[tokio::test]
    async fn healthcheck_reports_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/collector/health/1.0"))
            .and(header("Authorization", "Splunk token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let output = output(&server.uri());
        assert_eq!(
            sink(&output).healthcheck().await.unwrap_err().to_string(),
            "Invalid HEC token"
        );
    }
}
