use async_trait::async_trait;
use http::{HeaderMap, Method, Request, Uri};
use hyper::Body;

use super::config::{HttpConfig, HttpFormat};
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

pub struct HttpSink {
    client: HttpClient,
    uri: Uri,
    method: Method,
    format: HttpFormat,
    compression: Compression,
    headers: HeaderMap,
    auth: Option<Auth>,
}

impl HttpSink {
    pub fn new(output: &OutputSpec, config: &HttpConfig, cx: &SinkContext) -> Result<Self, BuildError> {
        let uri = required_url(output)?
            .as_str()
            .parse()
            .map_err(|error: http::uri::InvalidUri| BuildError::InvalidUrl {
                output: output.name.clone(),
                reason: error.to_string(),
            })?;
        Ok(Self {
            client: cx.http_client(output)?,
            uri,
            method: config.method.into(),
            format: config.format,
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

    pub(super) fn encode(&self, batch: &[LogRecord]) -> Result<Vec<u8>, SinkError> {
        match self.format {
            HttpFormat::Ndjson => {
                let mut body = Vec::new();
                for record in batch {
                    serde_json::to_writer(&mut body, &record.to_viaq())
                        .map_err(SinkError::rejected)?;
                    body.push(b'\n');
                }
                Ok(body)
            }
            HttpFormat::JsonArray => {
                let documents: Vec<_> = batch.iter().map(LogRecord::to_viaq).collect();
                serde_json::to_vec(&documents).map_err(SinkError::rejected)
            }
        }
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let body = self.encode(batch)?;
        let request = build_request(
            self.method.clone(),
            &self.uri,
            self.format.content_type(),
            &body,
            self.compression,
            &self.headers,
            self.auth.as_ref(),
        )?;
        let response = self.client.send(request).await?;
        check_response(&response)?;
        Ok(Ack::accepted())
    }

    /// Any answer but a server error or an auth refusal counts: many receivers only accept POST.
    async fn healthcheck(&self) -> crate::Result<()> {
        let mut request = Request::head(self.uri.clone()).body(Body::empty())?;
        if let Some(auth) = &self.auth {
            auth.apply(&mut request);
        }
        let response = self.client.send(request).await?;
        match response.status() {
            status
                if status.is_server_error()
                    || status == http::StatusCode::UNAUTHORIZED
                    || status == http::StatusCode::FORBIDDEN =>
            {
                Err(HealthcheckError::UnexpectedStatus { status }.into())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;
    use crate::{
        config::OutputKind,
        event::{LogSource, LogType},
        tls::TlsSecurityProfile,
    };

    fn sink(yaml: &str) -> HttpSink {
        let output: OutputSpec = serde_yaml::from_str(yaml).unwrap();
        let OutputKind::Http { http } = &output.kind else {
            unreachable!()
        };
        let cx = SinkContext {
            hostname: "node-1".into(),
            tls_security_profile: TlsSecurityProfile::default(),
        };
        HttpSink::new(&output, http, &cx).unwrap()
    }

    fn record(message: &str) -> LogRecord {
        LogRecord::new(message, LogType::Audit, LogSource::KubeApi, Arc::from("audit"))
    }

    #[tokio::test]
    async fn posts_ndjson_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs"))
            .and(header("content-type", "application/x-ndjson"))
            .and(header("x-cluster", "east"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink(&format!(
            "name: h\ntype: http\nurl: {}/logs\nhttp:\n  headers:\n    X-Cluster: east\n",
            server.uri()
        ));
        let ack = sink.send(&[record("a"), record("b")]).await.unwrap();
        assert_eq!(ack, Ack::accepted());

        let requests = server.received_requests().await.unwrap();
        let lines: Vec<Value> = requests[0]
            .body
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["message"], "b");
        assert_eq!(lines[0]["log_source"], "kubeAPI");
    }

    #[tokio::test]
    async fn puts_json_array() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/ingest"))
            .and(header("content-type", "application/json"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink(&format!(
            "name: h\ntype: http\nurl: {}/ingest\nhttp:\n  method: PUT\n  format: jsonArray\n  authentication:\n    token: s3cret\n",
            server.uri()
        ));
        sink.send(&[record("a")]).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn client_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let sink = sink(&format!("name: h\ntype: http\nurl: {}\n", server.uri()));
        match sink.send(&[record("a")]).await {
            Err(SinkError::Rejected { reason }) => assert!(reason.contains("bad payload")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn healthcheck_accepts_method_not_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let sink = sink(&format!("name: h\ntype: http\nurl: {}\n", server.uri()));
        sink.healthcheck().await.unwrap();
    }
}
