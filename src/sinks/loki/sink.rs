use std::collections::BTreeMap;

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use hyper::Body;
use serde::Serialize;

use super::config::{LabelKey, LokiConfig};
use crate::{
    config::OutputSpec,
    event::LogRecord,
    http::{Auth, HttpClient},
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

const TENANT_HEADER: &str = "X-Scope-OrgID";

type Labels = BTreeMap<String, String>;

type Partitions = BTreeMap<Option<String>, Vec<LokiRecord>>;

#[derive(Serialize)]
struct PushRequest<'a> {
    streams: Vec<Stream<'a>>,
}

#[derive(Serialize)]
struct Stream<'a> {
    stream: &'a Labels,
    /// `[<unix nanoseconds>, <line>]` pairs.
    values: Vec<[String; 2]>,
}

/// A record encoded for the push API.
#[derive(Debug)]
struct LokiRecord {
    index: usize,
    labels: Labels,
    timestamp: i64,
    line: String,
}

pub struct LokiSink {
    output: String,
    client: HttpClient,
    push_uri: Uri,
    ready_uri: Uri,
    labels: Vec<LabelKey>,
    tenant: Option<Template>,
    compression: Compression,
    auth: Option<Auth>,
}

impl LokiSink {
    pub fn new(
        output: &OutputSpec,
        config: &LokiConfig,
        cx: &SinkContext,
    ) -> Result<Self, BuildError> {
        let url = required_url(output)?;
        let invalid = |error: http::uri::InvalidUri| BuildError::InvalidUrl {
            output: output.name.clone(),
            reason: error.to_string(),
        };
        Ok(Self {
            output: output.name.clone(),
            client: cx.http_client(output)?,
            push_uri: endpoint(url, "loki/api/v1/push").map_err(invalid)?,
            ready_uri: endpoint(url, "ready").map_err(invalid)?,
            labels: config
                .labels()
                .map_err(|error| BuildError::InvalidSettings {
                    output: output.name.clone(),
                    reason: format!("invalid label key: {error}"),
                })?,
            tenant: config.tenant_key.clone(),
            compression: output.tuning.compression,
            auth: config
                .authentication
                .as_ref()
                .map(|auth| auth.resolve())
                .transpose()
                .map_err(|source| BuildError::Secret { source })?,
        })
    }

    fn encode_record(&self, index: usize, record: &LogRecord) -> Result<LokiRecord, SinkError> {
        let raw = record.to_document();
        let labels = self
            .labels
            .iter()
            .filter_map(|key| {
                key.value(record, &raw)
                    .map(|value| (key.name().to_string(), value))
            })
            .collect();
        Ok(LokiRecord {
            index,
            labels,
            timestamp: record.timestamp.timestamp_nanos_opt().unwrap_or_default(),
            line: serde_json::to_string(&record.to_viaq()).map_err(SinkError::rejected)?,
        })
    }

    /// Groups the batch by tenant. Records without a tenant share the `None` partition.
    fn partition(&self, batch: &[LogRecord]) -> Result<Partitions, SinkError> {
        let mut partitions = Partitions::new();
        for (index, record) in batch.iter().enumerate() {
            let tenant = self.tenant.as_ref().and_then(|template| {
                render_template(template, record, &self.output, "tenantKey", None)
            });
            partitions
                .entry(tenant)
                .or_default()
                .push(self.encode_record(index, record)?);
        }
        Ok(partitions)
    }

    /// Encodes one push body. Entries are sorted by time within each stream.
    fn encode_push(records: &mut [LokiRecord]) -> Result<Vec<u8>, SinkError> {
        records.sort_by_key(|record| record.timestamp);
        let mut streams: BTreeMap<&Labels, Vec<[String; 2]>> = BTreeMap::new();
        for record in records.iter() {
            streams
                .entry(&record.labels)
                .or_default()
                .push([record.timestamp.to_string(), record.line.clone()]);
        }
        let body = PushRequest {
            streams: streams
                .into_iter()
                .map(|(stream, values)| Stream { stream, values })
                .collect(),
        };
        serde_json::to_vec(&body).map_err(SinkError::rejected)
    }

    async fn push(&self, tenant: Option<&str>, body: &[u8]) -> Result<(), SinkError> {
        let mut headers = HeaderMap::new();
        if let Some(tenant) = tenant {
            let value = HeaderValue::from_str(tenant)
                .map_err(|_| SinkError::rejected(format!("invalid tenant {tenant:?}")))?;
            headers.insert(TENANT_HEADER, value);
        }
        let request = build_request(
            Method::POST,
            &self.push_uri,
            "application/json",
            body,
            self.compression,
            &headers,
            self.auth.as_ref(),
        )?;
        let response = self.client.send(request).await?;
        check_response(&response)
    }

    async fn fetch_status(&self, uri: &Uri) -> crate::Result<StatusCode> {
        let mut request = Request::get(uri.clone()).body(Body::empty())?;
        if let Some(auth) = &self.auth {
            auth.apply(&mut request);
        }
        Ok(self.client.send(request).await?.status())
    }
}

#[async_trait]
impl Sink for LokiSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let mut ack = Ack::accepted();
        for (tenant, mut records) in self.partition(batch)? {
            let body = Self::encode_push(&mut records)?;
            let indices = records.iter().map(|record| record.index);
            match self.push(tenant.as_deref(), &body).await {
                Ok(()) => {}
                Err(SinkError::Transport { message }) => {
                    debug!(message = "Push failed for tenant.", tenant = ?tenant, error = %message);
                    ack.retry.extend(indices);
                }
                Err(SinkError::Rejected { reason }) => {
                    ack.rejected.extend(indices);
                    ack.reason.get_or_insert(reason);
                }
                Err(error @ SinkError::Auth { .. }) => return Err(error),
            }
        }
        ack.retry.sort_unstable();
        ack.rejected.sort_unstable();
        Ok(ack)
    }

    async fn healthcheck(&self) -> crate::Result<()> {
        let status = match self.fetch_status(&self.ready_uri).await? {
            // Some gateways do not proxy `/ready`.
            StatusCode::NOT_FOUND => {
                warn!(
                    message = "Endpoint `/ready` not found. Retrying healthcheck with the push endpoint."
                );
                let status = self.fetch_status(&self.push_uri).await?;
                if status == StatusCode::METHOD_NOT_ALLOWED {
                    StatusCode::OK
                } else {
                    status
                }
            }
            status => status,
        };
        match status {
            StatusCode::OK => Ok(()),
            status => Err(HealthcheckError::UnexpectedStatus { status }.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::Value;
    use wiremock::{
        Mock, MockServer, Request as MockRequest, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;
    use crate::{
        config::OutputKind,
        event::{KubernetesMeta, LogSource, LogType},
        tls::TlsSecurityProfile,
    };

    fn output(url: &str, extra: &str) -> OutputSpec {
        serde_yaml::from_str(&format!("name: loki\ntype: loki\nurl: {url}\n{extra}")).unwrap()
    }

    fn sink(output: &OutputSpec) -> LokiSink {
        let OutputKind::Loki { loki } = &output.kind else {
            unreachable!()
        };
        let cx = SinkContext {
            hostname: "node-1".into(),
            tls_security_profile: TlsSecurityProfile::default(),
        };
        LokiSink::new(output, loki, &cx).unwrap()
    }

    fn record(container: &str, message: &str, offset_secs: i64) -> LogRecord {
        let mut record = LogRecord::new(
            message,
            LogType::Application,
            LogSource::Container,
            Arc::from(format!("/var/log/pods/test_{container}")),
        );
        record.timestamp =
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs);
        record.hostname = Some("node-1".into());
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: "test".into(),
            pod_name: "pod".into(),
            container_name: container.into(),
            ..Default::default()
        });
        record
    }

    fn body(request: &MockRequest) -> Value {
        serde_json::from_slice(&request.body).unwrap()
    }

    #[tokio::test]
    async fn pushes_sorted_streams_with_default_labels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/loki/api/v1/push"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let output = output(&server.uri(), "");
        let ack = sink(&output)
            .send(&[record("centos", "late", 5), record("centos", "early", 1)])
            .await
            .unwrap();
        assert_eq!(ack, Ack::accepted());

        let requests = server.received_requests().await.unwrap();
        let pushed = body(&requests[0]);
        let stream = &pushed["streams"][0];
        assert_eq!(stream["stream"]["log_type"], "application");
        assert_eq!(stream["stream"]["kubernetes_container_name"], "centos");
        assert_eq!(stream["stream"]["kubernetes_host"], "node-1");

        let lines: Vec<Value> = stream["values"]
            .as_array()
            .unwrap()
            .iter()
            .map(|value| serde_json::from_str(value[1].as_str().unwrap()).unwrap())
            .collect();
        assert_eq!(lines[0]["message"], "early");
        assert_eq!(lines[1]["message"], "late");
    }

    #[tokio::test]
    async fn tenant_key_partitions_pushes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/loki/api/v1/push"))
            .and(header(TENANT_HEADER, "centos-logtest"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/loki/api/v1/push"))
            .and(header(TENANT_HEADER, "other"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let output = output(
            &server.uri(),
            "loki:\n  tenantKey: kubernetes.container_name\n",
        );
        let ack = sink(&output)
            .send(&[
                record("centos-logtest", "a", 0),
                record("other", "b", 0),
                record("centos-logtest", "c", 0),
            ])
            .await
            .unwrap();
        assert_eq!(ack.retry, vec![1]);
        assert!(ack.rejected.is_empty());
    }

    #[tokio::test]
    async fn healthcheck_falls_back_when_ready_is_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ready"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/loki/api/v1/push"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let output = output(&server.uri(), "");
        sink(&output).healthcheck().await.unwrap();
    }
}
