use async_trait::async_trait;
use http::{HeaderMap, Method, Request, Uri};
use hyper::Body;
use serde_json::json;

use super::{config::ElasticsearchConfig, response::parse_bulk_response};
use crate::{
    config::OutputSpec,
    event::LogRecord,
    http::{Auth, HttpClient},
    sinks::{
        Ack, BuildError, HealthcheckError, Sink, SinkContext, SinkError, required_url,
        util::{
            Compression,
            http::{build_request, check_response, endpoint, header_map},
        },
    },
};

pub struct ElasticsearchSink {
    output: String,
    config: ElasticsearchConfig,
    client: HttpClient,
    bulk_uri: Uri,
    health_uri: Uri,
    compression: Compression,
    headers: HeaderMap,
    auth: Option<Auth>,
}

impl ElasticsearchSink {
    pub fn new(
        output: &OutputSpec,
        config: &ElasticsearchConfig,
        cx: &SinkContext,
    ) -> Result<Self, BuildError> {
        let url = required_url(output)?;
        let invalid = |error: http::uri::InvalidUri| BuildError::InvalidUrl {
            output: output.name.clone(),
            reason: error.to_string(),
        };
        Ok(Self {
            output: output.name.clone(),
            config: config.clone(),
            client: cx.http_client(output)?,
            bulk_uri: endpoint(url, "_bulk").map_err(invalid)?,
            health_uri: endpoint(url, "_cluster/health").map_err(invalid)?,
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

    /// One `create` action line and one document line per record.
    ///
    /// Records whose index cannot be named are left out and listed in [`Bulk::unindexable`].
    pub(super) fn encode(&self, batch: &[LogRecord]) -> Result<Bulk, SinkError> {
        let mut bulk = Bulk::default();
        for (position, record) in batch.iter().enumerate() {
            let Ok(index) = self.config.index_for(record, &self.output) else {
                bulk.unindexable.push(position);
                continue;
            };
            let action = if self.config.version < 7 {
                json!({"create": {"_index": index, "_type": "_doc"}})
            } else {
                json!({"create": {"_index": index}})
            };
            serde_json::to_writer(&mut bulk.body, &action).map_err(SinkError::rejected)?;
            bulk.body.push(b'\n');
            serde_json::to_writer(&mut bulk.body, &record.to_viaq())
                .map_err(SinkError::rejected)?;
            bulk.body.push(b'\n');
            bulk.items.push(position);
        }
        Ok(bulk)
    }
}

/// An encoded `_bulk` request body.
#[derive(Default)]
pub(super) struct Bulk {
    pub(super) body: Vec<u8>,
    /// Batch position of every item in the body, in order.
    pub(super) items: Vec<usize>,
    pub(super) unindexable: Vec<usize>,
}

impl Bulk {
    /// Maps an ack over the body's items back to batch positions and rejects the unindexable
    /// records.
    fn into_ack(self, items_ack: Ack) -> Ack {
        let mut ack = Ack {
            rejected: items_ack.rejected.iter().map(|i| self.items[*i]).collect(),
            reason: items_ack.reason,
            retry: items_ack.retry.iter().map(|i| self.items[*i]).collect(),
        };
        if !self.unindexable.is_empty() {
            ack.rejected.extend(self.unindexable);
            ack.rejected.sort_unstable();
            ack.reason
                .get_or_insert_with(|| "index date suffix could not be rendered".to_string());
        }
        ack
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let bulk = self.encode(batch)?;
        if bulk.items.is_empty() {
            return Ok(bulk.into_ack(Ack::accepted()));
        }
        let request = build_request(
            Method::POST,
            &self.bulk_uri,
            "application/x-ndjson",
            &bulk.body,
            self.compression,
            &self.headers,
            self.auth.as_ref(),
        )?;
        let response = self.client.send(request).await?;
        check_response(&response)?;
        let items_ack = parse_bulk_response(response.body(), bulk.items.len())?;
        Ok(bulk.into_ack(items_ack))
    }

    async fn healthcheck(&self) -> crate::Result<()> {
        let mut request = Request::get(self.health_uri.clone()).body(Body::empty())?;
        if let Some(auth) = &self.auth {
            auth.apply(&mut request);
        }
        let response = self.client.send(request).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(HealthcheckError::UnexpectedStatus { status }.into()),
        }
    }
}
