use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, HeaderValue, Method, Request, Uri, header::CONTENT_TYPE};
use hyper::Body;
use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};

use super::config::AzureMonitorConfig;
use crate::{
    config::OutputSpec,
    event::LogRecord,
    http::HttpClient,
    sinks::{
        Ack, BuildError, Sink, SinkContext, SinkError,
        util::http::{check_response, endpoint},
    },
};

const API_PATH: &str = "/api/logs";
const API_VERSION: &str = "2016-04-01";
const CONTENT_TYPE_JSON: &str = "application/json";
/// Field the service reads the record time from.
const TIME_GENERATED_FIELD: &str = "@timestamp";

const LOG_TYPE: &str = "log-type";
const X_MS_DATE: &str = "x-ms-date";
const X_MS_AZURE_RESOURCE_ID: &str = "x-ms-azureresourceid";
const TIME_GENERATED_FIELD_HEADER: &str = "time-generated-field";

pub struct AzureMonitorSink {
    client: HttpClient,
    uri: Uri,
    customer_id: String,
    shared_key: PKey<openssl::pkey::Private>,
    default_headers: HeaderMap,
}

impl AzureMonitorSink {
    pub fn new(
        output: &OutputSpec,
        config: &AzureMonitorConfig,
        cx: &SinkContext,
    ) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidSettings {
            output: output.name.clone(),
            reason,
        };
        if !config.is_valid_log_type() {
            return Err(invalid(format!(
                "logType {:?} may only contain letters, digits and underscores",
                config.log_type
            )));
        }

        let key = config
            .shared_key
            .resolve()
            .map_err(|source| BuildError::Secret { source })?;
        let key = BASE64_STANDARD
            .decode(key.expose().trim())
            .map_err(|error| invalid(format!("sharedKey is not valid base64: {error}")))?;
        let shared_key = PKey::hmac(&key)
            .map_err(|error| invalid(format!("sharedKey is not usable: {error}")))?;

        let uri = match &output.url {
            Some(url) => endpoint(url, API_PATH),
            None => format!("https://{}.{}{}", config.customer_id, config.host, API_PATH).parse(),
        }
        .and_then(|uri: Uri| format!("{uri}?api-version={API_VERSION}").parse())
        .map_err(|error| BuildError::InvalidUrl {
            output: output.name.clone(),
            reason: error.to_string(),
        })?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        default_headers.insert(
            LOG_TYPE,
            header_value(&config.log_type).map_err(invalid)?,
        );
        default_headers.insert(
            TIME_GENERATED_FIELD_HEADER,
            HeaderValue::from_static(TIME_GENERATED_FIELD),
        );
        if let Some(resource_id) = &config.azure_resource_id {
            default_headers.insert(
                X_MS_AZURE_RESOURCE_ID,
                header_value(resource_id).map_err(invalid)?,
            );
        }

        Ok(Self {
            client: cx.http_client(output)?,
            uri,
            customer_id: config.customer_id.clone(),
            shared_key,
            default_headers,
        })
    }

    /// `SharedKey` signature over the request line, as the Data Collector API defines it.
    fn signature(&self, date: &str, content_length: usize) -> Result<String, SinkError> {
        let string_to_sign = format!(
            "POST\n{content_length}\n{CONTENT_TYPE_JSON}\n{X_MS_DATE}:{date}\n{API_PATH}"
        );
        let mut signer =
            Signer::new(MessageDigest::sha256(), &self.shared_key).map_err(SinkError::rejected)?;
        signer
            .update(string_to_sign.as_bytes())
            .map_err(SinkError::rejected)?;
        let mac = signer.sign_to_vec().map_err(SinkError::rejected)?;
        Ok(format!(
            "SharedKey {}:{}",
            self.customer_id,
            BASE64_STANDARD.encode(mac)
        ))
    }

    pub(super) fn build_request(&self, body: Bytes) -> Result<Request<Body>, SinkError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let authorization = self.signature(&date, body.len())?;

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .body(Body::from(body))
            .map_err(SinkError::rejected)?;
        let headers = request.headers_mut();
        headers.extend(self.default_headers.clone());
        headers.insert(X_MS_DATE, header_value(&date).map_err(SinkError::rejected)?);
        let mut authorization = header_value(&authorization).map_err(SinkError::rejected)?;
        authorization.set_sensitive(true);
        headers.insert(http::header::AUTHORIZATION, authorization);
        Ok(request)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, String> {
    HeaderValue::from_str(value).map_err(|error| format!("invalid header value {value:?}: {error}"))
}

#[async_trait]
impl Sink for AzureMonitorSink {
    async fn send(&self, batch: &[LogRecord]) -> Result<Ack, SinkError> {
        let documents: Vec<_> = batch.iter().map(LogRecord::to_viaq).collect();
        let body = serde_json::to_vec(&documents).map_err(SinkError::rejected)?;
        let request = self.build_request(Bytes::from(body))?;
        let response = self.client.send(request).await?;
        check_response(&response)?;
        Ok(Ack::accepted())
    }

    /// The API has no probe endpoint; an empty array is accepted and stores nothing.
    async fn healthcheck(&self) -> crate::Result<()> {
        let request = self.build_request(Bytes::from_static(b"[]"))?;
        let response = self.client.send(request).await?;
        check_response(&response)?;
        Ok(())
    }
}
