use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri,
    header::{CONTENT_ENCODING, CONTENT_TYPE},
};
use hyper::Body;

use super::{Compression, compressor};
use crate::{http::Auth, sinks::SinkError};

/// Longest slice of a response body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Builds a request carrying `payload`, compressed as configured.
pub fn build_request(
    method: Method,
    uri: &Uri,
    content_type: &'static str,
    payload: &[u8],
    compression: Compression,
    headers: &HeaderMap,
    auth: Option<&Auth>,
) -> Result<Request<Body>, SinkError> {
    let body = compressor::compress(compression, payload).map_err(SinkError::rejected)?;
    let mut builder = Request::builder()
        .method(method)
        .uri(uri.clone())
        .header(CONTENT_TYPE, content_type);
    if let Some(encoding) = compression.content_encoding() {
        builder = builder.header(CONTENT_ENCODING, encoding);
    }
    let mut request = builder
        .body(Body::from(body))
        .map_err(SinkError::rejected)?;
    for (name, value) in headers {
        request.headers_mut().insert(name, value.clone());
    }
    if let Some(auth) = auth {
        auth.apply(&mut request);
    }
    Ok(request)
}

/// Maps a response to the delivery outcome of the whole request.
pub fn check_response(response: &Response<Bytes>) -> Result<(), SinkError> {
    classify_status(response.status(), response.body())
}

pub fn classify_status(status: StatusCode, body: &[u8]) -> Result<(), SinkError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("{status}: {}", body_excerpt(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SinkError::auth(message)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(SinkError::transport(message))
        }
        status if status.is_server_error() => Err(SinkError::transport(message)),
        _ => Err(SinkError::rejected(message)),
    }
}

pub fn body_excerpt(body: &[u8]) -> String {
    let end = body.len().min(MAX_ERROR_BODY);
    String::from_utf8_lossy(&body[..end]).trim().to_string()
}

/// Appends `path` to the output url, keeping any prefix the url already has.
pub fn endpoint(base: &url::Url, path: &str) -> Result<Uri, http::uri::InvalidUri> {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
    .parse()
}

/// Parses configured extra headers once per generation.
pub fn header_map(
    headers: &std::collections::BTreeMap<String, String>,
) -> Result<HeaderMap, crate::sinks::BuildError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = http::header::HeaderName::from_bytes(name.as_bytes()).map_err(|source| {
            crate::sinks::BuildError::InvalidHeaderName {
                name: name.clone(),
                source,
            }
        })?;
        let value = HeaderValue::from_str(value).map_err(|source| {
            crate::sinks::BuildError::InvalidHeaderValue {
                value: value.clone(),
                source,
            }
        })?;
        map.insert(name, value);
    }
    Ok(map)
}
