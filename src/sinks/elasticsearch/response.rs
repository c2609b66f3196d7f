use http::StatusCode;
use serde::Deserialize;

use crate::sinks::{Ack, SinkError};

#[derive(Deserialize, Debug)]
struct EsResultResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<EsResultItem>,
}

#[derive(Deserialize, Debug)]
enum EsResultItem {
    #[serde(rename = "index")]
    Index(EsIndexResult),
    #[serde(rename = "create")]
    Create(EsIndexResult),
}

impl EsResultItem {
    #[allow(clippy::missing_const_for_fn)] // const cannot run destructor
    fn result(&self) -> &EsIndexResult {
        match self {
            EsResultItem::Index(r) => r,
            EsResultItem::Create(r) => r,
        }
    }
}

#[derive(Deserialize, Debug)]
struct EsIndexResult {
    status: Option<u16>,
    error: Option<EsErrorDetails>,
}

#[derive(Deserialize, Debug)]
struct EsErrorDetails {
    reason: String,
    #[serde(rename = "type")]
    err_type: String,
}

/// Splits a successful `_bulk` response into accepted, rejected and retriable items.
///
/// `409` on `create` means the document already exists, which counts as delivered.
pub fn parse_bulk_response(body: &[u8], batch_len: usize) -> Result<Ack, SinkError> {
    let response: EsResultResponse = serde_json::from_slice(body).map_err(|error| {
        SinkError::transport(format!("could not parse bulk response: {error}"))
    })?;
    if !response.errors {
        return Ok(Ack::accepted());
    }
    if response.items.len() != batch_len {
        return Err(SinkError::transport(format!(
            "bulk response has {} items for {} records",
            response.items.len(),
            batch_len
        )));
    }

    let mut ack = Ack::accepted();
    for (index, item) in response.items.iter().enumerate() {
        let result = item.result();
        let Some(status) = result.status.and_then(|status| StatusCode::from_u16(status).ok())
        else {
            continue;
        };
        if status.is_success() || status == StatusCode::CONFLICT {
            continue;
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ack.retry.push(index);
        } else {
            ack.rejected.push(index);
            if ack.reason.is_none() {
                ack.reason = Some(match &result.error {
                    Some(error) => {
                        format!("error type: {}, reason: {}", error.err_type, error.reason)
                    }
                    None => format!("status: {status}"),
                });
            }
        }
    }
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_error_response() {
        let json = r#"{"took":185,"errors":true,"items":[{"create":{"_index":"app-write","_id":"3GhQLXEBE62DvOOUKdFH","status":400,"error":{"type":"illegal_argument_exception","reason":"mapper [message] of different type, current_type [long], merged_type [text]"}}}]}"#;
        let ack = parse_bulk_response(json.as_bytes(), 1).unwrap();
        assert_eq!(ack.rejected, vec![0]);
        assert!(ack.retry.is_empty());
        assert_eq!(
            ack.reason.as_deref(),
            Some("error type: illegal_argument_exception, reason: mapper [message] of different type, current_type [long], merged_type [text]")
        );
    }

    #[test]
    fn handles_partial_error_response() {
        let json = r#"{"took":34,"errors":true,"items":[
            {"create":{"_index":"app-write","status":201}},
            {"create":{"_index":"app-write","status":429}},
            {"create":{"_index":"app-write","status":409}},
            {"create":{"_index":"app-write","status":503}}
        ]}"#;
        let ack = parse_bulk_response(json.as_bytes(), 4).unwrap();
        assert_eq!(ack.retry, vec![1, 3]);
        assert!(ack.rejected.is_empty());
    }

    #[test]
    fn no_errors_short_circuits() {
        let json = r#"{"took":3,"errors":false,"items":[{"create":{"status":201}}]}"#;
        assert_eq!(parse_bulk_response(json.as_bytes(), 1).unwrap(), Ack::accepted());
    }

    #[test]
    fn garbage_is_transport_error() {
        assert!(matches!(
            parse_bulk_response(b"<html>", 1),
            Err(SinkError::Transport { .. })
        ));
    }
}
