//! Shared plumbing for outputs that talk to AWS through the official SDK.

pub mod auth;

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use aws_smithy_runtime_api::client::{
    http::SharedHttpClient, orchestrator::HttpResponse, result::SdkError,
};
use aws_smithy_types::{retry::RetryConfig, timeout::TimeoutConfig};
use aws_types::region::Region;
use hyper::client::HttpConnector;
use hyper_openssl::HttpsConnector;
use snafu::{ResultExt, Snafu};

pub use self::auth::AwsAuthentication;
use crate::{
    config::SecretError,
    tls::{TlsError, TlsSettings},
};

#[derive(Debug, Snafu)]
pub enum AwsClientError {
    #[snafu(display("Failed to build TLS connector: {}", source))]
    Tls { source: TlsError },
    #[snafu(display("Failed to build HTTPS connector: {}", source))]
    Connector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to load AWS credentials: {}", source))]
    Credentials { source: SecretError },
}

/// An SDK HTTP client using the output's TLS settings and security profile.
pub fn http_client(tls_settings: &TlsSettings) -> Result<SharedHttpClient, AwsClientError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    let tls = tls_settings.connector_builder().context(TlsSnafu)?;
    let mut https = HttpsConnector::with_connector(http, tls).context(ConnectorSnafu)?;
    let settings = tls_settings.clone();
    https.set_callback(move |c, _uri| {
        settings.apply_connect_configuration(c);
        Ok(())
    });
    Ok(HyperClientBuilder::new().build(https))
}

/// Builds a CloudWatch Logs client. Retries are left to the delivery worker.
pub async fn cloudwatch_client(
    region: &str,
    endpoint: Option<&str>,
    auth: Option<&AwsAuthentication>,
    tls_settings: &TlsSettings,
    timeout: Duration,
) -> Result<aws_sdk_cloudwatchlogs::Client, AwsClientError> {
    let region = Region::new(region.to_string());
    let http_client = http_client(tls_settings)?;
    let credentials =
        AwsAuthentication::credentials_provider(auth, region.clone(), http_client.clone())
            .await
            .context(CredentialsSnafu)?;

    let mut builder = aws_sdk_cloudwatchlogs::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(region)
        .credentials_provider(credentials)
        .http_client(http_client)
        .retry_config(RetryConfig::disabled())
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(timeout)
                .build(),
        );
    builder.set_endpoint_url(endpoint.map(str::to_string));
    let config = builder.build();

    Ok(aws_sdk_cloudwatchlogs::Client::from_conf(config))
}

/// How a failed SDK call should be treated by the delivery worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Retriable,
    Auth,
    Permanent,
}

const AUTH_CODES: &[&str] = &[
    "AccessDeniedException",
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "ExpiredTokenException",
    "IncompleteSignature",
];

const RETRIABLE_CODES: &[&str] = &[
    "ThrottlingException",
    "RequestExpired",
    "RequestTimeout",
    "ServiceUnavailableException",
];

pub fn classify<E>(error: &SdkError<E, HttpResponse>, code: Option<&str>) -> ErrorClass {
    match error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorClass::Retriable,
        SdkError::ConstructionFailure(_) => ErrorClass::Permanent,
        SdkError::ResponseError(response) => classify_status(response.raw().status().as_u16(), code),
        SdkError::ServiceError(service) => classify_status(service.raw().status().as_u16(), code),
        _ => ErrorClass::Retriable,
    }
}

fn classify_status(status: u16, code: Option<&str>) -> ErrorClass {
    if let Some(code) = code {
        if AUTH_CODES.contains(&code) {
            return ErrorClass::Auth;
        }
        if RETRIABLE_CODES.contains(&code) {
            return ErrorClass::Retriable;
        }
    }
    match status {
        401 | 403 => ErrorClass::Auth,
        429 | 500.. => ErrorClass::Retriable,
        _ => ErrorClass::Permanent,
    }
}
