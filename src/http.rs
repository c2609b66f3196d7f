use std::{fmt, time::Duration};

use bytes::Bytes;
use headers::{Authorization, HeaderMapExt};
use http::{HeaderMap, Request, Response, header::HeaderValue};
use hyper::{
    Body,
    client::{Client, HttpConnector},
};
use hyper_openssl::HttpsConnector;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::{
    config::{SecretError, SecretRef, SensitiveString},
    tls::{TlsError, TlsSettings},
};

#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("Failed to build TLS connector: {}", source))]
    BuildTlsConnector { source: TlsError },
    #[snafu(display("Failed to build HTTPS connector: {}", source))]
    MakeHttpsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to make HTTP(S) request: {}", source))]
    CallRequest { source: hyper::Error },
    #[snafu(display("Failed to read HTTP(S) response: {}", source))]
    ReadResponse { source: hyper::Error },
    #[snafu(display("Request timed out after {:?}", timeout))]
    Timeout { timeout: Duration },
}

/// Client shared by the HTTP based sinks of one output.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    user_agent: HeaderValue,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(tls_settings: &TlsSettings, timeout: Duration) -> Result<Self, HttpError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let tls = tls_settings
            .connector_builder()
            .context(BuildTlsConnectorSnafu)?;
        let mut https = HttpsConnector::with_connector(http, tls).context(MakeHttpsConnectorSnafu)?;

        let settings = tls_settings.clone();
        https.set_callback(move |c, _uri| {
            settings.apply_connect_configuration(c);
            Ok(())
        });

        let client = Client::builder().build(https);

        let user_agent = HeaderValue::from_str(&format!("LogForwarder/{}", crate::get_version()))
            .unwrap_or_else(|_| HeaderValue::from_static("LogForwarder"));

        Ok(HttpClient {
            client,
            user_agent,
            timeout,
        })
    }

    /// Sends `request` and reads the whole response body.
    pub async fn send(&self, mut request: Request<Body>) -> Result<Response<Bytes>, HttpError> {
        default_request_headers(&mut request, &self.user_agent);
        trace!(message = "Sending HTTP request.", uri = %request.uri(), method = %request.method());

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .context(CallRequestSnafu)?;
            let (parts, body) = response.into_parts();
            let body = hyper::body::to_bytes(body)
                .await
                .context(ReadResponseSnafu)?;
            Ok::<_, HttpError>(Response::from_parts(parts, body))
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| HttpError::Timeout {
                timeout: self.timeout,
            })??;
        trace!(message = "HTTP response.", status = %response.status());
        Ok(response)
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key("User-Agent") {
        request
            .headers_mut()
            .insert("User-Agent", user_agent.clone());
    }

    if !request.headers().contains_key("Accept-Encoding") {
        // Response bodies are only read for error details.
        request
            .headers_mut()
            .insert("Accept-Encoding", HeaderValue::from_static("identity"));
    }
}

/// Credentials as written in an output's `authentication` block.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum HttpAuthentication {
    Basic {
        username: SecretRef,
        password: SecretRef,
    },
    Bearer {
        token: SecretRef,
    },
}

impl HttpAuthentication {
    pub fn resolve(&self) -> Result<Auth, SecretError> {
        Ok(match self {
            Self::Basic { username, password } => Auth::Basic {
                user: username.resolve()?,
                password: password.resolve()?,
            },
            Self::Bearer { token } => Auth::Bearer {
                token: token.resolve()?,
            },
        })
    }
}

/// Resolved credentials, held for one configuration generation.
#[derive(Clone, Debug)]
pub enum Auth {
    Basic {
        user: SensitiveString,
        password: SensitiveString,
    },
    Bearer {
        token: SensitiveString,
    },
}

impl Auth {
    pub fn apply<B>(&self, req: &mut Request<B>) {
        self.apply_headers_map(req.headers_mut())
    }

    pub fn apply_headers_map(&self, map: &mut HeaderMap) {
        match &self {
            Auth::Basic { user, password } => {
                let auth = Authorization::basic(user.expose(), password.expose());
                map.typed_insert(auth);
            }
            Auth::Bearer { token } => match Authorization::bearer(token.expose()) {
                Ok(auth) => map.typed_insert(auth),
                Err(error) => error!(message = "Invalid bearer token.", %error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;

    #[test]
    fn test_default_request_headers_defaults() {
        let user_agent = HeaderValue::from_static("log-forwarder");
        let mut request = Request::post("http://example.com").body(()).unwrap();
        default_request_headers(&mut request, &user_agent);
        assert_eq!(
            request.headers().get("Accept-Encoding"),
            Some(&HeaderValue::from_static("identity")),
        );
        assert_eq!(request.headers().get("User-Agent"), Some(&user_agent));
    }

    #[test]
    fn test_default_request_headers_does_not_overwrite() {
        let mut request = Request::post("http://example.com")
            .header("Accept-Encoding", "gzip")
            .header("User-Agent", "foo")
            .body(())
            .unwrap();
        default_request_headers(&mut request, &HeaderValue::from_static("log-forwarder"));
        assert_eq!(
            request.headers().get("Accept-Encoding"),
            Some(&HeaderValue::from_static("gzip")),
        );
        assert_eq!(
            request.headers().get("User-Agent"),
            Some(&HeaderValue::from_static("foo"))
        );
    }

    #[test]
    fn basic_auth_header() {
        let auth = Auth::Basic {
            user: "user".into(),
            password: "pass".into(),
        };
        let mut map = HeaderMap::new();
        auth.apply_headers_map(&mut map);
        assert_eq!(map["authorization"], "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn parses_authentication() {
        let auth: HttpAuthentication =
            serde_yaml::from_str("token: {fromEnv: LOKI_TOKEN}\n").unwrap();
        assert!(matches!(auth, HttpAuthentication::Bearer { .. }));
        let auth: HttpAuthentication =
            serde_yaml::from_str("username: elastic\npassword: changeme\n").unwrap();
        assert!(matches!(auth, HttpAuthentication::Basic { .. }));
    }

    #[tokio::test]
    async fn sends_and_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(202).set_body_string("accepted"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&TlsSettings::default(), Duration::from_secs(5)).unwrap();
        let mut request = Request::post(format!("{}/ingest", server.uri()))
            .body(Body::from("{}"))
            .unwrap();
        Auth::Bearer {
            token: "abc".into(),
        }
        .apply(&mut request);

        let response = client.send(request).await.unwrap();
        assert_eq!(response.status(), 202);
        assert_eq!(response.body().as_ref(), b"accepted");
    }
}
