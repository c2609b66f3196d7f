//! Google Cloud credentials shared by the outputs that talk to Google APIs.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub use goauth::scopes::Scope;
use goauth::{
    GoErr,
    auth::{JwtClaims, Token, TokenErr},
    credentials::Credentials,
};
use http::{HeaderValue, Request, Uri, header::AUTHORIZATION, uri::PathAndQuery};
use hyper::Body;
use serde::Deserialize;
use smpl_jwt::Jwt;
use snafu::{ResultExt, Snafu};
use tokio::sync::RwLock;

use crate::{
    config::{SecretError, SecretRef, SensitiveString},
    http::{HttpClient, HttpError},
    tls::TlsSettings,
};

const SERVICE_ACCOUNT_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are renewed this long before Google says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(200);

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum GcpError {
    #[snafu(display("Invalid GCP credentials: {}", source))]
    InvalidCredentials { source: GoErr },
    #[snafu(display("Could not load GCP API key: {}", source))]
    LoadApiKey { source: SecretError },
    #[snafu(display("GCP API key contains characters that are not URL safe"))]
    InvalidApiKey,
    #[snafu(display("Healthcheck endpoint forbidden"))]
    HealthcheckForbidden,
    #[snafu(display("Invalid RSA key in GCP credentials: {}", source))]
    InvalidRsaKey { source: GoErr },
    #[snafu(display("Failed to get OAuth token: {}", source))]
    GetToken { source: GoErr },
    #[snafu(display("Failed to get implicit GCP token: {}", source))]
    GetImplicitToken { source: HttpError },
    #[snafu(display("Failed to parse OAuth token JSON: {}", source))]
    TokenFromJson { source: TokenErr },
    #[snafu(display("Failed to parse OAuth token JSON text: {}", source))]
    TokenJsonFromStr { source: serde_json::Error },
    #[snafu(display("OAuth token is not a valid header value"))]
    InvalidToken,
    #[snafu(display("Failed to build HTTP client: {}", source))]
    BuildHttpClient { source: HttpError },
    #[snafu(display("Failed to build metadata request: {}", source))]
    BuildRequest { source: http::Error },
}

/// How an output authenticates against Google.
///
/// Without an API key or credentials file, `GOOGLE_APPLICATION_CREDENTIALS` is checked for a file
/// name, and failing that a token is fetched from the instance metadata server.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GcpAuthConfig {
    pub api_key: Option<SecretRef>,
    /// Service account key file, as mounted from the `google-application-credentials.json` secret.
    pub credentials_path: Option<String>,
    /// Sends requests without credentials. Only useful against emulators.
    #[serde(default)]
    pub skip_authentication: bool,
}

impl GcpAuthConfig {
    pub async fn build(&self, scope: Scope) -> Result<GcpAuthenticator, GcpError> {
        if self.skip_authentication {
            return Ok(GcpAuthenticator::None);
        }
        let gac = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok();
        let creds_path = self.credentials_path.as_ref().or(gac.as_ref());
        match (creds_path, &self.api_key) {
            (Some(path), _) => GcpAuthenticator::from_file(path, scope).await,
            (None, Some(api_key)) => {
                GcpAuthenticator::from_api_key(api_key.resolve().context(LoadApiKeySnafu)?)
            }
            (None, None) => GcpAuthenticator::new_implicit().await,
        }
    }
}

#[derive(Clone, Debug)]
pub enum GcpAuthenticator {
    Credentials(Arc<InnerCreds>),
    ApiKey(SensitiveString),
    None,
}

#[derive(Debug)]
pub struct InnerCreds {
    creds: Option<(Credentials, Scope)>,
    token: RwLock<CachedToken>,
}

#[derive(Debug)]
struct CachedToken {
    header: HeaderValue,
    renew_at: Instant,
}

impl CachedToken {
    fn new(token: &Token) -> Result<Self, GcpError> {
        let mut header = HeaderValue::from_str(&format!(
            "{} {}",
            token.token_type(),
            token.access_token()
        ))
        .map_err(|_| GcpError::InvalidToken)?;
        header.set_sensitive(true);
        let lifetime = Duration::from_secs(u64::try_from(token.expires_in()).unwrap_or_default());
        Ok(Self {
            header,
            renew_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        })
    }
}

impl GcpAuthenticator {
    async fn from_file(path: &str, scope: Scope) -> Result<Self, GcpError> {
        let creds = Credentials::from_file(path).context(InvalidCredentialsSnafu)?;
        let token = CachedToken::new(&fetch_token(&creds, &scope).await?)?;
        Ok(Self::Credentials(Arc::new(InnerCreds {
            creds: Some((creds, scope)),
            token: RwLock::new(token),
        })))
    }

    async fn new_implicit() -> Result<Self, GcpError> {
        let token = CachedToken::new(&get_token_implicit().await?)?;
        Ok(Self::Credentials(Arc::new(InnerCreds {
            creds: None,
            token: RwLock::new(token),
        })))
    }

    fn from_api_key(api_key: SensitiveString) -> Result<Self, GcpError> {
        if !api_key
            .expose()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(GcpError::InvalidApiKey);
        }
        Ok(Self::ApiKey(api_key))
    }

    /// Adds credentials to `request`, renewing the token first if it is about to expire.
    pub async fn apply(&self, request: &mut Request<Body>) -> Result<(), GcpError> {
        match self {
            Self::Credentials(inner) => {
                let header = inner.header().await?;
                request.headers_mut().insert(AUTHORIZATION, header);
            }
            Self::ApiKey(_) => {
                if let Some(uri) = self.apply_uri(request.uri()) {
                    *request.uri_mut() = uri;
                }
            }
            Self::None => {}
        }
        Ok(())
    }

    /// `uri` with the API key appended as the `key` query parameter.
    fn apply_uri(&self, uri: &Uri) -> Option<Uri> {
        let Self::ApiKey(api_key) = self else {
            return None;
        };
        let mut parts = uri.clone().into_parts();
        let path = parts
            .path_and_query
            .as_ref()
            .map_or("/", PathAndQuery::path);
        let paq = format!("{path}?key={}", api_key.expose());
        parts.path_and_query = Some(paq.parse().ok()?);
        Uri::from_parts(parts).ok()
    }
}

impl InnerCreds {
    async fn header(&self) -> Result<HeaderValue, GcpError> {
        {
            let token = self.token.read().await;
            if Instant::now() < token.renew_at {
                return Ok(token.header.clone());
            }
        }
        let mut token = self.token.write().await;
        // Another request may have renewed it while we waited for the lock.
        if Instant::now() >= token.renew_at {
            debug!("Renewing GCP authentication token.");
            let fresh = match &self.creds {
                Some((creds, scope)) => fetch_token(creds, scope).await?,
                None => get_token_implicit().await?,
            };
            *token = CachedToken::new(&fresh)?;
        }
        Ok(token.header.clone())
    }
}

async fn fetch_token(creds: &Credentials, scope: &Scope) -> Result<Token, GcpError> {
    let claims = JwtClaims::new(creds.iss(), std::slice::from_ref(scope), creds.token_uri(), None, None);
    let rsa_key = creds.rsa_key().context(InvalidRsaKeySnafu)?;
    let jwt = Jwt::new(claims, rsa_key, None);

    debug!(
        message = "Fetching GCP authentication token.",
        project = ?creds.project(),
        iss = ?creds.iss(),
        token_uri = ?creds.token_uri(),
    );
    goauth::get_token(&jwt, creds).await.context(GetTokenSnafu)
}

async fn get_token_implicit() -> Result<Token, GcpError> {
    debug!("Fetching implicit GCP authentication token.");
    let request = Request::get(SERVICE_ACCOUNT_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .body(Body::empty())
        .context(BuildRequestSnafu)?;

    let response = HttpClient::new(&TlsSettings::default(), METADATA_TIMEOUT)
        .context(BuildHttpClientSnafu)?
        .send(request)
        .await
        .context(GetImplicitTokenSnafu)?;

    let bytes = response.body();
    match serde_json::from_slice::<Token>(bytes) {
        Ok(token) => Ok(token),
        Err(error) => Err(match serde_json::from_slice::<TokenErr>(bytes) {
            Ok(error) => GcpError::TokenFromJson { source: error },
            Err(_) => GcpError::TokenJsonFromStr { source: error },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn build_auth(yaml: &str) -> Result<GcpAuthenticator, GcpError> {
        let config: GcpAuthConfig = serde_yaml::from_str(yaml).unwrap();
        config.build(Scope::LoggingWrite).await
    }

    fn apply_uri(auth: &GcpAuthenticator, uri: &str) -> String {
        auth.apply_uri(&uri.parse().unwrap()).unwrap().to_string()
    }

    #[tokio::test]
    async fn skip_authentication() {
        let auth = build_auth("skipAuthentication: true\napiKey: testing\n")
            .await
            .unwrap();
        assert!(matches!(auth, GcpAuthenticator::None));
    }

    #[tokio::test]
    async fn uses_api_key() {
        let auth = build_auth("apiKey: AIzaSyA-test_key\n").await.unwrap();
        assert!(matches!(auth, GcpAuthenticator::ApiKey(..)));

        assert_eq!(
            apply_uri(&auth, "http://example.com"),
            "http://example.com/?key=AIzaSyA-test_key"
        );
        assert_eq!(
            apply_uri(&auth, "http://example.com/v2/entries:write"),
            "http://example.com/v2/entries:write?key=AIzaSyA-test_key"
        );
    }

    #[tokio::test]
    async fn fails_bad_api_key() {
        let error = build_auth("apiKey: abc%xyz\n").await.unwrap_err();
        assert!(matches!(error, GcpError::InvalidApiKey));
    }

    #[tokio::test]
    async fn fails_missing_credentials_file() {
        let error = build_auth("credentialsPath: /nonexistent/google-application-credentials.json\n")
            .await
            .unwrap_err();
        assert!(matches!(error, GcpError::InvalidCredentials { .. }));
    }

    #[tokio::test]
    async fn api_key_is_added_to_requests() {
        let auth = build_auth("apiKey: k1\n").await.unwrap();
        let mut request = Request::post("http://logging.local/v2/entries:write")
            .body(Body::empty())
            .unwrap();
        auth.apply(&mut request).await.unwrap();
        assert_eq!(request.uri().query(), Some("key=k1"));
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }
}
