//! Outbound TLS shared by every sink.

use std::pin::Pin;

use openssl::ssl::ConnectConfiguration;
use snafu::{ResultExt, Snafu};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

mod profile;
mod settings;

pub use self::{
    profile::{CustomTlsProfile, TlsSecurityProfile, TlsVersion},
    settings::{TlsSettings, TlsSpec},
};
use crate::config::SecretError;

pub type Result<T> = std::result::Result<T, TlsError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TlsError {
    #[snafu(display("Could not load {note}: {source}"))]
    LoadSecret {
        note: &'static str,
        source: SecretError,
    },
    #[snafu(display("Could not parse X509 certificate in {note}: {source}"))]
    X509Parse {
        note: &'static str,
        source: openssl::error::ErrorStack,
    },
    #[snafu(display("Could not parse private key: {source}"))]
    PrivateKeyParse { source: openssl::error::ErrorStack },
    #[snafu(display("{note} contains no certificate"))]
    NoCertificate { note: &'static str },
    #[snafu(display("A TLS key was configured without a certificate, or the reverse"))]
    MissingCrtKeyPair,
    #[snafu(display("Could not build TLS connector: {source}"))]
    TlsBuild { source: openssl::error::ErrorStack },
    #[snafu(display("Could not apply TLS profile {profile}: {source}"))]
    ApplyProfile {
        profile: String,
        source: openssl::error::ErrorStack,
    },
    #[snafu(display("Could not set up TLS session: {source}"))]
    Handshake { source: openssl::ssl::Error },
}

/// Opens a client TLS session over an established TCP connection.
pub async fn connect(
    settings: &TlsSettings,
    host: &str,
    stream: TcpStream,
) -> Result<SslStream<TcpStream>> {
    let connector = settings.connector_builder()?.build();
    let mut config: ConnectConfiguration = connector.configure().context(TlsBuildSnafu)?;
    settings.apply_connect_configuration(&mut config);
    let ssl = config.into_ssl(host).context(TlsBuildSnafu)?;
    let mut stream = SslStream::new(ssl, stream).context(TlsBuildSnafu)?;
    Pin::new(&mut stream).connect().await.context(HandshakeSnafu)?;
    Ok(stream)
}
