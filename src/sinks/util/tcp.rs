use std::{io, pin::Pin};

use snafu::{ResultExt, Snafu};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
};

use crate::tls::{self, TlsError, TlsSettings};

#[derive(Debug, Snafu)]
pub enum TcpError {
    #[snafu(display("Connect error: {}", source))]
    Connect { source: io::Error },
    #[snafu(display("TLS error: {}", source))]
    Tls { source: TlsError },
    #[snafu(display("Send error: {}", source))]
    Send { source: io::Error },
}

type BoxedStream = Pin<Box<dyn AsyncWrite + Send>>;

/// A lazily connected, reused TCP stream, optionally wrapped in TLS.
///
/// A failed write drops the connection; the next send connects again.
pub struct TcpConnector {
    host: String,
    port: u16,
    tls: Option<TlsSettings>,
    stream: Mutex<Option<BoxedStream>>,
}

impl TcpConnector {
    pub fn new(host: String, port: u16, tls: Option<TlsSettings>) -> Self {
        Self {
            host,
            port,
            tls,
            stream: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<BoxedStream, TcpError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .context(ConnectSnafu)?;
        debug!(message = "Connected.", host = %self.host, port = self.port, tls = self.tls.is_some());
        Ok(match &self.tls {
            Some(settings) => Box::pin(
                tls::connect(settings, &self.host, stream)
                    .await
                    .context(TlsSnafu)?,
            ),
            None => Box::pin(stream),
        })
    }

    /// Writes every frame, connecting first if needed.
    pub async fn send_all(&self, frames: &[Vec<u8>]) -> Result<(), TcpError> {
        let mut guard = self.stream.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let result = async {
            for frame in frames {
                stream.write_all(frame).await?;
            }
            stream.flush().await
        }
        .await;

        result.context(SendSnafu)?;
        *guard = Some(stream);
        Ok(())
    }

    pub async fn healthcheck(&self) -> Result<(), TcpError> {
        TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map(drop)
            .context(ConnectSnafu)
    }
}
