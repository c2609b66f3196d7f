use std::{io, net::SocketAddr};

use snafu::{ResultExt, Snafu};
use tokio::{net::UdpSocket, sync::OnceCell};

#[derive(Debug, Snafu)]
pub enum UdpError {
    #[snafu(display("Failed to resolve {}: {}", address, source))]
    Resolve { address: String, source: io::Error },
    #[snafu(display("No addresses found for {}", address))]
    NoAddress { address: String },
    #[snafu(display("Failed to bind UDP socket: {}", source))]
    Bind { source: io::Error },
    #[snafu(display("Send error: {}", source))]
    Send { source: io::Error },
}

/// A connected UDP socket, created on first use. Every frame is one datagram.
pub struct UdpConnector {
    host: String,
    port: u16,
    socket: OnceCell<UdpSocket>,
}

impl UdpConnector {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            socket: OnceCell::new(),
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, UdpError> {
        let address = format!("{}:{}", self.host, self.port);
        let resolved = tokio::net::lookup_host(&address)
            .await
            .context(ResolveSnafu {
                address: address.clone(),
            })?
            .next();
        resolved.ok_or(UdpError::NoAddress { address })
    }

    async fn socket(&self) -> Result<&UdpSocket, UdpError> {
        self.socket
            .get_or_try_init(|| async {
                let addr = self.resolve().await?;
                let bind: SocketAddr = if addr.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(bind).await.context(BindSnafu)?;
                socket.connect(addr).await.context(BindSnafu)?;
                Ok(socket)
            })
            .await
    }

    pub async fn send_all(&self, frames: &[Vec<u8>]) -> Result<(), UdpError> {
        let socket = self.socket().await?;
        for frame in frames {
            socket.send(frame).await.context(SendSnafu)?;
        }
        Ok(())
    }

    pub async fn healthcheck(&self) -> Result<(), UdpError> {
        self.resolve().await.map(drop)
    }
}
