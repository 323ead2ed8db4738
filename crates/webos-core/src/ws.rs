//! WebSocket transport (tokio-tungstenite) and dialer.
//!
//! The device serves plain websockets on port 3000 and TLS websockets on
//! port 3001 with a self-signed certificate.

use crate::config::DialConfig;
use crate::connection::{Connection, Frame, FrameReader, FrameWriter};
use crate::error::{Result, TvError};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

/// Connection returned by [`Dialer::dial`].
pub type TvConnection = WsConnection<MaybeTlsStream<TcpStream>>;

/// Adapts a websocket stream to the [`Connection`] contract.
pub struct WsConnection<S> {
    stream: WebSocketStream<S>,
}

impl<S> WsConnection<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Writer = WsWriter<S>;
    type Reader = WsReader<S>;

    fn split(self) -> (WsWriter<S>, WsReader<S>) {
        let (sink, stream) = self.stream.split();
        (WsWriter { sink }, WsReader { stream })
    }
}

pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text),
            Frame::Binary(bytes) => WsMessage::Binary(bytes),
        };
        self.sink.send(msg).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        use tokio_tungstenite::tungstenite::Error;

        match self.sink.close().await {
            Ok(()) | Err(Error::ConnectionClosed) | Err(Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn receive(&mut self) -> Result<Frame> {
        loop {
            match self.stream.next().await {
                None => return Err(TvError::transport("websocket stream ended")),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(WsMessage::Text(text))) => return Ok(Frame::Text(text)),
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(Frame::Binary(bytes)),
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(TvError::transport(match frame {
                        Some(frame) => format!("closed by peer: {} {}", u16::from(frame.code), frame.reason),
                        None => "closed by peer".to_string(),
                    }));
                }
                // Control frames are answered by tungstenite itself.
                Some(Ok(_)) => continue,
            }
        }
    }
}

/// Builds websocket URLs for a device and connects to them.
#[derive(Debug, Clone)]
pub struct Dialer {
    /// Use `ws://host:3000` instead of `wss://host:3001`.
    pub disable_tls: bool,
    /// Bound on connect plus handshakes.
    pub handshake_timeout: Duration,
}

impl Default for Dialer {
    fn default() -> Self {
        Self {
            disable_tls: false,
            handshake_timeout: DialConfig::HANDSHAKE_TIMEOUT,
        }
    }
}

impl Dialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.disable_tls = !enabled;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Resolve an address into a websocket URL.
    ///
    /// A full `ws://` or `wss://` URL is used as is; a bare host gets the
    /// scheme and port matching the TLS setting.
    pub fn url_for(&self, address: &str) -> Result<Url> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TvError::InvalidAddress("empty address".into()));
        }

        let raw = if address.contains("://") {
            address.to_string()
        } else if self.disable_tls {
            format!("ws://{}:{}", address, DialConfig::PLAIN_PORT)
        } else {
            format!("wss://{}:{}", address, DialConfig::TLS_PORT)
        };

        let url = Url::parse(&raw)
            .map_err(|e| TvError::InvalidAddress(format!("{}: {}", address, e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(TvError::InvalidAddress(format!(
                "unsupported scheme {:?} in {}",
                other, address
            ))),
        }
    }

    /// Dial the device's main API socket.
    pub async fn dial(&self, address: &str) -> Result<TvConnection> {
        let url = self.url_for(address)?;
        self.dial_url(&url).await
    }

    /// Dial an explicit websocket URL.
    pub async fn dial_url(&self, url: &Url) -> Result<TvConnection> {
        let connector = match url.scheme() {
            "wss" => {
                let tls = native_tls::TlsConnector::builder()
                    // The device presents a self-signed certificate.
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(|e| TvError::transport(format!("TLS setup failed: {}", e)))?;
                Some(Connector::NativeTls(tls))
            }
            _ => Some(Connector::Plain),
        };

        debug!("Dialing {}", url);
        let (stream, _response) = tokio::time::timeout(
            self.handshake_timeout,
            tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, false, connector),
        )
        .await
        .map_err(|_| TvError::Timeout(self.handshake_timeout))??;

        info!("Connected to {}", url);
        Ok(WsConnection::new(stream))
    }
}
