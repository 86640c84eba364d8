use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, trace};

/// One open socket - pure transport, no stream bookkeeping
#[async_trait]
pub trait WsSession: Send + 'static {
    /// Receive the next data or close frame.
    ///
    /// Ping/pong frames are handled at the transport level and never surface.
    /// `None` means the connection is gone.
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    /// Complete the close handshake
    async fn close(&mut self) -> Result<(), ExchangeError>;

    /// Drop the connection without a close handshake
    fn abort(&mut self);
}

/// Performs the socket handshake for a URL
#[async_trait]
pub trait WsConnector: Send + Sync + 'static {
    type Session: WsSession;

    async fn connect(&self, url: &str) -> Result<Self::Session, ExchangeError>;
}

type TlsWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tungstenite-based socket
pub struct TungsteniteWs {
    url: String,
    stream: Option<TlsWebSocket>,
}

impl TungsteniteWs {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[async_trait]
impl WsSession for TungsteniteWs {
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                // tungstenite queues the pong reply itself and flushes it on the next read
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    trace!(url = %self.url, "Control frame");
                }
                Some(Ok(message)) => return Some(Ok(message)),
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.stream = None;
                    return None;
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Some(Err(ExchangeError::WebSocketError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(mut stream) = self.stream.take() {
            match stream.close(None).await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
                Err(e) => debug!(url = %self.url, "Close handshake failed: {}", e),
            }
            // Drain until the peer acknowledges
            while let Some(Ok(_)) = stream.next().await {}
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.stream = None;
    }
}

/// Opens `TungsteniteWs` sockets with a handshake timeout
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    exchange_name: String,
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(exchange_name: String, connect_timeout: Duration) -> Self {
        Self {
            exchange_name,
            connect_timeout,
        }
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    type Session = TungsteniteWs;

    #[instrument(skip(self, url), fields(exchange = %self.exchange_name))]
    async fn connect(&self, url: &str) -> Result<TungsteniteWs, ExchangeError> {
        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout(format!(
                    "WebSocket handshake timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        Ok(TungsteniteWs {
            url: url.to_string(),
            stream: Some(stream),
        })
    }
}
