//! WebSocket push-channel connector.
//!
//! Opens `ws://` / `wss://` connections to the Brigade server's `/ws`
//! endpoint, performs the `Hello` / `Connected` handshake, and exchanges
//! postcard-encoded binary frames.

use std::time::Duration;

use brigade_proto::codec::{self, DEFAULT_MAX_FRAME_SIZE};
use brigade_proto::push::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connector, PushLink, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default timeout for opening the WebSocket.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the `Connected` acknowledgment.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Production [`Connector`] backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
    handshake_timeout: Duration,
    max_frame_size: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT)
    }
}

impl WsConnector {
    /// Creates a connector with explicit timeouts.
    #[must_use]
    pub const fn new(connect_timeout: Duration, handshake_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            handshake_timeout,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    /// Connect to `endpoint` and open a session for `user_id`.
    ///
    /// 1. Establishes the WebSocket (connect timeout)
    /// 2. Sends `Hello { user_id }`
    /// 3. Waits for `Connected` (handshake timeout)
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if either step times out.
    /// - [`TransportError::Unreachable`] if nothing listens at `endpoint`.
    /// - [`TransportError::Handshake`] if the server answers with something
    ///   other than `Connected`.
    async fn connect(&self, endpoint: &str, user_id: &str) -> Result<WsLink, TransportError> {
        let connecting = connect_async(endpoint);
        let (mut stream, _response) = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| {
                tracing::warn!(url = endpoint, "push connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = endpoint, err = %e, "push connect failed");
                map_ws_connect_error(endpoint, e)
            })?;

        let hello = codec::encode(&ClientEvent::Hello {
            user_id: user_id.to_string(),
        })?;
        stream
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|e| {
                TransportError::Io(std::io::Error::other(format!("failed to send hello: {e}")))
            })?;

        let ack = tokio::time::timeout(self.handshake_timeout, stream.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = endpoint, "push handshake timed out");
                TransportError::Timeout
            })?;

        match ack {
            Some(Ok(Message::Binary(data))) => match codec::decode::<ServerEvent>(&data) {
                Ok(ServerEvent::Connected { user_id: confirmed }) => {
                    tracing::info!(user_id = %confirmed, url = endpoint, "push channel connected");
                }
                Ok(ServerEvent::Error { reason }) => {
                    return Err(TransportError::Handshake(reason));
                }
                Ok(other) => {
                    return Err(TransportError::Handshake(format!(
                        "expected connected, got {}",
                        other.name()
                    )));
                }
                Err(e) => {
                    return Err(TransportError::Handshake(format!("malformed ack: {e}")));
                }
            },
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
            Some(Ok(_)) => {
                return Err(TransportError::Handshake(
                    "unexpected non-binary frame".to_string(),
                ));
            }
            Some(Err(e)) => {
                return Err(TransportError::Io(std::io::Error::other(format!(
                    "WebSocket error during handshake: {e}"
                ))));
            }
        }

        Ok(WsLink {
            stream,
            max_frame_size: self.max_frame_size,
        })
    }
}

/// An open WebSocket push channel.
pub struct WsLink {
    stream: WsStream,
    max_frame_size: usize,
}

impl PushLink for WsLink {
    async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError> {
        let bytes = codec::encode(event)?;
        self.stream
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "push send failed");
                TransportError::ConnectionClosed
            })
    }

    async fn recv(&mut self) -> Result<ServerEvent, TransportError> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Binary(data)) => {
                    match codec::decode_bounded::<ServerEvent>(&data, self.max_frame_size) {
                        Ok(event) => return Ok(event),
                        Err(e) => tracing::warn!(err = %e, "malformed push frame, skipping"),
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::info!("push channel closed by server");
                    return Err(TransportError::ConnectionClosed);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(err = %e, "push channel read error");
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
        Err(TransportError::ConnectionClosed)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(err = %e, "push close handshake failed");
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(
    endpoint: &str,
    err: tokio_tungstenite::tungstenite::Error,
) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(endpoint.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "push HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "push connection error: {other}"
        ))),
    }
}
