//! One WebSocket connection: upgrade, handshake, framed I/O.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls::ClientConfig;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::protocol::{ServerMessage, WireProtocol};
use crate::config::{ConfigError, TransportConfig};
use crate::error::{NormalizedError, Result};
use crate::logging::SUBSCRIPTION_TARGET;
use crate::normalize;
use crate::tls;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything needed to open a connection, resolved once from config.
#[derive(Clone)]
pub(crate) struct ConnectSettings {
    pub url: Url,
    pub api_key: Option<String>,
    pub auth_header: String,
    pub tls: Option<Arc<ClientConfig>>,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
}

impl ConnectSettings {
    pub fn from_config(config: &TransportConfig) -> std::result::Result<Self, ConfigError> {
        let url = config.subscription_url().clone();
        let tls = match url.scheme() {
            "wss" => Some(tls::rustls_config(config.tls())?),
            _ => None,
        };
        Ok(Self {
            url,
            api_key: config.api_key().map(str::to_string),
            auth_header: config.auth_header().to_string(),
            tls,
            connect_timeout: config.timeouts().connect,
            handshake_timeout: config.timeouts().handshake,
            write_timeout: config.timeouts().write,
        })
    }

    fn init_payload(&self) -> Option<Value> {
        self.api_key
            .as_ref()
            .map(|key| json!({ "x-api-key": key }))
    }
}

/// What came off the socket.
#[derive(Debug)]
pub(crate) enum Incoming {
    /// A decoded protocol frame.
    Frame(ServerMessage),
    /// A text frame that could not be decoded.
    Malformed(NormalizedError),
    /// A WebSocket-level frame with no protocol meaning (ping, pong, binary).
    Other,
    /// The connection is gone.
    Closed(NormalizedError),
}

/// An upgraded connection, acknowledged once [`handshake`](Self::handshake) succeeds.
pub(crate) struct Connection {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    protocol: WireProtocol,
    write_timeout: Duration,
}

impl Connection {
    /// Open the socket and negotiate the sub-protocol.
    ///
    /// Bounded by the connect timeout.
    pub async fn connect(settings: &ConnectSettings) -> Result<Self> {
        let mut request = settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| normalize::from_websocket_connect(&e))?;
        let headers = request.headers_mut();
        headers.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WireProtocol::OFFER),
        );
        if let Some(ref key) = settings.api_key
            && let (Ok(name), Ok(mut value)) = (
                HeaderName::from_bytes(settings.auth_header.as_bytes()),
                HeaderValue::from_str(key),
            )
        {
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let connector = settings.tls.clone().map(Connector::Rustls);
        let connect =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
        let (ws, response) = tokio::time::timeout(settings.connect_timeout, connect)
            .await
            .map_err(|_| normalize::connect_timeout(settings.connect_timeout))?
            .map_err(|e| normalize::from_websocket_connect(&e))?;

        let protocol = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .and_then(WireProtocol::from_subprotocol)
            .unwrap_or(WireProtocol::TransportWs);

        tracing::debug!(
            target: SUBSCRIPTION_TARGET,
            url = %settings.url,
            %protocol,
            "websocket upgraded"
        );

        let (sink, stream) = ws.split();
        Ok(Self {
            sink,
            stream,
            protocol,
            write_timeout: settings.write_timeout,
        })
    }

    /// Send `connection_init` and wait for `connection_ack`.
    ///
    /// Bounded by the handshake timeout. On failure the connection should
    /// be closed by the caller.
    pub async fn handshake(&mut self, settings: &ConnectSettings) -> Result<()> {
        self.send(self.protocol.connection_init(settings.init_payload()))
            .await?;
        tokio::time::timeout(settings.handshake_timeout, self.await_ack())
            .await
            .map_err(|_| normalize::handshake_timeout(settings.handshake_timeout))?
    }

    async fn await_ack(&mut self) -> Result<()> {
        loop {
            match self.recv().await {
                Incoming::Frame(ServerMessage::ConnectionAck { .. }) => return Ok(()),
                Incoming::Frame(ServerMessage::ConnectionError { payload }) => {
                    return Err(normalize::from_connection_error(payload.as_ref()));
                }
                Incoming::Frame(ServerMessage::Ping { payload }) => {
                    if let Some(pong) = self.protocol.pong(payload) {
                        self.send(pong).await?;
                    }
                }
                Incoming::Frame(other) => {
                    tracing::debug!(
                        target: SUBSCRIPTION_TARGET,
                        frame = ?other,
                        "ignoring frame before connection_ack"
                    );
                }
                Incoming::Malformed(e) => {
                    tracing::warn!(target: SUBSCRIPTION_TARGET, "dropping frame during handshake: {e}");
                }
                Incoming::Other => {}
                Incoming::Closed(e) => return Err(e),
            }
        }
    }

    /// The negotiated sub-protocol.
    pub fn protocol(&self) -> WireProtocol {
        self.protocol
    }

    /// Send one text frame within the write timeout.
    pub async fn send(&mut self, text: String) -> Result<()> {
        match tokio::time::timeout(self.write_timeout, self.sink.send(Message::Text(text.into())))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(normalize::from_websocket(&e)),
            Err(_) => Err(normalize::connection_lost(format!(
                "write not completed within {}s",
                self.write_timeout.as_secs_f32()
            ))),
        }
    }

    /// Wait for the next frame.
    pub async fn recv(&mut self) -> Incoming {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => match ServerMessage::decode(text.as_str()) {
                Ok(frame) => Incoming::Frame(frame),
                Err(e) => Incoming::Malformed(e),
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| {
                        format!(
                            "server closed connection ({}): {}",
                            u16::from(f.code),
                            f.reason.as_str()
                        )
                    })
                    .unwrap_or_else(|| "server closed connection".to_string());
                Incoming::Closed(normalize::connection_lost(reason))
            }
            Some(Ok(_)) => Incoming::Other,
            Some(Err(e)) => Incoming::Closed(normalize::from_websocket(&e)),
            None => Incoming::Closed(normalize::connection_lost("stream ended")),
        }
    }

    /// Say goodbye and close the socket, ignoring failures.
    pub async fn close(mut self) {
        if let Some(bye) = self.protocol.terminate() {
            let _ = self.send(bye).await;
        }
        let _ = tokio::time::timeout(self.write_timeout, self.sink.send(Message::Close(None))).await;
        let _ = tokio::time::timeout(self.write_timeout, self.sink.close()).await;
    }
}
