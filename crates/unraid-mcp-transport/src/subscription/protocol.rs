//! Wire frames for GraphQL over WebSocket.
//!
//! Two sub-protocols are spoken:
//!
//! - `graphql-transport-ws`, the current one
//!   (<https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md>)
//! - `graphql-ws`, the legacy subscriptions-transport-ws protocol that
//!   older Unraid API releases still negotiate
//!
//! The client offers both during the upgrade and follows the server's
//! choice. Incoming frames of either dialect decode into the same
//! [`ServerMessage`], so the driver does not care which one is in use.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NormalizedError;
use crate::graphql::Operation;
use crate::normalize;

/// A negotiated GraphQL-over-WebSocket sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireProtocol {
    /// `graphql-transport-ws`.
    TransportWs,
    /// Legacy `graphql-ws` (subscriptions-transport-ws).
    LegacyWs,
}

impl WireProtocol {
    /// The value offered in `Sec-WebSocket-Protocol`, most preferred first.
    pub(crate) const OFFER: &'static str = "graphql-transport-ws, graphql-ws";

    /// The `Sec-WebSocket-Protocol` token.
    pub fn subprotocol(self) -> &'static str {
        match self {
            Self::TransportWs => "graphql-transport-ws",
            Self::LegacyWs => "graphql-ws",
        }
    }

    /// Match a token selected by the server.
    pub fn from_subprotocol(token: &str) -> Option<Self> {
        match token.trim() {
            "graphql-transport-ws" => Some(Self::TransportWs),
            "graphql-ws" => Some(Self::LegacyWs),
            _ => None,
        }
    }

    /// Whether the client sends application-level pings.
    ///
    /// The legacy protocol has no client ping; the server sends `ka` instead.
    pub fn has_client_ping(self) -> bool {
        matches!(self, Self::TransportWs)
    }

    pub(crate) fn connection_init(self, payload: Option<Value>) -> String {
        encode(&ClientMessage::ConnectionInit { payload })
    }

    pub(crate) fn subscribe(self, id: &str, operation: &Operation) -> String {
        match self {
            Self::TransportWs => encode(&ClientMessage::Subscribe {
                id,
                payload: operation,
            }),
            Self::LegacyWs => encode(&ClientMessage::Start {
                id,
                payload: operation,
            }),
        }
    }

    pub(crate) fn complete(self, id: &str) -> String {
        match self {
            Self::TransportWs => encode(&ClientMessage::Complete { id }),
            Self::LegacyWs => encode(&ClientMessage::Stop { id }),
        }
    }

    pub(crate) fn ping(self) -> Option<String> {
        self.has_client_ping()
            .then(|| encode(&ClientMessage::Ping { payload: None }))
    }

    pub(crate) fn pong(self, payload: Option<Value>) -> Option<String> {
        self.has_client_ping()
            .then(|| encode(&ClientMessage::Pong { payload }))
    }

    /// Polite goodbye before closing; only the legacy protocol has one.
    pub(crate) fn terminate(self) -> Option<String> {
        matches!(self, Self::LegacyWs).then(|| encode(&ClientMessage::ConnectionTerminate))
    }
}

impl fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subprotocol())
    }
}

/// Client -> server frames, both dialects.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: &'a str,
        payload: &'a Operation,
    },
    Start {
        id: &'a str,
        payload: &'a Operation,
    },
    Complete {
        id: &'a str,
    },
    Stop {
        id: &'a str,
    },
    ConnectionTerminate,
}

fn encode(message: &ClientMessage<'_>) -> String {
    // Every field is a string, a JSON value, or a serializable operation.
    serde_json::to_string(message).unwrap_or_default()
}

/// Server -> client frames, both dialects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerMessage {
    ConnectionAck {
        #[serde(default)]
        payload: Option<Value>,
    },
    ConnectionError {
        #[serde(default)]
        payload: Option<Value>,
    },
    Ping {
        #[serde(default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Legacy keep-alive.
    Ka,
    /// `graphql-transport-ws` result.
    Next {
        id: String,
        payload: Value,
    },
    /// Legacy result.
    Data {
        id: String,
        payload: Value,
    },
    Error {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Complete {
        id: String,
    },
}

impl ServerMessage {
    /// Decode one text frame.
    pub(crate) fn decode(text: &str) -> Result<Self, NormalizedError> {
        serde_json::from_str(text).map_err(|e| {
            normalize::protocol(format!("unrecognized frame: {e}")).with_detail(text.to_string())
        })
    }
}
