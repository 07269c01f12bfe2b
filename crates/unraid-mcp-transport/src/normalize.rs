//! Mapping from raw transport failures to [`NormalizedError`].
//!
//! One function per failure source. All of them are pure: they only read
//! their input, and they always carry the original status code and message
//! text through, since callers build user-visible text from these fields.

use std::error::Error as StdError;
use std::time::Duration;

use serde_json::Value;
use tokio_tungstenite::tungstenite;

use crate::error::{ErrorKind, NetworkFailure, NormalizedError};
use crate::graphql::GraphQLError;

/// Longest response-body excerpt kept in an `Http` error message.
pub const BODY_EXCERPT_LIMIT: usize = 512;

/// Map a `reqwest` failure from the query path.
pub fn from_reqwest(err: reqwest::Error) -> NormalizedError {
    let chain = source_chain(&err);
    if err.is_timeout() {
        NormalizedError::new(
            ErrorKind::Network(NetworkFailure::Timeout),
            "no response before the timeout expired",
        )
        .with_detail(chain)
    } else if err.is_connect() {
        NormalizedError::new(ErrorKind::Network(NetworkFailure::Unreachable), chain.clone())
            .with_detail(chain)
    } else if let Some(status) = err.status() {
        from_status(status.as_u16(), "")
    } else if err.is_decode() || err.is_body() {
        NormalizedError::new(ErrorKind::Protocol, "failed to read response body").with_detail(chain)
    } else {
        NormalizedError::new(ErrorKind::Network(NetworkFailure::Unreachable), chain.clone())
            .with_detail(chain)
    }
}

/// Map a non-2xx HTTP status and its body.
pub fn from_status(status: u16, body: &str) -> NormalizedError {
    let body = body.trim();
    let message = if body.is_empty() {
        http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status")
            .to_string()
    } else {
        excerpt(body, BODY_EXCERPT_LIMIT)
    };
    NormalizedError::new(ErrorKind::Http, message).with_status(status)
}

/// Map the `errors` array of a 2xx GraphQL response.
///
/// The first error supplies message and path; any further messages are kept
/// in the detail so nothing the server said is dropped.
pub fn from_graphql_errors(errors: &[GraphQLError]) -> NormalizedError {
    let Some(first) = errors.first() else {
        return NormalizedError::new(ErrorKind::GraphQL, "unknown GraphQL error");
    };
    let err = NormalizedError::new(ErrorKind::GraphQL, first.message.clone())
        .with_path(first.path_string());
    if errors.len() > 1 {
        let all = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        err.with_detail(all)
    } else {
        err
    }
}

/// A 2xx response that carried neither errors nor data.
pub fn missing_data() -> NormalizedError {
    NormalizedError::new(ErrorKind::GraphQL, "response contained no data")
}

/// Response data that does not have the shape the caller asked for.
pub fn from_decode(err: serde_json::Error) -> NormalizedError {
    NormalizedError::new(
        ErrorKind::GraphQL,
        format!("unexpected response shape: {err}"),
    )
}

/// A 2xx body that is not a GraphQL response envelope at all.
pub fn from_body(err: serde_json::Error, body: &str) -> NormalizedError {
    NormalizedError::new(ErrorKind::Protocol, format!("malformed GraphQL response: {err}"))
        .with_detail(excerpt(body, BODY_EXCERPT_LIMIT))
}

/// Map a WebSocket failure while establishing the connection.
pub fn from_websocket_connect(err: &tungstenite::Error) -> NormalizedError {
    match err {
        tungstenite::Error::Http(response) => {
            let body = response
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            from_status(response.status().as_u16(), &body)
                .with_detail("WebSocket upgrade rejected")
        }
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            NormalizedError::new(ErrorKind::Network(NetworkFailure::Timeout), io.to_string())
        }
        tungstenite::Error::Protocol(p) => {
            NormalizedError::new(ErrorKind::Protocol, p.to_string()).with_detail(source_chain(err))
        }
        other => NormalizedError::new(
            ErrorKind::Network(NetworkFailure::Unreachable),
            other.to_string(),
        )
        .with_detail(source_chain(other)),
    }
}

/// Map a WebSocket failure on an established connection.
pub fn from_websocket(err: &tungstenite::Error) -> NormalizedError {
    match err {
        tungstenite::Error::Protocol(
            p @ tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ) => NormalizedError::new(ErrorKind::ConnectionLost, p.to_string()),
        tungstenite::Error::Protocol(p) => NormalizedError::new(ErrorKind::Protocol, p.to_string()),
        other => NormalizedError::new(ErrorKind::ConnectionLost, other.to_string())
            .with_detail(source_chain(other)),
    }
}

/// The connect phase did not finish within `timeout`.
pub fn connect_timeout(timeout: Duration) -> NormalizedError {
    NormalizedError::new(
        ErrorKind::Network(NetworkFailure::Timeout),
        format!("connection not established within {}s", timeout.as_secs_f32()),
    )
}

/// No `connection_ack` within `timeout`.
pub fn handshake_timeout(timeout: Duration) -> NormalizedError {
    NormalizedError::new(
        ErrorKind::HandshakeTimeout,
        format!("no connection_ack within {}s", timeout.as_secs_f32()),
    )
}

/// The connection ended; `reason` says how.
pub fn connection_lost(reason: impl Into<String>) -> NormalizedError {
    NormalizedError::new(ErrorKind::ConnectionLost, reason)
}

/// A frame that could not be understood.
pub fn protocol(message: impl Into<String>) -> NormalizedError {
    NormalizedError::new(ErrorKind::Protocol, message)
}

/// Map a `connection_error` frame payload.
pub fn from_connection_error(payload: Option<&Value>) -> NormalizedError {
    let message = payload
        .and_then(|p| p.get("message").and_then(Value::as_str).map(str::to_string))
        .or_else(|| payload.and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "server rejected connection_init".to_string());
    let err = NormalizedError::new(ErrorKind::Protocol, message);
    match payload {
        Some(p) => err.with_detail(p.to_string()),
        None => err,
    }
}

/// Map the payload of a per-subscription `error` frame.
///
/// `graphql-transport-ws` sends an array of GraphQL errors; the legacy
/// protocol sends a single error object.
pub fn from_subscription_error(payload: &Value) -> NormalizedError {
    let errors: Vec<GraphQLError> = match payload {
        Value::Array(_) => serde_json::from_value(payload.clone()).unwrap_or_default(),
        Value::Object(_) => serde_json::from_value(payload.clone())
            .map(|e| vec![e])
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    if errors.is_empty() {
        NormalizedError::new(ErrorKind::GraphQL, "subscription rejected")
            .with_detail(payload.to_string())
    } else {
        from_graphql_errors(&errors)
    }
}

fn source_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = inner.source();
    }
    out
}

fn excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::PathSegment;
    use serde_json::json;

    #[test]
    fn test_status_keeps_body_text() {
        let err = from_status(401, "{\"error\":\"Invalid API key\"}");
        assert_eq!(err.kind(), ErrorKind::Http);
        assert_eq!(err.status_code(), Some(401));
        assert!(err.message().contains("Invalid API key"));
    }

    #[test]
    fn test_status_without_body_uses_reason() {
        let err = from_status(502, "  ");
        assert_eq!(err.message(), "Bad Gateway");
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(BODY_EXCERPT_LIMIT * 2);
        let err = from_status(500, &body);
        assert_eq!(err.message().len(), BODY_EXCERPT_LIMIT + 3);
    }

    #[test]
    fn test_graphql_errors_keep_first_and_rest() {
        let errors = vec![
            GraphQLError {
                message: "Cannot query field \"foo\"".into(),
                locations: vec![],
                path: Some(vec![PathSegment::Field("vms".into())]),
                extensions: None,
            },
            GraphQLError {
                message: "Second".into(),
                locations: vec![],
                path: None,
                extensions: None,
            },
        ];
        let err = from_graphql_errors(&errors);
        assert_eq!(err.message(), "Cannot query field \"foo\"");
        assert_eq!(err.path(), Some("vms"));
        assert!(err.detail().unwrap().contains("Second"));
    }

    #[test]
    fn test_subscription_error_shapes() {
        let array = from_subscription_error(&json!([{"message": "nope"}]));
        assert_eq!(array.kind(), ErrorKind::GraphQL);
        assert_eq!(array.message(), "nope");

        let object = from_subscription_error(&json!({"message": "legacy nope"}));
        assert_eq!(object.message(), "legacy nope");

        let junk = from_subscription_error(&json!(42));
        assert_eq!(junk.message(), "subscription rejected");
    }

    #[test]
    fn test_connection_error_payload() {
        let err = from_connection_error(Some(&json!({"message": "Unauthorized"})));
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.message(), "Unauthorized");

        let err = from_connection_error(None);
        assert_eq!(err.message(), "server rejected connection_init");
    }

    #[test]
    fn test_abrupt_reset_is_connection_lost() {
        let reset = tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        );
        assert_eq!(from_websocket(&reset).kind(), ErrorKind::ConnectionLost);

        let garbage = tungstenite::Error::Protocol(tungstenite::error::ProtocolError::NonZeroReservedBits);
        assert_eq!(from_websocket(&garbage).kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_handshake_timeout_kind() {
        let err = handshake_timeout(Duration::from_secs(10));
        assert_eq!(err.kind(), ErrorKind::HandshakeTimeout);
        assert!(err.message().contains("10"));
    }
}
