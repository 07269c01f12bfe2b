//! One-shot connectivity probe for the subscription endpoint.

use std::fmt;
use std::time::{Duration, Instant};

use super::connection::{ConnectSettings, Connection, Incoming};
use super::protocol::{ServerMessage, WireProtocol};
use crate::config::{ConfigError, TransportConfig};
use crate::error::NormalizedError;
use crate::graphql::Operation;
use crate::logging::DIAGNOSE_TARGET;
use crate::normalize;

/// Subscription sent by the probe unless replaced.
pub const DEFAULT_PROBE_DOCUMENT: &str = "subscription { arraySubscription { state } }";

const PROBE_ID: &str = "diagnose";

/// Outcome of [`DiagnosticProbe::run`].
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    /// The endpoint acknowledged the handshake and accepted the probe.
    pub reachable: bool,
    /// Human-readable summary.
    pub detail: String,
    /// The negotiated sub-protocol, once upgraded.
    pub protocol: Option<WireProtocol>,
    /// `connection_ack` was received.
    pub acknowledged: bool,
    /// A result frame arrived within the probe window.
    pub received_event: bool,
    /// Wall time of the whole probe.
    pub elapsed: Duration,
    /// The failure, if the probe did not succeed.
    pub error: Option<NormalizedError>,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.reachable { "reachable" } else { "unreachable" };
        write!(f, "{verdict} in {}ms: {}", self.elapsed.as_millis(), self.detail)
    }
}

/// Opens its own short-lived connection, independent of any manager.
///
/// The probe never hangs. Its phases (connect, handshake, probe window,
/// goodbye) all share one deadline of [`bound`](DiagnosticProbe::bound).
#[derive(Clone)]
pub struct DiagnosticProbe {
    settings: ConnectSettings,
    probe: Operation,
    window: Duration,
}

impl DiagnosticProbe {
    /// Create a probe from resolved configuration.
    pub fn new(config: &TransportConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            settings: ConnectSettings::from_config(config)?,
            probe: Operation::subscription(DEFAULT_PROBE_DOCUMENT),
            window: config.timeouts().probe_window,
        })
    }

    /// Probe with a different subscription document.
    pub fn document(mut self, document: impl Into<String>) -> Self {
        self.probe = Operation::subscription(document);
        self
    }

    /// Wait this long for a first event.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Deadline for the whole of [`run`](Self::run).
    pub fn bound(&self) -> Duration {
        self.settings.connect_timeout
            + self.settings.handshake_timeout
            + self.window
            + self.settings.write_timeout
    }

    /// Run the probe.
    ///
    /// Never fails: every outcome, including configuration-level
    /// rejections by the server, is described by the report.
    pub async fn run(&self) -> DiagnosticReport {
        self.run_within(self.bound()).await
    }

    async fn run_within(&self, limit: Duration) -> DiagnosticReport {
        let started = Instant::now();
        let mut report = DiagnosticReport {
            reachable: false,
            detail: String::new(),
            protocol: None,
            acknowledged: false,
            received_event: false,
            elapsed: Duration::ZERO,
            error: None,
        };
        let mut conn = None;

        let exchanged = tokio::time::timeout(limit, self.exchange(&mut report, &mut conn)).await;
        let outcome = exchanged.unwrap_or_else(|_| {
            Err(if report.acknowledged {
                normalize::connection_lost(format!(
                    "probe did not finish within {}ms",
                    limit.as_millis()
                ))
            } else {
                normalize::handshake_timeout(limit)
            })
        });

        if let Some(mut conn) = conn {
            let remaining = limit.saturating_sub(started.elapsed());
            let acknowledged = report.acknowledged;
            let goodbye = async move {
                if acknowledged {
                    let complete = conn.protocol().complete(PROBE_ID);
                    let _ = conn.send(complete).await;
                }
                conn.close().await;
            };
            let _ = tokio::time::timeout(remaining, goodbye).await;
        }
        finish(report, started, outcome)
    }

    /// Connect, handshake and subscribe, leaving the connection in `slot`
    /// for the caller to close.
    async fn exchange(
        &self,
        report: &mut DiagnosticReport,
        slot: &mut Option<Connection>,
    ) -> Result<(), NormalizedError> {
        let conn = slot.insert(Connection::connect(&self.settings).await?);
        report.protocol = Some(conn.protocol());

        conn.handshake(&self.settings).await?;
        report.acknowledged = true;

        let subscribe = conn.protocol().subscribe(PROBE_ID, &self.probe);
        conn.send(subscribe).await?;
        // Quiet subscriptions are normal; the ack already proved reachability.
        if let Ok(received) = tokio::time::timeout(self.window, watch_probe(conn)).await {
            report.received_event = received?;
        }
        Ok(())
    }
}

impl fmt::Debug for DiagnosticProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticProbe")
            .field("url", &self.settings.url.as_str())
            .field("document", &self.probe.document())
            .field("window", &self.window)
            .finish()
    }
}

/// Read until the probe yields a result or finishes. `Ok(true)` on a result.
async fn watch_probe(conn: &mut Connection) -> Result<bool, NormalizedError> {
    loop {
        match conn.recv().await {
            Incoming::Frame(ServerMessage::Next { id, .. } | ServerMessage::Data { id, .. })
                if id == PROBE_ID =>
            {
                return Ok(true);
            }
            Incoming::Frame(ServerMessage::Error { id, payload }) if id == PROBE_ID => {
                return Err(normalize::from_subscription_error(&payload));
            }
            Incoming::Frame(ServerMessage::Complete { id }) if id == PROBE_ID => return Ok(false),
            Incoming::Frame(ServerMessage::Ping { payload }) => {
                if let Some(pong) = conn.protocol().pong(payload) {
                    conn.send(pong).await?;
                }
            }
            Incoming::Frame(ServerMessage::ConnectionError { payload }) => {
                return Err(normalize::from_connection_error(payload.as_ref()));
            }
            Incoming::Closed(e) => return Err(e),
            Incoming::Frame(_) | Incoming::Malformed(_) | Incoming::Other => {}
        }
    }
}

fn finish(
    mut report: DiagnosticReport,
    started: Instant,
    outcome: Result<(), NormalizedError>,
) -> DiagnosticReport {
    report.elapsed = started.elapsed();
    match outcome {
        Ok(()) => {
            report.reachable = true;
            report.detail = if report.received_event {
                "handshake acknowledged, probe subscription delivered an event".into()
            } else {
                "handshake acknowledged, probe subscription accepted".into()
            };
            tracing::info!(
                target: DIAGNOSE_TARGET,
                elapsed_ms = report.elapsed.as_millis() as u64,
                received_event = report.received_event,
                "subscription endpoint reachable"
            );
        }
        Err(e) => {
            report.detail = e.to_string();
            tracing::warn!(
                target: DIAGNOSE_TARGET,
                elapsed_ms = report.elapsed.as_millis() as u64,
                acknowledged = report.acknowledged,
                kind = %e.kind(),
                "subscription endpoint unreachable: {e}"
            );
            report.error = Some(e);
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_bound_sums_phases() {
        let config = TransportConfig::builder("http://127.0.0.1:9/graphql")
            .connect_timeout(Duration::from_secs(1))
            .handshake_timeout(Duration::from_secs(2))
            .probe_window(Duration::from_secs(3))
            .build()
            .unwrap();
        let probe = DiagnosticProbe::new(&config).unwrap();
        assert_eq!(probe.bound(), Duration::from_secs(1 + 2 + 3 + 10));
    }

    #[tokio::test]
    async fn test_deadline_covers_whole_run() {
        // Upgrades, then never acknowledges or reads again.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            use tokio_tungstenite::tungstenite::handshake::server::{
                ErrorResponse, Request, Response,
            };
            let echo = |_: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                resp.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    http::HeaderValue::from_static("graphql-transport-ws"),
                );
                Ok(resp)
            };
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_hdr_async(stream, echo).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let config = TransportConfig::builder(format!("http://127.0.0.1:{port}/graphql"))
            .handshake_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let probe = DiagnosticProbe::new(&config).unwrap();

        let limit = Duration::from_millis(400);
        let report = probe.run_within(limit).await;

        assert!(!report.reachable);
        assert!(!report.acknowledged);
        assert_eq!(report.error.as_ref().map(|e| e.kind()), Some(ErrorKind::HandshakeTimeout));
        assert!(report.elapsed >= limit);
        assert!(report.elapsed < limit + Duration::from_millis(500), "{report}");
    }

    #[tokio::test]
    async fn test_refused_is_unreachable() {
        // Port 9 (discard) is closed on any sane test host.
        let config = TransportConfig::builder("http://127.0.0.1:9/graphql")
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let report = DiagnosticProbe::new(&config).unwrap().run().await;

        assert!(!report.reachable);
        assert!(!report.acknowledged);
        assert!(report.protocol.is_none());
        let kind = report.error.as_ref().map(|e| e.kind());
        assert!(matches!(kind, Some(ErrorKind::Network(_))));
    }
}
