//! GraphQL subscriptions over one shared WebSocket.
//!
//! The [`SubscriptionManager`] multiplexes any number of subscriptions on a
//! single connection to the Unraid API and keeps them alive across network
//! failures. [`DiagnosticProbe`] checks the endpoint on a separate, throwaway
//! connection.
//!
//! Connection lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Streaming
//!                     ^                            |
//!                     +-------- Degraded <---------+
//! ```
//!
//! A dropped connection marks every live subscription `Stale`; after the
//! backoff delay the driver reconnects and re-sends each one under its
//! original id.

mod backoff;
mod connection;
mod diagnose;
mod manager;
mod protocol;

pub use backoff::Backoff;
pub use diagnose::{DEFAULT_PROBE_DOCUMENT, DiagnosticProbe, DiagnosticReport};
pub use manager::{
    ConnectionState, ManagerStatus, SubscriptionEvent, SubscriptionHandle, SubscriptionHandler,
    SubscriptionInfo, SubscriptionManager, SubscriptionState,
};
pub use protocol::WireProtocol;
