//! GraphQL transport core for the Unraid MCP server.
//!
//! Everything between the MCP tool layer and the Unraid GraphQL API:
//!
//! - **Queries and mutations** over HTTP, each bounded by the read timeout of
//!   its [`OperationClass`]
//! - **Subscriptions** multiplexed over one WebSocket that reconnects with
//!   backoff and re-subscribes what was lost
//! - **Diagnostics** for the subscription endpoint on a throwaway connection
//! - **Error normalization**: every failure becomes a [`NormalizedError`]
//!   with a kind, the original message, and the HTTP status where there is one
//!
//! # Quick start
//!
//! ```ignore
//! use unraid_mcp_transport::{
//!     Operation, OperationClass, SubscriptionEvent, Transport, TransportConfig,
//! };
//!
//! let config = TransportConfig::from_env()?;
//! unraid_mcp_transport::logging::init(config.log_level());
//! let transport = Transport::new(config)?;
//!
//! // Interactive call
//! let info = transport
//!     .execute(&Operation::query("{ info { os { hostname uptime } } }"), OperationClass::Standard)
//!     .await?;
//!
//! // Disk enumeration can take a minute on a busy array
//! let disks = transport
//!     .execute(&Operation::query("{ disks { id name temperature } }"), OperationClass::LongRunning)
//!     .await?;
//!
//! // Live updates
//! let handle = transport.subscribe(
//!     Operation::subscription("subscription { arraySubscription { state } }"),
//!     |event: SubscriptionEvent| println!("{event:?}"),
//! )?;
//! ```
//!
//! # Errors
//!
//! ```ignore
//! match transport.execute(&op, OperationClass::Standard).await {
//!     Ok(data) => { /* ... */ }
//!     Err(e) if e.is_timeout() => { /* try again later, or use LongRunning */ }
//!     Err(e) => match e.kind() {
//!         ErrorKind::Http => eprintln!("status {:?}: {}", e.status_code(), e.message()),
//!         ErrorKind::GraphQL => eprintln!("rejected at {:?}: {}", e.path(), e.message()),
//!         _ => eprintln!("{e}"),
//!     },
//! }
//! ```

pub mod config;
mod error;
pub mod graphql;
pub mod logging;
pub mod normalize;
pub mod subscription;
pub mod tls;
mod transport;

pub use config::{
    ConfigError, ControlSurface, McpTransport, ReconnectConfig, TimeoutPolicy, TransportConfig,
    TransportConfigBuilder,
};
pub use error::{ErrorKind, NetworkFailure, NormalizedError, Result};
pub use graphql::{
    GraphQLError, GraphQLResponse, Operation, OperationClass, OperationType, QueryExecutor,
};
pub use subscription::{
    ConnectionState, DiagnosticProbe, DiagnosticReport, ManagerStatus, SubscriptionEvent,
    SubscriptionHandle, SubscriptionHandler, SubscriptionManager, SubscriptionState, WireProtocol,
};
pub use tls::TlsVerification;
pub use transport::Transport;
