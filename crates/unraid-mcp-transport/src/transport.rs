//! The single entry point handed to the tool layer.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::config::{ConfigError, TransportConfig};
use crate::error::Result;
use crate::graphql::{Operation, OperationClass, QueryExecutor};
use crate::subscription::{
    ConnectionState, DiagnosticProbe, DiagnosticReport, ManagerStatus, SubscriptionHandle,
    SubscriptionHandler, SubscriptionManager, SubscriptionState,
};

/// Query executor, subscription manager, and diagnostic probe built from
/// one configuration.
///
/// # Example
///
/// ```ignore
/// let transport = Transport::new(TransportConfig::from_env()?)?;
///
/// let vms = transport
///     .execute(&Operation::query("{ vms { domain { name state } } }"), OperationClass::Standard)
///     .await?;
///
/// let report = transport.diagnose().await;
/// println!("{report}");
///
/// transport.shutdown().await;
/// ```
#[derive(Debug)]
pub struct Transport {
    config: TransportConfig,
    executor: QueryExecutor,
    subscriptions: SubscriptionManager,
    probe: DiagnosticProbe,
}

impl Transport {
    /// Build every component. Must be called within a Tokio runtime.
    pub fn new(config: TransportConfig) -> std::result::Result<Self, ConfigError> {
        let executor = QueryExecutor::new(&config)?;
        let subscriptions = SubscriptionManager::new(&config)?;
        let probe = DiagnosticProbe::new(&config)?;
        Ok(Self {
            config,
            executor,
            subscriptions,
            probe,
        })
    }

    /// The configuration everything was built from.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The query executor, for callers that want to hold on to it.
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// The subscription manager.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Execute a query or mutation; see [`QueryExecutor::execute`].
    pub async fn execute(&self, operation: &Operation, class: OperationClass) -> Result<Value> {
        self.executor.execute(operation, class).await
    }

    /// Execute and decode; see [`QueryExecutor::execute_as`].
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        operation: &Operation,
        class: OperationClass,
    ) -> Result<T> {
        self.executor.execute_as(operation, class).await
    }

    /// Register a subscription; see [`SubscriptionManager::subscribe`].
    pub fn subscribe(
        &self,
        operation: Operation,
        handler: impl SubscriptionHandler,
    ) -> Result<SubscriptionHandle> {
        self.subscriptions.subscribe(operation, handler)
    }

    /// Stop a subscription.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.subscriptions.unsubscribe(handle)
    }

    /// State of one subscription.
    pub fn subscription_state(&self, handle: &SubscriptionHandle) -> Option<SubscriptionState> {
        self.subscriptions.subscription_state(handle)
    }

    /// Latest data delivered to a subscription.
    pub fn latest(&self, handle: &SubscriptionHandle) -> Option<Value> {
        self.subscriptions.latest(handle)
    }

    /// Snapshot of the subscription connection.
    pub fn status(&self) -> ManagerStatus {
        self.subscriptions.status()
    }

    /// Watch subscription connection state.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.subscriptions.state_changes()
    }

    /// Probe the subscription endpoint on a separate connection.
    pub async fn diagnose(&self) -> DiagnosticReport {
        self.probe.run().await
    }

    /// Probe with a caller-chosen subscription and window.
    pub async fn diagnose_with(&self, document: &str, window: Duration) -> DiagnosticReport {
        self.probe
            .clone()
            .document(document)
            .window(window)
            .run()
            .await
    }

    /// Shut down the subscription manager. In-flight queries are unaffected.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await
    }
}
