//! The subscription manager and its driver task.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::backoff::Backoff;
use super::connection::{ConnectSettings, Connection, Incoming};
use super::protocol::{ServerMessage, WireProtocol};
use crate::config::{ConfigError, TransportConfig};
use crate::error::{NormalizedError, Result};
use crate::graphql::{GraphQLResponse, Operation};
use crate::logging::SUBSCRIPTION_TARGET;
use crate::normalize;

/// Identifies one subscription for its whole life, across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle {
    id: u64,
}

impl SubscriptionHandle {
    /// The numeric id, also used as the wire id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Something a subscription delivers to its handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The `data` of one result frame.
    Data(Value),
    /// The server reported an error for this subscription.
    Error(NormalizedError),
    /// The server finished the subscription.
    Complete,
}

/// Receives events for one subscription.
///
/// Called on the driver task in receive order, so implementations should
/// hand work off rather than block. A panic is caught and logged; it does
/// not affect other subscriptions.
pub trait SubscriptionHandler: Send + Sync + 'static {
    fn on_event(&self, event: SubscriptionEvent);
}

impl<F> SubscriptionHandler for F
where
    F: Fn(SubscriptionEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: SubscriptionEvent) {
        self(event)
    }
}

/// Liveness of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Registered, not yet sent on a connection.
    Pending,
    /// Sent on the current connection.
    Active,
    /// Its connection went away; it will be re-sent after reconnecting.
    Stale,
    /// Finished by the server, unsubscribed, or shut down.
    Closed,
}

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Streaming,
    /// Lost or failed; waiting out the backoff delay.
    Degraded,
}

/// Snapshot of one subscription for [`ManagerStatus`].
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub handle: SubscriptionHandle,
    pub operation_name: Option<String>,
    pub state: SubscriptionState,
    pub events: u64,
    pub last_event_at: Option<Instant>,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub connection: ConnectionState,
    pub protocol: Option<WireProtocol>,
    /// Failed attempts since the last connection that stayed up for `reset_after`.
    pub reconnect_attempt: u32,
    pub last_error: Option<NormalizedError>,
    pub subscriptions: Vec<SubscriptionInfo>,
}

struct Entry {
    handle: SubscriptionHandle,
    operation: Operation,
    handler: Box<dyn SubscriptionHandler>,
    /// Cleared on unsubscribe so dispatch stops before the driver catches up.
    active: AtomicBool,
    state: Mutex<SubscriptionState>,
    events: AtomicU64,
    latest: Mutex<Option<(Value, Instant)>>,
}

impl Entry {
    fn wire_id(&self) -> String {
        self.handle.id.to_string()
    }

    fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SubscriptionState) {
        let mut current = self.state.lock();
        if *current != SubscriptionState::Closed {
            *current = state;
        }
    }

    fn is_live(&self) -> bool {
        self.state() != SubscriptionState::Closed
    }

    fn close(&self) {
        self.active.store(false, Ordering::Release);
        *self.state.lock() = SubscriptionState::Closed;
    }

    fn dispatch(&self, event: SubscriptionEvent) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| self.handler.on_event(event)));
        if outcome.is_err() {
            tracing::error!(
                target: SUBSCRIPTION_TARGET,
                id = self.handle.id,
                "subscription handler panicked"
            );
        }
    }

    fn record(&self, data: &Value) {
        self.events.fetch_add(1, Ordering::Relaxed);
        *self.latest.lock() = Some((data.clone(), Instant::now()));
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            handle: self.handle.clone(),
            operation_name: self.operation.name().map(str::to_string),
            state: self.state(),
            events: self.events.load(Ordering::Relaxed),
            last_event_at: self.latest.lock().as_ref().map(|(_, at)| *at),
        }
    }
}

#[derive(Default)]
struct Health {
    protocol: Option<WireProtocol>,
    attempt: u32,
    last_error: Option<NormalizedError>,
}

struct Shared {
    registry: Mutex<BTreeMap<u64, Arc<Entry>>>,
    state: watch::Sender<ConnectionState>,
    health: Mutex<Health>,
    shut_down: AtomicBool,
}

impl Shared {
    fn entry(&self, id: u64) -> Option<Arc<Entry>> {
        self.registry.lock().get(&id).cloned()
    }

    fn entry_by_wire_id(&self, wire_id: &str) -> Option<Arc<Entry>> {
        wire_id.parse().ok().and_then(|id| self.entry(id))
    }

    fn live_entries(&self) -> Vec<Arc<Entry>> {
        self.registry
            .lock()
            .values()
            .filter(|e| e.is_live())
            .cloned()
            .collect()
    }

    fn has_live(&self) -> bool {
        self.registry.lock().values().any(|e| e.is_live())
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(target: SUBSCRIPTION_TARGET, state = ?next, "connection state changed");
        }
    }
}

enum Command {
    /// A new entry is in the registry.
    Register(u64),
    /// An entry was removed from the registry.
    Unregister(u64),
    Shutdown(oneshot::Sender<()>),
}

/// Runs many GraphQL subscriptions over one persistent WebSocket.
///
/// A single driver task owns the socket. It connects when the first
/// subscription is registered, reconnects with backoff when the connection
/// is lost (re-sending every subscription that is still wanted under the
/// same id), and disconnects when the last one goes away.
///
/// # Example
///
/// ```ignore
/// let manager = SubscriptionManager::new(&config)?;
///
/// let handle = manager.subscribe(
///     Operation::subscription("subscription { arraySubscription { state } }"),
///     |event: SubscriptionEvent| {
///         if let SubscriptionEvent::Data(data) = event {
///             println!("array: {}", data["arraySubscription"]["state"]);
///         }
///     },
/// )?;
///
/// // later
/// manager.unsubscribe(&handle);
/// manager.shutdown().await;
/// ```
pub struct SubscriptionManager {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    /// Create a manager and start its driver task.
    ///
    /// Must be called within a Tokio runtime. No connection is made until
    /// the first subscription is registered.
    pub fn new(config: &TransportConfig) -> std::result::Result<Self, ConfigError> {
        let settings = ConnectSettings::from_config(config)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            registry: Mutex::new(BTreeMap::new()),
            state,
            health: Mutex::new(Health::default()),
            shut_down: AtomicBool::new(false),
        });
        let (commands, receiver) = mpsc::unbounded_channel();

        let driver = Driver {
            shared: shared.clone(),
            settings,
            keepalive_interval: config.timeouts().keepalive_interval,
            keepalive_timeout: config.timeouts().keepalive_timeout,
            backoff: Backoff::new(config.reconnect().clone()),
            commands: receiver,
        };
        let handle = tokio::spawn(driver.run());

        Ok(Self {
            shared,
            commands,
            next_id: AtomicU64::new(1),
            driver: Mutex::new(Some(handle)),
        })
    }

    /// Register a subscription.
    ///
    /// Valid in every connection state; without a connection this records
    /// the intent and starts connecting.
    pub fn subscribe(
        &self,
        operation: Operation,
        handler: impl SubscriptionHandler,
    ) -> Result<SubscriptionHandle> {
        if !operation.is_subscription() {
            return Err(normalize::protocol(
                "only subscription operations can be subscribed; use execute for queries",
            ));
        }
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(normalize::connection_lost("subscription manager is shut down"));
        }

        let handle = SubscriptionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let entry = Arc::new(Entry {
            handle: handle.clone(),
            operation,
            handler: Box::new(handler),
            active: AtomicBool::new(true),
            state: Mutex::new(SubscriptionState::Pending),
            events: AtomicU64::new(0),
            latest: Mutex::new(None),
        });

        tracing::debug!(
            target: SUBSCRIPTION_TARGET,
            id = handle.id,
            operation = entry.operation.name().unwrap_or("anonymous"),
            "subscription registered"
        );
        self.shared.registry.lock().insert(handle.id, entry);

        if self.commands.send(Command::Register(handle.id)).is_err() {
            if let Some(entry) = self.shared.registry.lock().remove(&handle.id) {
                entry.close();
            }
            return Err(normalize::connection_lost("subscription driver has stopped"));
        }
        Ok(handle)
    }

    /// Stop a subscription. Its handler receives nothing further.
    ///
    /// Returns `false` if the handle was unknown or already unsubscribed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let Some(entry) = self.shared.registry.lock().remove(&handle.id) else {
            return false;
        };
        entry.close();
        tracing::debug!(target: SUBSCRIPTION_TARGET, id = handle.id, "subscription removed");
        let _ = self.commands.send(Command::Unregister(handle.id));
        true
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// State of one subscription, if it is still registered.
    pub fn subscription_state(&self, handle: &SubscriptionHandle) -> Option<SubscriptionState> {
        self.shared.entry(handle.id).map(|e| e.state())
    }

    /// The most recent data delivered to a subscription.
    pub fn latest(&self, handle: &SubscriptionHandle) -> Option<Value> {
        self.shared
            .entry(handle.id)
            .and_then(|e| e.latest.lock().as_ref().map(|(data, _)| data.clone()))
    }

    /// A snapshot of the connection and every registered subscription.
    pub fn status(&self) -> ManagerStatus {
        let health = self.shared.health.lock();
        ManagerStatus {
            connection: self.state(),
            protocol: health.protocol,
            reconnect_attempt: health.attempt,
            last_error: health.last_error.clone(),
            subscriptions: self
                .shared
                .registry
                .lock()
                .values()
                .map(|e| e.info())
                .collect(),
        }
    }

    /// Complete every subscription, close the connection, and wait for the
    /// driver to exit. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::Release);
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("state", &self.state())
            .field("subscriptions", &self.shared.registry.lock().len())
            .finish()
    }
}

/// How a streaming session ended.
enum SessionEnd {
    /// The connection failed; reconnect after backoff.
    Lost(NormalizedError),
    /// Nothing left to stream; disconnect.
    Idle,
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Run `fut` unless a shutdown arrives first.
///
/// Registration commands are absorbed: the registry is read again at the
/// next transition, so nothing is lost.
async fn until_shutdown<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    fut: F,
) -> std::result::Result<F::Output, Option<oneshot::Sender<()>>> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Ok(out),
            cmd = commands.recv() => match cmd {
                Some(Command::Shutdown(ack)) => return Err(Some(ack)),
                None => return Err(None),
                Some(Command::Register(_) | Command::Unregister(_)) => {}
            },
        }
    }
}

struct Driver {
    shared: Arc<Shared>,
    settings: ConnectSettings,
    keepalive_interval: Duration,
    keepalive_timeout: Duration,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self) {
        let ack = self.drive().await;

        for entry in self.shared.registry.lock().values() {
            entry.close();
        }
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::debug!(target: SUBSCRIPTION_TARGET, "subscription driver stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// The state machine. Returns the shutdown acknowledgement, if any.
    async fn drive(&mut self) -> Option<oneshot::Sender<()>> {
        loop {
            if !self.shared.has_live() {
                self.shared.set_state(ConnectionState::Disconnected);
                match self.commands.recv().await {
                    Some(Command::Shutdown(ack)) => return Some(ack),
                    None => return None,
                    Some(_) => continue,
                }
            }

            self.shared.set_state(ConnectionState::Connecting);
            let mut conn =
                match until_shutdown(&mut self.commands, Connection::connect(&self.settings)).await
                {
                    Err(ack) => return ack,
                    Ok(Ok(conn)) => conn,
                    Ok(Err(e)) => {
                        if let Err(ack) = self.degrade(e, None).await {
                            return ack;
                        }
                        continue;
                    }
                };

            self.shared.set_state(ConnectionState::Handshaking);
            match until_shutdown(&mut self.commands, conn.handshake(&self.settings)).await {
                Err(ack) => {
                    conn.close().await;
                    return ack;
                }
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    conn.close().await;
                    if let Err(ack) = self.degrade(e, None).await {
                        return ack;
                    }
                    continue;
                }
            }
            self.shared.health.lock().protocol = Some(conn.protocol());

            let started = Instant::now();
            match self.stream(&mut conn).await {
                SessionEnd::Idle => {
                    tracing::debug!(
                        target: SUBSCRIPTION_TARGET,
                        "no subscriptions left, closing connection"
                    );
                    conn.close().await;
                    self.backoff.reset();
                    self.shared.health.lock().attempt = 0;
                }
                SessionEnd::Shutdown(ack) => {
                    for entry in self.shared.live_entries() {
                        let frame = conn.protocol().complete(&entry.wire_id());
                        if conn.send(frame).await.is_err() {
                            break;
                        }
                    }
                    conn.close().await;
                    return ack;
                }
                SessionEnd::Lost(e) => {
                    drop(conn);
                    if let Err(ack) = self.degrade(e, Some(started.elapsed())).await {
                        return ack;
                    }
                }
            }
        }
    }

    /// Mark everything stale, record the failure, and wait out the backoff.
    async fn degrade(
        &mut self,
        error: NormalizedError,
        streamed_for: Option<Duration>,
    ) -> std::result::Result<(), Option<oneshot::Sender<()>>> {
        for entry in self.shared.live_entries() {
            entry.set_state(SubscriptionState::Stale);
        }

        self.backoff.connection_dropped(streamed_for);
        let delay = self.backoff.next_delay();
        tracing::warn!(
            target: SUBSCRIPTION_TARGET,
            kind = %error.kind(),
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "subscription connection degraded: {error}"
        );
        {
            let mut health = self.shared.health.lock();
            health.attempt = self.backoff.attempt();
            health.last_error = Some(error);
        }
        self.shared.set_state(ConnectionState::Degraded);

        until_shutdown(&mut self.commands, tokio::time::sleep(delay)).await
    }

    /// Send every live subscription, then dispatch frames until the session ends.
    async fn stream(&mut self, conn: &mut Connection) -> SessionEnd {
        let protocol = conn.protocol();
        for entry in self.shared.live_entries() {
            if let Err(e) = conn.send(protocol.subscribe(&entry.wire_id(), &entry.operation)).await {
                return SessionEnd::Lost(e);
            }
            entry.set_state(SubscriptionState::Active);
        }
        self.shared.set_state(ConnectionState::Streaming);
        tracing::info!(
            target: SUBSCRIPTION_TARGET,
            %protocol,
            attempt = self.backoff.attempt(),
            "subscription connection streaming"
        );

        let deadline = tokio::time::sleep(self.keepalive_timeout);
        tokio::pin!(deadline);
        let healthy = tokio::time::sleep(self.backoff.reset_after());
        tokio::pin!(healthy);
        let mut recovering = self.backoff.attempt() > 0;
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + self.keepalive_interval,
            self.keepalive_interval,
        );

        loop {
            if !self.shared.has_live() {
                return SessionEnd::Idle;
            }

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    None => return SessionEnd::Shutdown(None),
                    Some(Command::Shutdown(ack)) => return SessionEnd::Shutdown(Some(ack)),
                    Some(Command::Register(id)) => {
                        let Some(entry) = self.shared.entry(id) else { continue };
                        if entry.state() != SubscriptionState::Pending {
                            continue;
                        }
                        if let Err(e) = conn.send(protocol.subscribe(&entry.wire_id(), &entry.operation)).await {
                            return SessionEnd::Lost(e);
                        }
                        entry.set_state(SubscriptionState::Active);
                    }
                    Some(Command::Unregister(id)) => {
                        if let Err(e) = conn.send(protocol.complete(&id.to_string())).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                },
                incoming = conn.recv() => {
                    deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.keepalive_timeout);
                    match incoming {
                        Incoming::Frame(frame) => {
                            if let Err(e) = self.handle_frame(conn, frame).await {
                                return SessionEnd::Lost(e);
                            }
                        }
                        Incoming::Malformed(e) => {
                            tracing::warn!(target: SUBSCRIPTION_TARGET, "dropping frame: {e}");
                        }
                        Incoming::Other => {}
                        Incoming::Closed(e) => return SessionEnd::Lost(e),
                    }
                }
                _ = &mut deadline => {
                    return SessionEnd::Lost(normalize::connection_lost(format!(
                        "no frames received within {}s",
                        self.keepalive_timeout.as_secs_f32()
                    )));
                }
                _ = &mut healthy, if recovering => {
                    recovering = false;
                    self.backoff.reset();
                    self.shared.health.lock().attempt = 0;
                    tracing::debug!(target: SUBSCRIPTION_TARGET, "connection healthy, backoff reset");
                }
                _ = ping.tick(), if protocol.has_client_ping() => {
                    if let Some(frame) = protocol.ping()
                        && let Err(e) = conn.send(frame).await
                    {
                        return SessionEnd::Lost(e);
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, conn: &mut Connection, frame: ServerMessage) -> Result<()> {
        match frame {
            ServerMessage::Next { id, payload } | ServerMessage::Data { id, payload } => {
                self.deliver(&id, payload);
            }
            ServerMessage::Error { id, payload } => {
                if let Some(entry) = self.shared.entry_by_wire_id(&id) {
                    let error = normalize::from_subscription_error(&payload);
                    tracing::warn!(
                        target: SUBSCRIPTION_TARGET,
                        id = entry.handle.id,
                        "subscription rejected: {error}"
                    );
                    entry.dispatch(SubscriptionEvent::Error(error));
                    entry.close();
                }
            }
            ServerMessage::Complete { id } => {
                if let Some(entry) = self.shared.entry_by_wire_id(&id) {
                    tracing::debug!(
                        target: SUBSCRIPTION_TARGET,
                        id = entry.handle.id,
                        "subscription completed by server"
                    );
                    entry.dispatch(SubscriptionEvent::Complete);
                    entry.close();
                }
            }
            ServerMessage::Ping { payload } => {
                if let Some(pong) = conn.protocol().pong(payload) {
                    conn.send(pong).await?;
                }
            }
            ServerMessage::ConnectionError { payload } => {
                return Err(normalize::from_connection_error(payload.as_ref()));
            }
            ServerMessage::Pong { .. } | ServerMessage::Ka | ServerMessage::ConnectionAck { .. } => {}
        }
        Ok(())
    }

    fn deliver(&self, id: &str, payload: Value) {
        let Some(entry) = self.shared.entry_by_wire_id(id) else {
            tracing::debug!(target: SUBSCRIPTION_TARGET, id, "event for unknown subscription");
            return;
        };
        if entry.state() == SubscriptionState::Closed {
            return;
        }

        let response: GraphQLResponse = match serde_json::from_value(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    target: SUBSCRIPTION_TARGET,
                    id,
                    "dropping malformed result payload: {e}"
                );
                return;
            }
        };

        if response.has_errors() {
            entry.dispatch(SubscriptionEvent::Error(normalize::from_graphql_errors(
                &response.errors,
            )));
            return;
        }
        match response.data {
            Some(data) if !data.is_null() => {
                entry.record(&data);
                entry.dispatch(SubscriptionEvent::Data(data));
            }
            _ => {
                tracing::warn!(target: SUBSCRIPTION_TARGET, id, "result frame without data");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn entry(handler: impl SubscriptionHandler) -> Entry {
        Entry {
            handle: SubscriptionHandle { id: 1 },
            operation: Operation::subscription("subscription Ping { ping }"),
            handler: Box::new(handler),
            active: AtomicBool::new(true),
            state: Mutex::new(SubscriptionState::Pending),
            events: AtomicU64::new(0),
            latest: Mutex::new(None),
        }
    }

    #[test]
    fn test_closed_entry_stops_dispatch() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let entry = entry(move |_event: SubscriptionEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        entry.dispatch(SubscriptionEvent::Data(json!({"ping": 1})));
        entry.close();
        entry.dispatch(SubscriptionEvent::Data(json!({"ping": 2})));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_is_terminal() {
        let entry = entry(|_event: SubscriptionEvent| {});
        entry.set_state(SubscriptionState::Active);
        entry.close();
        entry.set_state(SubscriptionState::Stale);
        assert_eq!(entry.state(), SubscriptionState::Closed);
        assert!(!entry.is_live());
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let entry = entry(|_event: SubscriptionEvent| panic!("handler bug"));
        entry.dispatch(SubscriptionEvent::Complete);
        assert!(entry.is_live());
    }

    #[test]
    fn test_record_tracks_latest() {
        let entry = entry(|_event: SubscriptionEvent| {});
        entry.record(&json!({"n": 1}));
        entry.record(&json!({"n": 2}));

        let info = entry.info();
        assert_eq!(info.events, 2);
        assert_eq!(info.operation_name.as_deref(), Some("Ping"));
        assert!(info.last_event_at.is_some());
        assert_eq!(entry.latest.lock().as_ref().map(|(v, _)| v.clone()), Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_rejects_query_operation() {
        let config = TransportConfig::builder("http://127.0.0.1:9/graphql").build().unwrap();
        let manager = SubscriptionManager::new(&config).unwrap();

        let err = manager
            .subscribe(Operation::query("{ online }"), |_event: SubscriptionEvent| {})
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fails() {
        let config = TransportConfig::builder("http://127.0.0.1:9/graphql").build().unwrap();
        let manager = SubscriptionManager::new(&config).unwrap();
        manager.shutdown().await;
        manager.shutdown().await;

        let result = manager.subscribe(
            Operation::subscription("subscription { ping }"),
            |_event: SubscriptionEvent| {},
        );
        assert!(result.is_err());
    }
}
