//! Transport configuration.
//!
//! Resolved once per process and then only read. Layering, lowest first:
//! built-in defaults, a `.env` file, the process environment, and finally
//! explicit builder calls.
//!
//! ```ignore
//! use unraid_mcp_transport::TransportConfig;
//!
//! // From UNRAID_API_URL, UNRAID_API_KEY, ... (and ./.env if present)
//! let config = TransportConfig::from_env()?;
//!
//! // Or explicitly
//! let config = TransportConfig::builder("https://tower.local/graphql")
//!     .api_key("secret")
//!     .standard_timeout(Duration::from_secs(10))
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::graphql::OperationClass;
use crate::tls::TlsVerification;

/// Errors raised while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set in any layer.
    #[error("{0} is not set (environment or .env file)")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {var} ('{value}'): {message}")]
    InvalidValue {
        var: &'static str,
        value: String,
        message: String,
    },

    /// An endpoint URL cannot be parsed.
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The `.env` file exists but cannot be read.
    #[error("Failed to read .env file: {0}")]
    DotEnv(#[from] dotenvy::Error),

    /// The CA bundle cannot be loaded.
    #[error(transparent)]
    Tls(#[from] crate::tls::TlsError),

    /// The HTTP client cannot be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The resolved values contradict each other.
    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Environment variable names.
pub mod vars {
    pub const API_URL: &str = "UNRAID_API_URL";
    pub const API_KEY: &str = "UNRAID_API_KEY";
    pub const VERIFY_SSL: &str = "UNRAID_VERIFY_SSL";
    pub const SUBSCRIPTION_URL: &str = "UNRAID_SUBSCRIPTION_URL";
    pub const CONNECT_TIMEOUT_SECS: &str = "UNRAID_CONNECT_TIMEOUT_SECS";
    pub const WRITE_TIMEOUT_SECS: &str = "UNRAID_WRITE_TIMEOUT_SECS";
    pub const STANDARD_TIMEOUT_SECS: &str = "UNRAID_STANDARD_TIMEOUT_SECS";
    pub const LONG_RUNNING_TIMEOUT_SECS: &str = "UNRAID_LONG_RUNNING_TIMEOUT_SECS";
    pub const HANDSHAKE_TIMEOUT_SECS: &str = "UNRAID_HANDSHAKE_TIMEOUT_SECS";
    pub const KEEPALIVE_TIMEOUT_SECS: &str = "UNRAID_KEEPALIVE_TIMEOUT_SECS";
    pub const RECONNECT_MIN_MS: &str = "UNRAID_RECONNECT_MIN_MS";
    pub const RECONNECT_MAX_MS: &str = "UNRAID_RECONNECT_MAX_MS";
    pub const MCP_HOST: &str = "UNRAID_MCP_HOST";
    pub const MCP_PORT: &str = "UNRAID_MCP_PORT";
    pub const MCP_TRANSPORT: &str = "UNRAID_MCP_TRANSPORT";
    pub const LOG_LEVEL: &str = "UNRAID_MCP_LOG_LEVEL";
}

/// Timeout values, per operation class and per connection phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// TCP/TLS connect bound, independent of operation class.
    pub connect: Duration,
    /// Bound on writing one frame to the subscription socket.
    pub write: Duration,
    /// Read timeout for [`OperationClass::Standard`].
    pub standard: Duration,
    /// Read timeout for [`OperationClass::LongRunning`].
    pub long_running: Duration,
    /// Bound on receiving `connection_ack` after `connection_init`.
    pub handshake: Duration,
    /// Interval between client pings on `graphql-transport-ws`.
    pub keepalive_interval: Duration,
    /// Silence on a streaming connection longer than this is a liveness failure.
    pub keepalive_timeout: Duration,
    /// How long the diagnostic probe waits for a first event after subscribing.
    pub probe_window: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            write: Duration::from_secs(10),
            standard: Duration::from_secs(30),
            long_running: Duration::from_secs(90),
            handshake: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(60),
            probe_window: Duration::from_secs(2),
        }
    }
}

impl TimeoutPolicy {
    /// The read timeout for an operation class.
    pub fn read_timeout(&self, class: OperationClass) -> Duration {
        match class {
            OperationClass::Standard => self.standard,
            OperationClass::LongRunning => self.long_running,
        }
    }
}

/// Reconnect backoff bounds for the subscription connection.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts.
    pub backoff_multiplier: f64,
    /// Upward jitter, as a fraction of the un-jittered delay.
    pub jitter_ratio: f64,
    /// Streaming this long without interruption resets the backoff.
    pub reset_after: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
            reset_after: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() || self.initial_delay > self.max_delay {
            return Err(ConfigError::Inconsistent(format!(
                "reconnect delays must satisfy 0 < initial ({:?}) <= max ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(ConfigError::Inconsistent(format!(
                "jitter ratio {} must be in [0, 1)",
                self.jitter_ratio
            )));
        }
        // Keeps jittered delays non-decreasing until the cap.
        if self.backoff_multiplier < 1.0 + self.jitter_ratio {
            return Err(ConfigError::Inconsistent(format!(
                "backoff multiplier {} must be at least 1 + jitter ratio ({})",
                self.backoff_multiplier,
                1.0 + self.jitter_ratio
            )));
        }
        Ok(())
    }
}

/// MCP transport the outer server exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum McpTransport {
    /// Streamable HTTP on `/mcp`.
    #[default]
    StreamableHttp,
    /// Server-sent events (deprecated upstream).
    Sse,
    /// Standard input/output.
    Stdio,
}

impl FromStr for McpTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streamable-http" => Ok(Self::StreamableHttp),
            "sse" => Ok(Self::Sse),
            "stdio" => Ok(Self::Stdio),
            other => Err(format!(
                "unsupported transport '{other}', expected streamable-http, sse, or stdio"
            )),
        }
    }
}

impl fmt::Display for McpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamableHttp => write!(f, "streamable-http"),
            Self::Sse => write!(f, "sse"),
            Self::Stdio => write!(f, "stdio"),
        }
    }
}

/// Where the locally exposed control surface listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlSurface {
    pub host: String,
    pub port: u16,
    pub transport: McpTransport,
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 6970,
            transport: McpTransport::default(),
        }
    }
}

/// Fully resolved transport configuration.
///
/// Cheap to clone; each component keeps its own copy.
#[derive(Clone)]
pub struct TransportConfig {
    api_url: Url,
    subscription_url: Url,
    api_key: Option<String>,
    auth_header: String,
    tls: TlsVerification,
    timeouts: TimeoutPolicy,
    reconnect: ReconnectConfig,
    control: ControlSurface,
    log_level: String,
    user_agent: String,
}

impl TransportConfig {
    /// Start building a configuration for the given GraphQL HTTP endpoint.
    pub fn builder(api_url: impl Into<String>) -> TransportConfigBuilder {
        TransportConfigBuilder::new(api_url)
    }

    /// Resolve from `./.env` (or the nearest parent's) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match dotenvy::dotenv_iter() {
            Ok(iter) => iter.collect::<Result<HashMap<_, _>, _>>()?,
            Err(e) if e.not_found() => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Self::from_layers(&file, |key| std::env::var(key).ok())
    }

    /// Resolve from a specific env file, overlaid by the process environment.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = dotenvy::from_path_iter(path.as_ref())?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Self::from_layers(&file, |key| std::env::var(key).ok())
    }

    /// Resolve from a file layer overlaid by an arbitrary lookup.
    pub fn from_layers(
        file: &HashMap<String, String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &'static str| -> Option<String> {
            env(key)
                .or_else(|| file.get(key).cloned())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_url = get(vars::API_URL).ok_or(ConfigError::Missing(vars::API_URL))?;
        let mut builder = TransportConfigBuilder::new(api_url);

        if let Some(key) = get(vars::API_KEY) {
            builder = builder.api_key(key);
        }
        if let Some(value) = get(vars::VERIFY_SSL) {
            builder = builder.tls(parse_verification(&value));
        }
        if let Some(url) = get(vars::SUBSCRIPTION_URL) {
            builder = builder.subscription_url(url);
        }

        let mut timeouts = TimeoutPolicy::default();
        if let Some(v) = get(vars::CONNECT_TIMEOUT_SECS) {
            timeouts.connect = parse_secs(vars::CONNECT_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(vars::WRITE_TIMEOUT_SECS) {
            timeouts.write = parse_secs(vars::WRITE_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(vars::STANDARD_TIMEOUT_SECS) {
            timeouts.standard = parse_secs(vars::STANDARD_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(vars::LONG_RUNNING_TIMEOUT_SECS) {
            timeouts.long_running = parse_secs(vars::LONG_RUNNING_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(vars::HANDSHAKE_TIMEOUT_SECS) {
            timeouts.handshake = parse_secs(vars::HANDSHAKE_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(vars::KEEPALIVE_TIMEOUT_SECS) {
            timeouts.keepalive_timeout = parse_secs(vars::KEEPALIVE_TIMEOUT_SECS, &v)?;
            // Ping at half the liveness deadline unless that is longer than the default.
            timeouts.keepalive_interval = timeouts
                .keepalive_interval
                .min(timeouts.keepalive_timeout / 2);
        }
        builder = builder.timeouts(timeouts);

        let mut reconnect = ReconnectConfig::default();
        if let Some(v) = get(vars::RECONNECT_MIN_MS) {
            reconnect.initial_delay = parse_millis(vars::RECONNECT_MIN_MS, &v)?;
        }
        if let Some(v) = get(vars::RECONNECT_MAX_MS) {
            reconnect.max_delay = parse_millis(vars::RECONNECT_MAX_MS, &v)?;
        }
        builder = builder.reconnect(reconnect);

        let mut control = ControlSurface::default();
        if let Some(host) = get(vars::MCP_HOST) {
            control.host = host;
        }
        if let Some(port) = get(vars::MCP_PORT) {
            control.port = port.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    var: vars::MCP_PORT,
                    value: port.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        if let Some(transport) = get(vars::MCP_TRANSPORT) {
            control.transport =
                transport
                    .parse()
                    .map_err(|message| ConfigError::InvalidValue {
                        var: vars::MCP_TRANSPORT,
                        value: transport.clone(),
                        message,
                    })?;
        }
        builder = builder.control_surface(control);

        if let Some(level) = get(vars::LOG_LEVEL) {
            builder = builder.log_level(level);
        }

        builder.build()
    }

    /// The GraphQL HTTP endpoint.
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// The GraphQL WebSocket endpoint.
    pub fn subscription_url(&self) -> &Url {
        &self.subscription_url
    }

    /// The credential, if configured.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Header name the credential is sent in.
    pub fn auth_header(&self) -> &str {
        &self.auth_header
    }

    /// Certificate verification mode.
    pub fn tls(&self) -> &TlsVerification {
        &self.tls
    }

    /// Timeout values.
    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    /// Reconnect backoff bounds.
    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    /// Control-surface host, port, and transport.
    pub fn control_surface(&self) -> &ControlSurface {
        &self.control
    }

    /// Tracing filter directive.
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// User-Agent sent on every request.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("api_url", &self.api_url.as_str())
            .field("subscription_url", &self.subscription_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("auth_header", &self.auth_header)
            .field("tls", &self.tls)
            .field("timeouts", &self.timeouts)
            .field("reconnect", &self.reconnect)
            .field("control", &self.control)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// Builder for [`TransportConfig`].
pub struct TransportConfigBuilder {
    api_url: String,
    subscription_url: Option<String>,
    api_key: Option<String>,
    auth_header: String,
    tls: TlsVerification,
    timeouts: TimeoutPolicy,
    reconnect: ReconnectConfig,
    control: ControlSurface,
    log_level: String,
    user_agent: String,
}

impl TransportConfigBuilder {
    /// Create a builder with defaults for everything except the endpoint.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            subscription_url: None,
            api_key: None,
            auth_header: "X-API-Key".into(),
            tls: TlsVerification::default(),
            timeouts: TimeoutPolicy::default(),
            reconnect: ReconnectConfig::default(),
            control: ControlSurface::default(),
            log_level: "info".into(),
            user_agent: format!("UnraidMCPServer/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set a separate WebSocket URL for subscriptions.
    ///
    /// If not set, it is derived from the HTTP URL (http:// -> ws://,
    /// https:// -> wss://, `/graphql` appended when missing).
    pub fn subscription_url(mut self, url: impl Into<String>) -> Self {
        self.subscription_url = Some(url.into());
        self
    }

    /// Set the credential.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Send the credential in a header other than `X-API-Key`.
    pub fn auth_header(mut self, name: impl Into<String>) -> Self {
        self.auth_header = name.into();
        self
    }

    /// Set the certificate verification mode.
    pub fn tls(mut self, tls: TlsVerification) -> Self {
        self.tls = tls;
        self
    }

    /// Replace all timeout values.
    pub fn timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the standard read timeout.
    pub fn standard_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.standard = timeout;
        self
    }

    /// Set the long-running read timeout.
    pub fn long_running_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.long_running = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake = timeout;
        self
    }

    /// Set the keepalive ping interval and liveness deadline.
    pub fn keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self.timeouts.keepalive_timeout = timeout;
        self
    }

    /// Set the diagnostic probe window.
    pub fn probe_window(mut self, window: Duration) -> Self {
        self.timeouts.probe_window = window;
        self
    }

    /// Replace the reconnect backoff bounds.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the control surface.
    pub fn control_surface(mut self, control: ControlSurface) -> Self {
        self.control = control;
        self
    }

    /// Set the tracing filter directive.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        let api_url = parse_url(&self.api_url)?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(ConfigError::Inconsistent(format!(
                "API URL must be http:// or https://, got '{api_url}'"
            )));
        }

        let subscription_url = match self.subscription_url {
            Some(ref url) => parse_url(url)?,
            None => parse_url(&http_to_ws_url(api_url.as_str()))?,
        };
        if !matches!(subscription_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Inconsistent(format!(
                "subscription URL must be ws:// or wss://, got '{subscription_url}'"
            )));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("connect", t.connect),
            ("write", t.write),
            ("standard", t.standard),
            ("long-running", t.long_running),
            ("handshake", t.handshake),
            ("keepalive interval", t.keepalive_interval),
            ("keepalive", t.keepalive_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Inconsistent(format!(
                    "{name} timeout must be non-zero"
                )));
            }
        }
        if t.long_running <= t.standard {
            return Err(ConfigError::Inconsistent(format!(
                "long-running timeout ({:?}) must exceed the standard timeout ({:?})",
                t.long_running, t.standard
            )));
        }
        if t.keepalive_interval >= t.keepalive_timeout {
            return Err(ConfigError::Inconsistent(format!(
                "keepalive interval ({:?}) must be shorter than the keepalive timeout ({:?})",
                t.keepalive_interval, t.keepalive_timeout
            )));
        }
        self.reconnect.validate()?;

        if http::HeaderName::from_bytes(self.auth_header.as_bytes()).is_err() {
            return Err(ConfigError::InvalidValue {
                var: "auth_header",
                value: self.auth_header,
                message: "not a valid HTTP header name".into(),
            });
        }

        Ok(TransportConfig {
            api_url,
            subscription_url,
            api_key: self.api_key.filter(|k| !k.is_empty()),
            auth_header: self.auth_header,
            tls: self.tls,
            timeouts: self.timeouts,
            reconnect: self.reconnect,
            control: self.control,
            log_level: self.log_level,
            user_agent: self.user_agent,
        })
    }
}

fn parse_url(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

fn http_to_ws_url(url: &str) -> String {
    let ws = if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    };
    let trimmed = ws.trim_end_matches('/');
    if trimmed.ends_with("/graphql") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/graphql")
    }
}

/// `true`/`false` toggle verification; anything else is a CA bundle path.
fn parse_verification(value: &str) -> TlsVerification {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => TlsVerification::Verify,
        "false" | "0" | "no" => TlsVerification::Disabled,
        _ => TlsVerification::CaBundle(PathBuf::from(value)),
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            message: "expected a positive number of seconds".into(),
        })
}

fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .ok_or_else(|| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            message: "expected a positive number of milliseconds".into(),
        })
}
