//! Query and mutation execution over HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::operation::{Operation, OperationClass};
use super::response::GraphQLResponse;
use crate::config::{ConfigError, TimeoutPolicy, TransportConfig};
use crate::error::Result;
use crate::logging::QUERY_TARGET;
use crate::normalize;
use crate::tls;

struct ExecutorInner {
    client: reqwest::Client,
    url: Url,
    timeouts: TimeoutPolicy,
}

/// Sends queries and mutations to the Unraid GraphQL endpoint.
///
/// One pooled HTTP client is shared by every call; cloning the executor is
/// cheap and shares the pool. Each call is independent: the executor never
/// retries, and a failure only affects the call that produced it.
///
/// # Example
///
/// ```ignore
/// let executor = QueryExecutor::new(&config)?;
///
/// let info = executor
///     .execute(&Operation::query("{ info { os { hostname } } }"), OperationClass::Standard)
///     .await?;
///
/// let disks = executor
///     .execute(&Operation::query("{ disks { id temperature } }"), OperationClass::LongRunning)
///     .await?;
/// ```
#[derive(Clone)]
pub struct QueryExecutor {
    inner: Arc<ExecutorInner>,
}

impl QueryExecutor {
    /// Build an executor from resolved configuration.
    pub fn new(config: &TransportConfig) -> std::result::Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key() {
            let name = HeaderName::from_bytes(config.auth_header().as_bytes()).map_err(|e| {
                ConfigError::InvalidValue {
                    var: "auth_header",
                    value: config.auth_header().to_string(),
                    message: e.to_string(),
                }
            })?;
            let mut value =
                HeaderValue::from_str(key).map_err(|_| ConfigError::InvalidValue {
                    var: crate::config::vars::API_KEY,
                    value: "****".into(),
                    message: "contains characters not allowed in a header".into(),
                })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let builder = reqwest::Client::builder()
            .connect_timeout(config.timeouts().connect)
            .user_agent(config.user_agent())
            .default_headers(headers);
        let client = tls::configure_reqwest(builder, config.tls())?.build()?;

        Ok(Self {
            inner: Arc::new(ExecutorInner {
                client,
                url: config.api_url().clone(),
                timeouts: config.timeouts().clone(),
            }),
        })
    }

    /// The endpoint operations are posted to.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// The read timeout applied to operations of `class`.
    pub fn read_timeout(&self, class: OperationClass) -> Duration {
        self.inner.timeouts.read_timeout(class)
    }

    /// Execute a query or mutation and return its `data`.
    ///
    /// Fails with a normalized error if the endpoint is unreachable, the
    /// class timeout expires, the status is not 2xx, the body is not a
    /// GraphQL response, or the response carries any errors.
    pub async fn execute(&self, operation: &Operation, class: OperationClass) -> Result<Value> {
        let started = Instant::now();
        let result = self
            .execute_raw(operation, class)
            .await
            .and_then(GraphQLResponse::into_data);

        let elapsed = started.elapsed();
        match &result {
            Ok(_) => tracing::debug!(
                target: QUERY_TARGET,
                operation = operation.name().unwrap_or("anonymous"),
                ?class,
                elapsed_ms = elapsed.as_millis() as u64,
                "operation succeeded"
            ),
            Err(err) => tracing::warn!(
                target: QUERY_TARGET,
                operation = operation.name().unwrap_or("anonymous"),
                ?class,
                elapsed_ms = elapsed.as_millis() as u64,
                kind = %err.kind(),
                "operation failed: {err}"
            ),
        }
        result
    }

    /// Execute and decode `data` into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        operation: &Operation,
        class: OperationClass,
    ) -> Result<T> {
        let data = self.execute(operation, class).await?;
        serde_json::from_value(data).map_err(normalize::from_decode)
    }

    /// Execute and return the full response envelope, errors included.
    ///
    /// Only transport-level failures (network, status, unparseable body)
    /// are reported as `Err`; GraphQL errors are left in the envelope.
    pub async fn execute_raw(
        &self,
        operation: &Operation,
        class: OperationClass,
    ) -> Result<GraphQLResponse> {
        if operation.is_subscription() {
            return Err(normalize::protocol(
                "subscription operations must go through the subscription manager",
            ));
        }

        let timeout = self.read_timeout(class);
        tracing::trace!(
            target: QUERY_TARGET,
            url = %self.inner.url,
            timeout_ms = timeout.as_millis() as u64,
            "posting operation"
        );

        let response = self
            .inner
            .client
            .post(self.inner.url.clone())
            .timeout(timeout)
            .json(operation)
            .send()
            .await
            .map_err(normalize::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(normalize::from_reqwest)?;

        if !status.is_success() {
            return Err(normalize::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| normalize::from_body(e, &body))
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("url", &self.inner.url.as_str())
            .field("timeouts", &self.inner.timeouts)
            .finish()
    }
}
