//! GraphQL operations and their timeout class.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::logging::QUERY_TARGET;

/// Which executor an operation belongs to.
///
/// Queries and mutations go over HTTP; subscriptions only over the
/// WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationType {
    #[default]
    Query,
    Mutation,
    Subscription,
}

/// Timeout policy tag for a query or mutation.
///
/// Disk-bound calls on the Unraid API (array and disk enumeration, SMART
/// data) routinely take far longer than interactive ones, so they get
/// their own read timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationClass {
    /// Short interactive call.
    #[default]
    Standard,
    /// Disk-bound or otherwise slow call.
    LongRunning,
}

/// A GraphQL document plus its variables.
///
/// Built with the consuming builder methods and then only read; the
/// executor borrows it for the duration of one call.
///
/// # Example
///
/// ```ignore
/// let op = Operation::query(r#"
///     query GetRCloneConfigForm($formOptions: RCloneConfigFormInput) {
///         rclone { configForm(formOptions: $formOptions) { id dataSchema uiSchema } }
///     }
/// "#)
/// .variable("formOptions", serde_json::json!({"providerType": "s3"}));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    query: String,

    #[serde(skip_serializing_if = "Map::is_empty")]
    variables: Map<String, Value>,

    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    operation_name: Option<String>,

    #[serde(skip)]
    operation_type: OperationType,
}

impl Operation {
    fn with_type(query: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
            operation_name: None,
            operation_type,
        }
    }

    /// Create a query operation.
    pub fn query(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Query)
    }

    /// Create a mutation operation.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Mutation)
    }

    /// Create a subscription operation.
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Subscription)
    }

    /// Create an operation, inferring its type from the leading keyword.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let operation_type = leading_keyword(&query);
        Self::with_type(query, operation_type)
    }

    /// Set a variable value.
    ///
    /// Values that fail to serialize are logged and stored as `null`; use
    /// [`try_variable`](Self::try_variable) to handle the failure instead.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let name = name.into();
        let value = serde_json::to_value(value).unwrap_or_else(|e| {
            tracing::warn!(
                target: QUERY_TARGET,
                variable = %name,
                "variable failed to serialize, sending null: {e}"
            );
            Value::Null
        });
        self.variables.insert(name, value);
        self
    }

    /// Set a variable value, failing if it cannot be represented as JSON.
    pub fn try_variable(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        self.variables.insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Replace all variables with the entries of a JSON object.
    ///
    /// Non-object values clear the variables.
    pub fn variables(mut self, variables: Value) -> Self {
        self.variables = match variables {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    /// Name the operation; required when the document declares several.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// The GraphQL document.
    pub fn document(&self) -> &str {
        &self.query
    }

    /// The variables map.
    pub fn variables_map(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// The explicit operation name, or the one declared in the document.
    pub fn name(&self) -> Option<&str> {
        self.operation_name
            .as_deref()
            .or_else(|| declared_name(&self.query))
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Subscriptions are refused by the query executor.
    pub fn is_subscription(&self) -> bool {
        self.operation_type == OperationType::Subscription
    }
}

/// Anonymous `{ ... }` shorthand is a query.
fn leading_keyword(document: &str) -> OperationType {
    match document.trim_start() {
        doc if doc.starts_with("subscription") => OperationType::Subscription,
        doc if doc.starts_with("mutation") => OperationType::Mutation,
        _ => OperationType::Query,
    }
}

/// `GetSystemInfo` from `query GetSystemInfo($x: Int) { ... }`.
fn declared_name(query: &str) -> Option<&str> {
    let rest = query.trim_start();
    let rest = ["query", "mutation", "subscription"]
        .iter()
        .find_map(|kw| rest.strip_prefix(kw))?;
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors_set_type() {
        assert_eq!(
            Operation::query("{ info { time } }").operation_type(),
            OperationType::Query
        );
        assert_eq!(
            Operation::mutation("mutation { docker { start(id: \"x\") { id } } }")
                .operation_type(),
            OperationType::Mutation
        );
        assert!(Operation::subscription("subscription { arraySubscription { state } }")
            .is_subscription());
    }

    #[test]
    fn test_leading_keyword() {
        assert_eq!(
            Operation::new("  query ListRCloneRemotes { rclone { remotes { name } } }")
                .operation_type(),
            OperationType::Query
        );
        assert_eq!(
            Operation::new("mutation DeleteRCloneRemote { x }").operation_type(),
            OperationType::Mutation
        );
        assert_eq!(
            Operation::new("subscription { logFile(path: \"/var/log/syslog\") { content } }")
                .operation_type(),
            OperationType::Subscription
        );
        assert_eq!(Operation::new("{ online }").operation_type(), OperationType::Query);
    }

    #[test]
    fn test_serialized_body() {
        let op = Operation::mutation(
            "mutation DeleteRCloneRemote($input: DeleteRCloneRemoteInput!) { rclone { deleteRCloneRemote(input: $input) } }",
        )
        .variable("input", json!({"name": "backup"}));

        let body = serde_json::to_value(&op).unwrap();
        assert_eq!(body["variables"]["input"]["name"], "backup");
        assert!(body.get("operationName").is_none());
        assert!(body.get("operation_type").is_none());
    }

    #[test]
    fn test_unserializable_variable() {
        use std::collections::BTreeMap;

        // JSON object keys must be strings.
        let disks: BTreeMap<(u8, u8), &str> = [((0, 1), "sdb")].into_iter().collect();

        let op = Operation::query("query Q($disks: JSON) { x }");
        assert!(op.clone().try_variable("disks", &disks).is_err());

        let op = op.variable("disks", &disks);
        assert_eq!(op.variables_map()["disks"], Value::Null);

        let op = Operation::query("query Q($n: Int) { x }")
            .try_variable("n", 3)
            .unwrap();
        assert_eq!(op.variables_map()["n"], json!(3));
    }

    #[test]
    fn test_empty_variables_are_omitted() {
        let body = serde_json::to_value(Operation::query("{ online }")).unwrap();
        assert!(body.get("variables").is_none());
    }

    #[test]
    fn test_declared_name() {
        let op = Operation::query("query GetArrayStatus { array { state } }");
        assert_eq!(op.name(), Some("GetArrayStatus"));

        let op = Operation::query("{ online }");
        assert_eq!(op.name(), None);

        let op = Operation::query("query GetNetworkConfig($a: Int) { network { id } }")
            .operation_name("Override");
        assert_eq!(op.name(), Some("Override"));
    }
}
