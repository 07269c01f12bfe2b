//! GraphQL queries and mutations over HTTP.
//!
//! Every call is a single POST of `{query, variables, operationName}` to the
//! configured endpoint, bounded by the read timeout of its
//! [`OperationClass`]. Results come back as the response `data`, or as a
//! [`NormalizedError`](crate::NormalizedError) describing why not.
//!
//! # Example
//!
//! ```ignore
//! use unraid_mcp_transport::graphql::{Operation, OperationClass, QueryExecutor};
//!
//! let executor = QueryExecutor::new(&config)?;
//!
//! let op = Operation::query(r#"
//!     query GetRCloneConfigForm($formOptions: RCloneConfigFormInput) {
//!         rclone { configForm(formOptions: $formOptions) { id dataSchema uiSchema } }
//!     }
//! "#)
//! .variable("formOptions", serde_json::json!({"providerType": "s3"}));
//!
//! let data = executor.execute(&op, OperationClass::Standard).await?;
//! ```
//!
//! Subscriptions are not executed here; see [`crate::subscription`].

mod executor;
mod operation;
mod response;

pub use executor::QueryExecutor;
pub use operation::{Operation, OperationClass, OperationType};
pub use response::{GraphQLError, GraphQLLocation, GraphQLResponse, PathSegment};
