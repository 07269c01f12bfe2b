//! GraphQL response types.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;

use crate::error::Result;
use crate::normalize;

/// One entry of a response's `errors` array.
///
/// Only `message` is required; Unraid adds `extensions.code` on
/// authorization failures, which is kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,
    /// Field path from the operation root to the failing field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// The error path rendered as `a.b[2].c`, if the server sent one.
    pub fn path_string(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        if path.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (i, segment) in path.iter().enumerate() {
            match segment {
                PathSegment::Field(name) => {
                    if i > 0 {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                PathSegment::Index(idx) => {
                    out.push_str(&format!("[{idx}]"));
                }
            }
        }
        Some(out)
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(path) = self.path_string() {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

/// 1-indexed line and column in the operation document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQLLocation {
    pub line: u32,
    pub column: u32,
}

/// Field name or list index in an error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A GraphQL response envelope, from an HTTP body or a `next`/`data` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// Absent or `null` when execution failed before any field resolved.
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    /// Whether the server reported any error, even alongside data.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The error that normalization reports.
    pub fn first_error(&self) -> Option<&GraphQLError> {
        self.errors.first()
    }

    /// Take the data, failing if any error is present.
    ///
    /// Partial data that arrives alongside errors is discarded.
    pub fn into_data(self) -> Result<Value> {
        if self.has_errors() {
            return Err(normalize::from_graphql_errors(&self.errors));
        }
        match self.data {
            Some(Value::Null) | None => Err(normalize::missing_data()),
            Some(data) => Ok(data),
        }
    }

    /// Take the data and decode it into `T`.
    ///
    /// Unknown fields are ignored; a missing required field is a
    /// `GraphQL`-kind failure.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let data = self.into_data()?;
        serde_json::from_value(data).map_err(normalize::from_decode)
    }
}
