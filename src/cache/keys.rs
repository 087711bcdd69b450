//! Cache key and tag definitions.
//!
//! A `CacheKey` is the endpoint name plus the canonical JSON serialization of
//! the query arguments, so logically equal arguments always land on the same
//! entry regardless of object key order.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    endpoint: String,
    args: String,
}

impl CacheKey {
    /// Build a key from an endpoint name and its arguments.
    pub fn new(endpoint: impl Into<String>, args: &Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            args: canonical_json(args),
        }
    }

    /// Key for an endpoint that takes no arguments.
    pub fn unit(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, &Value::Null)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Canonical serialized arguments.
    pub fn args(&self) -> &str {
        &self.args
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.endpoint, self.args)
    }
}

/// Label grouping cache entries that are invalidated together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a JSON value with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, inner)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(inner, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, inner) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(inner, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
