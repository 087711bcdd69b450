//! Wire types shared between the authcache client and the account API.
//!
//! Every endpoint answers with an [`Envelope`]; failures carry an
//! [`ErrorBody`] with an optional human-readable message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized success envelope returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Body of a non-2xx response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Profile returned by the current-user endpoint.
///
/// Built from the raw payload rather than deserialized, so extra or
/// differently typed fields never hide the identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserProfile {
    /// True when the profile names a concrete account.
    pub fn has_identity(&self) -> bool {
        self.id.is_some() || self.email.is_some()
    }

    /// Extract a profile from an envelope payload, if it carries one.
    ///
    /// The identifier is read from `_id`, then `id`, and may be a string or
    /// a number. Blank strings count as absent.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let object = payload.as_object()?;
        let text = |field: &str| {
            object
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let identifier = |field: &str| match object.get(field) {
            Some(Value::Number(number)) => Some(number.to_string()),
            _ => text(field),
        };

        let profile = Self {
            id: identifier("_id").or_else(|| identifier("id")),
            email: text("email"),
            name: text("name"),
            role: text("role"),
        };
        profile.has_identity().then_some(profile)
    }
}
