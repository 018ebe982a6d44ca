//! Request/reply wire bodies
//!
//! A call travels as `{correlationId, data}` under its event name. The reply
//! comes back under the decimal id as action with `{data}` or `{error}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Body key carrying the correlation id
pub const CORRELATION_KEY: &str = "correlationId";

/// Older peers put the correlation id under this key
pub const LEGACY_CORRELATION_KEY: &str = "__ipc_callback__";

/// Identifier of one outstanding call
///
/// Ids start at 1 and are never reused for the lifetime of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Interpret an envelope action as a correlation id
    ///
    /// Only plain decimal digits qualify. Signs, whitespace, fractions and
    /// values that overflow `u64` are not ids and fall through to events.
    pub fn from_action(action: &str) -> Option<Self> {
        if action.is_empty() || !action.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        action.parse().ok().map(Self)
    }

    /// Interpret a JSON value (number or numeric string) as a correlation id
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Self),
            Value::String(s) => Self::from_action(s),
            _ => None,
        }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound call addressed to this worker
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    /// Id the caller expects in the reply action
    pub id: CallId,
    /// Call arguments
    pub data: Value,
}

impl CallRequest {
    /// Recognise a call-wrapper body
    ///
    /// Returns `None` for plain event bodies.
    pub fn from_body(body: &Value) -> Option<Self> {
        let obj = body.as_object()?;
        let raw = obj
            .get(CORRELATION_KEY)
            .or_else(|| obj.get(LEGACY_CORRELATION_KEY))?;
        let id = CallId::from_value(raw)?;
        Some(Self {
            id,
            data: obj.get("data").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Result carried by a reply body
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// Peer supplied a value
    Data(Value),
    /// Peer supplied an error message
    Error(String),
}

impl ReplyOutcome {
    /// Read `body.error` / `body.data`
    ///
    /// A non-null `error` wins. Non-string errors are rendered as JSON text.
    pub fn from_body(body: &Value) -> Self {
        match body.get("error") {
            None | Some(Value::Null) => {
                Self::Data(body.get("data").cloned().unwrap_or(Value::Null))
            }
            Some(Value::String(message)) => Self::Error(message.clone()),
            Some(other) => Self::Error(other.to_string()),
        }
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Data(value) => Ok(value),
            Self::Error(message) => Err(message),
        }
    }
}
