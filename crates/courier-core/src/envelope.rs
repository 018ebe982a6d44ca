//! Channel Envelope
//!
//! The unit of traffic on the worker/supervisor channel. An envelope carries
//! a destination identity, an action string and a structured body. The
//! action is one of three mutually exclusive classes: a reserved control
//! action, a decimal correlation id (a reply), or a free-form event name.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::call::CallId;

/// One unit of channel traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Destination identity (opaque)
    pub to: String,
    /// Event name, correlation id or reserved control action
    pub action: String,
    /// Structured payload
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    /// Create a plain envelope
    pub fn new(to: impl Into<String>, action: impl Into<String>, body: Value) -> Self {
        Self {
            to: to.into(),
            action: action.into(),
            body,
        }
    }

    /// Create an outbound call envelope
    ///
    /// The action stays the semantic event name; the correlation id rides in
    /// the body next to the data.
    pub fn call(to: impl Into<String>, event: impl Into<String>, id: CallId, data: Value) -> Self {
        Self::new(to, event, json!({ "correlationId": id.get(), "data": data }))
    }

    /// Create a reply envelope for call `id`
    ///
    /// Replies use the decimal id as their action, which is how the receiving
    /// side tells them apart from events.
    pub fn reply(to: impl Into<String>, id: CallId, result: Result<Value, String>) -> Self {
        let body = match result {
            Ok(data) => json!({ "correlationId": id.get(), "data": data }),
            Err(error) => json!({ "correlationId": id.get(), "error": error }),
        };
        Self::new(to, id.to_string(), body)
    }
}
