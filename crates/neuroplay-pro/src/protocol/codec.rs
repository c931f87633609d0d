//! Text-frame codec for the hub protocol.
//!
//! Outgoing frames are either a bare command string (`help`, `listdevices`)
//! or a single-line JSON object whose first field is `command`. Incoming
//! frames are always JSON objects; anything else is reported as
//! [`NeuroplayError::MalformedMessage`] and dropped by the caller.

use serde_json::{Map, Value};

use crate::error::{NeuroplayError, NeuroplayResult};

/// One outgoing text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingFrame {
    /// A plain command string, sent verbatim.
    Bare(String),
    /// A JSON object with a `command` field and named parameters.
    Object(Map<String, Value>),
}

impl OutgoingFrame {
    /// A bare command frame.
    pub fn bare(command: impl Into<String>) -> Self {
        OutgoingFrame::Bare(command.into())
    }

    /// A JSON object frame. `command` is always serialized first, followed by
    /// `fields` in the given order.
    pub fn object<'a>(command: &str, fields: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let mut map = Map::new();
        map.insert("command".to_string(), Value::String(command.to_string()));
        for (key, value) in fields {
            map.insert(key.to_string(), value);
        }
        OutgoingFrame::Object(map)
    }

    /// Serialize to the text that goes on the wire.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            OutgoingFrame::Bare(text) => text.clone(),
            OutgoingFrame::Object(map) => Value::Object(map.clone()).to_string(),
        }
    }

    /// The command name carried by this frame.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            OutgoingFrame::Bare(text) => text,
            OutgoingFrame::Object(map) => map.get("command").and_then(Value::as_str).unwrap_or(""),
        }
    }

    /// A named parameter of an object frame.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            OutgoingFrame::Bare(_) => None,
            OutgoingFrame::Object(map) => map.get(name),
        }
    }
}

impl From<&str> for OutgoingFrame {
    fn from(command: &str) -> Self {
        OutgoingFrame::bare(command)
    }
}

impl From<String> for OutgoingFrame {
    fn from(command: String) -> Self {
        OutgoingFrame::Bare(command)
    }
}

/// A decoded hub reply.
///
/// `command`, `result` and `error` are lifted out of the object; every field
/// (including those three) stays reachable through [`field`](Self::field).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    command: String,
    result: bool,
    error: Option<String>,
    fields: Map<String, Value>,
}

impl DecodedMessage {
    /// Build a message from an already-parsed JSON object.
    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        let command = fields
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let result = fields.get("result").and_then(Value::as_bool).unwrap_or(false);
        // A present-but-null error is treated as absent.
        let error = match fields.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        };
        Self {
            command,
            result,
            error,
            fields,
        }
    }

    /// Command name as sent by the hub; empty if absent.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The `result` flag; `false` if absent.
    #[must_use]
    pub fn result(&self) -> bool {
        self.result
    }

    /// The hub-reported error text, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Numeric field, `0.0` if absent or not a number.
    #[must_use]
    pub fn f64_field(&self, name: &str) -> f64 {
        self.field(name).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Integer field, `0` if absent. Floats are truncated.
    #[must_use]
    pub fn i64_field(&self, name: &str) -> i64 {
        self.field(name).map_or(0, value_to_i64)
    }

    /// String field, empty if absent or not a string.
    #[must_use]
    pub fn str_field(&self, name: &str) -> &str {
        self.field(name).and_then(Value::as_str).unwrap_or_default()
    }

    /// Array field, empty if absent or not an array.
    #[must_use]
    pub fn array_field(&self, name: &str) -> &[Value] {
        self.field(name)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Decode one incoming text frame.
///
/// # Errors
/// Returns [`NeuroplayError::MalformedMessage`] when the frame is not valid
/// JSON or is valid JSON but not an object.
pub fn decode(frame: &str) -> NeuroplayResult<DecodedMessage> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| NeuroplayError::MalformedMessage {
            reason: e.to_string(),
        })?;
    match value {
        Value::Object(map) => Ok(DecodedMessage::from_map(map)),
        other => Err(NeuroplayError::MalformedMessage {
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
    }
}

/// Lenient integer conversion used for timestamps and counters.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn value_to_i64(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .unwrap_or(0)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
