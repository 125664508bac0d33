//! Message taxonomy — the five message classes that travel between layers
//!
//! Wire form: `{"type": "<kind>", "message": <any JSON>}`. Anything else is
//! rejected at decode time and never reaches a layer's processing function.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Control,
    Data,
    Request,
    Response,
    Telemetry,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::Control,
        MessageKind::Data,
        MessageKind::Request,
        MessageKind::Response,
        MessageKind::Telemetry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Control => "control",
            MessageKind::Data => "data",
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Telemetry => "telemetry",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "control" => Ok(MessageKind::Control),
            "data" => Ok(MessageKind::Data),
            "request" => Ok(MessageKind::Request),
            "response" => Ok(MessageKind::Response),
            "telemetry" => Ok(MessageKind::Telemetry),
            other => Err(Error::invalid_message(format!(
                "unknown message type '{}'",
                other
            ))),
        }
    }
}

/// A tagged, immutable inter-layer message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: MessageKind,
    message: Value,
}

impl Message {
    pub fn new(kind: MessageKind, message: impl Into<Value>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn control(message: impl Into<Value>) -> Self {
        Self::new(MessageKind::Control, message)
    }

    pub fn data(message: impl Into<Value>) -> Self {
        Self::new(MessageKind::Data, message)
    }

    pub fn request(message: impl Into<Value>) -> Self {
        Self::new(MessageKind::Request, message)
    }

    pub fn response(message: impl Into<Value>) -> Self {
        Self::new(MessageKind::Response, message)
    }

    pub fn telemetry(message: impl Into<Value>) -> Self {
        Self::new(MessageKind::Telemetry, message)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.message
    }

    /// The payload as text, when it is a JSON string.
    pub fn text(&self) -> Option<&str> {
        self.message.as_str()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a delivery body.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::invalid_message(format!("not JSON: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::invalid_message("expected a JSON object"))?;

        let kind = obj
            .get("type")
            .ok_or_else(|| Error::invalid_message("missing 'type'"))?
            .as_str()
            .ok_or_else(|| Error::invalid_message("'type' must be a string"))?
            .parse::<MessageKind>()?;

        let message = obj
            .get("message")
            .cloned()
            .ok_or_else(|| Error::invalid_message("missing 'message'"))?;

        Ok(Self { kind, message })
    }
}

/// The five class-partitioned lists a layer actor collects in one tick.
/// Each list keeps arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageBatch {
    pub control: Vec<Message>,
    pub data: Vec<Message>,
    pub request: Vec<Message>,
    pub response: Vec<Message>,
    pub telemetry: Vec<Message>,
}

impl MessageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.list_mut(message.kind()).push(message);
    }

    pub fn get(&self, kind: MessageKind) -> &[Message] {
        match kind {
            MessageKind::Control => &self.control,
            MessageKind::Data => &self.data,
            MessageKind::Request => &self.request,
            MessageKind::Response => &self.response,
            MessageKind::Telemetry => &self.telemetry,
        }
    }

    fn list_mut(&mut self, kind: MessageKind) -> &mut Vec<Message> {
        match kind {
            MessageKind::Control => &mut self.control,
            MessageKind::Data => &mut self.data,
            MessageKind::Request => &mut self.request,
            MessageKind::Response => &mut self.response,
            MessageKind::Telemetry => &mut self.telemetry,
        }
    }

    pub fn len(&self) -> usize {
        MessageKind::ALL.iter().map(|k| self.get(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Message> for MessageBatch {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut batch = MessageBatch::new();
        for message in iter {
            batch.push(message);
        }
        batch
    }
}

/// What a layer's processing function hands back for one tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerOutput {
    pub northbound: Vec<Message>,
    pub southbound: Vec<Message>,
}

impl LayerOutput {
    pub fn new(northbound: Vec<Message>, southbound: Vec<Message>) -> Self {
        Self {
            northbound,
            southbound,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.northbound.is_empty() && self.southbound.is_empty()
    }

    pub fn len(&self) -> usize {
        self.northbound.len() + self.southbound.len()
    }
}
