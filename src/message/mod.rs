//! The `message` module holds the provider neutral message model and the
//! converter that maps it to and from provider wire messages.
//!
//! A [`Message`] carries header metadata, a property map and one of three
//! [`Content`] shapes. Property and map values are restricted to the six
//! kinds of [`Value`]. Received messages also carry an [`AckHandle`] that
//! lets the application acknowledge them against the session they came from.

pub mod converter;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::broker::DeliveryTag;
use crate::client::{Destination, Session};
use crate::utils::error::{Error, Result};

/// A property or map entry value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Int(i64),
    Byte(u8),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Maps untyped JSON onto a [`Value`].
///
/// Arrays are accepted only when every element fits in a byte. `null`,
/// objects and numbers that are neither an `i64` nor an `f64` are rejected.
impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        use serde_json::Value as Json;

        match json {
            Json::Bool(b) => Ok(Value::Boolean(b)),
            Json::String(s) => Ok(Value::String(s)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if n.is_f64() {
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| Error::conversion(format!("number {n} is not representable")))
                } else {
                    Err(Error::conversion(format!("number {n} is not representable")))
                }
            }
            Json::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes)
                .ok_or_else(|| Error::conversion("array is not a byte array")),
            Json::Null => Err(Error::conversion("null is not a supported value")),
            Json::Object(_) => Err(Error::conversion("nested object is not a supported value")),
        }
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Content {
    Text(String),
    Map(BTreeMap<String, Value>),
    Bytes(Vec<u8>),
}

impl Content {
    /// Builds map content from a JSON object.
    ///
    /// The first entry that is not a supported value fails the whole
    /// conversion with an error naming its key.
    pub fn map_from_json(json: serde_json::Value) -> Result<Content> {
        let serde_json::Value::Object(object) = json else {
            return Err(Error::conversion("map content must be a JSON object"));
        };
        let mut entries = BTreeMap::new();
        for (key, value) in object {
            let value = Value::try_from(value).map_err(|e| {
                Error::conversion(format!(
                    "Unsupported map value for key '{key}': {}",
                    e.message()
                ))
            })?;
            entries.insert(key, value);
        }
        Ok(Content::Map(entries))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Content::Text(_) => "Text",
            Content::Map(_) => "Map",
            Content::Bytes(_) => "Bytes",
        }
    }
}

/// Message properties in the order they were first set.
///
/// Setting a name that is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Vec<(String, Value)>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().map(|(key, value)| (key, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Properties::new();
        for (name, value) in iter {
            properties.insert(name, value);
        }
        properties
    }
}

/// Acknowledgement capability bound to the session a message was delivered on.
#[derive(Clone)]
pub struct AckHandle {
    session: Session,
    tag: DeliveryTag,
}

impl AckHandle {
    pub(crate) fn new(session: Session, tag: DeliveryTag) -> Self {
        Self { session, tag }
    }

    /// Acknowledges this message and every earlier one consumed by the same session.
    pub async fn acknowledge(&self) -> Result<()> {
        self.session.acknowledge(self.tag).await
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle").field("tag", &self.tag).finish()
    }
}

/// A provider neutral message.
///
/// Messages built by the application leave the broker assigned headers
/// (`message_id`, `timestamp`, `delivery_mode`, `expiration`, `priority`)
/// empty. Received messages have them filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Option<String>,
    pub timestamp: Option<i64>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<Destination>,
    pub destination: Option<Destination>,
    pub delivery_mode: Option<i32>,
    pub redelivered: bool,
    pub message_type: Option<String>,
    pub expiration: Option<i64>,
    /// Absent when the provider speaks a protocol without delivery time.
    pub delivered_time: Option<i64>,
    pub priority: Option<i32>,
    pub properties: Properties,
    /// `None` for a generic message that carries only metadata.
    pub content: Option<Content>,
    #[serde(skip)]
    ack: Option<AckHandle>,
}

impl Message {
    pub fn new(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Content::Text(text.into()))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Self::new(Content::Map(entries))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Content::Bytes(bytes.into()))
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name, value);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: Destination) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            Some(Content::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn is_acknowledgeable(&self) -> bool {
        self.ack.is_some()
    }

    /// Acknowledges the message. A no-op for messages that were never delivered.
    pub async fn acknowledge(&self) -> Result<()> {
        match &self.ack {
            Some(handle) => handle.acknowledge().await,
            None => Ok(()),
        }
    }

    pub(crate) fn set_ack_handle(&mut self, handle: Option<AckHandle>) {
        self.ack = handle;
    }
}
