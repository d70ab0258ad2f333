use std::collections::BTreeMap;

use crate::broker::{ProviderSession, WireBody, WireMessage, WireValue};
use crate::client::Destination;
use crate::client::destination;
use crate::message::{AckHandle, Content, Message, Properties, Value};
use crate::utils::error::{Error, Result};

const CREATE_ERROR: &str = "Error while creating JMS message";

/// Builds a wire message for `message` on the given provider session.
///
/// The content variant picks the wire message subtype. Only the metadata the
/// application may set is copied, and only when present: correlation id,
/// reply-to, type and properties.
pub async fn to_wire(session: &mut dyn ProviderSession, message: &Message) -> Result<WireMessage> {
    let mut wire = match &message.content {
        Some(Content::Text(text)) => {
            let mut wire = session
                .create_text_message()
                .map_err(|e| Error::provider(CREATE_ERROR, e))?;
            wire.set_text(text)
                .map_err(|e| Error::provider(CREATE_ERROR, e))?;
            wire
        }
        Some(Content::Map(entries)) => {
            let mut wire = session
                .create_map_message()
                .map_err(|e| Error::provider(CREATE_ERROR, e))?;
            for (key, value) in entries {
                wire.set_map_value(key, to_wire_value(value)).map_err(|e| {
                    Error::provider(&format!("Error occurred while setting the map entry '{key}'"), e)
                })?;
            }
            wire
        }
        Some(Content::Bytes(bytes)) => {
            let mut wire = session
                .create_bytes_message()
                .map_err(|e| Error::provider(CREATE_ERROR, e))?;
            wire.write_bytes(bytes)
                .map_err(|e| Error::provider("Error occurred while writing the bytes message", e))?;
            wire
        }
        None => session
            .create_message()
            .map_err(|e| Error::provider(CREATE_ERROR, e))?,
    };

    if let Some(correlation_id) = &message.correlation_id {
        wire.correlation_id = Some(correlation_id.clone());
    }
    if let Some(reply_to) = &message.reply_to {
        let resolved = destination::resolve(session, reply_to).await.map_err(|e| {
            Error::wrap("Error occurred while setting the reply-to destination", e)
        })?;
        wire.reply_to = Some(resolved);
    }
    if let Some(message_type) = &message.message_type {
        wire.jms_type = Some(message_type.clone());
    }
    for (name, value) in message.properties.iter() {
        wire.set_property(name, to_wire_value(value)).map_err(|e| {
            Error::provider(&format!("Error occurred while setting the property '{name}'"), e)
        })?;
    }
    Ok(wire)
}

/// Builds an application message from a delivered wire message.
///
/// Text, map and bytes bodies map onto the matching [`Content`]; a generic
/// message becomes a message without content. A provider that cannot report
/// the delivery time leaves `delivered_time` empty.
pub fn from_wire(wire: WireMessage, ack: Option<AckHandle>) -> Result<Message> {
    let content = match wire.body() {
        WireBody::Empty => None,
        WireBody::Text(text) => Some(Content::Text(text.clone().unwrap_or_default())),
        WireBody::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                map.insert(key.clone(), from_wire_value(key, value)?);
            }
            Some(Content::Map(map))
        }
        WireBody::Bytes(bytes) => Some(Content::Bytes(bytes.clone())),
        other @ (WireBody::Stream(_) | WireBody::Object(_)) => {
            return Err(Error::conversion(format!(
                "Unsupported message type: {}",
                other.type_name()
            )));
        }
    };

    let mut properties = Properties::new();
    for (key, value) in wire.properties() {
        properties.insert(key.clone(), from_wire_value(key, value)?);
    }

    let delivered_time = match wire.delivery_time() {
        Ok(time) => Some(time),
        Err(e) if e.is_unsupported() => None,
        Err(e) => return Err(Error::provider("Error occurred while reading the delivery time", e)),
    };

    let mut message = Message {
        message_id: wire.message_id.clone(),
        timestamp: Some(wire.timestamp),
        correlation_id: wire.correlation_id.clone(),
        reply_to: wire.reply_to.as_ref().map(Destination::from_wire),
        destination: wire.destination.as_ref().map(Destination::from_wire),
        delivery_mode: Some(wire.delivery_mode),
        redelivered: wire.redelivered,
        message_type: wire.jms_type.clone(),
        expiration: Some(wire.expiration),
        delivered_time,
        priority: Some(wire.priority),
        properties,
        content,
        ..Message::default()
    };
    message.set_ack_handle(ack);
    Ok(message)
}

/// Picks the narrowest wire setter for a value.
fn to_wire_value(value: &Value) -> WireValue {
    match value {
        Value::Boolean(b) => WireValue::Boolean(*b),
        Value::Int(i) => WireValue::Long(*i),
        Value::Byte(b) => WireValue::Byte(*b as i8),
        Value::Float(f) => WireValue::Double(*f),
        Value::String(s) => WireValue::String(s.clone()),
        Value::Bytes(b) => WireValue::Bytes(b.clone()),
    }
}

fn from_wire_value(key: &str, value: &WireValue) -> Result<Value> {
    match value {
        WireValue::Boolean(b) => Ok(Value::Boolean(*b)),
        WireValue::Byte(b) => Ok(Value::Byte(*b as u8)),
        WireValue::Short(v) => Ok(Value::Int(i64::from(*v))),
        WireValue::Int(v) => Ok(Value::Int(i64::from(*v))),
        WireValue::Long(v) => Ok(Value::Int(*v)),
        WireValue::Float(v) => Ok(Value::Float(f64::from(*v))),
        WireValue::Double(v) => Ok(Value::Float(*v)),
        WireValue::Char(c) => Ok(Value::String(c.to_string())),
        WireValue::String(s) => Ok(Value::String(s.clone())),
        WireValue::Bytes(b) => Ok(Value::Bytes(b.clone())),
        WireValue::Object { type_name } => Err(Error::conversion(format!(
            "Unsupported value type '{type_name}' for key '{key}'"
        ))),
    }
}
