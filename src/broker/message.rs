use crate::broker::ProviderError;

/// Provider handle used to acknowledge a delivered message.
pub type DeliveryTag = u64;

pub const NON_PERSISTENT: i32 = 1;
pub const PERSISTENT: i32 = 2;
pub const DEFAULT_PRIORITY: i32 = 4;

/// Protocol level spoken by the provider that produced a message.
///
/// Providers speaking `V1_1` cannot report a delivery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    V1_1,
    #[default]
    V2_0,
}

/// A destination object as handed out by a provider session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireDestination {
    Queue(String),
    TemporaryQueue(String),
    Topic(String),
    TemporaryTopic(String),
}

impl WireDestination {
    pub fn name(&self) -> &str {
        match self {
            WireDestination::Queue(name)
            | WireDestination::TemporaryQueue(name)
            | WireDestination::Topic(name)
            | WireDestination::TemporaryTopic(name) => name,
        }
    }

    pub fn is_topic(&self) -> bool {
        matches!(
            self,
            WireDestination::Topic(_) | WireDestination::TemporaryTopic(_)
        )
    }
}

/// A property or map entry value as stored by the provider.
///
/// Covers every type a JMS style provider may return from an object
/// getter. `Object` stands for anything the provider could not express
/// as a primitive, string or byte array.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    Object { type_name: String },
}

impl WireValue {
    pub fn type_name(&self) -> &str {
        match self {
            WireValue::Boolean(_) => "boolean",
            WireValue::Byte(_) => "byte",
            WireValue::Short(_) => "short",
            WireValue::Int(_) => "int",
            WireValue::Long(_) => "long",
            WireValue::Float(_) => "float",
            WireValue::Double(_) => "double",
            WireValue::Char(_) => "char",
            WireValue::String(_) => "string",
            WireValue::Bytes(_) => "byte[]",
            WireValue::Object { type_name } => type_name,
        }
    }
}

/// Message body, one variant per message subtype.
#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Empty,
    Text(Option<String>),
    Map(Vec<(String, WireValue)>),
    Bytes(Vec<u8>),
    Stream(Vec<WireValue>),
    Object(String),
}

impl WireBody {
    pub fn type_name(&self) -> &'static str {
        match self {
            WireBody::Empty => "Message",
            WireBody::Text(_) => "TextMessage",
            WireBody::Map(_) => "MapMessage",
            WireBody::Bytes(_) => "BytesMessage",
            WireBody::Stream(_) => "StreamMessage",
            WireBody::Object(_) => "ObjectMessage",
        }
    }
}

/// Broker native message object.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub message_id: Option<String>,
    pub timestamp: i64,
    pub correlation_id: Option<String>,
    pub reply_to: Option<WireDestination>,
    pub destination: Option<WireDestination>,
    pub delivery_mode: i32,
    pub redelivered: bool,
    pub jms_type: Option<String>,
    pub expiration: i64,
    pub priority: i32,
    pub delivery_tag: Option<DeliveryTag>,
    /// Connection that published the message, used for no-local filtering.
    pub origin_connection: Option<String>,
    delivery_time: Option<i64>,
    protocol: ProtocolVersion,
    properties: Vec<(String, WireValue)>,
    body: WireBody,
}

impl WireMessage {
    pub fn new(body: WireBody, protocol: ProtocolVersion) -> Self {
        Self {
            message_id: None,
            timestamp: 0,
            correlation_id: None,
            reply_to: None,
            destination: None,
            delivery_mode: PERSISTENT,
            redelivered: false,
            jms_type: None,
            expiration: 0,
            priority: DEFAULT_PRIORITY,
            delivery_tag: None,
            origin_connection: None,
            delivery_time: None,
            protocol,
            properties: Vec::new(),
            body,
        }
    }

    pub fn body(&self) -> &WireBody {
        &self.body
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Delivery time header. Fails with `Unsupported` on 1.1 providers.
    pub fn delivery_time(&self) -> Result<i64, ProviderError> {
        match self.protocol {
            ProtocolVersion::V1_1 => Err(ProviderError::Unsupported(
                "JMSDeliveryTime is not available before JMS 2.0".to_string(),
            )),
            ProtocolVersion::V2_0 => Ok(self.delivery_time.unwrap_or(self.timestamp)),
        }
    }

    pub fn set_delivery_time(&mut self, delivery_time: i64) {
        self.delivery_time = Some(delivery_time);
    }

    pub fn set_text(&mut self, text: &str) -> Result<(), ProviderError> {
        match &mut self.body {
            WireBody::Text(slot) => {
                *slot = Some(text.to_string());
                Ok(())
            }
            other => Err(ProviderError::Format(format!(
                "cannot set text on a {}",
                other.type_name()
            ))),
        }
    }

    /// Sets a map entry, replacing any existing entry with the same name.
    pub fn set_map_value(&mut self, name: &str, value: WireValue) -> Result<(), ProviderError> {
        if name.is_empty() {
            return Err(ProviderError::Format(
                "map entry name can not be empty".to_string(),
            ));
        }
        match &mut self.body {
            WireBody::Map(entries) => {
                upsert(entries, name, value);
                Ok(())
            }
            other => Err(ProviderError::Format(format!(
                "cannot set map entries on a {}",
                other.type_name()
            ))),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProviderError> {
        match &mut self.body {
            WireBody::Bytes(buffer) => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            other => Err(ProviderError::Format(format!(
                "cannot write bytes to a {}",
                other.type_name()
            ))),
        }
    }

    pub fn set_property(&mut self, name: &str, value: WireValue) -> Result<(), ProviderError> {
        if name.is_empty() {
            return Err(ProviderError::Format(
                "property name can not be empty".to_string(),
            ));
        }
        upsert(&mut self.properties, name, value);
        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<&WireValue> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn properties(&self) -> &[(String, WireValue)] {
        &self.properties
    }
}

fn upsert(entries: &mut Vec<(String, WireValue)>, name: &str, value: WireValue) {
    match entries.iter_mut().find(|(key, _)| key == name) {
        Some(entry) => entry.1 = value,
        None => entries.push((name.to_string(), value)),
    }
}
