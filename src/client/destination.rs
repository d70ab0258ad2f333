use std::fmt;

use serde::{Deserialize, Serialize};

use crate::broker::{ProviderSession, WireDestination};
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationKind {
    Queue,
    TemporaryQueue,
    Topic,
    /// Also the fallback for descriptors that do not name a kind.
    #[default]
    TemporaryTopic,
}

impl DestinationKind {
    pub fn requires_name(self) -> bool {
        matches!(self, DestinationKind::Queue | DestinationKind::Topic)
    }

    pub fn is_topic(self) -> bool {
        matches!(self, DestinationKind::Topic | DestinationKind::TemporaryTopic)
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DestinationKind::Queue => "QUEUE",
            DestinationKind::TemporaryQueue => "TEMPORARY_QUEUE",
            DestinationKind::Topic => "TOPIC",
            DestinationKind::TemporaryTopic => "TEMPORARY_TOPIC",
        };
        f.write_str(name)
    }
}

/// A destination descriptor.
///
/// Queues and topics carry a name. Temporary kinds never need one and any
/// name given is ignored when the descriptor is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "type", default)]
    pub kind: DestinationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Destination {
    pub fn new(kind: DestinationKind, name: Option<String>) -> Self {
        Self { kind, name }
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self::new(DestinationKind::Queue, Some(name.into()))
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(DestinationKind::Topic, Some(name.into()))
    }

    pub fn temporary_queue() -> Self {
        Self::new(DestinationKind::TemporaryQueue, None)
    }

    pub fn temporary_topic() -> Self {
        Self::new(DestinationKind::TemporaryTopic, None)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Descriptor for a destination handed out by the provider.
    pub fn from_wire(wire: &WireDestination) -> Self {
        match wire {
            WireDestination::Queue(name) => Destination::queue(name.clone()),
            WireDestination::Topic(name) => Destination::topic(name.clone()),
            WireDestination::TemporaryQueue(_) => Destination::temporary_queue(),
            WireDestination::TemporaryTopic(_) => Destination::temporary_topic(),
        }
    }
}

/// Checks a descriptor without touching the provider.
pub(crate) fn check(descriptor: &Destination) -> Result<()> {
    required_name(descriptor).map(|_| ())
}

fn required_name(descriptor: &Destination) -> Result<Option<&str>> {
    if !descriptor.kind.requires_name() {
        return Ok(None);
    }
    match descriptor.name.as_deref() {
        Some(name) if !name.trim().is_empty() => Ok(Some(name)),
        _ => Err(Error::config(format!(
            "destination name can not be empty for destination type: {}",
            descriptor.kind
        ))),
    }
}

/// Creates the provider destination for a descriptor.
///
/// A missing name fails before the provider is called.
pub(crate) async fn resolve(
    session: &mut dyn ProviderSession,
    descriptor: &Destination,
) -> Result<WireDestination> {
    let name = required_name(descriptor)?.unwrap_or_default();
    match descriptor.kind {
        DestinationKind::Queue => session
            .create_queue(name)
            .await
            .map_err(|e| Error::provider("Error occurred while creating the queue", e)),
        DestinationKind::TemporaryQueue => session
            .create_temporary_queue()
            .await
            .map_err(|e| Error::provider("Error creating temporary queue", e)),
        DestinationKind::Topic => session
            .create_topic(name)
            .await
            .map_err(|e| Error::provider("Error occurred while creating the topic", e)),
        DestinationKind::TemporaryTopic => session
            .create_temporary_topic()
            .await
            .map_err(|e| Error::provider("Error creating temporary topic", e)),
    }
}
