//! The `broker` module is the boundary between `brokerlink` and the broker
//! transport.
//!
//! Everything a provider has to supply is described here as a set of
//! object-safe traits shaped after the JMS connection/session model:
//! [`Provider`] builds [`ProviderConnection`]s, connections build
//! [`ProviderSession`]s, and sessions build destinations, wire messages,
//! producers and consumers. Providers are looked up by name through an
//! explicit [`ProviderRegistry`].
//!
//! The module also ships `memory`, a complete in-memory broker that
//! implements the traits. It is used by the test suite and the demo binary.

pub mod engine;
pub mod memory;
pub mod message;
pub mod selector;
pub mod topic;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::client::AckMode;

pub use engine::InMemoryBroker;
pub use memory::InMemoryProvider;
pub use message::{DeliveryTag, ProtocolVersion, WireBody, WireDestination, WireMessage, WireValue};

/// Native property naming the provider implementation.
pub const INITIAL_CONTEXT_FACTORY: &str = "java.naming.factory.initial";
/// Native property carrying the broker url.
pub const PROVIDER_URL: &str = "java.naming.provider.url";
/// Native property naming the connection factory to look up.
pub const CONNECTION_FACTORY_NAME: &str = "transport.jms.ConnectionFactoryJNDIName";
pub const CONNECTION_FACTORY_TYPE: &str = "transport.jms.ConnectionFactoryType";
pub const DESTINATION_NAME: &str = "transport.jms.Destination";
pub const SESSION_ACKNOWLEDGEMENT: &str = "transport.jms.SessionAcknowledgement";
pub const DURABLE_SUBSCRIBER_CLIENT_ID: &str = "transport.jms.DurableSubscriberClientId";
pub const DURABLE_SUBSCRIBER_NAME: &str = "transport.jms.DurableSubscriberName";

/// Provider properties keyed by native property name.
pub type ProviderProperties = BTreeMap<String, String>;

/// Errors raised by a broker provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("resource closed: {0}")]
    Closed(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("invalid message selector: {0}")]
    InvalidSelector(String),

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("authentication failed: {0}")]
    Security(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("message format error: {0}")]
    Format(String),
}

impl ProviderError {
    pub fn is_closed(&self) -> bool {
        matches!(self, ProviderError::Closed(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProviderError::Unsupported(_))
    }
}

/// Username and password handed to the connection factory.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Receives asynchronous faults raised by a connection.
pub trait ExceptionListener: Send + Sync {
    fn on_exception(&self, error: ProviderError);
}

/// Receives messages pushed by a consumer. Called on the provider's delivery task.
///
/// The provider delivers the next message only after `on_message` returns.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: WireMessage);
}

/// A broker implementation able to open connections.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(
        &self,
        properties: &ProviderProperties,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn ProviderConnection>, ProviderError>;
}

/// A live broker connection. Connections are safe to share between tasks.
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    fn client_id(&self) -> Option<String>;

    fn set_client_id(&self, client_id: &str) -> Result<(), ProviderError>;

    fn set_exception_listener(&self, listener: Arc<dyn ExceptionListener>);

    async fn start(&self) -> Result<(), ProviderError>;

    async fn stop(&self) -> Result<(), ProviderError>;

    async fn close(&self) -> Result<(), ProviderError>;

    async fn create_session(
        &self,
        transacted: bool,
        ack_mode: AckMode,
    ) -> Result<Box<dyn ProviderSession>, ProviderError>;
}

/// A single threaded unit of work. Callers must serialize every call.
#[async_trait]
pub trait ProviderSession: Send {
    async fn create_queue(&mut self, name: &str) -> Result<WireDestination, ProviderError>;

    async fn create_temporary_queue(&mut self) -> Result<WireDestination, ProviderError>;

    async fn create_topic(&mut self, name: &str) -> Result<WireDestination, ProviderError>;

    async fn create_temporary_topic(&mut self) -> Result<WireDestination, ProviderError>;

    fn create_message(&mut self) -> Result<WireMessage, ProviderError>;

    fn create_text_message(&mut self) -> Result<WireMessage, ProviderError>;

    fn create_map_message(&mut self) -> Result<WireMessage, ProviderError>;

    fn create_bytes_message(&mut self) -> Result<WireMessage, ProviderError>;

    /// Creates a producer. `None` creates an unidentified producer.
    async fn create_producer(
        &mut self,
        destination: Option<&WireDestination>,
    ) -> Result<Box<dyn ProviderProducer>, ProviderError>;

    async fn create_consumer(
        &mut self,
        destination: &WireDestination,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError>;

    async fn create_durable_subscriber(
        &mut self,
        topic: &WireDestination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError>;

    async fn create_shared_consumer(
        &mut self,
        topic: &WireDestination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError>;

    async fn create_shared_durable_consumer(
        &mut self,
        topic: &WireDestination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError>;

    /// Acknowledges every message consumed by this session up to and including `tag`.
    async fn acknowledge(&mut self, tag: DeliveryTag) -> Result<(), ProviderError>;

    async fn commit(&mut self) -> Result<(), ProviderError>;

    async fn rollback(&mut self) -> Result<(), ProviderError>;

    async fn recover(&mut self) -> Result<(), ProviderError>;

    async fn unsubscribe(&mut self, name: &str) -> Result<(), ProviderError>;

    async fn close(&mut self) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait ProviderProducer: Send {
    /// Sends a message and returns the message id assigned by the broker.
    async fn send(
        &mut self,
        destination: Option<&WireDestination>,
        message: WireMessage,
    ) -> Result<String, ProviderError>;

    async fn close(&mut self) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait ProviderConsumer: Send {
    /// Waits for the next message. `None` waits indefinitely.
    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<WireMessage>, ProviderError>;

    async fn receive_no_wait(&mut self) -> Result<Option<WireMessage>, ProviderError>;

    fn set_message_listener(
        &mut self,
        listener: Arc<dyn MessageListener>,
    ) -> Result<(), ProviderError>;

    async fn close(&mut self) -> Result<(), ProviderError>;
}

/// Named providers available to `Connection::open`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding only a fresh in-memory provider under its default name.
    pub fn in_memory() -> Self {
        Self::new().with_provider(memory::PROVIDER_NAME, Arc::new(InMemoryProvider::new()))
    }

    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(name, provider);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers.get(name).cloned().ok_or_else(|| {
            ProviderError::Lookup(format!(
                "no provider registered for initial context factory '{name}'"
            ))
        })
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}
