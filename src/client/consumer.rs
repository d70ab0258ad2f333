use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use crate::broker::{MessageListener, ProviderConsumer, ProviderError, WireMessage};
use crate::client::destination::{self, Destination};
use crate::client::session::Session;
use crate::message::{AckHandle, Message, converter};
use crate::utils::error::{Error, Result};

const RECEIVE_ERROR: &str = "Error occurred while receiving messages";

/// Kind of subscription a consumer is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerType {
    #[default]
    Default,
    Durable,
    Shared,
    SharedDurable,
}

impl fmt::Display for ConsumerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerType::Default => "DEFAULT",
            ConsumerType::Durable => "DURABLE",
            ConsumerType::Shared => "SHARED",
            ConsumerType::SharedDurable => "SHARED_DURABLE",
        };
        f.write_str(name)
    }
}

/// What a consumer listens to and how.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    pub destination: Destination,
    pub message_selector: Option<String>,
    pub no_local: bool,
    pub consumer_type: ConsumerType,
    /// Required for every consumer type except `Default`.
    pub subscriber_name: Option<String>,
}

impl ConsumerOptions {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            message_selector: None,
            no_local: false,
            consumer_type: ConsumerType::Default,
            subscriber_name: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.message_selector = Some(selector.into());
        self
    }

    pub fn with_no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    pub fn with_subscription(mut self, consumer_type: ConsumerType, name: impl Into<String>) -> Self {
        self.consumer_type = consumer_type;
        self.subscriber_name = Some(name.into());
        self
    }

    /// Checks the options without touching the provider.
    pub fn validate(&self) -> Result<()> {
        if self.consumer_type != ConsumerType::Default {
            let named = self
                .subscriber_name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty());
            if !named {
                return Err(Error::config(format!(
                    "Subscriber name cannot be empty for consumer type: {}",
                    self.consumer_type
                )));
            }
            if !self.destination.kind.is_topic() {
                return Err(Error::config(format!(
                    "consumer type {} requires a topic destination",
                    self.consumer_type
                )));
            }
        }
        destination::check(&self.destination)
    }

    fn selector(&self) -> Option<&str> {
        self.message_selector
            .as_deref()
            .filter(|selector| !selector.trim().is_empty())
    }
}

pub(crate) struct ConsumerInner {
    session: Session,
    provider: Mutex<Box<dyn ProviderConsumer>>,
    closing: watch::Sender<bool>,
}

impl ConsumerInner {
    /// Closes the provider consumer once; later calls do nothing.
    pub(crate) async fn shutdown(&self) -> std::result::Result<(), ProviderError> {
        if self.closing.send_replace(true) {
            return Ok(());
        }
        let _guard = self.session.lock_for_close().await;
        self.provider.lock().await.close().await
    }
}

/// Pull style consumer. Clones share the same underlying consumer.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    /// Opens a consumer on the session.
    ///
    /// The subscriber name and destination are validated before the provider
    /// is called. The consumer type picks the provider call:
    ///
    /// | type | provider call |
    /// |---|---|
    /// | `Default` | `create_consumer` |
    /// | `Durable` | `create_durable_subscriber` |
    /// | `Shared` | `create_shared_consumer` |
    /// | `SharedDurable` | `create_shared_durable_consumer` |
    pub async fn open(session: &Session, options: &ConsumerOptions) -> Result<Consumer> {
        options.validate()?;

        let mut provider_session = session.lock().await?;
        let target = destination::resolve(&mut **provider_session, &options.destination).await?;
        let selector = options.selector();
        let name = options.subscriber_name.as_deref().unwrap_or_default();

        let created = match options.consumer_type {
            ConsumerType::Default => {
                provider_session
                    .create_consumer(&target, selector, options.no_local)
                    .await
            }
            ConsumerType::Durable => {
                provider_session
                    .create_durable_subscriber(&target, name, selector, options.no_local)
                    .await
            }
            ConsumerType::Shared => {
                provider_session
                    .create_shared_consumer(&target, name, selector)
                    .await
            }
            ConsumerType::SharedDurable => {
                provider_session
                    .create_shared_durable_consumer(&target, name, selector)
                    .await
            }
        };
        let provider = created
            .map_err(|e| Error::provider("Error occurred while initializing the consumer", e))?;
        drop(provider_session);

        let (closing, _) = watch::channel(false);
        let inner = Arc::new(ConsumerInner {
            session: session.clone(),
            provider: Mutex::new(provider),
            closing,
        });
        session.register_consumer(Arc::downgrade(&inner));
        tracing::debug!(
            destination = ?options.destination,
            consumer_type = %options.consumer_type,
            "consumer opened"
        );
        Ok(Consumer { inner })
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Waits up to `timeout_millis` for a message. Zero waits indefinitely.
    ///
    /// Returns `Ok(None)` when the timeout expires. Closing the consumer or
    /// its session while waiting fails the call with a closed error.
    pub async fn receive(&self, timeout_millis: u64) -> Result<Option<Message>> {
        let timeout = (timeout_millis > 0).then(|| Duration::from_millis(timeout_millis));
        self.fetch(Some(timeout)).await
    }

    /// Returns a message if one is immediately available.
    pub async fn receive_no_wait(&self) -> Result<Option<Message>> {
        self.fetch(None).await
    }

    pub async fn close(&self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| Error::provider("Error occurred while closing the message consumer", e))
    }

    /// Switches the consumer to push delivery.
    pub(crate) async fn set_message_listener(&self, listener: Arc<dyn MessageListener>) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.inner.session.lock().await?;
        self.inner
            .provider
            .lock()
            .await
            .set_message_listener(listener)
            .map_err(|e| Error::provider("Error occurred while setting the message listener", e))
    }

    /// `None` polls, `Some(None)` waits indefinitely.
    async fn fetch(&self, wait: Option<Option<Duration>>) -> Result<Option<Message>> {
        self.ensure_open()?;
        let mut session_closing = self.inner.session.closing();
        let mut consumer_closing = self.inner.closing.subscribe();

        let _guard = self.inner.session.lock().await?;
        let mut provider = self.inner.provider.lock().await;
        let received = match wait {
            None => provider.receive_no_wait().await,
            Some(timeout) => {
                tokio::select! {
                    received = provider.receive(timeout) => received,
                    _ = closed(&mut session_closing) => {
                        return Err(Error::closed("Session is closed"));
                    }
                    _ = closed(&mut consumer_closing) => {
                        return Err(Error::closed("Consumer is closed"));
                    }
                }
            }
        };

        match received.map_err(|e| Error::provider(RECEIVE_ERROR, e))? {
            Some(wire) => self.convert(wire).map(Some),
            None => Ok(None),
        }
    }

    fn convert(&self, wire: WireMessage) -> Result<Message> {
        let handle = wire
            .delivery_tag
            .map(|tag| AckHandle::new(self.inner.session.clone(), tag));
        converter::from_wire(wire, handle).map_err(|e| Error::wrap(RECEIVE_ERROR, e))
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.inner.closing.borrow() {
            return Err(Error::closed("Consumer is closed"));
        }
        self.inner.session.ensure_open()
    }
}

async fn closed(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|closed| *closed).await;
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("closed", &*self.inner.closing.borrow())
            .finish()
    }
}
