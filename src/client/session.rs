use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::broker::engine::lock;
use crate::broker::{DeliveryTag, ProviderSession};
use crate::client::connection::Connection;
use crate::client::consumer::ConsumerInner;
use crate::client::destination::{self, Destination};
use crate::client::producer::ProducerInner;
use crate::utils::error::{Error, Result};

/// Acknowledgement policy of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AckMode {
    /// Messages are acknowledged as they are delivered.
    #[default]
    Auto,
    /// The application acknowledges explicitly; acknowledgement is cumulative.
    Client,
    /// Lazy acknowledgement, duplicates are possible.
    DupsOk,
    /// Work is committed or rolled back as a unit.
    Transacted,
}

impl AckMode {
    pub fn is_transacted(self) -> bool {
        self == AckMode::Transacted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::Auto => "AUTO_ACKNOWLEDGE",
            AckMode::Client => "CLIENT_ACKNOWLEDGE",
            AckMode::DupsOk => "DUPS_OK_ACKNOWLEDGE",
            AckMode::Transacted => "SESSION_TRANSACTED",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AUTO_ACKNOWLEDGE" => Ok(AckMode::Auto),
            "CLIENT_ACKNOWLEDGE" => Ok(AckMode::Client),
            "DUPS_OK_ACKNOWLEDGE" => Ok(AckMode::DupsOk),
            "SESSION_TRANSACTED" => Ok(AckMode::Transacted),
            other => Err(Error::config(format!(
                "unknown acknowledgement mode: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for AckMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AckMode> for String {
    fn from(mode: AckMode) -> Self {
        mode.as_str().to_string()
    }
}

pub(crate) struct SessionShared {
    ack_mode: AckMode,
    connection: Connection,
    provider: Mutex<Box<dyn ProviderSession>>,
    closing: watch::Sender<bool>,
    consumers: StdMutex<Vec<Weak<ConsumerInner>>>,
    producers: StdMutex<Vec<Weak<ProducerInner>>>,
}

/// A single threaded unit of work on a connection.
///
/// Every operation on the session, and on the producers and consumers made
/// from it, goes through one lock, so at most one of them touches the
/// provider session at a time. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionShared>,
}

impl Session {
    /// Creates a session with the given acknowledgement mode.
    /// The session is transacted exactly when the mode is `Transacted`.
    pub async fn create(connection: &Connection, ack_mode: AckMode) -> Result<Session> {
        connection.ensure_open()?;
        let provider = connection
            .provider()
            .create_session(ack_mode.is_transacted(), ack_mode)
            .await
            .map_err(|e| Error::provider("Error while creating session", e))?;

        let (closing, _) = watch::channel(false);
        let session = Session {
            inner: Arc::new(SessionShared {
                ack_mode,
                connection: connection.clone(),
                provider: Mutex::new(provider),
                closing,
                consumers: StdMutex::new(Vec::new()),
                producers: StdMutex::new(Vec::new()),
            }),
        };
        connection.register_session(Arc::downgrade(&session.inner));
        tracing::debug!(client_id = %connection.client_id(), ack_mode = %ack_mode, "session created");
        Ok(session)
    }

    pub(crate) fn from_shared(inner: Arc<SessionShared>) -> Session {
        Session { inner }
    }

    pub fn ack_mode(&self) -> AckMode {
        self.inner.ack_mode
    }

    pub fn is_transacted(&self) -> bool {
        self.inner.ack_mode.is_transacted()
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closing.borrow() || self.inner.connection.is_closed()
    }

    /// Commits the current transaction. Fails on a non-transacted session.
    pub async fn commit(&self) -> Result<()> {
        let mut provider = self.lock().await?;
        provider
            .commit()
            .await
            .map_err(|e| Error::provider("Error while committing the JMS transaction", e))
    }

    /// Rolls back the current transaction. Fails on a non-transacted session.
    pub async fn rollback(&self) -> Result<()> {
        let mut provider = self.lock().await?;
        provider
            .rollback()
            .await
            .map_err(|e| Error::provider("Error while rolling back the JMS transaction", e))
    }

    /// Redelivers every message consumed but not yet acknowledged.
    pub async fn recover(&self) -> Result<()> {
        let mut provider = self.lock().await?;
        provider
            .recover()
            .await
            .map_err(|e| Error::provider("Error while recovering the JMS session", e))
    }

    /// Removes a durable subscription. It must exist and have no active consumer.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut provider = self.lock().await?;
        provider.unsubscribe(subscription_id).await.map_err(|e| {
            Error::provider(
                "Error while unsubscribing from the durable subscription",
                e,
            )
        })
    }

    /// Resolves a destination descriptor against this session.
    pub async fn create_destination(&self, descriptor: &Destination) -> Result<Destination> {
        destination::check(descriptor)?;
        let mut provider = self.lock().await?;
        let wire = destination::resolve(&mut **provider, descriptor).await?;
        Ok(Destination::from_wire(&wire))
    }

    /// Closes the session along with its consumers and producers. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closing.send_replace(true) {
            return Ok(());
        }

        let consumers: Vec<Arc<ConsumerInner>> = lock(&self.inner.consumers)
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for consumer in consumers {
            if let Err(e) = consumer.shutdown().await {
                tracing::debug!(error = %e, "consumer close during session close");
            }
        }

        let producers: Vec<Arc<ProducerInner>> = lock(&self.inner.producers)
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for producer in producers {
            if let Err(e) = producer.shutdown().await {
                tracing::debug!(error = %e, "producer close during session close");
            }
        }

        let mut provider = self.inner.provider.lock().await;
        provider
            .close()
            .await
            .map_err(|e| Error::provider("Error occurred while closing the session", e))?;
        tracing::debug!(client_id = %self.inner.connection.client_id(), "session closed");
        Ok(())
    }

    pub(crate) async fn acknowledge(&self, tag: DeliveryTag) -> Result<()> {
        let mut provider = self.lock().await?;
        provider.acknowledge(tag).await.map_err(|e| {
            Error::provider("Error occurred while sending acknowledgement for the message", e)
        })
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.inner.connection.ensure_open()?;
        if *self.inner.closing.borrow() {
            return Err(Error::closed("Session is closed"));
        }
        Ok(())
    }

    /// Takes the session lock. Everything touching the provider session goes through here.
    pub(crate) async fn lock(&self) -> Result<MutexGuard<'_, Box<dyn ProviderSession>>> {
        self.ensure_open()?;
        Ok(self.inner.provider.lock().await)
    }

    /// Takes the session lock even when the session is closing.
    pub(crate) async fn lock_for_close(&self) -> MutexGuard<'_, Box<dyn ProviderSession>> {
        self.inner.provider.lock().await
    }

    pub(crate) fn closing(&self) -> watch::Receiver<bool> {
        self.inner.closing.subscribe()
    }

    pub(crate) fn register_consumer(&self, consumer: Weak<ConsumerInner>) {
        let mut consumers = lock(&self.inner.consumers);
        consumers.retain(|c| c.strong_count() > 0);
        consumers.push(consumer);
    }

    pub(crate) fn register_producer(&self, producer: Weak<ProducerInner>) {
        let mut producers = lock(&self.inner.producers);
        producers.retain(|p| p.strong_count() > 0);
        producers.push(producer);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("ack_mode", &self.inner.ack_mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
