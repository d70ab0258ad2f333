use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::broker::{ProviderError, ProviderProducer, WireDestination, WireMessage};
use crate::client::destination::{self, Destination};
use crate::client::session::Session;
use crate::message::{Message, converter};
use crate::utils::error::{Error, Result};

const SEND_ERROR: &str = "Error occurred while sending the message";

pub(crate) struct ProducerInner {
    session: Session,
    provider: Mutex<Box<dyn ProviderProducer>>,
    closed: AtomicBool,
}

impl ProducerInner {
    /// Closes the provider producer once; later calls do nothing.
    pub(crate) async fn shutdown(&self) -> std::result::Result<(), ProviderError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.session.lock_for_close().await;
        self.provider.lock().await.close().await
    }
}

/// Sends messages on behalf of a session.
///
/// A producer opened without a destination is unidentified and every message
/// has to go through [`Producer::send_to`]. Closing the session closes its
/// producers too.
pub struct Producer {
    inner: Arc<ProducerInner>,
    destination: Option<Destination>,
}

impl Producer {
    pub async fn open(session: &Session, destination: Option<&Destination>) -> Result<Producer> {
        if let Some(descriptor) = destination {
            destination::check(descriptor)?;
        }
        let mut provider_session = session.lock().await?;
        let wire_destination = match destination {
            Some(descriptor) => Some(destination::resolve(&mut **provider_session, descriptor).await?),
            None => None,
        };
        let provider = provider_session
            .create_producer(wire_destination.as_ref())
            .await
            .map_err(|e| Error::provider("Error occurred while initializing the producer", e))?;
        drop(provider_session);

        let inner = Arc::new(ProducerInner {
            session: session.clone(),
            provider: Mutex::new(provider),
            closed: AtomicBool::new(false),
        });
        session.register_producer(Arc::downgrade(&inner));
        Ok(Producer {
            inner,
            destination: destination.cloned(),
        })
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Sends to the destination the producer was opened with.
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        let mut provider_session = self.inner.session.lock().await?;
        let wire = converter::to_wire(&mut **provider_session, message).await?;
        self.dispatch(None, wire).await
    }

    /// Sends to a destination resolved for this call only.
    pub async fn send_to(&self, destination: &Destination, message: &Message) -> Result<()> {
        self.ensure_open()?;
        destination::check(destination)?;
        let mut provider_session = self.inner.session.lock().await?;
        let target = destination::resolve(&mut **provider_session, destination).await?;
        let wire = converter::to_wire(&mut **provider_session, message).await?;
        self.dispatch(Some(&target), wire).await
    }

    pub async fn close(&self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| Error::provider("Error occurred while closing the producer", e))
    }

    async fn dispatch(
        &self,
        destination: Option<&WireDestination>,
        wire: WireMessage,
    ) -> Result<()> {
        let message_id = self
            .inner
            .provider
            .lock()
            .await
            .send(destination, wire)
            .await
            .map_err(|e| Error::provider(SEND_ERROR, e))?;
        tracing::debug!(message_id = %message_id, "message sent");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("Producer is closed"));
        }
        self.inner.session.ensure_open()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("destination", &self.destination)
            .field("closed", &self.is_closed())
            .finish()
    }
}
