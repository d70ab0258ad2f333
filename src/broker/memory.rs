//! The `memory` provider: connections, sessions, producers and consumers
//! backed by an [`InMemoryBroker`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::engine::{InMemoryBroker, Mailbox, SubscriptionScope, lock};
use crate::broker::message::{
    DeliveryTag, ProtocolVersion, WireBody, WireDestination, WireMessage,
};
use crate::broker::selector::Selector;
use crate::broker::topic::{SubscriberId, Subscription};
use crate::broker::{
    CONNECTION_FACTORY_NAME, Credentials, DURABLE_SUBSCRIBER_CLIENT_ID, ExceptionListener,
    MessageListener, Provider, ProviderConnection, ProviderConsumer, ProviderError,
    ProviderProducer, ProviderProperties, ProviderSession,
};
use crate::client::AckMode;

/// Name the in-memory provider registers under.
pub const PROVIDER_NAME: &str = "memory";

/// Connection factory bound by default.
pub const DEFAULT_CONNECTION_FACTORY: &str = "ConnectionFactory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Stopped,
    Started,
    Closed,
}

/// Provider handing out connections to one shared [`InMemoryBroker`].
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    broker: Arc<InMemoryBroker>,
    credentials: Option<Credentials>,
    factories: HashSet<String>,
    protocol: ProtocolVersion,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::with_broker(Arc::new(InMemoryBroker::new()))
    }

    pub fn with_broker(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            credentials: None,
            factories: HashSet::from([DEFAULT_CONNECTION_FACTORY.to_string()]),
            protocol: ProtocolVersion::default(),
        }
    }

    /// Requires every connection to present these credentials.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Binds an additional connection factory name.
    pub fn with_factory(mut self, name: &str) -> Self {
        self.factories.insert(name.to_string());
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn connect(
        &self,
        properties: &ProviderProperties,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn ProviderConnection>, ProviderError> {
        let factory = properties
            .get(CONNECTION_FACTORY_NAME)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONNECTION_FACTORY);
        if !self.factories.contains(factory) {
            return Err(ProviderError::Lookup(format!(
                "connection factory '{factory}' is not bound"
            )));
        }

        if let Some(expected) = &self.credentials {
            if credentials != Some(expected) {
                return Err(ProviderError::Security(
                    "invalid username or password".to_string(),
                ));
            }
        }

        let (link, _) = watch::channel(LinkState::Stopped);
        let connection = MemoryConnection {
            id: Uuid::new_v4().to_string(),
            client_id: Mutex::new(properties.get(DURABLE_SUBSCRIBER_CLIENT_ID).cloned()),
            broker: self.broker.clone(),
            link,
            protocol: self.protocol,
            temporaries: Arc::new(Mutex::new(Vec::new())),
        };
        self.broker.stats().connection_opened();
        tracing::debug!(connection = %connection.id, factory = %factory, "in-memory connection opened");
        Ok(Box::new(connection))
    }
}

struct MemoryConnection {
    id: String,
    client_id: Mutex<Option<String>>,
    broker: Arc<InMemoryBroker>,
    link: watch::Sender<LinkState>,
    protocol: ProtocolVersion,
    temporaries: Arc<Mutex<Vec<WireDestination>>>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), ProviderError> {
        if *self.link.borrow() == LinkState::Closed {
            return Err(ProviderError::Closed("connection is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderConnection for MemoryConnection {
    fn client_id(&self) -> Option<String> {
        lock(&self.client_id).clone()
    }

    fn set_client_id(&self, client_id: &str) -> Result<(), ProviderError> {
        self.ensure_open()?;
        let mut current = lock(&self.client_id);
        if current.is_some() {
            return Err(ProviderError::IllegalState(
                "client id is already set".to_string(),
            ));
        }
        *current = Some(client_id.to_string());
        Ok(())
    }

    fn set_exception_listener(&self, listener: Arc<dyn ExceptionListener>) {
        self.broker.register_listener(&self.id, listener);
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.ensure_open()?;
        self.link.send_replace(LinkState::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.ensure_open()?;
        self.link.send_replace(LinkState::Stopped);
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        if self.link.send_replace(LinkState::Closed) == LinkState::Closed {
            return Ok(());
        }
        self.broker.remove_listener(&self.id);
        let temporaries: Vec<WireDestination> = lock(&self.temporaries).drain(..).collect();
        for destination in temporaries {
            match destination {
                WireDestination::TemporaryQueue(name) => self.broker.delete_queue(&name),
                WireDestination::TemporaryTopic(name) => self.broker.delete_topic(&name),
                _ => {}
            }
        }
        tracing::debug!(connection = %self.id, "in-memory connection closed");
        Ok(())
    }

    async fn create_session(
        &self,
        transacted: bool,
        ack_mode: AckMode,
    ) -> Result<Box<dyn ProviderSession>, ProviderError> {
        self.ensure_open()?;
        self.broker.stats().session_created();
        Ok(Box::new(MemorySession {
            core: Arc::new(SessionCore {
                connection_id: self.id.clone(),
                client_id: self.client_id(),
                broker: self.broker.clone(),
                link: self.link.subscribe(),
                transacted,
                ack_mode,
                protocol: self.protocol,
                closed: AtomicBool::new(false),
                ledger: Mutex::new(Ledger::default()),
                temporaries: self.temporaries.clone(),
            }),
        }))
    }
}

struct Delivered {
    tag: DeliveryTag,
    message: WireMessage,
    origin: Arc<Mailbox>,
}

#[derive(Default)]
struct Ledger {
    next_tag: DeliveryTag,
    unacked: Vec<Delivered>,
    staged: Vec<(WireDestination, WireMessage)>,
}

struct SessionCore {
    connection_id: String,
    client_id: Option<String>,
    broker: Arc<InMemoryBroker>,
    link: watch::Receiver<LinkState>,
    transacted: bool,
    ack_mode: AckMode,
    protocol: ProtocolVersion,
    closed: AtomicBool,
    ledger: Mutex<Ledger>,
    temporaries: Arc<Mutex<Vec<WireDestination>>>,
}

impl SessionCore {
    fn ensure_open(&self) -> Result<(), ProviderError> {
        if *self.link.borrow() == LinkState::Closed {
            return Err(ProviderError::Closed("connection is closed".to_string()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::Closed("session is closed".to_string()));
        }
        Ok(())
    }

    fn keeps_ledger(&self) -> bool {
        self.transacted || self.ack_mode == AckMode::Client
    }

    /// Tags a delivery and, when the session settles later, records it for redelivery.
    fn record_delivery(&self, mut message: WireMessage, origin: &Arc<Mailbox>) -> WireMessage {
        let mut ledger = lock(&self.ledger);
        ledger.next_tag += 1;
        let tag = ledger.next_tag;
        message.delivery_tag = Some(tag);
        if self.keeps_ledger() {
            ledger.unacked.push(Delivered {
                tag,
                message: message.clone(),
                origin: origin.clone(),
            });
        }
        message
    }

    fn redeliver_unacked(&self) {
        let unacked: Vec<Delivered> = lock(&self.ledger).unacked.drain(..).collect();
        // newest first so the oldest ends up at the head
        for delivered in unacked.into_iter().rev() {
            let mut message = delivered.message;
            message.redelivered = true;
            message.delivery_tag = None;
            delivered.origin.push_front(message);
        }
    }

    fn send(&self, destination: WireDestination, mut message: WireMessage) -> Result<String, ProviderError> {
        if let WireDestination::TemporaryQueue(name) = &destination {
            if !self.broker.has_queue(name) {
                return Err(ProviderError::InvalidDestination(format!(
                    "temporary queue '{name}' has been deleted"
                )));
            }
        }

        let message_id = format!("ID:{}", Uuid::new_v4());
        let now = Utc::now().timestamp_millis();
        message.message_id = Some(message_id.clone());
        message.timestamp = now;
        message.destination = Some(destination.clone());
        message.redelivered = false;
        message.delivery_tag = None;
        message.origin_connection = Some(self.connection_id.clone());
        if self.protocol == ProtocolVersion::V2_0 {
            message.set_delivery_time(now);
        }

        if self.transacted {
            lock(&self.ledger).staged.push((destination, message));
        } else {
            self.broker.publish(&destination, message);
        }
        Ok(message_id)
    }

    fn new_message(&self, body: WireBody) -> Result<WireMessage, ProviderError> {
        self.ensure_open()?;
        self.broker.stats().message_created();
        Ok(WireMessage::new(body, self.protocol))
    }

    fn track_temporary(&self, destination: &WireDestination) {
        lock(&self.temporaries).push(destination.clone());
    }
}

struct MemorySession {
    core: Arc<SessionCore>,
}

impl MemorySession {
    fn topic_name(destination: &WireDestination) -> Result<&str, ProviderError> {
        if destination.is_topic() {
            Ok(destination.name())
        } else {
            Err(ProviderError::InvalidDestination(format!(
                "'{}' is not a topic",
                destination.name()
            )))
        }
    }

    fn named_consumer(
        &self,
        scope: SubscriptionScope<'_>,
        topic: &WireDestination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError> {
        self.core.ensure_open()?;
        let topic = Self::topic_name(topic)?;
        let selector = selector.map(Selector::parse).transpose()?.flatten();
        let no_local = no_local.then_some(self.core.connection_id.as_str());
        let (key, mailbox) = self
            .core
            .broker
            .attach_named(scope, name, topic, selector, no_local)?;
        self.core.broker.stats().consumer_created();
        Ok(Box::new(MemoryConsumer::new(
            self.core.clone(),
            mailbox,
            None,
            Source::Named { key },
        )))
    }
}

#[async_trait]
impl ProviderSession for MemorySession {
    async fn create_queue(&mut self, name: &str) -> Result<WireDestination, ProviderError> {
        self.core.ensure_open()?;
        if name.is_empty() {
            return Err(ProviderError::InvalidDestination(
                "queue name can not be empty".to_string(),
            ));
        }
        self.core.broker.stats().destination_created();
        self.core.broker.queue(name);
        Ok(WireDestination::Queue(name.to_string()))
    }

    async fn create_temporary_queue(&mut self) -> Result<WireDestination, ProviderError> {
        self.core.ensure_open()?;
        let name = format!("temp-queue://{}", Uuid::new_v4());
        self.core.broker.stats().destination_created();
        self.core.broker.queue(&name);
        let destination = WireDestination::TemporaryQueue(name);
        self.core.track_temporary(&destination);
        Ok(destination)
    }

    async fn create_topic(&mut self, name: &str) -> Result<WireDestination, ProviderError> {
        self.core.ensure_open()?;
        if name.is_empty() {
            return Err(ProviderError::InvalidDestination(
                "topic name can not be empty".to_string(),
            ));
        }
        self.core.broker.stats().destination_created();
        Ok(WireDestination::Topic(name.to_string()))
    }

    async fn create_temporary_topic(&mut self) -> Result<WireDestination, ProviderError> {
        self.core.ensure_open()?;
        let name = format!("temp-topic://{}", Uuid::new_v4());
        self.core.broker.stats().destination_created();
        let destination = WireDestination::TemporaryTopic(name);
        self.core.track_temporary(&destination);
        Ok(destination)
    }

    fn create_message(&mut self) -> Result<WireMessage, ProviderError> {
        self.core.new_message(WireBody::Empty)
    }

    fn create_text_message(&mut self) -> Result<WireMessage, ProviderError> {
        self.core.new_message(WireBody::Text(None))
    }

    fn create_map_message(&mut self) -> Result<WireMessage, ProviderError> {
        self.core.new_message(WireBody::Map(Vec::new()))
    }

    fn create_bytes_message(&mut self) -> Result<WireMessage, ProviderError> {
        self.core.new_message(WireBody::Bytes(Vec::new()))
    }

    async fn create_producer(
        &mut self,
        destination: Option<&WireDestination>,
    ) -> Result<Box<dyn ProviderProducer>, ProviderError> {
        self.core.ensure_open()?;
        self.core.broker.stats().producer_created();
        Ok(Box::new(MemoryProducer {
            core: self.core.clone(),
            destination: destination.cloned(),
            closed: false,
        }))
    }

    async fn create_consumer(
        &mut self,
        destination: &WireDestination,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError> {
        self.core.ensure_open()?;
        let selector = selector.map(Selector::parse).transpose()?.flatten();
        let consumer = match destination {
            WireDestination::Queue(name) | WireDestination::TemporaryQueue(name) => {
                let mailbox = self.core.broker.queue(name);
                MemoryConsumer::new(self.core.clone(), mailbox, selector, Source::Queue)
            }
            WireDestination::Topic(name) | WireDestination::TemporaryTopic(name) => {
                let mailbox = Arc::new(Mailbox::new());
                let subscriber: SubscriberId = Uuid::new_v4().to_string();
                let mut subscription = Subscription::new(mailbox.clone(), selector);
                if no_local {
                    subscription = subscription.without_local(&self.core.connection_id);
                }
                self.core
                    .broker
                    .subscribe(name, subscriber.clone(), subscription);
                MemoryConsumer::new(
                    self.core.clone(),
                    mailbox,
                    None,
                    Source::Topic {
                        topic: name.clone(),
                        subscriber,
                    },
                )
            }
        };
        self.core.broker.stats().consumer_created();
        Ok(Box::new(consumer))
    }

    async fn create_durable_subscriber(
        &mut self,
        topic: &WireDestination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError> {
        let client_id = self.core.client_id.clone().ok_or_else(|| {
            ProviderError::IllegalState(
                "a client id is required for durable subscriptions".to_string(),
            )
        })?;
        self.named_consumer(
            SubscriptionScope::Durable {
                client_id: &client_id,
            },
            topic,
            name,
            selector,
            no_local,
        )
    }

    async fn create_shared_consumer(
        &mut self,
        topic: &WireDestination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError> {
        self.named_consumer(SubscriptionScope::Shared, topic, name, selector, false)
    }

    async fn create_shared_durable_consumer(
        &mut self,
        topic: &WireDestination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Box<dyn ProviderConsumer>, ProviderError> {
        self.named_consumer(SubscriptionScope::SharedDurable, topic, name, selector, false)
    }

    async fn acknowledge(&mut self, tag: DeliveryTag) -> Result<(), ProviderError> {
        self.core.ensure_open()?;
        if self.core.ack_mode == AckMode::Client && !self.core.transacted {
            lock(&self.core.ledger).unacked.retain(|d| d.tag > tag);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ProviderError> {
        self.core.ensure_open()?;
        if !self.core.transacted {
            return Err(ProviderError::IllegalState(
                "session is not transacted".to_string(),
            ));
        }
        let staged: Vec<(WireDestination, WireMessage)> = {
            let mut ledger = lock(&self.core.ledger);
            ledger.unacked.clear();
            ledger.staged.drain(..).collect()
        };
        for (destination, message) in staged {
            self.core.broker.publish(&destination, message);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ProviderError> {
        self.core.ensure_open()?;
        if !self.core.transacted {
            return Err(ProviderError::IllegalState(
                "session is not transacted".to_string(),
            ));
        }
        lock(&self.core.ledger).staged.clear();
        self.core.redeliver_unacked();
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), ProviderError> {
        self.core.ensure_open()?;
        if self.core.transacted {
            return Err(ProviderError::IllegalState(
                "recover is not allowed on a transacted session".to_string(),
            ));
        }
        self.core.redeliver_unacked();
        Ok(())
    }

    async fn unsubscribe(&mut self, name: &str) -> Result<(), ProviderError> {
        self.core.ensure_open()?;
        self.core
            .broker
            .remove_durable(self.core.client_id.as_deref(), name)
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.core.ledger).staged.clear();
        self.core.redeliver_unacked();
        Ok(())
    }
}

struct MemoryProducer {
    core: Arc<SessionCore>,
    destination: Option<WireDestination>,
    closed: bool,
}

#[async_trait]
impl ProviderProducer for MemoryProducer {
    async fn send(
        &mut self,
        destination: Option<&WireDestination>,
        message: WireMessage,
    ) -> Result<String, ProviderError> {
        if self.closed {
            return Err(ProviderError::Closed("producer is closed".to_string()));
        }
        self.core.ensure_open()?;
        let destination = destination
            .or(self.destination.as_ref())
            .cloned()
            .ok_or_else(|| {
                ProviderError::InvalidDestination(
                    "no destination given to an unidentified producer".to_string(),
                )
            })?;
        self.core.send(destination, message)
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        if !self.closed {
            self.closed = true;
            self.core.broker.stats().producer_closed();
        }
        Ok(())
    }
}

enum Source {
    Queue,
    Topic {
        topic: String,
        subscriber: SubscriberId,
    },
    Named {
        key: String,
    },
}

struct MemoryConsumer {
    core: Arc<SessionCore>,
    mailbox: Arc<Mailbox>,
    selector: Option<Selector>,
    source: Source,
    shutdown: watch::Sender<bool>,
    listener: Option<JoinHandle<()>>,
    released: bool,
}

impl MemoryConsumer {
    fn new(
        core: Arc<SessionCore>,
        mailbox: Arc<Mailbox>,
        selector: Option<Selector>,
        source: Source,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            core,
            mailbox,
            selector,
            source,
            shutdown,
            listener: None,
            released: false,
        }
    }

    fn ensure_usable(&self) -> Result<(), ProviderError> {
        if *self.shutdown.borrow() {
            return Err(ProviderError::Closed("consumer is closed".to_string()));
        }
        if self.listener.is_some() {
            return Err(ProviderError::IllegalState(
                "synchronous receive is not allowed while a message listener is set".to_string(),
            ));
        }
        self.core.ensure_open()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shutdown.send_replace(true);
        if let Some(task) = self.listener.take() {
            task.abort();
        }
        match &self.source {
            Source::Queue => {}
            Source::Topic { topic, subscriber } => {
                self.core.broker.unsubscribe(topic, subscriber);
            }
            Source::Named { key } => self.core.broker.release_named(key),
        }
    }
}

/// Waits until the link is started and a message is available, then takes it.
async fn next_delivery(
    core: &SessionCore,
    mailbox: &Arc<Mailbox>,
    selector: Option<&Selector>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<WireMessage, ProviderError> {
    let mut link = core.link.clone();
    loop {
        if *shutdown.borrow_and_update() {
            return Err(ProviderError::Closed("consumer is closed".to_string()));
        }
        core.ensure_open()?;

        if *link.borrow_and_update() == LinkState::Started {
            let notified = mailbox.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = mailbox.take(|m| selector.is_none_or(|s| s.matches(m))) {
                return Ok(core.record_delivery(message, mailbox));
            }

            tokio::select! {
                _ = notified => {}
                changed = link.changed() => changed.map_err(|_| connection_gone())?,
                changed = shutdown.changed() => changed.map_err(|_| connection_gone())?,
            }
        } else {
            tokio::select! {
                changed = link.changed() => changed.map_err(|_| connection_gone())?,
                changed = shutdown.changed() => changed.map_err(|_| connection_gone())?,
            }
        }
    }
}

fn connection_gone() -> ProviderError {
    ProviderError::Closed("connection is closed".to_string())
}

#[async_trait]
impl ProviderConsumer for MemoryConsumer {
    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<WireMessage>, ProviderError> {
        self.ensure_usable()?;
        let mut shutdown = self.shutdown.subscribe();
        let next = next_delivery(
            &self.core,
            &self.mailbox,
            self.selector.as_ref(),
            &mut shutdown,
        );
        match timeout {
            None => next.await.map(Some),
            Some(limit) => match tokio::time::timeout(limit, next).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            },
        }
    }

    async fn receive_no_wait(&mut self) -> Result<Option<WireMessage>, ProviderError> {
        self.ensure_usable()?;
        if *self.core.link.borrow() != LinkState::Started {
            return Ok(None);
        }
        let selector = self.selector.as_ref();
        Ok(self
            .mailbox
            .take(|m| selector.is_none_or(|s| s.matches(m)))
            .map(|message| self.core.record_delivery(message, &self.mailbox)))
    }

    fn set_message_listener(
        &mut self,
        listener: Arc<dyn MessageListener>,
    ) -> Result<(), ProviderError> {
        if *self.shutdown.borrow() {
            return Err(ProviderError::Closed("consumer is closed".to_string()));
        }
        self.core.ensure_open()?;
        if let Some(previous) = self.listener.take() {
            previous.abort();
        }

        let core = self.core.clone();
        let mailbox = self.mailbox.clone();
        let selector = self.selector.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.listener = Some(tokio::spawn(async move {
            loop {
                match next_delivery(&core, &mailbox, selector.as_ref(), &mut shutdown).await {
                    Ok(message) => listener.on_message(message).await,
                    Err(e) => {
                        if !e.is_closed() {
                            tracing::warn!(error = %e, "push delivery stopped");
                        }
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.release();
    }
}
