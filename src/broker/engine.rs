use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::broker::message::{WireDestination, WireMessage};
use crate::broker::selector::Selector;
use crate::broker::topic::{SubscriberId, Subscription, Topic};
use crate::broker::{ExceptionListener, ProviderError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A FIFO of pending messages with a wake-up signal for waiting consumers.
///
/// Queues and topic subscriptions are both backed by a mailbox. Consumers
/// register interest with [`Mailbox::notified`] before checking for a
/// message, so a push that lands in between is never missed.
#[derive(Debug, Default)]
pub struct Mailbox {
    messages: Mutex<VecDeque<WireMessage>>,
    notify: Notify,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: WireMessage) {
        lock(&self.messages).push_back(message);
        self.notify.notify_waiters();
    }

    /// Puts a message back at the head of the mailbox for redelivery.
    pub fn push_front(&self, message: WireMessage) {
        lock(&self.messages).push_front(message);
        self.notify.notify_waiters();
    }

    /// Removes the first message accepted by `filter`.
    pub fn take(&self, filter: impl Fn(&WireMessage) -> bool) -> Option<WireMessage> {
        let mut messages = lock(&self.messages);
        let position = messages.iter().position(filter)?;
        messages.remove(position)
    }

    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self) {
        lock(&self.messages).clear();
    }
}

/// How a named subscription is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope<'a> {
    /// Durable, owned by one client id, at most one active consumer.
    Durable { client_id: &'a str },
    /// Non-durable and shared between competing consumers.
    Shared,
    /// Durable and shared between competing consumers.
    SharedDurable,
}

impl SubscriptionScope<'_> {
    fn key(&self, name: &str) -> String {
        match self {
            SubscriptionScope::Durable { client_id } => format!("{client_id}:{name}"),
            SubscriptionScope::Shared => format!("shared:{name}"),
            SubscriptionScope::SharedDurable => format!("shared-durable:{name}"),
        }
    }

    fn is_durable(&self) -> bool {
        !matches!(self, SubscriptionScope::Shared)
    }

    fn is_shared(&self) -> bool {
        !matches!(self, SubscriptionScope::Durable { .. })
    }
}

#[derive(Debug)]
struct NamedSubscription {
    topic: String,
    selector: Option<String>,
    mailbox: Arc<Mailbox>,
    active: usize,
    durable: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, Arc<Mailbox>>,
    topics: HashMap<String, Topic>,
    named: HashMap<String, NamedSubscription>,
}

impl BrokerState {
    fn subscribe(&mut self, topic: &str, id: SubscriberId, subscription: Subscription) {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(id, subscription);
    }

    fn unsubscribe(&mut self, topic: &str, id: &SubscriberId) {
        if let Some(t) = self.topics.get_mut(topic) {
            t.unsubscribe(id);
        }
    }

    fn remove_named(&mut self, key: &str) {
        if let Some(named) = self.named.remove(key) {
            self.unsubscribe(&named.topic, &key.to_string());
            named.mailbox.clear();
        }
    }
}

/// Running totals kept by the in-memory broker.
#[derive(Debug, Default)]
pub struct BrokerStats {
    connections: AtomicUsize,
    sessions: AtomicUsize,
    destinations: AtomicUsize,
    messages: AtomicUsize,
    producers: AtomicUsize,
    producers_closed: AtomicUsize,
    consumers: AtomicUsize,
    published: AtomicUsize,
}

impl BrokerStats {
    pub fn connections_opened(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn destinations_created(&self) -> usize {
        self.destinations.load(Ordering::SeqCst)
    }

    pub fn messages_created(&self) -> usize {
        self.messages.load(Ordering::SeqCst)
    }

    pub fn producers_created(&self) -> usize {
        self.producers.load(Ordering::SeqCst)
    }

    pub fn producers_closed(&self) -> usize {
        self.producers_closed.load(Ordering::SeqCst)
    }

    pub fn consumers_created(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    pub fn messages_published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    pub(crate) fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn session_created(&self) {
        self.sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn destination_created(&self) {
        self.destinations.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn message_created(&self) {
        self.messages.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn producer_created(&self) {
        self.producers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn producer_closed(&self) {
        self.producers_closed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn consumer_created(&self) {
        self.consumers.fetch_add(1, Ordering::SeqCst);
    }
}

/// Represents the in-memory broker that routes messages between sessions
/// Queues hand each message to exactly one consumer
/// Topics copy each publication into every attached subscription
/// Named subscriptions (durable and shared) keep buffering while no consumer is attached
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    listeners: Mutex<HashMap<String, Arc<dyn ExceptionListener>>>,
    stats: BrokerStats,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    /// Returns the mailbox of a queue, creating the queue on first use
    pub fn queue(&self, name: &str) -> Arc<Mailbox> {
        lock(&self.state)
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mailbox::new()))
            .clone()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        lock(&self.state).queues.contains_key(name)
    }

    /// Number of messages waiting on a queue. Unknown queues hold none.
    pub fn queue_depth(&self, name: &str) -> usize {
        lock(&self.state)
            .queues
            .get(name)
            .map_or(0, |mailbox| mailbox.len())
    }

    pub fn delete_queue(&self, name: &str) {
        lock(&self.state).queues.remove(name);
        tracing::debug!(queue = %name, "queue deleted");
    }

    pub fn has_topic(&self, name: &str) -> bool {
        lock(&self.state).topics.contains_key(name)
    }

    pub fn delete_topic(&self, name: &str) {
        lock(&self.state).topics.remove(name);
        tracing::debug!(topic = %name, "topic deleted");
    }

    /// Attaches a non-durable subscription to a topic. Automatically creates the topic if it doesn't exist.
    pub fn subscribe(&self, topic: &str, id: SubscriberId, subscription: Subscription) {
        lock(&self.state).subscribe(topic, id, subscription);
    }

    /// Detaches a subscription from a topic
    /// If the topic does not exist, it will not perform any action
    pub fn unsubscribe(&self, topic: &str, id: &SubscriberId) {
        lock(&self.state).unsubscribe(topic, id);
    }

    /// Routes a message to its destination
    /// A topic without subscribers drops the message
    pub fn publish(&self, destination: &WireDestination, message: WireMessage) {
        self.stats.published.fetch_add(1, Ordering::SeqCst);
        match destination {
            WireDestination::Queue(name) | WireDestination::TemporaryQueue(name) => {
                self.queue(name).push(message);
            }
            WireDestination::Topic(name) | WireDestination::TemporaryTopic(name) => {
                let state = lock(&self.state);
                let delivered = state.topics.get(name).map_or(0, |t| t.publish(&message));
                if delivered == 0 {
                    tracing::debug!(topic = %name, "no subscription accepted the message");
                }
            }
        }
    }

    /// Attaches a consumer to a named subscription, creating it on first use.
    ///
    /// Re-attaching with a different topic or selector replaces the
    /// subscription and drops whatever it had buffered, as long as no consumer
    /// is active on it. Non-shared subscriptions accept a single active
    /// consumer.
    pub fn attach_named(
        &self,
        scope: SubscriptionScope<'_>,
        name: &str,
        topic: &str,
        selector: Option<Selector>,
        no_local: Option<&str>,
    ) -> Result<(String, Arc<Mailbox>), ProviderError> {
        let key = scope.key(name);
        let selector_text = selector.as_ref().map(|s| s.as_str().to_string());
        let mut state = lock(&self.state);

        let existing = state
            .named
            .get(&key)
            .map(|n| (n.topic == topic && n.selector == selector_text, n.active));
        if let Some((same, active)) = existing {
            if same {
                if !scope.is_shared() && active > 0 {
                    return Err(ProviderError::IllegalState(format!(
                        "subscription '{name}' already has an active consumer"
                    )));
                }
                if let Some(named) = state.named.get_mut(&key) {
                    named.active += 1;
                    return Ok((key, named.mailbox.clone()));
                }
            } else if active > 0 {
                return Err(ProviderError::IllegalState(format!(
                    "subscription '{name}' is in use with a different topic or selector"
                )));
            } else {
                state.remove_named(&key);
            }
        }

        let mailbox = Arc::new(Mailbox::new());
        let mut subscription = Subscription::new(mailbox.clone(), selector);
        if let Some(connection) = no_local {
            subscription = subscription.without_local(connection);
        }
        state.subscribe(topic, key.clone(), subscription);
        state.named.insert(
            key.clone(),
            NamedSubscription {
                topic: topic.to_string(),
                selector: selector_text,
                mailbox: mailbox.clone(),
                active: 1,
                durable: scope.is_durable(),
            },
        );
        tracing::debug!(subscription = %key, topic = %topic, "named subscription created");
        Ok((key, mailbox))
    }

    /// Detaches one consumer from a named subscription.
    /// A non-durable subscription disappears with its last consumer
    pub fn release_named(&self, key: &str) {
        let mut state = lock(&self.state);
        let remove = match state.named.get_mut(key) {
            Some(named) => {
                named.active = named.active.saturating_sub(1);
                named.active == 0 && !named.durable
            }
            None => false,
        };
        if remove {
            state.remove_named(key);
        }
    }

    /// Deletes a durable subscription by name.
    /// Fails if it does not exist or still has an active consumer
    pub fn remove_durable(&self, client_id: Option<&str>, name: &str) -> Result<(), ProviderError> {
        let mut candidates = Vec::new();
        if let Some(client_id) = client_id {
            candidates.push(SubscriptionScope::Durable { client_id }.key(name));
        }
        candidates.push(SubscriptionScope::SharedDurable.key(name));

        let mut state = lock(&self.state);
        let key = candidates
            .into_iter()
            .find(|key| state.named.get(key).is_some_and(|n| n.durable))
            .ok_or_else(|| {
                ProviderError::InvalidDestination(format!(
                    "no durable subscription named '{name}'"
                ))
            })?;
        if state.named.get(&key).is_some_and(|n| n.active > 0) {
            return Err(ProviderError::IllegalState(format!(
                "durable subscription '{name}' has an active consumer"
            )));
        }
        state.remove_named(&key);
        tracing::debug!(subscription = %key, "durable subscription removed");
        Ok(())
    }

    /// Number of messages buffered for a named subscription.
    pub fn subscription_depth(&self, scope: SubscriptionScope<'_>, name: &str) -> Option<usize> {
        lock(&self.state)
            .named
            .get(&scope.key(name))
            .map(|n| n.mailbox.len())
    }

    pub(crate) fn register_listener(&self, connection_id: &str, listener: Arc<dyn ExceptionListener>) {
        lock(&self.listeners).insert(connection_id.to_string(), listener);
    }

    pub(crate) fn remove_listener(&self, connection_id: &str) {
        lock(&self.listeners).remove(connection_id);
    }

    /// Raises an asynchronous fault on every connection with an exception listener.
    pub fn inject_fault(&self, error: ProviderError) {
        let listeners: Vec<Arc<dyn ExceptionListener>> =
            lock(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener.on_exception(error.clone());
        }
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("InMemoryBroker")
            .field("queues", &state.queues.len())
            .field("topics", &state.topics.len())
            .field("subscriptions", &state.named.len())
            .field("stats", &self.stats)
            .finish()
    }
}
