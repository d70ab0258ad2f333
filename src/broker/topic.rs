use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::engine::Mailbox;
use crate::broker::message::WireMessage;
use crate::broker::selector::Selector;

pub type SubscriberId = String;

/// One subscriber's view of a topic.
///
/// Each subscription owns a mailbox that receives its own copy of every
/// matching publication. A selector filters at publish time, and `no_local`
/// names the connection whose own publications are skipped.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub mailbox: Arc<Mailbox>,
    pub selector: Option<Selector>,
    pub no_local: Option<String>,
}

impl Subscription {
    pub fn new(mailbox: Arc<Mailbox>, selector: Option<Selector>) -> Self {
        Self {
            mailbox,
            selector,
            no_local: None,
        }
    }

    pub fn without_local(mut self, connection_id: impl Into<String>) -> Self {
        self.no_local = Some(connection_id.into());
        self
    }

    fn accepts(&self, message: &WireMessage) -> bool {
        if let (Some(local), Some(origin)) = (&self.no_local, &message.origin_connection) {
            if local == origin {
                return false;
            }
        }
        self.selector
            .as_ref()
            .is_none_or(|selector| selector.matches(message))
    }
}

/// Represents a topic in the broker
/// Holds the topic name and every subscription currently attached to it
/// A publication is copied into each subscription that accepts it
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashMap<SubscriberId, Subscription>,
}

impl Topic {
    /// Creates a new topic with no subscribers
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    /// Attaches a subscription under the given id
    /// Re-subscribing an existing id replaces its subscription
    pub fn subscribe(&mut self, id: SubscriberId, subscription: Subscription) {
        self.subscribers.insert(id, subscription);
    }

    /// Detaches a subscription
    /// If the subscriber is not attached, it has no effect
    pub fn unsubscribe(&mut self, id: &SubscriberId) {
        self.subscribers.remove(id);
    }

    /// Copies the message into every accepting subscription and returns how many received it
    pub fn publish(&self, message: &WireMessage) -> usize {
        let mut delivered = 0;
        for subscription in self.subscribers.values() {
            if subscription.accepts(message) {
                subscription.mailbox.push(message.clone());
                delivered += 1;
            }
        }
        delivered
    }
}
