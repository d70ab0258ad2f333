use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::{AckMode, ConsumerOptions, ConsumerType, Destination};
use crate::listener::caller::Caller;
use crate::message::Message;
use crate::utils::error::{Error, Result};

/// Role of an `on_message` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Message,
    Caller,
}

impl Param {
    fn name(self) -> &'static str {
        match self {
            Param::Message => "Message",
            Param::Caller => "Caller",
        }
    }
}

/// A single `on_message` argument.
#[derive(Debug)]
pub enum Arg {
    Message(Message),
    Caller(Caller),
}

/// Arguments for one `on_message` call, in the order the service declared them.
#[derive(Debug, Default)]
pub struct Args {
    args: Vec<Arg>,
}

impl Args {
    pub(crate) fn build(params: &[Param], message: Message, caller: Caller) -> Args {
        let mut message = Some(message);
        let args = params
            .iter()
            .filter_map(|param| match param {
                Param::Message => message.take().map(Arg::Message),
                Param::Caller => Some(Arg::Caller(caller.clone())),
            })
            .collect();
        Args { args }
    }

    pub fn message(&self) -> Option<&Message> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Message(message) => Some(message),
            Arg::Caller(_) => None,
        })
    }

    pub fn caller(&self) -> Option<&Caller> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Caller(caller) => Some(caller),
            Arg::Message(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn into_inner(self) -> Vec<Arg> {
        self.args
    }
}

/// An application message handler attached through a [`Listener`](super::Listener).
///
/// `on_message_params` declares which arguments `on_message` takes and in
/// which order. It is checked once when the service is attached.
#[async_trait]
pub trait MessageService: Send + Sync {
    fn service_config(&self) -> ServiceConfig;

    fn on_message_params(&self) -> Vec<Param> {
        vec![Param::Message]
    }

    /// Isolated services may handle several messages at once; the others
    /// see one message at a time, in delivery order.
    fn is_isolated(&self) -> bool {
        true
    }

    async fn on_message(&self, args: Args) -> Result<()>;

    /// Whether failures go to [`MessageService::on_error`] instead of the log.
    fn has_on_error(&self) -> bool {
        false
    }

    async fn on_error(&self, _error: Error) {}
}

/// The validated shape of a service's `on_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDescriptor {
    params: Vec<Param>,
    isolated: bool,
    has_on_error: bool,
}

impl HandlerDescriptor {
    pub fn new(params: Vec<Param>, isolated: bool, has_on_error: bool) -> Result<Self> {
        if params.is_empty() || params.len() > 2 {
            return Err(Error::config(
                "onMessage method can only have either one or two parameters",
            ));
        }
        if params.len() == 2 && params[0] == params[1] {
            return Err(Error::config(format!(
                "onMessage parameter '{}' can only be declared once",
                params[0].name()
            )));
        }
        if !params.contains(&Param::Message) {
            return Err(Error::config("required parameter 'Message' can not be found"));
        }
        Ok(Self {
            params,
            isolated,
            has_on_error,
        })
    }

    pub fn of(service: &dyn MessageService) -> Result<Self> {
        Self::new(
            service.on_message_params(),
            service.is_isolated(),
            service.has_on_error(),
        )
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn has_on_error(&self) -> bool {
        self.has_on_error
    }
}

/// Where and how a service consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default)]
    pub acknowledgement_mode: AckMode,
    #[serde(alias = "destination")]
    pub config: SubscriptionConfig,
}

impl ServiceConfig {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            acknowledgement_mode: AckMode::default(),
            config: SubscriptionConfig::Queue(QueueConfig {
                queue_name: name.into(),
                message_selector: None,
            }),
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            acknowledgement_mode: AckMode::default(),
            config: SubscriptionConfig::Topic(TopicConfig {
                topic_name: name.into(),
                message_selector: None,
                no_local: false,
                consumer_type: ConsumerType::Default,
                subscriber_name: None,
            }),
        }
    }

    pub fn with_ack_mode(mut self, mode: AckMode) -> Self {
        self.acknowledgement_mode = mode;
        self
    }
}

/// `queueName` or `topicName` picks the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionConfig {
    Queue(QueueConfig),
    Topic(TopicConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub queue_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    pub topic_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_selector: Option<String>,
    #[serde(default)]
    pub no_local: bool,
    #[serde(default)]
    pub consumer_type: ConsumerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_name: Option<String>,
}

impl SubscriptionConfig {
    pub fn consumer_options(&self) -> ConsumerOptions {
        match self {
            SubscriptionConfig::Queue(queue) => ConsumerOptions {
                message_selector: queue.message_selector.clone(),
                ..ConsumerOptions::new(Destination::queue(queue.queue_name.clone()))
            },
            SubscriptionConfig::Topic(topic) => ConsumerOptions {
                destination: Destination::topic(topic.topic_name.clone()),
                message_selector: topic.message_selector.clone(),
                no_local: topic.no_local,
                consumer_type: topic.consumer_type,
                subscriber_name: topic.subscriber_name.clone(),
            },
        }
    }
}
