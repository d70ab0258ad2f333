//! The `listener` module delivers messages to application services by push.
//!
//! A [`Listener`] owns one connection. Each [`MessageService`] attached to it
//! gets a dedicated session and consumer built from its [`ServiceConfig`],
//! and a supervisor task that runs the service for every delivered message.
//! Handler failures go to the service's `on_error` when it has one and to the
//! error log otherwise; they never stop delivery.

pub mod caller;
mod dispatcher;
pub mod service;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::ProviderRegistry;
use crate::broker::engine::lock;
use crate::client::{AckMode, Connection, Consumer, ConsumerOptions, Session};
use crate::config::ConnectionConfig;
use crate::utils::error::Result;

pub use caller::Caller;
pub use service::{
    Arg, Args, HandlerDescriptor, MessageService, Param, QueueConfig, ServiceConfig,
    SubscriptionConfig, TopicConfig,
};

use dispatcher::{ChannelListener, Delivery, Dispatcher};

/// Lifecycle of an [`AttachedSubscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Consumer and supervisor are in place, the connection is not started.
    Attached,
    Running,
    Detached,
}

struct Supervisor {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct SubscriptionInner {
    id: String,
    session: Session,
    consumer: Consumer,
    state: StdMutex<SubscriptionState>,
    supervisor: Mutex<Option<Supervisor>>,
}

/// A service attached to a [`Listener`].
#[derive(Clone)]
pub struct AttachedSubscription {
    inner: Arc<SubscriptionInner>,
}

impl AttachedSubscription {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> SubscriptionState {
        *lock(&self.inner.state)
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Stops delivery and closes the consumer and its session.
    ///
    /// Messages already handed to the supervisor are still dispatched and
    /// in-flight handlers are awaited before the session closes, so a
    /// handler can still acknowledge or commit. Detaching twice is a no-op.
    pub async fn detach(&self) -> Result<()> {
        let Some(supervisor) = self.inner.supervisor.lock().await.take() else {
            return Ok(());
        };
        *lock(&self.inner.state) = SubscriptionState::Detached;

        let consumer_closed = self.inner.consumer.close().await;
        let _ = supervisor.stop.send(());
        if let Err(e) = supervisor.task.await {
            tracing::error!(subscription = %self.inner.id, error = %e, "dispatcher task failed");
        }
        let session_closed = self.inner.session.close().await;

        tracing::info!(subscription = %self.inner.id, "service detached");
        consumer_closed?;
        session_closed
    }

    fn mark_running(&self) {
        let mut state = lock(&self.inner.state);
        if *state == SubscriptionState::Attached {
            *state = SubscriptionState::Running;
        }
    }
}

impl fmt::Debug for AttachedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachedSubscription")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Push delivery front end over a single connection.
pub struct Listener {
    connection: Connection,
    subscriptions: StdMutex<Vec<AttachedSubscription>>,
    started: AtomicBool,
}

impl Listener {
    /// Opens the connection the listener runs on. Delivery begins at [`Listener::start`].
    pub async fn new(config: &ConnectionConfig, registry: &ProviderRegistry) -> Result<Listener> {
        let connection = Connection::open(config, registry).await?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: Connection) -> Listener {
        Listener {
            connection,
            subscriptions: StdMutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn subscriptions(&self) -> Vec<AttachedSubscription> {
        lock(&self.subscriptions).clone()
    }

    /// Attaches a service.
    ///
    /// The handler shape and the subscription are validated before anything
    /// is created on the broker. On failure nothing stays open.
    ///
    /// On client acknowledged and transacted sessions the provider is held
    /// back until each handler settles, whatever the service's isolation.
    pub async fn attach(&self, service: Arc<dyn MessageService>) -> Result<AttachedSubscription> {
        let descriptor = HandlerDescriptor::of(service.as_ref())?;
        let config = service.service_config();
        let options = config.config.consumer_options();
        options.validate()?;

        let session = Session::create(&self.connection, config.acknowledgement_mode).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let gated = matches!(
            config.acknowledgement_mode,
            AckMode::Client | AckMode::Transacted
        );
        let consumer = match open_push_consumer(&session, &options, tx, gated).await {
            Ok(consumer) => consumer,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    tracing::debug!(error = %close_err, "session close after failed attach");
                }
                return Err(e);
            }
        };

        let id = Uuid::new_v4().to_string();
        let (stop, stop_rx) = oneshot::channel();
        let task = Dispatcher::new(id.clone(), service, descriptor, session.clone()).spawn(rx, stop_rx);

        let state = if self.started.load(Ordering::SeqCst) {
            SubscriptionState::Running
        } else {
            SubscriptionState::Attached
        };
        let subscription = AttachedSubscription {
            inner: Arc::new(SubscriptionInner {
                id,
                session,
                consumer,
                state: StdMutex::new(state),
                supervisor: Mutex::new(Some(Supervisor { stop, task })),
            }),
        };
        lock(&self.subscriptions).push(subscription.clone());

        tracing::info!(
            subscription = %subscription.id(),
            destination = ?options.destination,
            ack_mode = %config.acknowledgement_mode,
            "service attached"
        );
        Ok(subscription)
    }

    pub async fn detach(&self, subscription: &AttachedSubscription) -> Result<()> {
        lock(&self.subscriptions).retain(|s| s.id() != subscription.id());
        subscription.detach().await
    }

    /// Starts the connection and with it delivery to every attached service.
    pub async fn start(&self) -> Result<()> {
        self.connection.start().await?;
        self.started.store(true, Ordering::SeqCst);
        for subscription in lock(&self.subscriptions).iter() {
            subscription.mark_running();
        }
        Ok(())
    }

    /// Stops delivery, detaches every service and closes the connection.
    ///
    /// Handlers already running are awaited by their subscription's detach.
    pub async fn graceful_stop(&self) -> Result<()> {
        self.shutdown().await
    }

    /// Same as [`Listener::graceful_stop`]; the provider has no way to drop
    /// in-flight work faster.
    pub async fn immediate_stop(&self) -> Result<()> {
        self.shutdown().await
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.connection.is_closed() {
            if let Err(e) = self.connection.stop().await {
                tracing::warn!(error = %e, "failed to stop the connection");
            }
        }

        let subscriptions: Vec<AttachedSubscription> = lock(&self.subscriptions).drain(..).collect();
        let results = join_all(subscriptions.iter().map(|s| s.detach())).await;
        for (subscription, result) in subscriptions.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(subscription = %subscription.id(), error = %e, "detach failed");
            }
        }

        self.started.store(false, Ordering::SeqCst);
        self.connection.close().await
    }
}

async fn open_push_consumer(
    session: &Session,
    options: &ConsumerOptions,
    tx: mpsc::UnboundedSender<Delivery>,
    gated: bool,
) -> Result<Consumer> {
    let consumer = Consumer::open(session, options).await?;
    if let Err(e) = consumer
        .set_message_listener(Arc::new(ChannelListener::new(tx, gated)))
        .await
    {
        let _ = consumer.close().await;
        return Err(e);
    }
    Ok(consumer)
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("connection", &self.connection)
            .field("subscriptions", &lock(&self.subscriptions).len())
            .finish()
    }
}
