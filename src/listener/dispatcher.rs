use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::broker::{MessageListener, WireMessage};
use crate::client::Session;
use crate::listener::caller::Caller;
use crate::listener::service::{Args, HandlerDescriptor, MessageService, Param};
use crate::message::{AckHandle, converter};
use crate::utils::error::{Error, Result};

/// A pushed message on its way to the dispatcher.
///
/// `settled` is present when the provider is held back until the handler
/// for this message has finished.
pub(crate) struct Delivery {
    wire: WireMessage,
    settled: Option<oneshot::Sender<()>>,
}

/// Hands provider pushed messages to a dispatcher off the provider's own task.
///
/// A gated listener returns to the provider only once the dispatcher settled
/// the message, so the session never holds more than one delivery whose
/// handler has not run. Acknowledgement, commit and rollback then cover
/// exactly the messages already handled.
pub(crate) struct ChannelListener {
    tx: mpsc::UnboundedSender<Delivery>,
    gated: bool,
}

impl ChannelListener {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Delivery>, gated: bool) -> Self {
        Self { tx, gated }
    }
}

#[async_trait]
impl MessageListener for ChannelListener {
    async fn on_message(&self, message: WireMessage) {
        let (settled, done) = if self.gated {
            let (settled, done) = oneshot::channel();
            (Some(settled), Some(done))
        } else {
            (None, None)
        };

        let delivery = Delivery {
            wire: message,
            settled,
        };
        if self.tx.send(delivery).is_err() {
            tracing::debug!("delivery arrived after the dispatcher stopped");
            return;
        }
        if let Some(done) = done {
            // dropped without a signal when the dispatcher stops
            let _ = done.await;
        }
    }
}

/// Runs a service for every message pushed to one subscription.
pub(crate) struct Dispatcher {
    subscription: String,
    service: Arc<dyn MessageService>,
    descriptor: HandlerDescriptor,
    session: Session,
}

impl Dispatcher {
    pub(crate) fn new(
        subscription: String,
        service: Arc<dyn MessageService>,
        descriptor: HandlerDescriptor,
        session: Session,
    ) -> Self {
        Self {
            subscription,
            service,
            descriptor,
            session,
        }
    }

    pub(crate) fn spawn(
        self,
        rx: mpsc::UnboundedReceiver<Delivery>,
        stop: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(rx, stop))
    }

    /// Supervisor loop.
    ///
    /// Every delivery runs as its own task. Isolated services keep any number
    /// of them in flight; for the others, and for gated deliveries, each task
    /// is joined before the next delivery is taken. A stop request closes the
    /// intake, dispatches what was already buffered and waits for every task
    /// to finish.
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Delivery>, mut stop: oneshot::Receiver<()>) {
        let mut in_flight = JoinSet::new();
        let mut stopping = false;

        loop {
            tokio::select! {
                _ = &mut stop, if !stopping => {
                    stopping = true;
                    rx.close();
                }
                delivery = rx.recv() => {
                    let Some(Delivery { wire, settled }) = delivery else { break };
                    let task = self.handle(wire);
                    if self.descriptor.is_isolated() && settled.is_none() {
                        in_flight.spawn(task);
                    } else {
                        let outcome = tokio::spawn(task).await;
                        self.settle(outcome).await;
                        if let Some(settled) = settled {
                            let _ = settled.send(());
                        }
                    }
                }
                Some(outcome) = in_flight.join_next() => self.settle(outcome).await,
            }
        }

        while let Some(outcome) = in_flight.join_next().await {
            self.settle(outcome).await;
        }
        tracing::debug!(subscription = %self.subscription, "dispatcher stopped");
    }

    /// One delivery: convert, build the declared arguments, call the service.
    fn handle(&self, wire: WireMessage) -> impl Future<Output = Result<()>> + Send + 'static {
        let service = self.service.clone();
        let session = self.session.clone();
        let params: Vec<Param> = self.descriptor.params().to_vec();

        async move {
            let handle = wire.delivery_tag.map(|tag| AckHandle::new(session.clone(), tag));
            let message = converter::from_wire(wire, handle)
                .map_err(|e| Error::wrap("Error occurred while converting the message", e))?;
            let args = Args::build(&params, message, Caller::new(session));
            service.on_message(args).await
        }
    }

    async fn settle(&self, outcome: std::result::Result<Result<()>, JoinError>) {
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(e) if e.is_panic() => Error::handler("onMessage panicked").with_cause(e),
            Err(_) => return,
        };

        if self.descriptor.has_on_error() {
            self.service.on_error(error).await;
        } else {
            tracing::error!(
                subscription = %self.subscription,
                error = %error,
                "Unexpected error occurred while async message processing"
            );
        }
    }
}
