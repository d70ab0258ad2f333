use std::sync::Arc;

use async_trait::async_trait;
use brokerlink::broker::ProviderRegistry;
use brokerlink::config::load_config;
use brokerlink::listener::{Args, Listener, MessageService, Param, ServiceConfig};
use brokerlink::utils::logging;
use brokerlink::{AckMode, Destination, Error, Message, Producer};

const DEMO_QUEUE: &str = "demo.orders";

/// Logs every order it receives and acknowledges it.
struct OrderLogger;

#[async_trait]
impl MessageService for OrderLogger {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig::queue(DEMO_QUEUE).with_ack_mode(AckMode::Client)
    }

    fn on_message_params(&self) -> Vec<Param> {
        vec![Param::Message, Param::Caller]
    }

    async fn on_message(&self, args: Args) -> brokerlink::Result<()> {
        let (Some(message), Some(caller)) = (args.message(), args.caller()) else {
            return Ok(());
        };
        tracing::info!(
            id = ?message.message_id,
            body = message.as_text().unwrap_or("<binary>"),
            "order received"
        );
        caller.acknowledge(message).await
    }

    fn has_on_error(&self) -> bool {
        true
    }

    async fn on_error(&self, error: Error) {
        tracing::warn!(error = %error, "order handling failed");
    }
}

#[tokio::main]
async fn main() -> brokerlink::Result<()> {
    let settings = load_config().expect("Failed to load configuration");
    logging::init(&settings.logging.level);

    let registry = ProviderRegistry::in_memory();
    let listener = Listener::new(&settings.connection, &registry).await?;
    listener.attach(Arc::new(OrderLogger)).await?;
    listener.start().await?;

    let session = listener.connection().create_session(AckMode::Auto).await?;
    let producer = Producer::open(&session, Some(&Destination::queue(DEMO_QUEUE))).await?;
    for n in 1..=3_i64 {
        let order = Message::text(format!("order #{n}")).with_property("sequence", n);
        producer.send(&order).await?;
    }
    producer.close().await?;
    session.close().await?;

    tracing::info!("listening on {DEMO_QUEUE}, press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }

    listener.graceful_stop().await
}
