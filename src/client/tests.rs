use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::broker::{InMemoryBroker, InMemoryProvider, ProviderRegistry};
use crate::config::ConnectionConfig;
use crate::message::{Content, Message};
use crate::utils::error::ErrorKind;

fn fixture() -> (Arc<InMemoryBroker>, ProviderRegistry) {
    let provider = InMemoryProvider::new();
    let broker = provider.broker().clone();
    let registry = ProviderRegistry::new().with_provider("memory", Arc::new(provider));
    (broker, registry)
}

async fn started(registry: &ProviderRegistry) -> Connection {
    let connection = Connection::open(&ConnectionConfig::default(), registry)
        .await
        .unwrap();
    connection.start().await.unwrap();
    connection
}

#[tokio::test]
async fn test_send_and_receive_round_trip() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();

    let orders = Destination::queue("orders");
    let producer = Producer::open(&session, Some(&orders)).await.unwrap();
    producer.send(&Message::text("hello")).await.unwrap();

    let consumer = Consumer::open(&session, &ConsumerOptions::new(orders))
        .await
        .unwrap();
    let received = consumer.receive(5000).await.unwrap().unwrap();

    assert_eq!(received.content, Some(Content::Text("hello".to_string())));
    assert!(!received.redelivered);
    assert!(received.message_id.is_some());
    assert_eq!(received.destination, Some(Destination::queue("orders")));
}

#[tokio::test]
async fn test_open_generates_client_id() {
    let (broker, registry) = fixture();
    let connection = Connection::open(&ConnectionConfig::default(), &registry)
        .await
        .unwrap();

    assert!(!connection.client_id().is_empty());
    assert_eq!(connection.state().await, ConnectionState::Created);
    assert_eq!(broker.stats().connections_opened(), 1);
}

#[tokio::test]
async fn test_open_keeps_configured_client_id() {
    let (_, registry) = fixture();
    let config = ConnectionConfig::default().with_property("clientId", "billing");
    let connection = Connection::open(&config, &registry).await.unwrap();

    assert_eq!(connection.client_id(), "billing");
}

#[tokio::test]
async fn test_open_with_unknown_factory_fails() {
    let registry = ProviderRegistry::in_memory();
    let config = ConnectionConfig {
        initial_context_factory: "org.example.Missing".to_string(),
        ..ConnectionConfig::default()
    };

    let err = Connection::open(&config, &registry).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.message().starts_with("Error occurred while connecting to broker"));
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn test_open_with_bad_credentials_fails() {
    let provider = InMemoryProvider::new().with_credentials("admin", "secret");
    let registry = ProviderRegistry::new().with_provider("memory", Arc::new(provider));
    let config = ConnectionConfig::default().with_credentials("admin", "wrong");

    let err = Connection::open(&config, &registry).await.unwrap_err();
    assert!(err.message().contains("authentication failed"));

    let config = ConnectionConfig::default().with_credentials("admin", "secret");
    assert!(Connection::open(&config, &registry).await.is_ok());
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_resumes() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    connection.start().await.unwrap();
    assert_eq!(connection.state().await, ConnectionState::Started);

    connection.stop().await.unwrap();
    assert_eq!(connection.state().await, ConnectionState::Stopped);
    connection.start().await.unwrap();
    assert_eq!(connection.state().await, ConnectionState::Started);
}

#[tokio::test]
async fn test_receive_waits_while_connection_stopped() {
    let (_, registry) = fixture();
    let connection = Connection::open(&ConnectionConfig::default(), &registry)
        .await
        .unwrap();
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let queue = Destination::queue("paused");
    Producer::open(&session, Some(&queue))
        .await
        .unwrap()
        .send(&Message::text("later"))
        .await
        .unwrap();
    let consumer = Consumer::open(&session, &ConsumerOptions::new(queue))
        .await
        .unwrap();

    assert!(consumer.receive(50).await.unwrap().is_none());

    connection.start().await.unwrap();
    let received = consumer.receive(1000).await.unwrap().unwrap();
    assert_eq!(received.as_text(), Some("later"));
}

#[tokio::test]
async fn test_transacted_flag_follows_ack_mode() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;

    for mode in [AckMode::Auto, AckMode::Client, AckMode::DupsOk] {
        let session = connection.create_session(mode).await.unwrap();
        assert!(!session.is_transacted(), "{mode} must not be transacted");
    }
    let session = connection.create_session(AckMode::Transacted).await.unwrap();
    assert!(session.is_transacted());
}

#[tokio::test]
async fn test_commit_on_non_transacted_session_fails() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();

    let err = session.commit().await.unwrap_err();
    assert!(err.message().starts_with("Error while committing the JMS transaction"));
    assert!(err.to_string().contains("session is not transacted"));

    let err = session.rollback().await.unwrap_err();
    assert!(err.message().starts_with("Error while rolling back the JMS transaction"));
}

#[tokio::test]
async fn test_repeated_commit_is_well_defined() {
    let (broker, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Transacted).await.unwrap();
    let queue = Destination::queue("ledger");
    let producer = Producer::open(&session, Some(&queue)).await.unwrap();

    producer.send(&Message::text("entry")).await.unwrap();
    assert_eq!(broker.queue_depth("ledger"), 0);

    session.commit().await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(broker.queue_depth("ledger"), 1);
}

#[tokio::test]
async fn test_rollback_discards_sends_and_redelivers() {
    let (broker, registry) = fixture();
    let connection = started(&registry).await;
    let setup = connection.create_session(AckMode::Auto).await.unwrap();
    let queue = Destination::queue("jobs");
    Producer::open(&setup, Some(&queue))
        .await
        .unwrap()
        .send(&Message::text("job-1"))
        .await
        .unwrap();

    let session = connection.create_session(AckMode::Transacted).await.unwrap();
    let consumer = Consumer::open(&session, &ConsumerOptions::new(queue.clone()))
        .await
        .unwrap();
    let producer = Producer::open(&session, Some(&queue)).await.unwrap();

    let first = consumer.receive(1000).await.unwrap().unwrap();
    assert!(!first.redelivered);
    producer.send(&Message::text("job-2")).await.unwrap();
    session.rollback().await.unwrap();

    let again = consumer.receive(1000).await.unwrap().unwrap();
    assert_eq!(again.as_text(), Some("job-1"));
    assert!(again.redelivered);
    session.commit().await.unwrap();
    assert_eq!(broker.queue_depth("jobs"), 0);
}

#[tokio::test]
async fn test_missing_destination_name_fails_before_provider() {
    let (broker, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let before = broker.stats().destinations_created();

    let descriptor = Destination::new(DestinationKind::Topic, Some(String::new()));
    let err = session.create_destination(&descriptor).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(
        err.message(),
        "destination name can not be empty for destination type: TOPIC"
    );

    let err = Producer::open(&session, Some(&Destination::new(DestinationKind::Queue, None)))
        .await
        .unwrap_err();
    assert_eq!(
        err.message(),
        "destination name can not be empty for destination type: QUEUE"
    );
    assert_eq!(broker.stats().destinations_created(), before);
}

#[tokio::test]
async fn test_temporary_destination_ignores_name() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();

    let descriptor = Destination::new(DestinationKind::TemporaryQueue, Some("ignored".to_string()));
    let resolved = session.create_destination(&descriptor).await.unwrap();
    assert_eq!(resolved, Destination::temporary_queue());

    let descriptor = Destination::new(DestinationKind::TemporaryTopic, Some("ignored".to_string()));
    let resolved = session.create_destination(&descriptor).await.unwrap();
    assert_eq!(resolved.kind, DestinationKind::TemporaryTopic);
    assert!(resolved.name().is_none());
}

#[tokio::test]
async fn test_subscriber_name_required_before_provider() {
    let (broker, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let destinations = broker.stats().destinations_created();
    let consumers = broker.stats().consumers_created();

    for consumer_type in [
        ConsumerType::Durable,
        ConsumerType::Shared,
        ConsumerType::SharedDurable,
    ] {
        let options = ConsumerOptions::new(Destination::topic("news"))
            .with_subscription(consumer_type, "  ");
        let err = Consumer::open(&session, &options).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(
            err.message(),
            format!("Subscriber name cannot be empty for consumer type: {consumer_type}")
        );
    }

    assert_eq!(broker.stats().destinations_created(), destinations);
    assert_eq!(broker.stats().consumers_created(), consumers);

    let plain = Consumer::open(&session, &ConsumerOptions::new(Destination::topic("news"))).await;
    assert!(plain.is_ok());
}

#[tokio::test]
async fn test_durable_subscription_requires_topic() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();

    let options = ConsumerOptions::new(Destination::queue("orders"))
        .with_subscription(ConsumerType::Durable, "audit");
    let err = Consumer::open(&session, &options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_durable_subscription_survives_consumer_close() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let topic = Destination::topic("audit");
    let options = ConsumerOptions::new(topic.clone()).with_subscription(ConsumerType::Durable, "trail");

    let consumer = Consumer::open(&session, &options).await.unwrap();
    consumer.close().await.unwrap();

    Producer::open(&session, Some(&topic))
        .await
        .unwrap()
        .send(&Message::text("while away"))
        .await
        .unwrap();

    let consumer = Consumer::open(&session, &options).await.unwrap();
    let received = consumer.receive(1000).await.unwrap().unwrap();
    assert_eq!(received.as_text(), Some("while away"));

    let err = session.unsubscribe("trail").await.unwrap_err();
    assert!(
        err.message()
            .starts_with("Error while unsubscribing from the durable subscription")
    );
    consumer.close().await.unwrap();
    session.unsubscribe("trail").await.unwrap();
    assert!(session.unsubscribe("trail").await.is_err());
}

#[tokio::test]
async fn test_selector_filters_messages() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let queue = Destination::queue("regions");
    let producer = Producer::open(&session, Some(&queue)).await.unwrap();
    producer
        .send(&Message::text("apac").with_property("region", "apac"))
        .await
        .unwrap();
    producer
        .send(&Message::text("emea").with_property("region", "emea"))
        .await
        .unwrap();

    let options = ConsumerOptions::new(queue).with_selector("region = 'emea'");
    let consumer = Consumer::open(&session, &options).await.unwrap();
    let received = consumer.receive(1000).await.unwrap().unwrap();
    assert_eq!(received.as_text(), Some("emea"));
    assert!(consumer.receive_no_wait().await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_selector_is_provider_error() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();

    let options = ConsumerOptions::new(Destination::queue("q")).with_selector("region LIKE 'e%'");
    let err = Consumer::open(&session, &options).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.message().starts_with("Error occurred while initializing the consumer"));
}

#[tokio::test]
async fn test_client_acknowledge_is_cumulative() {
    let (broker, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Client).await.unwrap();
    let queue = Destination::queue("acks");
    let producer = Producer::open(&session, Some(&queue)).await.unwrap();
    for body in ["one", "two", "three"] {
        producer.send(&Message::text(body)).await.unwrap();
    }
    let consumer = Consumer::open(&session, &ConsumerOptions::new(queue))
        .await
        .unwrap();

    let _one = consumer.receive(1000).await.unwrap().unwrap();
    let two = consumer.receive(1000).await.unwrap().unwrap();
    assert!(two.is_acknowledgeable());
    two.acknowledge().await.unwrap();

    session.recover().await.unwrap();
    assert_eq!(broker.queue_depth("acks"), 1);

    let three = consumer.receive(1000).await.unwrap().unwrap();
    assert_eq!(three.as_text(), Some("three"));
    assert!(!three.redelivered);
}

#[tokio::test]
async fn test_recover_redelivers_unacknowledged() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Client).await.unwrap();
    let queue = Destination::queue("retry");
    Producer::open(&session, Some(&queue))
        .await
        .unwrap()
        .send(&Message::text("again"))
        .await
        .unwrap();
    let consumer = Consumer::open(&session, &ConsumerOptions::new(queue))
        .await
        .unwrap();

    let first = consumer.receive(1000).await.unwrap().unwrap();
    assert!(!first.redelivered);
    session.recover().await.unwrap();

    let second = consumer.receive(1000).await.unwrap().unwrap();
    assert!(second.redelivered);
    assert_eq!(second.message_id, first.message_id);
}

#[tokio::test]
async fn test_unidentified_producer_sends_per_call() {
    let (broker, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let producer = Producer::open(&session, None).await.unwrap();
    assert!(producer.destination().is_none());

    let err = producer.send(&Message::text("nowhere")).await.unwrap_err();
    assert!(err.message().starts_with("Error occurred while sending the message"));

    producer
        .send_to(&Destination::queue("a"), &Message::text("to a"))
        .await
        .unwrap();
    producer
        .send_to(&Destination::queue("b"), &Message::text("to b"))
        .await
        .unwrap();
    assert_eq!(broker.queue_depth("a"), 1);
    assert_eq!(broker.queue_depth("b"), 1);
}

#[tokio::test]
async fn test_reply_to_round_trips() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let queue = Destination::queue("requests");
    let message = Message::text("ping")
        .with_reply_to(Destination::queue("replies"))
        .with_correlation_id("c-1")
        .with_type("Ping");
    Producer::open(&session, Some(&queue))
        .await
        .unwrap()
        .send(&message)
        .await
        .unwrap();

    let consumer = Consumer::open(&session, &ConsumerOptions::new(queue))
        .await
        .unwrap();
    let received = consumer.receive(1000).await.unwrap().unwrap();
    assert_eq!(received.reply_to, Some(Destination::queue("replies")));
    assert_eq!(received.correlation_id.as_deref(), Some("c-1"));
    assert_eq!(received.message_type.as_deref(), Some("Ping"));
}

#[tokio::test]
async fn test_receive_times_out_empty() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let consumer = Consumer::open(&session, &ConsumerOptions::new(Destination::queue("quiet")))
        .await
        .unwrap();

    assert!(consumer.receive(20).await.unwrap().is_none());
    assert!(consumer.receive_no_wait().await.unwrap().is_none());
}

#[tokio::test]
async fn test_connection_close_unblocks_receive() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let consumer = Consumer::open(&session, &ConsumerOptions::new(Destination::queue("idle")))
        .await
        .unwrap();

    let waiting = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.receive(0).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    connection.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(result.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_close_invalidates_descendants() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let queue = Destination::queue("gone");
    let producer = Producer::open(&session, Some(&queue)).await.unwrap();
    let consumer = Consumer::open(&session, &ConsumerOptions::new(queue))
        .await
        .unwrap();

    connection.close().await.unwrap();
    connection.close().await.unwrap();

    assert_eq!(connection.state().await, ConnectionState::Closed);
    assert!(session.is_closed());
    assert!(producer.send(&Message::text("x")).await.unwrap_err().is_closed());
    assert!(consumer.receive_no_wait().await.unwrap_err().is_closed());
    assert!(connection.create_session(AckMode::Auto).await.unwrap_err().is_closed());
    assert!(connection.start().await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_session_close_is_idempotent() {
    let (_, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let consumer = Consumer::open(&session, &ConsumerOptions::new(Destination::queue("s")))
        .await
        .unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(consumer.receive_no_wait().await.unwrap_err().is_closed());
    assert!(consumer.close().await.is_ok());
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_session_close_closes_producers() {
    let (broker, registry) = fixture();
    let connection = started(&registry).await;
    let session = connection.create_session(AckMode::Auto).await.unwrap();
    let identified = Producer::open(&session, Some(&Destination::queue("p")))
        .await
        .unwrap();
    let unidentified = Producer::open(&session, None).await.unwrap();
    let early = Producer::open(&session, None).await.unwrap();
    early.close().await.unwrap();
    assert_eq!(broker.stats().producers_closed(), 1);

    session.close().await.unwrap();
    assert_eq!(broker.stats().producers_closed(), 3);
    assert!(identified.is_closed() && unidentified.is_closed());

    let err = identified.send(&Message::text("late")).await.unwrap_err();
    assert!(err.is_closed());
    assert!(identified.close().await.is_ok());
    assert_eq!(broker.stats().producers_closed(), 3);
}

#[test]
fn test_ack_mode_parse() {
    assert_eq!("AUTO_ACKNOWLEDGE".parse::<AckMode>().unwrap(), AckMode::Auto);
    assert_eq!("CLIENT_ACKNOWLEDGE".parse::<AckMode>().unwrap(), AckMode::Client);
    assert_eq!("DUPS_OK_ACKNOWLEDGE".parse::<AckMode>().unwrap(), AckMode::DupsOk);
    assert_eq!(
        "SESSION_TRANSACTED".parse::<AckMode>().unwrap(),
        AckMode::Transacted
    );

    let err = "EVENTUALLY".parse::<AckMode>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.message(), "unknown acknowledgement mode: EVENTUALLY");
}

#[test]
fn test_ack_mode_serde() {
    let json = serde_json::to_string(&AckMode::DupsOk).unwrap();
    assert_eq!(json, "\"DUPS_OK_ACKNOWLEDGE\"");
    assert!(serde_json::from_str::<AckMode>("\"NEVER\"").is_err());
}

#[test]
fn test_destination_serde_defaults_to_temporary_topic() {
    let destination: Destination = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
    assert_eq!(destination.kind, DestinationKind::TemporaryTopic);

    let destination: Destination =
        serde_json::from_str(r#"{"type":"QUEUE","name":"orders"}"#).unwrap();
    assert_eq!(destination, Destination::queue("orders"));
}
