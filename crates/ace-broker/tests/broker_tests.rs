//! Tests for ace-broker: MemoryBroker semantics, error taxonomy, bounded waits

use ace_broker::*;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

async fn channel(broker: &MemoryBroker, role: ChannelRole) -> Arc<dyn Channel> {
    let conn = broker.open_connection(&Credentials::default()).await.unwrap();
    conn.open_channel(role).await.unwrap()
}

async fn next_body(consumer: &mut Consumer) -> String {
    let delivery = tokio::time::timeout(Duration::from_secs(1), consumer.next())
        .await
        .expect("delivery within 1s")
        .expect("consumer still open");
    String::from_utf8(delivery.body.to_vec()).unwrap()
}

// ===========================================================================
// Error helpers
// ===========================================================================

#[test]
fn idempotency_helpers() {
    assert!(ignore_already_exists(Err(BrokerError::already_exists("exchange", "x"))).is_ok());
    assert!(ignore_already_exists(Err(BrokerError::ChannelClosed)).is_err());
    assert!(ignore_not_found(Err(BrokerError::not_found("queue", "q"))).is_ok());
    assert!(ignore_not_found(Err(BrokerError::Connection("down".into()))).is_err());
    assert!(ignore_not_found(Ok(())).is_ok());
}

#[test]
fn fatal_to_tick_classification() {
    assert!(BrokerError::Connection("x".into()).is_fatal_to_tick());
    assert!(BrokerError::ChannelClosed.is_fatal_to_tick());
    assert!(BrokerError::Timeout {
        op: BrokerOp::Publish,
        target: "ex".into(),
        after: Duration::from_millis(5),
    }
    .is_fatal_to_tick());
    assert!(!BrokerError::not_found("exchange", "ex").is_fatal_to_tick());
}

#[test]
fn credentials_debug_hides_password() {
    let creds = Credentials {
        password: "hunter2".into(),
        ..Default::default()
    };
    let shown = format!("{:?}", creds);
    assert!(!shown.contains("hunter2"));
    assert!(shown.contains("guest"));
}

// ===========================================================================
// Declare / delete
// ===========================================================================

#[tokio::test]
async fn declare_exchange_is_idempotent_for_same_properties() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_exchange("ex", ExchangeKind::Fanout, true).await.unwrap();
    ch.declare_exchange("ex", ExchangeKind::Fanout, true).await.unwrap();
    assert_eq!(broker.exchange_names(), vec!["ex"]);
}

#[tokio::test]
async fn redeclare_with_different_properties_is_already_exists() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_exchange("ex", ExchangeKind::Fanout, true).await.unwrap();
    let err = ch
        .declare_exchange("ex", ExchangeKind::Fanout, false)
        .await
        .unwrap_err();
    assert!(err.is_already_exists());
    let err = ch
        .declare_exchange("ex", ExchangeKind::Direct, true)
        .await
        .unwrap_err();
    assert!(err.is_already_exists());

    ch.declare_exchange("routed", ExchangeKind::Topic, true).await.unwrap();
    ch.declare_exchange("routed", ExchangeKind::Topic, true).await.unwrap();
    assert!(ch
        .declare_exchange("routed", ExchangeKind::Fanout, true)
        .await
        .unwrap_err()
        .is_already_exists());

    ch.declare_queue("q", true).await.unwrap();
    assert!(ch.declare_queue("q", false).await.unwrap_err().is_already_exists());
}

#[tokio::test]
async fn delete_missing_is_not_found() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    assert!(ch.delete_exchange("nope").await.unwrap_err().is_not_found());
    assert!(ch.delete_queue("nope").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn delete_queue_removes_bindings() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_exchange("ex", ExchangeKind::Fanout, true).await.unwrap();
    ch.declare_queue("q", true).await.unwrap();
    ch.bind_queue("q", "ex").await.unwrap();
    assert_eq!(broker.bindings("ex"), vec!["q"]);

    ch.delete_queue("q").await.unwrap();
    assert!(broker.bindings("ex").is_empty());
    assert!(!broker.has_queue("q"));
}

#[tokio::test]
async fn bind_requires_both_ends() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    assert!(ch.bind_queue("q", "ex").await.unwrap_err().is_not_found());
    ch.declare_queue("q", false).await.unwrap();
    assert!(ch.bind_queue("q", "ex").await.unwrap_err().is_not_found());
}

// ===========================================================================
// Publish / consume
// ===========================================================================

#[tokio::test]
async fn publish_routes_to_bound_queue_in_fifo_order() {
    let broker = MemoryBroker::recording();
    let publisher = channel(&broker, ChannelRole::Publisher).await;
    let consumer_ch = channel(&broker, ChannelRole::Consumer).await;

    publisher.declare_exchange("ex", ExchangeKind::Fanout, true).await.unwrap();
    publisher.declare_queue("q", true).await.unwrap();
    publisher.bind_queue("q", "ex").await.unwrap();

    let mut consumer = consumer_ch.consume("q").await.unwrap();
    assert_eq!(consumer.queue(), "q");
    assert!(consumer.tag().starts_with("ctag-"));
    for i in 0..5 {
        publisher
            .publish("ex", Bytes::from(format!("m{}", i)))
            .await
            .unwrap();
    }
    for i in 0..5 {
        assert_eq!(next_body(&mut consumer).await, format!("m{}", i));
    }
    assert_eq!(broker.published_to("ex").len(), 5);
}

#[tokio::test]
async fn plain_broker_counts_publishes_without_keeping_bodies() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_exchange("ex", ExchangeKind::Fanout, false).await.unwrap();
    for _ in 0..3 {
        ch.publish("ex", Bytes::from_static(b"body")).await.unwrap();
    }
    assert_eq!(broker.published_count(), 3);
    assert!(broker.published_to("ex").is_empty());
    assert!(broker.operations().is_empty());
}

#[tokio::test]
async fn recording_broker_logs_successful_operations_in_order() {
    let broker = MemoryBroker::recording();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_queue("q", true).await.unwrap();
    ch.declare_exchange("ex", ExchangeKind::Fanout, true).await.unwrap();
    ch.bind_queue("q", "ex").await.unwrap();
    ch.publish("ex", Bytes::from_static(b"x")).await.unwrap();
    assert!(ch.publish("ghost", Bytes::from_static(b"x")).await.is_err());
    ch.delete_exchange("ex").await.unwrap();
    ch.delete_queue("q").await.unwrap();

    let ops = broker.operations();
    let ops: Vec<(BrokerOp, &str)> = ops.iter().map(|(op, t)| (*op, t.as_str())).collect();
    assert_eq!(
        ops,
        vec![
            (BrokerOp::DeclareQueue, "q"),
            (BrokerOp::DeclareExchange, "ex"),
            (BrokerOp::Bind, "q"),
            (BrokerOp::Publish, "ex"),
            (BrokerOp::DeleteExchange, "ex"),
            (BrokerOp::DeleteQueue, "q"),
        ]
    );
}

#[tokio::test]
async fn backlog_waits_for_a_consumer() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_exchange("ex", ExchangeKind::Fanout, false).await.unwrap();
    ch.declare_queue("q", false).await.unwrap();
    ch.bind_queue("q", "ex").await.unwrap();

    ch.publish("ex", Bytes::from_static(b"first")).await.unwrap();
    ch.publish("ex", Bytes::from_static(b"second")).await.unwrap();
    assert_eq!(broker.queue_depth("q"), Some(2));

    let consumer_ch = channel(&broker, ChannelRole::Consumer).await;
    let mut consumer = consumer_ch.consume("q").await.unwrap();
    assert_eq!(next_body(&mut consumer).await, "first");
    assert_eq!(next_body(&mut consumer).await, "second");
    assert_eq!(broker.queue_depth("q"), Some(0));
}

#[tokio::test]
async fn publish_to_missing_exchange_is_not_found() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    let err = ch.publish("ghost", Bytes::from_static(b"x")).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(broker.published_count(), 0);
}

#[tokio::test]
async fn dropped_consumer_leaves_messages_queued() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_exchange("ex", ExchangeKind::Fanout, false).await.unwrap();
    ch.declare_queue("q", false).await.unwrap();
    ch.bind_queue("q", "ex").await.unwrap();

    let consumer = ch.consume("q").await.unwrap();
    drop(consumer);
    ch.publish("ex", Bytes::from_static(b"kept")).await.unwrap();
    assert_eq!(broker.queue_depth("q"), Some(1));
    assert_eq!(broker.consumer_count("q"), 0);
}

#[tokio::test]
async fn closing_channel_ends_its_consumers() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Consumer).await;
    ch.declare_queue("q", false).await.unwrap();
    let mut consumer = ch.consume("q").await.unwrap();

    ch.close().await.unwrap();
    assert!(!ch.is_open());
    assert!(consumer.next().await.is_none());
    assert!(matches!(
        ch.declare_queue("other", false).await,
        Err(BrokerError::ChannelClosed)
    ));
}

// ===========================================================================
// Connections and restart
// ===========================================================================

#[tokio::test]
async fn wrong_credentials_are_refused() {
    let broker = MemoryBroker::with_credentials(Credentials {
        username: "ace".into(),
        password: "secret".into(),
        ..Default::default()
    });
    let err = broker
        .open_connection(&Credentials::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BrokerError::Connection(_)));

    let ok = broker
        .open_connection(&Credentials {
            username: "ace".into(),
            password: "secret".into(),
            ..Default::default()
        })
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn closed_connection_refuses_channels() {
    let broker = MemoryBroker::new();
    let conn = broker.open_connection(&Credentials::default()).await.unwrap();
    let ch = conn.open_channel(ChannelRole::Publisher).await.unwrap();
    assert_eq!(broker.open_connections(), 1);

    conn.close().await.unwrap();
    assert!(!conn.is_open());
    assert!(!ch.is_open());
    assert_eq!(broker.open_connections(), 0);
    assert!(conn.open_channel(ChannelRole::Consumer).await.is_err());
}

#[tokio::test]
async fn restart_keeps_only_durable_entities() {
    let broker = MemoryBroker::new();
    let ch = channel(&broker, ChannelRole::Publisher).await;
    ch.declare_exchange("durable-ex", ExchangeKind::Fanout, true).await.unwrap();
    ch.declare_exchange("temp-ex", ExchangeKind::Fanout, false).await.unwrap();
    ch.declare_queue("durable-q", true).await.unwrap();
    ch.declare_queue("temp-q", false).await.unwrap();
    ch.bind_queue("durable-q", "durable-ex").await.unwrap();
    ch.bind_queue("temp-q", "durable-ex").await.unwrap();
    ch.publish("durable-ex", Bytes::from_static(b"survivor")).await.unwrap();

    broker.restart();

    assert_eq!(broker.exchange_names(), vec!["durable-ex"]);
    assert_eq!(broker.queue_names(), vec!["durable-q"]);
    assert_eq!(broker.bindings("durable-ex"), vec!["durable-q"]);
    assert_eq!(broker.queue_depth("durable-q"), Some(1));
    assert_eq!(broker.is_durable_queue("durable-q"), Some(true));
    assert!(!ch.is_open());
}

// ===========================================================================
// Fault injection and bounded waits
// ===========================================================================

#[tokio::test]
async fn injected_failure_targets_one_name() {
    let broker = MemoryBroker::new();
    broker.fail_on(BrokerOp::DeclareQueue, "bad");
    let ch = channel(&broker, ChannelRole::Consumer).await;

    assert!(matches!(
        ch.declare_queue("bad", true).await,
        Err(BrokerError::Rejected { .. })
    ));
    ch.declare_queue("good", true).await.unwrap();

    broker.clear_faults();
    ch.declare_queue("bad", true).await.unwrap();
}

#[tokio::test]
async fn timed_channel_turns_a_stall_into_timeout() {
    let broker = MemoryBroker::new();
    broker.stall_on(BrokerOp::DeclareExchange, "slow");
    let ch = TimedChannel::new(
        channel(&broker, ChannelRole::Publisher).await,
        Duration::from_millis(50),
    );
    assert_eq!(ch.timeout(), Duration::from_millis(50));
    assert_eq!(ch.inner().role(), ChannelRole::Publisher);

    let err = ch
        .declare_exchange("slow", ExchangeKind::Fanout, true)
        .await
        .unwrap_err();
    match err {
        BrokerError::Timeout { op, target, after } => {
            assert_eq!(op, BrokerOp::DeclareExchange);
            assert_eq!(target, "slow");
            assert_eq!(after, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    ch.declare_exchange("fast", ExchangeKind::Fanout, true).await.unwrap();
}

#[tokio::test]
async fn with_timeout_passes_through_results() {
    let ok: BrokerResult<u8> =
        with_timeout(BrokerOp::Publish, "ex", Duration::from_secs(1), async { Ok(7) }).await;
    assert_eq!(ok.unwrap(), 7);

    let err: BrokerResult<()> = with_timeout(
        BrokerOp::Publish,
        "ex",
        Duration::from_secs(1),
        async { Err(BrokerError::ChannelClosed) },
    )
    .await;
    assert!(matches!(err, Err(BrokerError::ChannelClosed)));
}
