//! Tests for layer actors: tick semantics, edge handling, the run loop

use ace_broker::{BrokerError, BrokerOp, Channel, Credentials, MemoryBroker};
use ace_bus::*;
use ace_core::{
    ComponentSettings, Layer, LayerOutput, LayerStack, LayerStatus, Message, MessageBatch,
    MessageKind, NamingRules,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn stack() -> Arc<LayerStack> {
    let layers = ["L1", "L2", "L3"]
        .iter()
        .enumerate()
        .map(|(i, n)| Layer::new(i + 1, *n, format!("Layer {}", i + 1)))
        .collect();
    Arc::new(LayerStack::new(layers, NamingRules::default()).unwrap())
}

fn options() -> ActorOptions {
    ActorOptions {
        poll_interval: Duration::from_millis(20),
        max_batch: 64,
        operation_timeout: Duration::from_millis(200),
    }
}

async fn connected_bus(broker: &MemoryBroker) -> BusResource {
    let mut bus = BusResource::new(
        ComponentSettings::new("busses", "Busses"),
        stack(),
        Arc::new(broker.clone()),
        Credentials::default(),
        BusOptions::default(),
    );
    bus.connect().await.unwrap();
    bus
}

async fn actor(bus: &BusResource, layer: &str, processor: Arc<dyn LayerProcessor>) -> LayerActor {
    let mut actor = LayerActor::new(layer, Arc::clone(bus.stack()), processor, options()).unwrap();
    actor.attach(bus.connection().unwrap());
    actor.post_connect().await.unwrap();
    actor
}

fn emit(north: Vec<Message>, south: Vec<Message>) -> Arc<dyn LayerProcessor> {
    Arc::new(FnProcessor::new(move |_, _| {
        Ok(LayerOutput::new(north.clone(), south.clone()))
    }))
}

/// Keeps every batch it is handed.
#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<MessageBatch>>,
    ticks: AtomicUsize,
}

impl Recorder {
    fn messages(&self) -> Vec<Message> {
        let batches = self.batches.lock().unwrap();
        let messages = batches
            .iter()
            .flat_map(|b| {
                MessageKind::ALL
                    .into_iter()
                    .flat_map(move |k| b.get(k).to_vec())
            })
            .collect();
        messages
    }
}

#[async_trait::async_trait]
impl LayerProcessor for Recorder {
    async fn process(
        &self,
        _layer: &Layer,
        batch: MessageBatch,
    ) -> Result<LayerOutput, ProcessingError> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if !batch.is_empty() {
            self.batches.lock().unwrap().push(batch);
        }
        Ok(LayerOutput::empty())
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ===========================================================================
// Construction
// ===========================================================================

#[tokio::test]
async fn unknown_layer_is_rejected() {
    let result = LayerActor::new("L9", stack(), Arc::new(IdleProcessor), options());
    assert!(matches!(
        result,
        Err(BusError::Core(ace_core::Error::UnknownLayer(_)))
    ));
}

#[tokio::test]
async fn post_connect_needs_a_connection() {
    let mut actor = LayerActor::new("L2", stack(), Arc::new(IdleProcessor), options()).unwrap();
    assert!(matches!(
        actor.post_connect().await,
        Err(BusError::ActorFailed { .. })
    ));
    assert!(!actor.status().up);
}

#[tokio::test]
async fn subscribes_to_every_inbound_queue() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;

    let l1 = actor(&bus, "L1", Arc::new(IdleProcessor)).await;
    let l2 = actor(&bus, "L2", Arc::new(IdleProcessor)).await;
    assert_eq!(l1.subscriptions(), 2);
    assert_eq!(l2.subscriptions(), 3);
    for queue in ["L1-L2-north", "L2-L3-south", "integrity-L2", "L1-L2-south", "integrity-L1"] {
        assert_eq!(broker.consumer_count(queue), 1, "{}", queue);
    }
    assert_eq!(l2.labeled_name(), "Layer 2 (L2)");
    assert!(l2.status().up);
}

// ===========================================================================
// Tick
// ===========================================================================

#[tokio::test]
async fn middle_layer_publishes_north_only() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let l2 = actor(&bus, "L2", emit(vec![Message::data("m")], vec![])).await;

    let report = l2.tick(MessageBatch::new()).await.unwrap();
    assert_eq!(report.received, 0);
    assert_eq!(report.published_north, 1);
    assert_eq!(report.published_south, 0);

    let sent = broker.published_to("L2-L3-north");
    assert_eq!(sent.len(), 1);
    let msg = Message::decode(&sent[0]).unwrap();
    assert_eq!(msg.kind(), MessageKind::Data);
    assert_eq!(msg.text(), Some("m"));
    assert!(broker.published_to("L1-L2-south").is_empty());
    assert_eq!(broker.queue_depth("L2-L3-north"), Some(1));
}

#[tokio::test]
async fn empty_output_publishes_nothing() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let l2 = actor(&bus, "L2", Arc::new(IdleProcessor)).await;

    let report = l2.tick(MessageBatch::new()).await.unwrap();
    assert_eq!(report, TickReport::default());
    assert_eq!(broker.published_count(), 0);
}

#[tokio::test]
async fn edge_layers_drop_messages_past_the_stack() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let both = || emit(vec![Message::data("up")], vec![Message::control("down")]);

    let bottom = actor(&bus, "L1", both()).await;
    let report = bottom.tick(MessageBatch::new()).await.unwrap();
    assert_eq!(report.published_north, 1);
    assert_eq!(report.published_south, 0);
    assert_eq!(report.dropped_at_edge, 1);

    let top = actor(&bus, "L3", both()).await;
    let report = top.tick(MessageBatch::new()).await.unwrap();
    assert_eq!(report.published_north, 0);
    assert_eq!(report.published_south, 1);
    assert_eq!(report.dropped_at_edge, 1);

    assert_eq!(broker.published_to("L1-L2-north").len(), 1);
    assert_eq!(broker.published_to("L2-L3-south").len(), 1);
    assert_eq!(broker.published_count(), 2);
}

#[tokio::test]
async fn output_keeps_its_order() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let north = vec![Message::data("a"), Message::telemetry("b"), Message::data("c")];
    let l2 = actor(&bus, "L2", emit(north, vec![])).await;
    l2.tick(MessageBatch::new()).await.unwrap();

    let texts: Vec<String> = broker
        .published_to("L2-L3-north")
        .iter()
        .map(|b| Message::decode(b).unwrap().text().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn processing_error_is_contained() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let flaky = Arc::new(FnProcessor::new(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ProcessingError::new("model unavailable"))
        } else {
            Ok(LayerOutput::new(vec![Message::data("recovered")], vec![]))
        }
    }));
    let l2 = actor(&bus, "L2", flaky).await;

    let report = l2.tick(MessageBatch::new()).await.unwrap();
    assert_eq!(report.processing_error.as_deref(), Some("model unavailable"));
    assert_eq!(report.published_north, 0);
    assert_eq!(l2.layer_status(), LayerStatus::Idle);
    assert_eq!(broker.published_count(), 0);

    let report = l2.tick(MessageBatch::new()).await.unwrap();
    assert!(report.processing_error.is_none());
    assert_eq!(report.published_north, 1);
}

#[tokio::test]
async fn publish_failure_fails_the_tick_but_not_the_actor() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let l2 = actor(&bus, "L2", emit(vec![Message::data("m")], vec![])).await;

    broker.fail_on(BrokerOp::Publish, "L2-L3-north");
    let err = l2.tick(MessageBatch::new()).await.unwrap_err();
    assert!(matches!(err, BusError::Broker(BrokerError::Rejected { .. })));
    assert_eq!(l2.layer_status(), LayerStatus::Idle);

    broker.clear_faults();
    assert_eq!(l2.tick(MessageBatch::new()).await.unwrap().published_north, 1);
}

/// Reports the layer status it observes while processing.
struct StatusWatcher {
    watch: Mutex<Option<watch::Receiver<LayerStatus>>>,
    seen: Mutex<Vec<LayerStatus>>,
}

#[async_trait::async_trait]
impl LayerProcessor for StatusWatcher {
    async fn process(
        &self,
        _layer: &Layer,
        _batch: MessageBatch,
    ) -> Result<LayerOutput, ProcessingError> {
        if let Some(rx) = self.watch.lock().unwrap().as_ref() {
            self.seen.lock().unwrap().push(*rx.borrow());
        }
        Ok(LayerOutput::empty())
    }
}

#[tokio::test]
async fn status_is_inferring_during_processing() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let watcher = Arc::new(StatusWatcher {
        watch: Mutex::new(None),
        seen: Mutex::new(Vec::new()),
    });
    let l2 = actor(&bus, "L2", watcher.clone()).await;
    *watcher.watch.lock().unwrap() = Some(l2.status_watch());

    assert_eq!(l2.layer_status(), LayerStatus::Idle);
    l2.tick(MessageBatch::new()).await.unwrap();
    assert_eq!(*watcher.seen.lock().unwrap(), vec![LayerStatus::Inferring]);
    assert_eq!(l2.layer_status(), LayerStatus::Idle);
}

#[tokio::test]
async fn pre_disconnect_stops_the_actor() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let mut l2 = actor(&bus, "L2", Arc::new(IdleProcessor)).await;
    l2.pre_disconnect().await.unwrap();

    assert_eq!(l2.layer_status(), LayerStatus::Stopped);
    assert!(!l2.status().up);
    assert_eq!(broker.consumer_count("L1-L2-north"), 0);
    // nothing to send, so no channel is needed
    assert!(l2.tick(MessageBatch::new()).await.is_ok());
}

// ===========================================================================
// Run loop
// ===========================================================================

#[tokio::test]
async fn run_delivers_inbound_messages_and_drops_malformed() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let recorder = Arc::new(Recorder::default());
    let l2 = actor(&bus, "L2", recorder.clone()).await;

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(l2.run(cancel.clone()));

    let publisher = bus.publisher_channel().unwrap();
    publisher
        .publish("L1-L2-north", Bytes::from(Message::data("up").encode().unwrap()))
        .await
        .unwrap();
    publisher
        .publish("L1-L2-north", Bytes::from_static(b"garbage"))
        .await
        .unwrap();
    publisher
        .publish("L2-L3-south", Bytes::from(Message::control("down").encode().unwrap()))
        .await
        .unwrap();

    wait_until(|| recorder.messages().len() >= 2).await;
    cancel.cancel();
    let mut l2 = handle.await.unwrap();

    let messages = recorder.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.kind() == MessageKind::Data && m.text() == Some("up")));
    assert!(messages
        .iter()
        .any(|m| m.kind() == MessageKind::Control && m.text() == Some("down")));

    l2.pre_disconnect().await.unwrap();
    assert_eq!(l2.layer_status(), LayerStatus::Stopped);
}

#[tokio::test]
async fn run_ticks_without_input() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let recorder = Arc::new(Recorder::default());
    let l3 = actor(&bus, "L3", recorder.clone()).await;

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(l3.run(cancel.clone()));
    wait_until(|| recorder.ticks.load(Ordering::SeqCst) >= 3).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(recorder.messages().is_empty());
}

#[tokio::test]
async fn run_keeps_ticking_after_consumers_close() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let recorder = Arc::new(Recorder::default());
    let l1 = actor(&bus, "L1", recorder.clone()).await;

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(l1.run(cancel.clone()));
    broker.restart();

    let before = recorder.ticks.load(Ordering::SeqCst);
    wait_until(|| recorder.ticks.load(Ordering::SeqCst) >= before + 2).await;
    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn zero_poll_interval_still_runs() {
    let broker = MemoryBroker::recording();
    let bus = connected_bus(&broker).await;
    let recorder = Arc::new(Recorder::default());
    let options = ActorOptions {
        poll_interval: Duration::ZERO,
        ..options()
    };
    let mut l2 = LayerActor::new("L2", Arc::clone(bus.stack()), recorder.clone(), options).unwrap();
    l2.attach(bus.connection().unwrap());
    l2.post_connect().await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(l2.run(cancel.clone()));
    wait_until(|| recorder.ticks.load(Ordering::SeqCst) >= 2).await;
    cancel.cancel();
    let l2 = handle.await.unwrap();
    assert_eq!(l2.layer().name(), "L2");
}
