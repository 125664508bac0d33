//! LayerActor — one running layer: consume, process, publish
//!
//! Each actor holds its own publisher and consumer channels on the shared
//! connection. A tick takes whatever has arrived (possibly nothing), runs
//! the layer's processor once, and publishes the output to the neighbouring
//! exchanges. Ticks never overlap.

use crate::component::Component;
use crate::error::{BusError, BusResult};
use crate::processor::LayerProcessor;
use ace_broker::{
    with_timeout, BrokerOp, Channel, ChannelRole, Connection, Consumer, Delivery, TimedChannel,
};
use ace_core::{
    ComponentSettings, Direction, HealthStatus, Layer, LayerOutput, LayerStack, LayerStatus,
    Message, MessageBatch,
};
use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct ActorOptions {
    /// Tick cadence when nothing arrives.
    pub poll_interval: Duration,
    /// Most deliveries folded into one batch.
    pub max_batch: usize,
    pub operation_timeout: Duration,
}

impl Default for ActorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_batch: 256,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub received: usize,
    pub published_north: usize,
    pub published_south: usize,
    /// Messages addressed past the top or bottom of the stack.
    pub dropped_at_edge: usize,
    pub processing_error: Option<String>,
}

struct Channels {
    publisher: TimedChannel,
    consumer: TimedChannel,
}

pub struct LayerActor {
    settings: ComponentSettings,
    layer: Layer,
    stack: Arc<LayerStack>,
    processor: Arc<dyn LayerProcessor>,
    options: ActorOptions,
    connection: Option<Arc<dyn Connection>>,
    channels: Option<Channels>,
    consumers: Vec<Consumer>,
    status: watch::Sender<LayerStatus>,
}

impl LayerActor {
    pub fn new(
        layer_name: &str,
        stack: Arc<LayerStack>,
        processor: Arc<dyn LayerProcessor>,
        options: ActorOptions,
    ) -> BusResult<Self> {
        let layer = stack
            .get(layer_name)
            .cloned()
            .ok_or_else(|| ace_core::Error::UnknownLayer(layer_name.to_string()))?;
        let (status, _) = watch::channel(LayerStatus::Idle);
        Ok(Self {
            settings: ComponentSettings::from(&layer),
            layer,
            stack,
            processor,
            options,
            connection: None,
            channels: None,
            consumers: Vec::new(),
            status,
        })
    }

    /// Use `connection` for this actor's channels. Takes effect on `post_connect`.
    pub fn attach(&mut self, connection: Arc<dyn Connection>) {
        self.connection = Some(connection);
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    pub fn layer_status(&self) -> LayerStatus {
        *self.status.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<LayerStatus> {
        self.status.subscribe()
    }

    /// Number of inbound queues this actor is subscribed to.
    pub fn subscriptions(&self) -> usize {
        self.consumers.len()
    }

    /// Run the processor over `batch` once and publish the result.
    ///
    /// A processing error is logged and yields no output. A broker error
    /// while publishing aborts the rest of this tick's output and is
    /// returned. Either way the layer is back to `Idle` afterwards.
    pub async fn tick(&self, batch: MessageBatch) -> BusResult<TickReport> {
        let mut report = TickReport {
            received: batch.len(),
            ..Default::default()
        };

        self.set_status(LayerStatus::Inferring);
        let output = match self.processor.process(&self.layer, batch).await {
            Ok(output) => output,
            Err(e) => {
                warn!("{}", ace_core::Error::processing(self.layer.name(), e.to_string()));
                report.processing_error = Some(e.to_string());
                LayerOutput::empty()
            }
        };

        let published = self.publish_output(output, &mut report).await;
        self.set_status(LayerStatus::Idle);
        published.map(|()| report)
    }

    /// Tick until `cancel` fires. A tick in progress is allowed to finish.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        let mut inbox = futures::stream::select_all(std::mem::take(&mut self.consumers));
        let mut inbox_closed = inbox.is_empty();
        // tokio rejects a zero period
        let period = self.options.poll_interval.max(MIN_POLL_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of a tokio interval completes immediately
        interval.tick().await;

        info!("{} running", self.labeled_name());
        loop {
            let first: Option<Delivery> = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                delivery = inbox.next(), if !inbox_closed => match delivery {
                    Some(delivery) => Some(delivery),
                    None => {
                        debug!("{} inbox closed", self.settings.name);
                        inbox_closed = true;
                        continue;
                    }
                },
                _ = interval.tick() => None,
            };

            let mut deliveries: Vec<Delivery> = first.into_iter().collect();
            while deliveries.len() < self.options.max_batch {
                match inbox.next().now_or_never() {
                    Some(Some(delivery)) => deliveries.push(delivery),
                    _ => break,
                }
            }

            let batch = self.decode(deliveries);
            let span = tracing::info_span!("tick", layer = %self.layer.name());
            match self.tick(batch).instrument(span).await {
                Ok(report) => debug!("{} tick: {:?}", self.settings.name, report),
                Err(e) => warn!("{} tick failed: {}", self.labeled_name(), e),
            }
        }
        info!("{} stopping", self.labeled_name());
        self
    }

    fn decode(&self, deliveries: Vec<Delivery>) -> MessageBatch {
        let mut batch = MessageBatch::new();
        for delivery in deliveries {
            match Message::decode(&delivery.body) {
                Ok(message) => batch.push(message),
                Err(e) => warn!(
                    "{} dropped malformed message from {}: {}",
                    self.settings.name, delivery.queue, e
                ),
            }
        }
        batch
    }

    async fn publish_output(&self, output: LayerOutput, report: &mut TickReport) -> BusResult<()> {
        let LayerOutput {
            northbound,
            southbound,
        } = output;

        for (direction, messages) in [
            (Direction::Northbound, northbound),
            (Direction::Southbound, southbound),
        ] {
            if messages.is_empty() {
                continue;
            }
            let Some(exchange) = self.stack.outbound_exchange(&self.layer, direction)? else {
                debug!(
                    "{} has no {} neighbour, dropping {} message(s)",
                    self.settings.name,
                    direction.as_str(),
                    messages.len()
                );
                report.dropped_at_edge += messages.len();
                continue;
            };

            let publisher = self.publisher()?;
            self.set_status(LayerStatus::Publishing);
            for message in messages {
                let body = Bytes::from(message.encode()?);
                publisher.publish(&exchange, body).await?;
                match direction {
                    Direction::Northbound => report.published_north += 1,
                    Direction::Southbound => report.published_south += 1,
                }
            }
        }
        Ok(())
    }

    fn publisher(&self) -> BusResult<&TimedChannel> {
        self.channels
            .as_ref()
            .map(|c| &c.publisher)
            .ok_or_else(|| self.failure("not connected"))
    }

    fn set_status(&self, status: LayerStatus) {
        self.status.send_replace(status);
    }

    fn failure(&self, reason: &str) -> BusError {
        BusError::ActorFailed {
            layer: self.layer.name().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn open_channel(
        &self,
        connection: &Arc<dyn Connection>,
        role: ChannelRole,
    ) -> BusResult<TimedChannel> {
        let timeout = self.options.operation_timeout;
        let channel = with_timeout(
            BrokerOp::OpenChannel,
            self.layer.name(),
            timeout,
            connection.open_channel(role),
        )
        .await?;
        Ok(TimedChannel::new(channel, timeout))
    }
}

#[async_trait::async_trait]
impl Component for LayerActor {
    fn settings(&self) -> &ComponentSettings {
        &self.settings
    }

    fn status(&self) -> HealthStatus {
        let up = self.layer_status() != LayerStatus::Stopped
            && self.channels.as_ref().is_some_and(|c| c.publisher.is_open());
        HealthStatus::new(&self.settings, up)
    }

    /// Open this actor's channels and subscribe to its inbound queues.
    async fn post_connect(&mut self) -> BusResult<()> {
        let connection = self
            .connection
            .clone()
            .ok_or_else(|| self.failure("no connection attached"))?;
        let publisher = self.open_channel(&connection, ChannelRole::Publisher).await?;
        let consumer = self.open_channel(&connection, ChannelRole::Consumer).await?;

        let mut consumers = Vec::new();
        for queue in self.stack.inbound_queues(&self.layer)? {
            match consumer.consume(&queue).await {
                Ok(c) => consumers.push(c),
                Err(e) => {
                    let _ = publisher.close().await;
                    let _ = consumer.close().await;
                    return Err(e.into());
                }
            }
        }
        debug!(
            "{} subscribed to {} queue(s)",
            self.settings.name,
            consumers.len()
        );

        self.consumers = consumers;
        self.channels = Some(Channels {
            publisher,
            consumer,
        });
        self.set_status(LayerStatus::Idle);
        Ok(())
    }

    async fn pre_disconnect(&mut self) -> BusResult<()> {
        self.consumers.clear();
        if let Some(channels) = self.channels.take() {
            for channel in [&channels.publisher, &channels.consumer] {
                if let Err(e) = channel.close().await {
                    debug!("{} channel close: {}", self.settings.name, e);
                }
            }
        }
        self.set_status(LayerStatus::Stopped);
        Ok(())
    }
}
