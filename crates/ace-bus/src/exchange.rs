//! ExchangeManager — one exchange (plus its backing queue) per layer-pair name

use crate::error::{BusError, BusResult, ResourceKind, TopologyPhase, TopologyReport};
use ace_broker::{
    ignore_already_exists, ignore_not_found, BrokerResult, Channel, ExchangeKind, TimedChannel,
};
use ace_core::LayerStack;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Creates and destroys the data exchanges of a stack.
///
/// The set of names comes from [`LayerStack::all_layer_queue_names`] and
/// nothing outside it is ever touched.
pub struct ExchangeManager {
    channel: TimedChannel,
    stack: Arc<LayerStack>,
    durable: bool,
    owner: String,
}

impl ExchangeManager {
    pub fn new(
        channel: TimedChannel,
        stack: Arc<LayerStack>,
        durable: bool,
        owner: String,
    ) -> Self {
        Self {
            channel,
            stack,
            durable,
            owner,
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.stack.all_layer_queue_names()
    }

    pub fn is_managed(&self, queue_name: &str) -> bool {
        self.queue_names().iter().any(|n| n == queue_name)
    }

    /// Declare the exchange and its backing queue and bind them.
    /// Already present counts as success.
    pub async fn create(&self, queue_name: &str) -> BusResult<()> {
        if !self.is_managed(queue_name) {
            return Err(BusError::UnmanagedExchange(queue_name.to_string()));
        }
        Ok(self.setup(queue_name).await?)
    }

    /// Delete the exchange and its backing queue. Already gone counts as success.
    pub async fn destroy(&self, queue_name: &str) -> BusResult<()> {
        if !self.is_managed(queue_name) {
            return Err(BusError::UnmanagedExchange(queue_name.to_string()));
        }
        Ok(self.teardown(queue_name).await?)
    }

    pub async fn create_all(&self) -> TopologyReport {
        debug!("{} creating exchanges...", self.owner);
        let mut report = TopologyReport::new(TopologyPhase::Setup);
        for queue_name in self.queue_names() {
            let result = self.setup(&queue_name).await;
            if let Err(e) = &result {
                warn!("{} failed to create exchange {}: {}", self.owner, queue_name, e);
            }
            report.record(ResourceKind::Exchange, &queue_name, result);
        }
        debug!("{} exchanges created", self.owner);
        report
    }

    pub async fn destroy_all(&self) -> TopologyReport {
        debug!("{} destroying exchanges...", self.owner);
        let mut report = TopologyReport::new(TopologyPhase::Teardown);
        for queue_name in self.queue_names() {
            let result = self.teardown(&queue_name).await;
            if let Err(e) = &result {
                warn!("{} failed to destroy exchange {}: {}", self.owner, queue_name, e);
            }
            report.record(ResourceKind::Exchange, &queue_name, result);
        }
        debug!("{} exchanges destroyed", self.owner);
        report
    }

    async fn setup(&self, queue_name: &str) -> BrokerResult<()> {
        ignore_already_exists(
            self.channel
                .declare_exchange(queue_name, ExchangeKind::Fanout, self.durable)
                .await,
        )?;
        ignore_already_exists(self.channel.declare_queue(queue_name, self.durable).await)?;
        self.channel.bind_queue(queue_name, queue_name).await?;
        info!("Created exchange for {} for resource {}", queue_name, self.owner);
        Ok(())
    }

    async fn teardown(&self, queue_name: &str) -> BrokerResult<()> {
        // attempt both deletes even if the first one fails
        let exchange = ignore_not_found(self.channel.delete_exchange(queue_name).await);
        let queue = ignore_not_found(self.channel.delete_queue(queue_name).await);
        exchange?;
        queue?;
        info!("Destroyed exchange for {} for resource {}", queue_name, self.owner);
        Ok(())
    }
}
