//! IntegrityQueueManager — one durable control/liveness queue per layer
//!
//! These queues are independent of the data exchanges so an external
//! process can still reach a layer while its exchanges are down.

use crate::error::{ResourceKind, TopologyPhase, TopologyReport};
use ace_broker::{ignore_already_exists, ignore_not_found, Channel, TimedChannel};
use ace_core::LayerStack;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct IntegrityQueueManager {
    channel: TimedChannel,
    stack: Arc<LayerStack>,
    owner: String,
}

impl IntegrityQueueManager {
    pub fn new(channel: TimedChannel, stack: Arc<LayerStack>, owner: String) -> Self {
        Self {
            channel,
            stack,
            owner,
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.stack.all_integrity_queue_names()
    }

    /// Declare every layer's queue as durable. A failing layer does not stop
    /// the others from being attempted.
    pub async fn create_all(&self) -> TopologyReport {
        let mut report = TopologyReport::new(TopologyPhase::Setup);
        for queue_name in self.queue_names() {
            let result = ignore_already_exists(self.channel.declare_queue(&queue_name, true).await);
            match &result {
                Ok(()) => debug!("{} declared system-integrity queue {}", self.owner, queue_name),
                Err(e) => warn!(
                    "{} failed to declare system-integrity queue {}: {}",
                    self.owner, queue_name, e
                ),
            }
            report.record(ResourceKind::IntegrityQueue, &queue_name, result);
        }
        report
    }

    pub async fn destroy_all(&self) -> TopologyReport {
        let mut report = TopologyReport::new(TopologyPhase::Teardown);
        for queue_name in self.queue_names() {
            let result = ignore_not_found(self.channel.delete_queue(&queue_name).await);
            match &result {
                Ok(()) => debug!("{} deleted system-integrity queue {}", self.owner, queue_name),
                Err(e) => warn!(
                    "{} failed to delete system-integrity queue {}: {}",
                    self.owner, queue_name, e
                ),
            }
            report.record(ResourceKind::IntegrityQueue, &queue_name, result);
        }
        report
    }
}
