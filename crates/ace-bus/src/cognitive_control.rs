//! Cognitive Control — the stock layer_5 processor
//!
//! Deliberates for a fixed interval, then sends a data message up to
//! Executive Function and a control message down to Task Prosecution.

use crate::processor::{LayerProcessor, ProcessingError};
use ace_core::{Layer, LayerOutput, LayerStatus, Message, MessageBatch};
use std::time::Duration;
use tracing::debug;

pub const LAYER_NAME: &str = "layer_5";
pub const LAYER_LABEL: &str = "Cognitive Control";

#[derive(Debug, Clone)]
pub struct CognitiveControl {
    deliberation: Duration,
}

impl CognitiveControl {
    pub fn new(deliberation: Duration) -> Self {
        Self { deliberation }
    }
}

impl Default for CognitiveControl {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait::async_trait]
impl LayerProcessor for CognitiveControl {
    async fn process(
        &self,
        layer: &Layer,
        batch: MessageBatch,
    ) -> Result<LayerOutput, ProcessingError> {
        debug!(
            "{} {} over {} message(s) ({} control, {} data)",
            layer.labeled_name(),
            LayerStatus::Inferring,
            batch.len(),
            batch.control.len(),
            batch.data.len()
        );
        tokio::time::sleep(self.deliberation).await;
        Ok(LayerOutput::new(
            vec![Message::data("hello data")],
            vec![Message::control("hello control")],
        ))
    }
}
