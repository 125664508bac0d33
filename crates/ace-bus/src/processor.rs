//! The per-layer processing seam
//!
//! A processor turns one batch of inbound messages into the messages a layer
//! sends north and south. It never sees the broker.

use ace_core::{Layer, LayerOutput, MessageBatch};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ProcessingError {
    pub reason: String,
}

impl ProcessingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<ace_core::Error> for ProcessingError {
    fn from(e: ace_core::Error) -> Self {
        Self::new(e.to_string())
    }
}

#[async_trait::async_trait]
pub trait LayerProcessor: Send + Sync {
    /// Handle one batch. An error drops this tick's output; the layer keeps running.
    async fn process(&self, layer: &Layer, batch: MessageBatch)
        -> Result<LayerOutput, ProcessingError>;
}

/// Emits nothing. Used for layers with no processor configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleProcessor;

#[async_trait::async_trait]
impl LayerProcessor for IdleProcessor {
    async fn process(
        &self,
        _layer: &Layer,
        _batch: MessageBatch,
    ) -> Result<LayerOutput, ProcessingError> {
        Ok(LayerOutput::empty())
    }
}

type ProcessFn =
    dyn Fn(&Layer, MessageBatch) -> Result<LayerOutput, ProcessingError> + Send + Sync;

/// Adapts a plain closure into a [`LayerProcessor`].
#[derive(Clone)]
pub struct FnProcessor {
    f: Arc<ProcessFn>,
}

impl FnProcessor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Layer, MessageBatch) -> Result<LayerOutput, ProcessingError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait::async_trait]
impl LayerProcessor for FnProcessor {
    async fn process(
        &self,
        layer: &Layer,
        batch: MessageBatch,
    ) -> Result<LayerOutput, ProcessingError> {
        (self.f)(layer, batch)
    }
}
