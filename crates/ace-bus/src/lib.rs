//! ace-bus — the inter-layer messaging substrate
//!
//! Builds and tears down the broker topology for a layer stack and runs one
//! actor per layer on top of it.

pub mod actor;
pub mod cognitive_control;
pub mod component;
pub mod config;
pub mod error;
pub mod exchange;
pub mod integrity;
pub mod processor;
pub mod resource;
pub mod runtime;

pub use actor::{ActorOptions, LayerActor, TickReport};
pub use cognitive_control::CognitiveControl;
pub use component::Component;
pub use config::{AceConfig, ActorConfig, BusConfig, LayerConfig};
pub use error::{
    BusError, BusResult, ResourceKind, TopologyFailure, TopologyPhase, TopologyReport,
};
pub use exchange::ExchangeManager;
pub use integrity::IntegrityQueueManager;
pub use processor::{FnProcessor, IdleProcessor, LayerProcessor, ProcessingError};
pub use resource::{BusOptions, BusResource, BusState};
pub use runtime::{LayerRuntime, RunningStack, ShutdownReport};
