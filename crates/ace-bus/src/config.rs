//! Stack configuration
//!
//! Broker login, the layer roster, bus and actor tunables, and queue naming.
//! Loaded from TOML at startup, falls back to defaults if no config file exists.

use crate::actor::ActorOptions;
use crate::resource::BusOptions;
use ace_broker::Credentials;
use ace_core::{Error, Layer, LayerStack, NamingRules};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AceConfig {
    /// Broker connection parameters.
    pub broker: Credentials,
    /// Layers from the bottom of the stack (index 1) upward.
    pub layers: Vec<LayerConfig>,
    pub bus: BusConfig,
    pub actor: ActorConfig,
    pub naming: NamingRules,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Component name of the bus resource.
    pub name: String,
    pub label: String,
    /// Upper bound on every broker round-trip.
    pub operation_timeout_ms: u64,
    /// Declare exchanges and their backing queues as durable.
    pub durable_exchanges: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// How often an actor with an empty inbox still runs its processor.
    pub poll_interval_ms: u64,
    /// Most deliveries taken into one tick.
    pub max_batch: usize,
    /// How long shutdown waits for an in-flight tick before aborting it.
    pub drain_timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for AceConfig {
    fn default() -> Self {
        Self {
            broker: Credentials::default(),
            layers: default_layers(),
            bus: BusConfig::default(),
            actor: ActorConfig::default(),
            naming: NamingRules::default(),
        }
    }
}

fn default_layers() -> Vec<LayerConfig> {
    [
        ("layer_1", "Aspirational", "I hold the mission and the moral compass."),
        ("layer_2", "Global Strategy", "I turn the mission into long-range strategy."),
        ("layer_3", "Agent Model", "I know what this agent is and what it can do."),
        ("layer_4", "Executive Function", "I plan, allocate resources and manage risk."),
        ("layer_5", "Cognitive Control", "I choose the next task and watch its progress."),
        ("layer_6", "Task Prosecution", "I carry out tasks and report what happened."),
    ]
    .into_iter()
    .map(|(name, label, identity)| LayerConfig {
        name: name.into(),
        label: label.into(),
        identity: identity.into(),
    })
    .collect()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "busses".into(),
            label: "Busses".into(),
            operation_timeout_ms: 5_000,
            durable_exchanges: true,
        }
    }
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_batch: 256,
            drain_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AceConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist
    /// or can't be parsed.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(Error::Io(_)) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Like [`AceConfig::load`] but surfaces read and parse failures.
    pub fn try_load(path: &Path) -> ace_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ace_core::Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Build the validated stack, numbering layers from 1 in listed order.
    pub fn build_stack(&self) -> ace_core::Result<LayerStack> {
        let layers = self
            .layers
            .iter()
            .enumerate()
            .map(|(i, l)| {
                Layer::new(i + 1, l.name.as_str(), l.label.as_str())
                    .with_identity(l.identity.as_str())
            })
            .collect();
        LayerStack::new(layers, self.naming.clone())
    }

    pub fn bus_options(&self) -> BusOptions {
        BusOptions {
            operation_timeout: self.operation_timeout(),
            durable_exchanges: self.bus.durable_exchanges,
        }
    }

    pub fn actor_options(&self) -> ActorOptions {
        ActorOptions {
            poll_interval: Duration::from_millis(self.actor.poll_interval_ms.max(1)),
            max_batch: self.actor.max_batch.max(1),
            operation_timeout: self.operation_timeout(),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.bus.operation_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.actor.drain_timeout_ms)
    }
}
