//! Core types for ACE

use serde::{Deserialize, Serialize};
use std::fmt;

/// One stage of the cognitive stack.
///
/// Built once at startup (identity included) and never mutated afterwards;
/// the stack hands out shared references only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    index: usize,
    name: String,
    label: String,
    identity: String,
}

impl Layer {
    pub fn new(index: usize, name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            label: label.into(),
            identity: String::new(),
        }
    }

    /// Inject the layer's identity text. Only usable while building.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// "Cognitive Control (layer_5)"
    pub fn labeled_name(&self) -> String {
        format!("{} ({})", self.label, self.name)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Flow direction between layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward higher-numbered layers.
    Northbound,
    /// Toward lower-numbered layers.
    Southbound,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Northbound, Direction::Southbound];

    pub fn opposite(self) -> Self {
        match self {
            Direction::Northbound => Direction::Southbound,
            Direction::Southbound => Direction::Northbound,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Northbound => "northbound",
            Direction::Southbound => "southbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a layer actor is doing right now. Reset to `Idle` on every restart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    #[default]
    Idle,
    Inferring,
    Publishing,
    Stopped,
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayerStatus::Idle => "IDLE",
            LayerStatus::Inferring => "INFERRING",
            LayerStatus::Publishing => "PUBLISHING",
            LayerStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Name and human label shared by every component (bus resource, layers).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSettings {
    pub name: String,
    pub label: String,
}

impl ComponentSettings {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }

    pub fn labeled_name(&self) -> String {
        format!("{} ({})", self.label, self.name)
    }
}

impl From<&Layer> for ComponentSettings {
    fn from(layer: &Layer) -> Self {
        Self::new(layer.name(), layer.label())
    }
}

/// Result of a shallow liveness probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub name: String,
    pub label: String,
    pub up: bool,
}

impl HealthStatus {
    pub fn new(settings: &ComponentSettings, up: bool) -> Self {
        Self {
            name: settings.name.clone(),
            label: settings.label.clone(),
            up,
        }
    }
}
