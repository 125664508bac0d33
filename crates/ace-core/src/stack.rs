//! LayerStack — the ordered set of layers and everything derived from it
//!
//! The stack is the single source of truth for which exchanges and
//! system-integrity queues must exist, and for which neighbor a layer
//! publishes to in each direction.

use crate::error::{Error, Result};
use crate::naming::NamingRules;
use crate::types::{Direction, Layer};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LayerStack {
    layers: Vec<Layer>,
    naming: NamingRules,
}

impl LayerStack {
    /// Build a stack bottom-to-top. Layer indices must strictly increase and
    /// names must be unique, non-empty and free of the naming separator.
    pub fn new(layers: Vec<Layer>, naming: NamingRules) -> Result<Self> {
        naming.validate()?;
        if layers.is_empty() {
            return Err(Error::invalid_stack("stack has no layers"));
        }

        let mut seen = HashSet::new();
        for layer in &layers {
            if layer.name().is_empty() {
                return Err(Error::invalid_stack(format!(
                    "layer {} has an empty name",
                    layer.index()
                )));
            }
            if layer.name().contains(naming.separator.as_str()) {
                return Err(Error::invalid_stack(format!(
                    "layer name '{}' contains the separator '{}'",
                    layer.name(),
                    naming.separator
                )));
            }
            if !seen.insert(layer.name().to_string()) {
                return Err(Error::invalid_stack(format!(
                    "duplicate layer name '{}'",
                    layer.name()
                )));
            }
        }
        for pair in layers.windows(2) {
            if pair[1].index() <= pair[0].index() {
                return Err(Error::invalid_stack(format!(
                    "layer '{}' (index {}) must come after '{}' (index {})",
                    pair[1].name(),
                    pair[1].index(),
                    pair[0].name(),
                    pair[0].index()
                )));
            }
        }

        let stack = Self { layers, naming };

        let mut names = HashSet::new();
        for name in stack
            .all_layer_queue_names()
            .into_iter()
            .chain(stack.all_integrity_queue_names())
        {
            if !names.insert(name.clone()) {
                return Err(Error::invalid_stack(format!(
                    "derived queue name '{}' is not unique",
                    name
                )));
            }
        }

        Ok(stack)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn naming(&self) -> &NamingRules {
        &self.naming
    }

    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name() == name)
    }

    fn position(&self, layer: &Layer) -> Result<usize> {
        self.layers
            .iter()
            .position(|l| l.name() == layer.name())
            .ok_or_else(|| Error::UnknownLayer(layer.name().to_string()))
    }

    pub fn is_top(&self, layer: &Layer) -> bool {
        self.layers.last().is_some_and(|l| l.name() == layer.name())
    }

    pub fn is_bottom(&self, layer: &Layer) -> bool {
        self.layers.first().is_some_and(|l| l.name() == layer.name())
    }

    /// The adjacent layer in `direction`, or `None` at the edge of the stack.
    pub fn neighbor(&self, layer: &Layer, direction: Direction) -> Result<Option<&Layer>> {
        let pos = self.position(layer)?;
        Ok(match direction {
            Direction::Northbound => self.layers.get(pos + 1),
            Direction::Southbound => pos.checked_sub(1).and_then(|p| self.layers.get(p)),
        })
    }

    /// Exchange a layer publishes to when sending in `direction`.
    /// `None` for the top layer going north and the bottom layer going south.
    pub fn outbound_exchange(&self, layer: &Layer, direction: Direction) -> Result<Option<String>> {
        let Some(neighbor) = self.neighbor(layer, direction)? else {
            return Ok(None);
        };
        let name = match direction {
            Direction::Northbound => self.naming.data_queue_name(layer, neighbor, direction),
            Direction::Southbound => self.naming.data_queue_name(neighbor, layer, direction),
        };
        Ok(Some(name))
    }

    /// Queues a layer consumes: northbound traffic from below, southbound
    /// traffic from above, then its own system-integrity queue.
    pub fn inbound_queues(&self, layer: &Layer) -> Result<Vec<String>> {
        let mut queues = Vec::with_capacity(3);
        if let Some(below) = self.neighbor(layer, Direction::Southbound)? {
            queues.push(self.naming.data_queue_name(below, layer, Direction::Northbound));
        }
        if let Some(above) = self.neighbor(layer, Direction::Northbound)? {
            queues.push(self.naming.data_queue_name(layer, above, Direction::Southbound));
        }
        queues.push(self.naming.integrity_queue_name(layer));
        Ok(queues)
    }

    /// Every data exchange name: both directions for every adjacent pair,
    /// bottom of the stack first. Always `2 * (len - 1)` entries.
    pub fn all_layer_queue_names(&self) -> Vec<String> {
        self.layers
            .windows(2)
            .flat_map(|pair| {
                Direction::ALL
                    .into_iter()
                    .map(|dir| self.naming.data_queue_name(&pair[0], &pair[1], dir))
            })
            .collect()
    }

    pub fn integrity_queue_name(&self, layer: &Layer) -> String {
        self.naming.integrity_queue_name(layer)
    }

    /// One system-integrity queue per layer, bottom first.
    pub fn all_integrity_queue_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .map(|l| self.naming.integrity_queue_name(l))
            .collect()
    }
}
