//! Queue-name derivation
//!
//! Names are pure functions of (layer pair, direction) or (layer) so that
//! re-creating the topology after a crash lands on exactly the same names.

use crate::error::{Error, Result};
use crate::types::{Direction, Layer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingRules {
    /// Joins the parts of a derived name.
    pub separator: String,
    /// Tail of every northbound exchange name.
    pub north_suffix: String,
    /// Tail of every southbound exchange name.
    pub south_suffix: String,
    /// Head of every system-integrity queue name.
    pub integrity_prefix: String,
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            separator: "-".into(),
            north_suffix: "north".into(),
            south_suffix: "south".into(),
            integrity_prefix: "integrity".into(),
        }
    }
}

impl NamingRules {
    pub fn validate(&self) -> Result<()> {
        let parts = [
            ("separator", &self.separator),
            ("north_suffix", &self.north_suffix),
            ("south_suffix", &self.south_suffix),
            ("integrity_prefix", &self.integrity_prefix),
        ];
        for (field, value) in parts {
            if value.is_empty() {
                return Err(Error::Config(format!("naming.{} must not be empty", field)));
            }
        }
        for (field, value) in &parts[1..] {
            if value.contains(self.separator.as_str()) {
                return Err(Error::Config(format!(
                    "naming.{} '{}' contains the separator '{}'",
                    field, value, self.separator
                )));
            }
        }
        if self.north_suffix == self.south_suffix {
            return Err(Error::Config(
                "naming.north_suffix and naming.south_suffix must differ".into(),
            ));
        }
        Ok(())
    }

    fn suffix(&self, direction: Direction) -> &str {
        match direction {
            Direction::Northbound => &self.north_suffix,
            Direction::Southbound => &self.south_suffix,
        }
    }

    /// Exchange/queue name for the adjacent pair `(lower, upper)` in `direction`.
    pub fn data_queue_name(&self, lower: &Layer, upper: &Layer, direction: Direction) -> String {
        format!(
            "{lower}{sep}{upper}{sep}{suffix}",
            lower = lower.name(),
            upper = upper.name(),
            sep = self.separator,
            suffix = self.suffix(direction)
        )
    }

    /// Reserved per-layer liveness/control queue name.
    pub fn integrity_queue_name(&self, layer: &Layer) -> String {
        format!("{}{}{}", self.integrity_prefix, self.separator, layer.name())
    }
}
