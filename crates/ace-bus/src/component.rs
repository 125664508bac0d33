//! The interface shared by everything that lives on the bus

use crate::error::BusResult;
use ace_core::{ComponentSettings, HealthStatus};

/// Settings, a liveness probe, and the two connection hooks.
///
/// `post_connect` runs once the broker connection is up; `pre_disconnect`
/// runs before it goes away.
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    fn settings(&self) -> &ComponentSettings;

    fn labeled_name(&self) -> String {
        self.settings().labeled_name()
    }

    /// Shallow liveness check. Does not audit the broker.
    fn status(&self) -> HealthStatus;

    async fn post_connect(&mut self) -> BusResult<()>;

    async fn pre_disconnect(&mut self) -> BusResult<()>;
}
