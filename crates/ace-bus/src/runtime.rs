//! LayerRuntime — wires a bus resource and one actor per layer together
//!
//! Startup: connect the bus (topology included), build one actor per layer
//! on the shared connection, subscribe them all, then spawn them.
//! Shutdown: cancel and drain the actors, then disconnect the bus.

use crate::actor::LayerActor;
use crate::component::Component;
use crate::config::AceConfig;
use crate::error::{BusError, BusResult, TopologyReport};
use crate::processor::{IdleProcessor, LayerProcessor};
use crate::resource::{BusResource, BusState};
use ace_broker::Connector;
use ace_core::{ComponentSettings, LayerStack, LayerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct LayerRuntime {
    config: AceConfig,
    stack: Arc<LayerStack>,
    connector: Arc<dyn Connector>,
    processors: HashMap<String, Arc<dyn LayerProcessor>>,
}

impl LayerRuntime {
    pub fn new(config: AceConfig, connector: Arc<dyn Connector>) -> BusResult<Self> {
        let stack = Arc::new(config.build_stack()?);
        Ok(Self {
            config,
            stack,
            connector,
            processors: HashMap::new(),
        })
    }

    /// Run `processor` on `layer`. Layers without one get [`IdleProcessor`].
    pub fn with_processor(
        mut self,
        layer: impl Into<String>,
        processor: Arc<dyn LayerProcessor>,
    ) -> Self {
        self.processors.insert(layer.into(), processor);
        self
    }

    pub fn stack(&self) -> &Arc<LayerStack> {
        &self.stack
    }

    pub async fn start(self) -> BusResult<RunningStack> {
        for name in self.processors.keys() {
            if self.stack.get(name).is_none() {
                warn!("processor configured for unknown layer {}", name);
            }
        }

        let mut bus = BusResource::new(
            ComponentSettings::new(self.config.bus.name.as_str(), self.config.bus.label.as_str()),
            Arc::clone(&self.stack),
            Arc::clone(&self.connector),
            self.config.broker.clone(),
            self.config.bus_options(),
        );
        if let Err(e) = bus.connect().await {
            error!("{} failed to start: {}", bus.labeled_name(), e);
            if bus.state() == BusState::Connected {
                let _ = bus.disconnect().await;
            }
            return Err(e);
        }
        let connection = match bus.connection() {
            Some(connection) => connection,
            None => {
                return Err(BusError::InvalidState {
                    operation: "start actors",
                    state: bus.state(),
                })
            }
        };

        let mut actors = Vec::with_capacity(self.stack.len());
        for layer in self.stack.layers() {
            let processor = self
                .processors
                .get(layer.name())
                .cloned()
                .unwrap_or_else(|| Arc::new(IdleProcessor) as Arc<dyn LayerProcessor>);
            let built = LayerActor::new(
                layer.name(),
                Arc::clone(&self.stack),
                processor,
                self.config.actor_options(),
            );
            let mut actor = match built {
                Ok(actor) => actor,
                Err(e) => {
                    abandon(actors, &mut bus).await;
                    return Err(e);
                }
            };
            actor.attach(Arc::clone(&connection));
            if let Err(e) = actor.post_connect().await {
                error!("{} failed to subscribe: {}", actor.labeled_name(), e);
                actors.push(actor);
                abandon(actors, &mut bus).await;
                return Err(e);
            }
            actors.push(actor);
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut statuses = Vec::with_capacity(actors.len());
        for actor in actors {
            statuses.push((actor.layer().name().to_string(), actor.status_watch()));
            tasks.spawn(actor.run(cancel.child_token()));
        }
        info!("{} layer(s) running", statuses.len());

        Ok(RunningStack {
            bus,
            tasks,
            cancel,
            statuses,
            drain_timeout: self.config.drain_timeout(),
        })
    }

    /// Start, run until `shutdown` fires, then shut down.
    pub async fn run(self, shutdown: CancellationToken) -> BusResult<ShutdownReport> {
        let running = self.start().await?;
        shutdown.cancelled().await;
        Ok(running.shutdown().await)
    }
}

/// Undo a partial start.
async fn abandon(actors: Vec<LayerActor>, bus: &mut BusResource) {
    for mut actor in actors {
        let _ = actor.pre_disconnect().await;
    }
    if let Err(e) = bus.disconnect().await {
        warn!("{} teardown after failed start: {}", bus.labeled_name(), e);
    }
}

fn observed_status(rx: &watch::Receiver<LayerStatus>) -> LayerStatus {
    if rx.has_changed().is_err() {
        // sender dropped with the actor
        LayerStatus::Stopped
    } else {
        *rx.borrow()
    }
}

pub struct RunningStack {
    bus: BusResource,
    tasks: JoinSet<LayerActor>,
    cancel: CancellationToken,
    statuses: Vec<(String, watch::Receiver<LayerStatus>)>,
    drain_timeout: Duration,
}

/// What happened at shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Layers whose actor finished its last tick and stopped cleanly.
    pub drained: Vec<String>,
    /// Layers whose actor was aborted or panicked.
    pub aborted: Vec<String>,
    pub actor_failures: Vec<String>,
    pub teardown: Option<TopologyReport>,
    /// Last status of every layer, in stack order.
    pub statuses: Vec<(String, LayerStatus)>,
    /// Disconnect failure other than a teardown pass with failures.
    pub bus_error: Option<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty()
            && self.actor_failures.is_empty()
            && self.bus_error.is_none()
            && self.teardown.as_ref().map_or(true, TopologyReport::is_clean)
    }
}

impl RunningStack {
    pub fn bus(&self) -> &BusResource {
        &self.bus
    }

    /// Live status of a layer. A layer whose actor is gone without stopping
    /// cleanly (aborted or panicked) reads as `Stopped`.
    pub fn layer_status(&self, layer: &str) -> Option<LayerStatus> {
        self.statuses
            .iter()
            .find(|(name, _)| name == layer)
            .map(|(_, rx)| observed_status(rx))
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.statuses.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Token that stops every actor when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the actors, then tear the bus down.
    ///
    /// Actors get `drain_timeout` to finish the tick they are in; whatever is
    /// still running after that is aborted and its unsent output is lost.
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!("shutting down {} layer(s)", self.statuses.len());
        self.cancel.cancel();

        let mut report = ShutdownReport::default();
        let mut stopped = Vec::new();
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(Ok(actor))) => stopped.push(actor),
                Ok(Some(Err(e))) => {
                    if e.is_panic() {
                        error!("actor task failed: {}", e);
                        report.actor_failures.push(e.to_string());
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} actor(s) still busy after {:?}, aborting",
                        self.tasks.len(),
                        self.drain_timeout
                    );
                    self.tasks.abort_all();
                    while let Some(joined) = self.tasks.join_next().await {
                        if let Ok(actor) = joined {
                            stopped.push(actor);
                        }
                    }
                    break;
                }
            }
        }

        for mut actor in stopped {
            let name = actor.layer().name().to_string();
            if let Err(e) = actor.pre_disconnect().await {
                report.actor_failures.push(format!("{}: {}", name, e));
            }
            report.drained.push(name);
        }
        for (name, _) in &self.statuses {
            if !report.drained.contains(name) {
                report.aborted.push(name.clone());
            }
        }

        match self.bus.disconnect().await {
            Ok(()) => {}
            Err(BusError::Topology(_)) => {}
            Err(e) => report.bus_error = Some(e.to_string()),
        }
        report.teardown = self.bus.topology_report().cloned();
        report.statuses = self
            .statuses
            .iter()
            .map(|(name, rx)| (name.clone(), observed_status(rx)))
            .collect();

        if report.is_clean() {
            info!("shutdown complete");
        } else {
            warn!("shutdown finished with problems: {:?}", report);
        }
        report
    }
}
