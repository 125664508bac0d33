//! BusResource — owns the broker connection and the shared topology
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`.
//! Setup order is system-integrity queues, then exchanges; teardown runs in
//! reverse so the integrity path outlives the data path on both sides.

use crate::component::Component;
use crate::error::{BusError, BusResult, TopologyPhase, TopologyReport};
use crate::exchange::ExchangeManager;
use crate::integrity::IntegrityQueueManager;
use ace_broker::{
    with_timeout, BrokerOp, Channel, ChannelRole, Connection, Connector, Credentials, TimedChannel,
};
use ace_core::{ComponentSettings, HealthStatus, LayerStack};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BusState::Disconnected => "disconnected",
            BusState::Connecting => "connecting",
            BusState::Connected => "connected",
            BusState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct BusOptions {
    /// Upper bound on every broker round-trip.
    pub operation_timeout: Duration,
    pub durable_exchanges: bool,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            durable_exchanges: true,
        }
    }
}

/// Live broker resources, present only while connected.
struct Session {
    connection: Arc<dyn Connection>,
    publisher: TimedChannel,
    consumer: TimedChannel,
    exchanges: ExchangeManager,
    integrity: IntegrityQueueManager,
}

pub struct BusResource {
    settings: ComponentSettings,
    stack: Arc<LayerStack>,
    connector: Arc<dyn Connector>,
    credentials: Credentials,
    options: BusOptions,
    state: BusState,
    session: Option<Session>,
    last_report: Option<TopologyReport>,
}

impl BusResource {
    pub fn new(
        settings: ComponentSettings,
        stack: Arc<LayerStack>,
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        options: BusOptions,
    ) -> Self {
        Self {
            settings,
            stack,
            connector,
            credentials,
            options,
            state: BusState::Disconnected,
            session: None,
            last_report: None,
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn stack(&self) -> &Arc<LayerStack> {
        &self.stack
    }

    /// The shared connection, for actors to open their own channels on.
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.session.as_ref().map(|s| Arc::clone(&s.connection))
    }

    pub fn publisher_channel(&self) -> Option<&TimedChannel> {
        self.session.as_ref().map(|s| &s.publisher)
    }

    pub fn consumer_channel(&self) -> Option<&TimedChannel> {
        self.session.as_ref().map(|s| &s.consumer)
    }

    /// Report of the most recent setup or teardown pass.
    pub fn topology_report(&self) -> Option<&TopologyReport> {
        self.last_report.as_ref()
    }

    /// Open the connection and both channels, then build the topology.
    ///
    /// If the topology pass fails partway the bus stays `Connected` and the
    /// error carries the full report; the caller decides whether to
    /// disconnect.
    pub async fn connect(&mut self) -> BusResult<()> {
        self.require(BusState::Disconnected, "connect")?;
        self.state = BusState::Connecting;
        info!("{} connecting to {}", self.labeled_name(), self.credentials.url);

        match self.open_session().await {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                warn!("{} failed to connect: {}", self.labeled_name(), e);
                self.state = BusState::Disconnected;
                return Err(e);
            }
        }
        self.state = BusState::Connected;
        self.post_connect().await
    }

    /// Tear down the topology, then close channels and the connection.
    /// Always ends `Disconnected`; teardown failures are returned afterwards.
    pub async fn disconnect(&mut self) -> BusResult<()> {
        self.require(BusState::Connected, "disconnect")?;
        self.state = BusState::Disconnecting;
        let teardown = self.pre_disconnect().await;

        if let Some(session) = self.session.take() {
            for channel in [&session.publisher, &session.consumer] {
                if let Err(e) = channel.close().await {
                    debug!("{} channel close: {}", self.settings.name, e);
                }
            }
            if let Err(e) = session.connection.close().await {
                warn!("{} failed to close connection: {}", self.labeled_name(), e);
            }
        }
        self.state = BusState::Disconnected;
        info!("{} disconnected", self.labeled_name());
        teardown
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    pub async fn create_exchanges(&mut self) -> BusResult<()> {
        let report = self.session("create exchanges")?.exchanges.create_all().await;
        self.finish(report)
    }

    pub async fn destroy_exchanges(&mut self) -> BusResult<()> {
        let report = self.session("destroy exchanges")?.exchanges.destroy_all().await;
        self.finish(report)
    }

    pub async fn create_exchange(&self, queue_name: &str) -> BusResult<()> {
        self.session("create exchange")?.exchanges.create(queue_name).await
    }

    pub async fn destroy_exchange(&self, queue_name: &str) -> BusResult<()> {
        self.session("destroy exchange")?.exchanges.destroy(queue_name).await
    }

    pub async fn create_system_integrity_queues(&mut self) -> BusResult<()> {
        let report = self.session("create system-integrity queues")?.integrity.create_all().await;
        self.finish(report)
    }

    pub async fn destroy_system_integrity_queues(&mut self) -> BusResult<()> {
        let report = self.session("destroy system-integrity queues")?.integrity.destroy_all().await;
        self.finish(report)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn open_session(&self) -> BusResult<Session> {
        let timeout = self.options.operation_timeout;
        let connection = with_timeout(
            BrokerOp::Connect,
            &self.credentials.url,
            timeout,
            self.connector.open_connection(&self.credentials),
        )
        .await?;

        let channels = async {
            let publisher = self.open_channel(&connection, ChannelRole::Publisher).await?;
            let consumer = self.open_channel(&connection, ChannelRole::Consumer).await?;
            Ok::<_, BusError>((publisher, consumer))
        }
        .await;
        let (publisher, consumer) = match channels {
            Ok(pair) => pair,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        let owner = self.settings.name.clone();
        Ok(Session {
            exchanges: ExchangeManager::new(
                publisher.clone(),
                Arc::clone(&self.stack),
                self.options.durable_exchanges,
                owner.clone(),
            ),
            integrity: IntegrityQueueManager::new(
                consumer.clone(),
                Arc::clone(&self.stack),
                owner,
            ),
            connection,
            publisher,
            consumer,
        })
    }

    async fn open_channel(
        &self,
        connection: &Arc<dyn Connection>,
        role: ChannelRole,
    ) -> BusResult<TimedChannel> {
        let timeout = self.options.operation_timeout;
        let channel = with_timeout(
            BrokerOp::OpenChannel,
            &role.to_string(),
            timeout,
            connection.open_channel(role),
        )
        .await?;
        Ok(TimedChannel::new(channel, timeout))
    }

    fn require(&self, expected: BusState, operation: &'static str) -> BusResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BusError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn session(&self, operation: &'static str) -> BusResult<&Session> {
        match (&self.session, self.state) {
            (Some(session), BusState::Connected | BusState::Disconnecting) => Ok(session),
            _ => Err(BusError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    fn finish(&mut self, report: TopologyReport) -> BusResult<()> {
        self.last_report = Some(report.clone());
        report.into_result()
    }
}

#[async_trait::async_trait]
impl Component for BusResource {
    fn settings(&self) -> &ComponentSettings {
        &self.settings
    }

    fn status(&self) -> HealthStatus {
        let up = self.state == BusState::Connected
            && self.session.as_ref().is_some_and(|s| s.connection.is_open());
        HealthStatus::new(&self.settings, up)
    }

    async fn post_connect(&mut self) -> BusResult<()> {
        let session = self.session("post_connect")?;
        let mut report = TopologyReport::new(TopologyPhase::Setup);
        report.absorb(session.integrity.create_all().await);
        report.absorb(session.exchanges.create_all().await);
        if report.is_clean() {
            info!(
                "{} topology ready: {} resource(s)",
                self.labeled_name(),
                report.attempted
            );
        } else {
            warn!("{}: {}", self.labeled_name(), report);
        }
        self.finish(report)
    }

    async fn pre_disconnect(&mut self) -> BusResult<()> {
        let session = self.session("pre_disconnect")?;
        let mut report = TopologyReport::new(TopologyPhase::Teardown);
        report.absorb(session.exchanges.destroy_all().await);
        report.absorb(session.integrity.destroy_all().await);
        if !report.is_clean() {
            warn!("{}: {}", self.labeled_name(), report);
        }
        self.finish(report)
    }
}
