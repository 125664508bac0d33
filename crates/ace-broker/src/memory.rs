//! MemoryBroker — in-process broker with AMQP-like semantics
//!
//! - Exchanges route every publish to all bound queues (routing keys are not
//!   modelled, so every exchange kind behaves like fanout).
//! - Queues are FIFO. Consumers on the same queue are served round-robin;
//!   messages wait in the queue while nobody is consuming.
//! - Re-declaring an entity with identical properties is a no-op; different
//!   properties fail with `AlreadyExists`. Deleting a missing entity fails with
//!   `NotFound`.
//! - [`MemoryBroker::restart`] drops every connection and every non-durable
//!   exchange/queue. Durable queues keep their backlog.
//!
//! Faults can be injected per operation and target name to exercise error
//! paths: [`MemoryBroker::fail_on`] and [`MemoryBroker::stall_on`].
//!
//! A broker built with [`MemoryBroker::recording`] also keeps every published
//! body and an ordered log of successful operations. Other brokers only count
//! publishes.

use crate::capability::{
    Channel, ChannelRole, Connection, Connector, Consumer, Credentials, Delivery, ExchangeKind,
};
use crate::error::{BrokerError, BrokerOp, BrokerResult};
use bytes::Bytes;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Matches any target name in [`MemoryBroker::fail_on`] / [`MemoryBroker::stall_on`].
pub const ANY_TARGET: &str = "*";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct ExchangeEntry {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<String>,
}

struct ConsumerEntry {
    tag: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct QueueEntry {
    durable: bool,
    messages: VecDeque<Delivery>,
    consumers: Vec<ConsumerEntry>,
    next_consumer: usize,
}

impl QueueEntry {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            messages: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
        }
    }

    /// Hand a delivery to the next live consumer. Gives it back if there is none.
    fn dispatch(&mut self, mut delivery: Delivery) -> Result<(), Delivery> {
        while !self.consumers.is_empty() {
            let idx = self.next_consumer % self.consumers.len();
            match self.consumers[idx].tx.send(delivery) {
                Ok(()) => {
                    self.next_consumer = idx + 1;
                    return Ok(());
                }
                Err(mpsc::error::SendError(returned)) => {
                    // consumer stream was dropped
                    self.consumers.remove(idx);
                    delivery = returned;
                }
            }
        }
        Err(delivery)
    }

    fn enqueue(&mut self, delivery: Delivery) {
        if self.messages.is_empty() {
            if let Err(d) = self.dispatch(delivery) {
                self.messages.push_back(d);
            }
        } else {
            self.messages.push_back(delivery);
            self.flush();
        }
    }

    fn flush(&mut self) {
        while let Some(d) = self.messages.pop_front() {
            if let Err(d) = self.dispatch(d) {
                self.messages.push_front(d);
                break;
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FaultMode {
    Fail,
    Stall,
}

#[derive(Debug)]
struct Fault {
    op: BrokerOp,
    target: String,
    mode: FaultMode,
}

struct ChanState {
    role: ChannelRole,
    open: AtomicBool,
    /// (queue, consumer tag) pairs started on this channel
    consumers: Mutex<Vec<(String, String)>>,
}

struct ConnState {
    open: AtomicBool,
    channels: Mutex<Vec<Arc<ChanState>>>,
}

#[derive(Default)]
struct Inner {
    exchanges: DashMap<String, ExchangeEntry>,
    queues: DashMap<String, QueueEntry>,
    connections: DashMap<u64, Arc<ConnState>>,
    faults: Mutex<Vec<Fault>>,
    recording: AtomicBool,
    published_total: AtomicU64,
    published: Mutex<Vec<(String, Bytes)>>,
    operations: Mutex<Vec<(BrokerOp, String)>>,
    credentials: Mutex<Option<Credentials>>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle; clones share the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep published bodies and the operation log for inspection.
    pub fn recording() -> Self {
        let broker = Self::new();
        broker.inner.recording.store(true, Ordering::SeqCst);
        broker
    }

    /// Only accept connections presenting these credentials.
    pub fn with_credentials(credentials: Credentials) -> Self {
        let broker = Self::new();
        *lock(&broker.inner.credentials) = Some(credentials);
        broker
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Make every `op` against `target` fail with `Rejected` until cleared.
    pub fn fail_on(&self, op: BrokerOp, target: impl Into<String>) {
        lock(&self.inner.faults).push(Fault {
            op,
            target: target.into(),
            mode: FaultMode::Fail,
        });
    }

    /// Make every `op` against `target` hang until cleared.
    pub fn stall_on(&self, op: BrokerOp, target: impl Into<String>) {
        lock(&self.inner.faults).push(Fault {
            op,
            target: target.into(),
            mode: FaultMode::Stall,
        });
    }

    pub fn clear_faults(&self) {
        lock(&self.inner.faults).clear();
    }

    fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::SeqCst)
    }

    fn record(&self, op: BrokerOp, target: &str) {
        if self.is_recording() {
            lock(&self.inner.operations).push((op, target.to_string()));
        }
    }

    async fn check_fault(&self, op: BrokerOp, target: &str) -> BrokerResult<()> {
        let mode = lock(&self.inner.faults)
            .iter()
            .find(|f| f.op == op && (f.target == target || f.target == ANY_TARGET))
            .map(|f| f.mode);
        match mode {
            None => Ok(()),
            Some(FaultMode::Fail) => Err(BrokerError::Rejected {
                op,
                target: target.to_string(),
                reason: "injected fault".into(),
            }),
            Some(FaultMode::Stall) => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Simulate a broker restart: every connection is dropped, and only
    /// durable exchanges and queues (with their backlog) survive.
    pub fn restart(&self) {
        let conns: Vec<Arc<ConnState>> = self
            .inner
            .connections
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for conn in conns {
            self.close_connection(&conn);
        }
        self.inner.connections.clear();

        self.inner.exchanges.retain(|_, e| e.durable);
        self.inner.queues.retain(|_, q| q.durable);
        for mut queue in self.inner.queues.iter_mut() {
            queue.consumers.clear();
        }
        let live: Vec<String> = self.queue_names();
        for mut exchange in self.inner.exchanges.iter_mut() {
            exchange.bindings.retain(|q| live.contains(q));
        }
        info!("MemoryBroker restarted");
    }

    fn close_channel(&self, chan: &ChanState) {
        chan.open.store(false, Ordering::SeqCst);
        let consumers: Vec<(String, String)> = lock(&chan.consumers).drain(..).collect();
        for (queue, tag) in consumers {
            if let Some(mut q) = self.inner.queues.get_mut(&queue) {
                q.consumers.retain(|c| c.tag != tag);
            }
        }
    }

    fn close_connection(&self, conn: &ConnState) {
        conn.open.store(false, Ordering::SeqCst);
        let channels: Vec<Arc<ChanState>> = lock(&conn.channels).drain(..).collect();
        for chan in channels {
            self.close_channel(&chan);
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn exchange_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.exchanges.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.inner.exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.queues.contains_key(name)
    }

    pub fn is_durable_queue(&self, name: &str) -> Option<bool> {
        self.inner.queues.get(name).map(|q| q.durable)
    }

    /// Messages waiting in a queue (not yet handed to a consumer).
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.inner.queues.get(name).map(|q| q.messages.len())
    }

    pub fn consumer_count(&self, name: &str) -> usize {
        self.inner
            .queues
            .get(name)
            .map(|q| q.consumers.iter().filter(|c| !c.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        self.inner
            .exchanges
            .get(exchange)
            .map(|e| e.bindings.clone())
            .unwrap_or_default()
    }

    /// Bodies successfully published to `exchange`, oldest first.
    /// Always empty unless the broker is [`MemoryBroker::recording`].
    pub fn published_to(&self, exchange: &str) -> Vec<Bytes> {
        lock(&self.inner.published)
            .iter()
            .filter(|(ex, _)| ex == exchange)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.inner.published_total.load(Ordering::SeqCst) as usize
    }

    /// Successful operations in the order they happened (recording brokers only).
    pub fn operations(&self) -> Vec<(BrokerOp, String)> {
        lock(&self.inner.operations).clone()
    }

    pub fn open_connections(&self) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|c| c.open.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait::async_trait]
impl Connector for MemoryBroker {
    async fn open_connection(
        &self,
        credentials: &Credentials,
    ) -> BrokerResult<Arc<dyn Connection>> {
        self.check_fault(BrokerOp::Connect, &credentials.url).await?;
        let required = lock(&self.inner.credentials).clone();
        if let Some(required) = required {
            if required.username != credentials.username
                || required.password != credentials.password
                || required.virtual_host != credentials.virtual_host
            {
                return Err(BrokerError::Connection(format!(
                    "access refused for user '{}'",
                    credentials.username
                )));
            }
        }

        let id = self.next_id();
        let state = Arc::new(ConnState {
            open: AtomicBool::new(true),
            channels: Mutex::new(Vec::new()),
        });
        self.inner.connections.insert(id, Arc::clone(&state));
        debug!("MemoryBroker: connection {} opened", id);
        Ok(Arc::new(MemoryConnection {
            broker: self.clone(),
            id,
            state,
        }))
    }
}

pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    state: Arc<ConnState>,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    async fn open_channel(&self, role: ChannelRole) -> BrokerResult<Arc<dyn Channel>> {
        if !self.is_open() {
            return Err(BrokerError::Connection("connection is closed".into()));
        }
        self.broker
            .check_fault(BrokerOp::OpenChannel, &role.to_string())
            .await?;
        let chan = Arc::new(ChanState {
            role,
            open: AtomicBool::new(true),
            consumers: Mutex::new(Vec::new()),
        });
        lock(&self.state.channels).push(Arc::clone(&chan));
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            conn: Arc::clone(&self.state),
            state: chan,
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.broker.close_connection(&self.state);
        self.broker.inner.connections.remove(&self.id);
        debug!("MemoryBroker: connection {} closed", self.id);
        Ok(())
    }
}

pub struct MemoryChannel {
    broker: MemoryBroker,
    conn: Arc<ConnState>,
    state: Arc<ChanState>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> BrokerResult<()> {
        if !self.conn.open.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("connection is closed".into()));
        }
        if !self.state.open.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    async fn guard(&self, op: BrokerOp, target: &str) -> BrokerResult<()> {
        self.ensure_open()?;
        self.broker.check_fault(op, target).await
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    fn role(&self) -> ChannelRole {
        self.state.role
    }

    fn is_open(&self) -> bool {
        self.ensure_open().is_ok()
    }

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> BrokerResult<()> {
        self.guard(BrokerOp::DeclareExchange, name).await?;
        let declared = match self.broker.inner.exchanges.entry(name.to_string()) {
            Entry::Occupied(e) => {
                if e.get().kind == kind && e.get().durable == durable {
                    Ok(())
                } else {
                    Err(BrokerError::already_exists("exchange", name))
                }
            }
            Entry::Vacant(v) => {
                v.insert(ExchangeEntry {
                    kind,
                    durable,
                    bindings: Vec::new(),
                });
                Ok(())
            }
        };
        if declared.is_ok() {
            self.broker.record(BrokerOp::DeclareExchange, name);
        }
        declared
    }

    async fn delete_exchange(&self, name: &str) -> BrokerResult<()> {
        self.guard(BrokerOp::DeleteExchange, name).await?;
        self.broker
            .inner
            .exchanges
            .remove(name)
            .ok_or_else(|| BrokerError::not_found("exchange", name))?;
        self.broker.record(BrokerOp::DeleteExchange, name);
        Ok(())
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> BrokerResult<()> {
        self.guard(BrokerOp::DeclareQueue, name).await?;
        let declared = match self.broker.inner.queues.entry(name.to_string()) {
            Entry::Occupied(e) => {
                if e.get().durable == durable {
                    Ok(())
                } else {
                    Err(BrokerError::already_exists("queue", name))
                }
            }
            Entry::Vacant(v) => {
                v.insert(QueueEntry::new(durable));
                Ok(())
            }
        };
        if declared.is_ok() {
            self.broker.record(BrokerOp::DeclareQueue, name);
        }
        declared
    }

    async fn delete_queue(&self, name: &str) -> BrokerResult<()> {
        self.guard(BrokerOp::DeleteQueue, name).await?;
        if self.broker.inner.queues.remove(name).is_none() {
            return Err(BrokerError::not_found("queue", name));
        }
        for mut exchange in self.broker.inner.exchanges.iter_mut() {
            exchange.bindings.retain(|q| q != name);
        }
        self.broker.record(BrokerOp::DeleteQueue, name);
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> BrokerResult<()> {
        self.guard(BrokerOp::Bind, queue).await?;
        if !self.broker.inner.queues.contains_key(queue) {
            return Err(BrokerError::not_found("queue", queue));
        }
        let mut entry = self
            .broker
            .inner
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::not_found("exchange", exchange))?;
        if !entry.bindings.iter().any(|q| q == queue) {
            entry.bindings.push(queue.to_string());
        }
        drop(entry);
        self.broker.record(BrokerOp::Bind, queue);
        Ok(())
    }

    async fn publish(&self, exchange: &str, body: Bytes) -> BrokerResult<()> {
        self.guard(BrokerOp::Publish, exchange).await?;
        let bindings = self
            .broker
            .inner
            .exchanges
            .get(exchange)
            .map(|e| e.bindings.clone())
            .ok_or_else(|| BrokerError::not_found("exchange", exchange))?;

        let published_at = Utc::now();
        for queue in bindings {
            if let Some(mut q) = self.broker.inner.queues.get_mut(&queue) {
                q.enqueue(Delivery {
                    queue: queue.clone(),
                    exchange: Some(exchange.to_string()),
                    body: body.clone(),
                    published_at,
                });
            }
        }
        self.broker.inner.published_total.fetch_add(1, Ordering::SeqCst);
        if self.broker.is_recording() {
            lock(&self.broker.inner.published).push((exchange.to_string(), body));
        }
        self.broker.record(BrokerOp::Publish, exchange);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> BrokerResult<Consumer> {
        self.guard(BrokerOp::Consume, queue).await?;
        let tag = format!("ctag-{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut q = self
                .broker
                .inner
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::not_found("queue", queue))?;
            q.consumers.push(ConsumerEntry {
                tag: tag.clone(),
                tx,
            });
            q.flush();
        }
        lock(&self.state.consumers).push((queue.to_string(), tag.clone()));
        self.broker.record(BrokerOp::Consume, queue);
        debug!("MemoryBroker: consumer {} attached to {}", tag, queue);
        Ok(Consumer::new(queue, tag, rx))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.broker.close_channel(&self.state);
        Ok(())
    }
}
