//! Bounded waits around broker calls
//!
//! Broker round-trips have no cancellation path of their own; every call made
//! through a [`TimedChannel`] fails with [`BrokerError::Timeout`] instead of
//! hanging forever.

use crate::capability::{Channel, ChannelRole, Consumer, ExchangeKind};
use crate::error::{BrokerError, BrokerOp, BrokerResult};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub async fn with_timeout<T, F>(
    op: BrokerOp,
    target: &str,
    after: Duration,
    fut: F,
) -> BrokerResult<T>
where
    F: Future<Output = BrokerResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout {
            op,
            target: target.to_string(),
            after,
        }),
    }
}

/// A channel whose every operation is bounded by `timeout`.
#[derive(Clone)]
pub struct TimedChannel {
    inner: Arc<dyn Channel>,
    timeout: Duration,
}

impl TimedChannel {
    pub fn new(inner: Arc<dyn Channel>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &Arc<dyn Channel> {
        &self.inner
    }
}

#[async_trait::async_trait]
impl Channel for TimedChannel {
    fn role(&self) -> ChannelRole {
        self.inner.role()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> BrokerResult<()> {
        with_timeout(
            BrokerOp::DeclareExchange,
            name,
            self.timeout,
            self.inner.declare_exchange(name, kind, durable),
        )
        .await
    }

    async fn delete_exchange(&self, name: &str) -> BrokerResult<()> {
        with_timeout(
            BrokerOp::DeleteExchange,
            name,
            self.timeout,
            self.inner.delete_exchange(name),
        )
        .await
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> BrokerResult<()> {
        with_timeout(
            BrokerOp::DeclareQueue,
            name,
            self.timeout,
            self.inner.declare_queue(name, durable),
        )
        .await
    }

    async fn delete_queue(&self, name: &str) -> BrokerResult<()> {
        with_timeout(
            BrokerOp::DeleteQueue,
            name,
            self.timeout,
            self.inner.delete_queue(name),
        )
        .await
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> BrokerResult<()> {
        with_timeout(
            BrokerOp::Bind,
            queue,
            self.timeout,
            self.inner.bind_queue(queue, exchange),
        )
        .await
    }

    async fn publish(&self, exchange: &str, body: Bytes) -> BrokerResult<()> {
        with_timeout(
            BrokerOp::Publish,
            exchange,
            self.timeout,
            self.inner.publish(exchange, body),
        )
        .await
    }

    async fn consume(&self, queue: &str) -> BrokerResult<Consumer> {
        with_timeout(
            BrokerOp::Consume,
            queue,
            self.timeout,
            self.inner.consume(queue),
        )
        .await
    }

    async fn close(&self) -> BrokerResult<()> {
        self.inner.close().await
    }
}
