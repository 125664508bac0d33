//! Broker capability traits

use crate::error::BrokerResult;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Broker login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub password: String,
    pub virtual_host: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".into(),
            username: "guest".into(),
            password: "guest".into(),
            virtual_host: "/".into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("virtual_host", &self.virtual_host)
            .finish()
    }
}

/// Publishing and consuming run on separate channels so a slow consumer
/// never stalls a publish (and vice versa).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    Publisher,
    Consumer,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Publisher => f.write_str("publisher"),
            ChannelRole::Consumer => f.write_str("consumer"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Fanout,
    Direct,
    Topic,
}

/// One message handed to a consumer.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub queue: String,
    pub exchange: Option<String>,
    pub body: Bytes,
    pub published_at: DateTime<Utc>,
}

/// Lazy, unbounded sequence of deliveries from one queue.
/// Dropping it (or closing its channel) cancels the subscription.
pub struct Consumer {
    queue: String,
    tag: String,
    inner: UnboundedReceiverStream<Delivery>,
}

impl Consumer {
    pub fn new(
        queue: impl Into<String>,
        tag: impl Into<String>,
        rx: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            queue: queue.into(),
            tag: tag.into(),
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue)
            .field("tag", &self.tag)
            .finish()
    }
}

impl Stream for Consumer {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// A broker channel. Every call is a network round-trip on a real broker.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    fn role(&self) -> ChannelRole;
    fn is_open(&self) -> bool;

    /// Idempotent for identical properties.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool)
        -> BrokerResult<()>;
    async fn delete_exchange(&self, name: &str) -> BrokerResult<()>;

    /// Idempotent for identical properties.
    async fn declare_queue(&self, name: &str, durable: bool) -> BrokerResult<()>;
    async fn delete_queue(&self, name: &str) -> BrokerResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str) -> BrokerResult<()>;

    async fn publish(&self, exchange: &str, body: Bytes) -> BrokerResult<()>;

    async fn consume(&self, queue: &str) -> BrokerResult<Consumer>;

    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    fn is_open(&self) -> bool;
    async fn open_channel(&self, role: ChannelRole) -> BrokerResult<Arc<dyn Channel>>;
    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open_connection(&self, credentials: &Credentials)
        -> BrokerResult<Arc<dyn Connection>>;
}
