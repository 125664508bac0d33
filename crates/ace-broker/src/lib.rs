//! ACE Broker - the message-broker capability the bus is built on
//!
//! The bus only ever talks to a broker through [`Connector`], [`Connection`]
//! and [`Channel`]. [`MemoryBroker`] is an in-process implementation with
//! AMQP-like semantics (exchanges, bindings, durable queues, consumers).

pub mod capability;
pub mod error;
pub mod memory;
pub mod timeout;

pub use capability::{
    Channel, ChannelRole, Connection, Connector, Consumer, Credentials, Delivery, ExchangeKind,
};
pub use error::{ignore_already_exists, ignore_not_found, BrokerError, BrokerOp, BrokerResult};
pub use memory::MemoryBroker;
pub use timeout::{with_timeout, TimedChannel};
