//! Broker error taxonomy

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Broker operation, used to label errors and to target injected faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    Connect,
    OpenChannel,
    DeclareExchange,
    DeleteExchange,
    DeclareQueue,
    DeleteQueue,
    Bind,
    Publish,
    Consume,
}

impl fmt::Display for BrokerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrokerOp::Connect => "connect",
            BrokerOp::OpenChannel => "open_channel",
            BrokerOp::DeclareExchange => "declare_exchange",
            BrokerOp::DeleteExchange => "delete_exchange",
            BrokerOp::DeclareQueue => "declare_queue",
            BrokerOp::DeleteQueue => "delete_queue",
            BrokerOp::Bind => "bind",
            BrokerOp::Publish => "publish",
            BrokerOp::Consume => "consume",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    #[error("{kind} '{name}' already exists with different properties")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("{op} on '{target}' timed out after {after:?}")]
    Timeout {
        op: BrokerOp,
        target: String,
        after: Duration,
    },

    #[error("{op} on '{target}' rejected: {reason}")]
    Rejected {
        op: BrokerOp,
        target: String,
        reason: String,
    },
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Errors that end the current actor tick but not the process.
    pub fn is_fatal_to_tick(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ChannelClosed | Self::Timeout { .. }
        )
    }
}

/// Idempotent create: an entity that is already there counts as created.
pub fn ignore_already_exists(result: BrokerResult<()>) -> BrokerResult<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

/// Idempotent destroy: an entity that is already gone counts as destroyed.
pub fn ignore_not_found(result: BrokerResult<()>) -> BrokerResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
