//! Bus error types and topology pass reports

use ace_broker::BrokerError;
use std::fmt;
use thiserror::Error;

use crate::resource::BusState;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Core(#[from] ace_core::Error),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: BusState,
    },

    #[error("'{0}' is not a layer-pair exchange of this stack")]
    UnmanagedExchange(String),

    #[error("{0}")]
    Topology(TopologyReport),

    #[error("actor {layer} failed: {reason}")]
    ActorFailed { layer: String, reason: String },
}

pub type BusResult<T> = std::result::Result<T, BusError>;

/// Which half of the lifecycle a topology pass belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyPhase {
    Setup,
    Teardown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Exchange,
    IntegrityQueue,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Exchange => f.write_str("exchange"),
            ResourceKind::IntegrityQueue => f.write_str("system-integrity queue"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TopologyFailure {
    pub kind: ResourceKind,
    pub resource: String,
    pub error: BrokerError,
}

/// Outcome of one best-effort create/destroy pass. Every resource is
/// attempted; failures are collected here instead of aborting the pass.
#[derive(Clone, Debug)]
pub struct TopologyReport {
    pub phase: TopologyPhase,
    pub attempted: usize,
    pub failures: Vec<TopologyFailure>,
}

impl TopologyReport {
    pub fn new(phase: TopologyPhase) -> Self {
        Self {
            phase,
            attempted: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: ResourceKind, resource: &str, result: Result<(), BrokerError>) {
        self.attempted += 1;
        if let Err(error) = result {
            self.failures.push(TopologyFailure {
                kind,
                resource: resource.to_string(),
                error,
            });
        }
    }

    pub fn absorb(&mut self, other: TopologyReport) {
        self.attempted += other.attempted;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_resources(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.resource.as_str()).collect()
    }

    /// `Ok` when nothing failed, otherwise the whole report as an error.
    pub fn into_result(self) -> BusResult<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(BusError::Topology(self))
        }
    }
}

impl fmt::Display for TopologyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            TopologyPhase::Setup => "setup",
            TopologyPhase::Teardown => "teardown",
        };
        write!(
            f,
            "topology {} failed for {} of {} resource(s)",
            phase,
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "; {} '{}': {}", failure.kind, failure.resource, failure.error)?;
        }
        Ok(())
    }
}
