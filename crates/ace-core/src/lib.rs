//! ACE Core - layer stack, message taxonomy, queue naming and error handling

pub mod error;
pub mod message;
pub mod naming;
pub mod stack;
pub mod types;

pub use error::{Error, Result};
pub use message::{LayerOutput, Message, MessageBatch, MessageKind};
pub use naming::NamingRules;
pub use stack::LayerStack;
pub use types::*;
