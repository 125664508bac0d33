//! Error types for ACE

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid layer stack: {0}")]
    InvalidStack(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    #[error("processing failed in {layer}: {message}")]
    Processing { layer: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_stack(reason: impl Into<String>) -> Self {
        Self::InvalidStack(reason.into())
    }

    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage(reason.into())
    }

    pub fn processing(layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processing {
            layer: layer.into(),
            message: message.into(),
        }
    }
}
