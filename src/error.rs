use thiserror::Error;

use crate::fuzz::FuzzToolError;
use crate::subprocess::ProcessError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Fuzz tool error: {0}")]
    FuzzTool(#[from] FuzzToolError),

    #[error("Device bridge error: {0}")]
    Bridge(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Unrecognized action from policy: {0:?}")]
    UnknownAction(String),

    #[error("Event index {index} out of range ({available} events available)")]
    EventIndexOutOfRange { index: usize, available: usize },

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
