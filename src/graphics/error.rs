use thiserror::Error;

use super::hal::HalError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything here is fatal for the queue that reported it; nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Hal(#[from] HalError),
}
