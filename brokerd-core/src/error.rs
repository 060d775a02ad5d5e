use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Log output setup failed: {0}")]
    LogSetup(String),

    #[error("Broker engine failed to start: {reason}")]
    EngineStart { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
