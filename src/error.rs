use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(String),
    #[error("Network health gate error: {0}")]
    NetworkGate(String),
    #[error("Job registry error: {0}")]
    JobRegistry(String),
    #[error("Invalid monitor {id}: {reason}")]
    InvalidMonitor { id: i32, reason: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Monitor engine is already running")]
    AlreadyRunning,
    #[error("Monitor engine is not running")]
    NotRunning,
}
