pub mod checkers;
pub mod collaborators;
pub mod config;
pub mod confirmation;
pub mod degraded;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod notifier;
pub mod scheduler;

pub use error::EngineError;
pub use scheduler::{EngineStatus, MonitorEngine, MonitorSnapshot};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
