//! Core utilities: configuration, errors, logging and the service lifecycle

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;

// Re-exports for convenience
pub use config::Config;
pub use error::{ConfigError, StartupError};
pub use lifecycle::{shutdown_signal, Orchestrator, Service, ServiceHandle, ServiceState};
pub use logging::init_logger;
