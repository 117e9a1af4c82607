//! miniapp-bot - Telegram bot with a Mini App web surface
//!
//! The process runs two services side by side under one cancellation token:
//! the bot's long-polling receive loop and an HTTP server that serves the
//! Mini App front end and authenticates `/api/open` with Telegram init data.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, service lifecycle
//! - `telegram`: bot handlers, init data validation, HTTP router and assets

pub mod cli;
pub mod core;
pub mod telegram;

// Re-export commonly used types for convenience
pub use self::core::{config, Config, StartupError};
