//! Telegram bot integration and the Mini App web surface

pub mod assets;
pub mod bot;
pub mod webapp;
pub mod webapp_auth;

// Re-exports for convenience
pub use assets::AssetServer;
pub use bot::{create_bot, schema, setup_bot_commands, BotService, Command, WebAppUrl};
pub use webapp::{create_webapp_router, HttpService};
pub use webapp_auth::{validate, InitData, InitDataError, InitDataValidator, WebAppUser};
