//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;
pub mod telegram_api;

#[allow(unused_imports)]
pub use fixtures::{signed_init_data, AssetTree, TEST_BOT_TOKEN};
#[allow(unused_imports)]
pub use telegram_api::MockTelegramApi;
