use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Serialized};
use figment::Figment;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error::ConfigError;

/// Listen address used when LISTEN_ADDRESS is not set
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:3000";

/// URL opened by the `/start` button when WEBAPP_URL is not set
pub const DEFAULT_WEBAPP_URL: &str = "https://127.0.0.1:8443";

/// Directory holding the built Mini App front end
pub const DEFAULT_ASSETS_DIR: &str = "static";

/// Environment variables read into [`Config`]. `TG_BOT_TOKEN` is accepted as
/// an alias for `BOT_TOKEN`.
const ENV_KEYS: &[&str] = &[
    "LISTEN_ADDRESS",
    "BOT_TOKEN",
    "WEBAPP_URL",
    "ASSETS_DIR",
    "SHUTDOWN_GRACE_SECS",
    "REQUEST_TIMEOUT_SECS",
    "INIT_DATA_MAX_AGE_SECS",
];

/// Shutdown configuration
pub mod shutdown {
    /// Time a service gets to drain after cancellation (in seconds)
    pub const GRACE_SECS: u64 = 30;
}

/// Network configuration
pub mod network {
    /// Per-request timeout of the HTTP server (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
}

/// Mini App configuration
pub mod webapp {
    /// Maximum age of init data (in seconds); 0 disables the check
    pub const INIT_DATA_MAX_AGE_SECS: u64 = 24 * 60 * 60;
}

/// Raw settings as read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    listen_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bot_token: Option<String>,
    webapp_url: String,
    assets_dir: PathBuf,
    shutdown_grace_secs: u64,
    request_timeout_secs: u64,
    init_data_max_age_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            bot_token: None,
            webapp_url: DEFAULT_WEBAPP_URL.to_string(),
            assets_dir: PathBuf::from(DEFAULT_ASSETS_DIR),
            shutdown_grace_secs: shutdown::GRACE_SECS,
            request_timeout_secs: network::REQUEST_TIMEOUT_SECS,
            init_data_max_age_secs: webapp::INIT_DATA_MAX_AGE_SECS,
        }
    }
}

/// Process configuration, loaded once at startup and passed down explicitly.
#[derive(Debug)]
pub struct Config {
    pub listen_address: String,
    pub bot_token: SecretString,
    pub webapp_url: Url,
    pub assets_dir: PathBuf,
    pub shutdown_grace: Duration,
    pub request_timeout: Duration,
    /// `None` disables the `auth_date` expiry check.
    pub init_data_max_age: Option<Duration>,
}

impl Config {
    /// Defaults overlaid with the environment.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Env::raw().only(&["TG_BOT_TOKEN"]).map(|_| "bot_token".into()))
            .merge(Env::raw().only(ENV_KEYS))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment.extract()?;

        let bot_token = settings
            .bot_token
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingBotToken)?;

        Ok(Self {
            listen_address: settings.listen_address,
            bot_token: SecretString::from(bot_token),
            webapp_url: Url::parse(&settings.webapp_url)?,
            assets_dir: settings.assets_dir,
            shutdown_grace: Duration::from_secs(settings.shutdown_grace_secs),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            init_data_max_age: match settings.init_data_max_age_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }
}
