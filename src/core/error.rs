use thiserror::Error;

/// Errors that abort the process before any service is started.
///
/// Init data rejections are not here: they never leave the HTTP handler
/// (see [`crate::telegram::webapp_auth::InitDataError`]).
#[derive(Error, Debug)]
pub enum StartupError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP listener could not bind
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The bot HTTP client could not be built
    #[error("Failed to build bot client: {0}")]
    BotClient(#[from] reqwest::Error),

    /// Telegram rejected the token (or could not be reached)
    #[error("Failed to create bot: {0}")]
    BotAuth(#[source] teloxide::RequestError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("BOT_TOKEN environment variable not set")]
    MissingBotToken,

    #[error("Invalid WEBAPP_URL: {0}")]
    InvalidWebAppUrl(#[from] url::ParseError),

    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}
