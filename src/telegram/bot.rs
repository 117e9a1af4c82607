//! Bot initialization, command handlers and the receive loop
//!
//! This module contains:
//! - Command enum definition
//! - Bot instance creation
//! - The dispatcher schema (`/start` opens the Mini App, other text is echoed)
//! - [`BotService`], the long-polling loop driven by the orchestrator

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, Me, WebAppInfo};
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::error::StartupError;
use crate::core::lifecycle::Service;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type HandlerResult = Result<(), HandlerError>;

/// Text sent in reply to `/start`.
pub const START_TEXT: &str = "this is a mini app bot";

/// Label of the button that opens the Mini App.
pub const START_BUTTON_TEXT: &str = "Start MiniApp";

/// How often to retry stopping a dispatcher that has not started yet.
const SHUTDOWN_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "open the mini app")]
    Start,
}

/// URL the `/start` button opens, injected into handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebAppUrl(pub Url);

/// Creates a Bot instance and checks the token with `getMe`.
///
/// # Returns
/// * `Ok((Bot, Me))` - the token is accepted by Telegram
/// * `Err(StartupError)` - the HTTP client could not be built or the token was rejected
pub async fn create_bot(token: &SecretString) -> Result<(Bot, Me), StartupError> {
    let client = teloxide::net::default_reqwest_settings().build()?;
    let bot = Bot::with_client(token.expose_secret(), client);

    let me = bot.get_me().await.map_err(StartupError::BotAuth)?;
    tracing::info!(username = %me.username(), "bot authorized");

    Ok((bot, me))
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}

/// Creates the dispatcher schema for the bot.
///
/// The same schema is used in production and in the `MockBot` tests.
pub fn schema() -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_echo))
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, url: WebAppUrl) -> HandlerResult {
    match cmd {
        Command::Start => {
            tracing::info!(chat_id = msg.chat.id.0, "/start");
            let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::web_app(
                START_BUTTON_TEXT,
                WebAppInfo { url: url.0 },
            )]]);

            bot.send_message(msg.chat.id, START_TEXT).reply_markup(keyboard).await?;
        }
    }
    Ok(())
}

/// Default handler: echo the text back.
async fn handle_echo(bot: Bot, msg: Message) -> HandlerResult {
    if let Some(text) = msg.text() {
        bot.send_message(msg.chat.id, text).await?;
    }
    Ok(())
}

/// The long-polling receive loop.
pub struct BotService {
    bot: Bot,
    webapp_url: Url,
}

impl BotService {
    pub fn new(bot: Bot, webapp_url: Url) -> Self {
        Self { bot, webapp_url }
    }
}

#[async_trait]
impl Service for BotService {
    fn name(&self) -> &'static str {
        "bot"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut dispatcher = Dispatcher::builder(self.bot, schema())
            .dependencies(dptree::deps![WebAppUrl(self.webapp_url)])
            .default_handler(|upd| async move {
                tracing::debug!(update_id = upd.id.0, "unhandled update");
            })
            // A failing handler is logged and the loop keeps going.
            .error_handler(LoggingErrorHandler::with_custom_text("An error from a bot handler"))
            .build();

        let token = dispatcher.shutdown_token();
        let finished = CancellationToken::new();

        let stop = {
            let finished = finished.clone();
            async move {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = finished.cancelled() => return,
                }

                tracing::info!("stopping bot dispatcher");
                loop {
                    match token.shutdown() {
                        Ok(done) => {
                            done.await;
                            return;
                        }
                        Err(_) if finished.is_cancelled() => return,
                        // Not running yet: `dispatch` may not have reached its loop.
                        Err(_) => tokio::time::sleep(SHUTDOWN_RETRY_INTERVAL).await,
                    }
                }
            }
        };

        let dispatch = async {
            tracing::info!("📡 bot receive loop started");
            dispatcher.dispatch().await;
            finished.cancel();
        };

        tokio::join!(dispatch, stop);
        tracing::info!("Dispatcher shutdown gracefully");
        Ok(())
    }
}
