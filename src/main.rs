use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use miniapp_bot::cli::{Cli, Commands};
use miniapp_bot::core::{init_logger, shutdown_signal, Config, Orchestrator};
use miniapp_bot::telegram::{
    create_bot, create_webapp_router, setup_bot_commands, AssetServer, BotService, HttpService, InitDataValidator,
};

/// Main entry point for the Mini App bot
///
/// Parses CLI arguments and dispatches to the appropriate subcommand.
///
/// # Errors
/// Returns an error (non-zero exit) if startup fails or a service fails.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();

    init_logger()?;

    let cli = Cli::parse_args();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::SignInitData { user, auth_date, fields } => {
            sign_init_data(&config, &user, auth_date, &fields);
            Ok(())
        }
    }
}

/// Binds the listener, connects the bot, then runs both until shutdown.
async fn run(config: Config) -> Result<()> {
    let validator = Arc::new(InitDataValidator::new(&config.bot_token).with_max_age(config.init_data_max_age));

    if !config.assets_dir.is_dir() {
        tracing::warn!("Assets directory {} not found, only /api/open will work", config.assets_dir.display());
    }
    let assets = AssetServer::new(&config.assets_dir);
    let router = create_webapp_router(validator, assets, config.request_timeout);

    // Both are fatal and happen before any service runs.
    let http = HttpService::bind(&config.listen_address, router).await?;
    let (bot, _me) = create_bot(&config.bot_token).await?;

    if let Err(e) = setup_bot_commands(&bot).await {
        tracing::warn!("Failed to set bot commands: {}", e);
    }

    let mut orchestrator = Orchestrator::new(config.shutdown_grace);
    orchestrator.add(http);
    orchestrator.add(BotService::new(bot, config.webapp_url));

    tracing::info!("start");
    let report = orchestrator.run(shutdown_signal()).await;
    report.into_result()?;
    tracing::info!("done");

    Ok(())
}

fn sign_init_data(config: &Config, user: &str, auth_date: Option<i64>, fields: &[(String, String)]) {
    let validator = InitDataValidator::new(&config.bot_token);
    let auth_date = auth_date.unwrap_or_else(|| chrono::Utc::now().timestamp()).to_string();

    let pairs = [("user", user), ("auth_date", auth_date.as_str())]
        .into_iter()
        .chain(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    println!("{}", validator.sign(pairs));
}
