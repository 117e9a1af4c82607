use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "miniapp-bot")]
#[command(author, version, about = "Telegram bot serving a Mini App", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot and the Mini App server (default)
    Run,

    /// Print init data signed with the configured bot token (for local testing)
    SignInitData {
        /// JSON for the `user` field
        #[arg(short, long, default_value = r#"{"id":1,"first_name":"Test"}"#)]
        user: String,

        /// Unix timestamp for `auth_date` (defaults to now)
        #[arg(long)]
        auth_date: Option<i64>,

        /// Extra fields as key=value
        #[arg(value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{}`", raw))
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_none() {
        let cli = Cli::try_parse_from(["miniapp-bot"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_sign_init_data_fields() {
        let cli = Cli::try_parse_from(["miniapp-bot", "sign-init-data", "--auth-date", "1700000000", "start_param=abc"]).unwrap();
        match cli.command {
            Some(Commands::SignInitData { auth_date, fields, .. }) => {
                assert_eq!(auth_date, Some(1_700_000_000));
                assert_eq!(fields, vec![("start_param".to_string(), "abc".to_string())]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_bad_field_is_rejected() {
        assert!(Cli::try_parse_from(["miniapp-bot", "sign-init-data", "nofield"]).is_err());
    }
}
