//! Telegram Web App init data validation
//!
//! Telegram signs the init data passed to a Mini App with HMAC-SHA256:
//!
//! ```text
//! secret_key        = HMAC_SHA256(key = "WebAppData", message = bot_token)
//! data_check_string = sorted "key=value" pairs (without `hash`), joined by '\n'
//! hash              = hex(HMAC_SHA256(key = secret_key, message = data_check_string))
//! ```
//!
//! Decoding happens in two stages: the query string is first split into raw
//! pairs and the signature is checked over those bytes; only then is the `user`
//! claim decoded as JSON.

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation constant used to derive the secret key from the bot token.
const WEB_APP_DATA: &[u8] = b"WebAppData";

/// Name of the pair carrying the claimed signature.
pub const HASH_KEY: &str = "hash";

/// Default maximum age of init data (24 hours).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Reasons an init data payload is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitDataError {
    #[error("malformed init data: {0}")]
    Malformed(&'static str),

    #[error("init data signature mismatch")]
    Signature,

    #[error("init data expired ({age_secs} seconds old)")]
    Expired { age_secs: i64 },
}

/// The `user` claim of the init data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebAppUser {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_premium: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allows_write_to_pm: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// Verified init data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitData {
    pub user: WebAppUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_param: Option<String>,
}

/// Init data split into decoded key/value pairs, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInitData {
    pairs: Vec<(String, String)>,
}

impl RawInitData {
    /// Parses a query string (`a=1&b=2`).
    ///
    /// `+` decodes to a space and percent escapes are resolved. A segment with
    /// no `=` is a key with an empty value. Duplicate keys are rejected since
    /// the signed string could not be rebuilt unambiguously.
    pub fn parse(raw: &str) -> Result<Self, InitDataError> {
        let mut pairs: Vec<(String, String)> = Vec::new();

        for segment in raw.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            let key = decode_component(key)?;
            let value = decode_component(value)?;

            if pairs.iter().any(|(k, _)| *k == key) {
                return Err(InitDataError::Malformed("duplicate key"));
            }
            pairs.push((key, value));
        }

        Ok(Self { pairs })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// The claimed signature.
    pub fn hash(&self) -> Option<&str> {
        self.get(HASH_KEY)
    }

    /// Builds the string Telegram signed: every pair except `hash`.
    pub fn data_check_string(&self) -> String {
        data_check_string(
            self.pairs
                .iter()
                .filter(|(k, _)| k != HASH_KEY)
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }

    fn into_init_data(self) -> Result<InitData, InitDataError> {
        let user = self.get("user").ok_or(InitDataError::Malformed("missing user"))?;
        let user: WebAppUser =
            serde_json::from_str(user).map_err(|_| InitDataError::Malformed("invalid user claim"))?;

        let owned = |key: &str| self.get(key).map(str::to_string);

        Ok(InitData {
            user,
            auth_date: self.get("auth_date").and_then(|v| v.parse().ok()),
            query_id: owned("query_id"),
            chat_type: owned("chat_type"),
            chat_instance: owned("chat_instance"),
            start_param: owned("start_param"),
        })
    }
}

fn decode_component(component: &str) -> Result<String, InitDataError> {
    let spaced = component.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .map_err(|_| InitDataError::Malformed("invalid percent-encoding"))
}

/// Joins pairs as `key=value` lines sorted by key, without a trailing newline.
pub fn data_check_string<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut pairs: Vec<(&str, &str)> = pairs.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

#[allow(clippy::expect_used)]
fn keyed(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size")
}

/// Secret key derived from the bot token. Never printed.
pub struct WebAppSecret(SecretBox<[u8; 32]>);

impl WebAppSecret {
    pub fn from_bot_token(bot_token: &str) -> Self {
        let mut mac = keyed(WEB_APP_DATA);
        mac.update(bot_token.as_bytes());

        let mut key = [0u8; 32];
        key.copy_from_slice(&mac.finalize().into_bytes());
        Self(SecretBox::new(Box::new(key)))
    }

    fn mac(&self) -> HmacSha256 {
        keyed(self.0.expose_secret())
    }

    /// Hex signature of a data-check-string.
    pub fn sign(&self, data_check_string: &str) -> String {
        let mut mac = self.mac();
        mac.update(data_check_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of `claimed_hex` against the expected signature.
    pub fn verify(&self, data_check_string: &str, claimed_hex: &str) -> Result<(), InitDataError> {
        let claimed = hex::decode(claimed_hex).map_err(|_| InitDataError::Signature)?;
        let mut mac = self.mac();
        mac.update(data_check_string.as_bytes());
        mac.verify_slice(&claimed).map_err(|_| InitDataError::Signature)
    }
}

impl std::fmt::Debug for WebAppSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebAppSecret([REDACTED])")
    }
}

/// Validates init data against the secret derived once from the bot token.
///
/// `max_age` is the `auth_date` expiry policy; `None` disables it.
#[derive(Debug)]
pub struct InitDataValidator {
    secret: WebAppSecret,
    max_age: Option<Duration>,
}

impl InitDataValidator {
    pub fn new(bot_token: &SecretString) -> Self {
        Self::from_token(bot_token.expose_secret())
    }

    pub fn from_token(bot_token: &str) -> Self {
        Self {
            secret: WebAppSecret::from_bot_token(bot_token),
            max_age: Some(DEFAULT_MAX_AGE),
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn validate(&self, init_data: &str) -> Result<InitData, InitDataError> {
        self.validate_at(init_data, Utc::now())
    }

    /// Validates `init_data` as if the current time were `now`.
    pub fn validate_at(&self, init_data: &str, now: DateTime<Utc>) -> Result<InitData, InitDataError> {
        let data = RawInitData::parse(init_data)?;
        let claimed = data.hash().ok_or(InitDataError::Malformed("missing hash"))?;

        self.secret.verify(&data.data_check_string(), claimed)?;

        if let Some(max_age) = self.max_age {
            check_age(&data, max_age, now)?;
        }

        data.into_init_data()
    }

    /// Produces a signed init data query string from `fields`.
    ///
    /// Any `hash` among `fields` is ignored. Used by the `sign-init-data` CLI
    /// command and by tests.
    pub fn sign<'a>(&self, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
        let fields: Vec<(&str, &str)> = fields.into_iter().filter(|(k, _)| *k != HASH_KEY).collect();
        let hash = self.secret.sign(&data_check_string(fields.iter().copied()));

        fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .chain(std::iter::once(format!("{}={}", HASH_KEY, hash)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn check_age(data: &RawInitData, max_age: Duration, now: DateTime<Utc>) -> Result<(), InitDataError> {
    let auth_date: i64 = data
        .get("auth_date")
        .ok_or(InitDataError::Malformed("missing auth_date"))?
        .parse()
        .map_err(|_| InitDataError::Malformed("invalid auth_date"))?;

    let age_secs = now
        .timestamp()
        .checked_sub(auth_date)
        .ok_or(InitDataError::Malformed("invalid auth_date"))?;
    if age_secs > i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX) {
        return Err(InitDataError::Expired { age_secs });
    }

    Ok(())
}

/// Validates `init_data` against `bot_token` without an expiry policy.
///
/// The result depends only on the two inputs.
pub fn validate(init_data: &str, bot_token: &str) -> Result<InitData, InitDataError> {
    InitDataValidator::from_token(bot_token)
        .with_max_age(None)
        .validate(init_data)
}
