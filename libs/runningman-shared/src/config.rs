use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use thiserror::Error;

const TOKEN_AUTH_KEY_PREFIX: &str = "TOKEN_AUTH_KEY_";
pub const DEFAULT_SUBSCRIPTION_PRICE: i64 = 30_000;
const DEFAULT_WEBHOOK_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: String, reason: String },
    #[error("at least one TOKEN_AUTH_KEY_<YEAR> must be set")]
    NoTokenAuthKeys,
}

#[derive(Debug, Clone)]
pub struct TripayConfig {
    pub url: String,
    pub merchant_code: String,
    pub api_key: String,
    pub private_key: String,
    /// Gateway requires an email; Telegram does not give us one.
    pub customer_email: String,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub database_url: String,
    pub direct_embed_base_url: String,
    /// Per-year link signing secrets.
    pub token_auth_keys: BTreeMap<i32, String>,
    pub support_number: String,
    pub subscription_price: i64,
    pub tripay: TripayConfig,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub bot_token: String,
    pub database_url: String,
    pub tripay_private_key: String,
    pub allowed_origins: Vec<String>,
    pub listen_addr: SocketAddr,
}

struct Vars(HashMap<String, String>);

impl Vars {
    fn new<I: IntoIterator<Item = (String, String)>>(vars: I) -> Self {
        Self(vars.into_iter().collect())
    }

    fn optional(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name)
            .map(str::to_string)
            .ok_or(ConfigError::Missing(name))
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn token_auth_keys(&self) -> Result<BTreeMap<i32, String>, ConfigError> {
        let mut keys = BTreeMap::new();
        for (name, value) in &self.0 {
            let Some(year) = name.strip_prefix(TOKEN_AUTH_KEY_PREFIX) else {
                continue;
            };
            let year: i32 = year.parse().map_err(|_| ConfigError::Invalid {
                name: name.clone(),
                reason: "suffix must be a year".to_string(),
            })?;
            let value = value.trim();
            if !value.is_empty() {
                keys.insert(year, value.to_string());
            }
        }
        if keys.is_empty() {
            return Err(ConfigError::NoTokenAuthKeys);
        }
        Ok(keys)
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Result<Self, ConfigError> {
        let vars = Vars::new(vars);
        let subscription_price = vars.parsed("SUBSCRIPTION_PRICE", DEFAULT_SUBSCRIPTION_PRICE)?;
        if subscription_price <= 0 {
            return Err(ConfigError::Invalid {
                name: "SUBSCRIPTION_PRICE".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            bot_token: vars.required("BOT_TOKEN")?,
            database_url: vars.required("DATABASE_URL")?,
            direct_embed_base_url: vars
                .required("DIRECT_EMBED_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            token_auth_keys: vars.token_auth_keys()?,
            support_number: vars.required("SUPPORT_NUMBER")?,
            subscription_price,
            tripay: TripayConfig {
                url: vars.required("TRIPAY_URL")?,
                merchant_code: vars.required("TRIPAY_MERCHANT_CODE")?,
                api_key: vars.required("TRIPAY_API_KEY")?,
                private_key: vars.required("TRIPAY_PRIVATE_KEY")?,
                customer_email: vars
                    .optional("TRIPAY_CUSTOMER_EMAIL")
                    .unwrap_or("customer@runningman.local")
                    .to_string(),
            },
        })
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Result<Self, ConfigError> {
        let vars = Vars::new(vars);
        Ok(Self {
            bot_token: vars.required("BOT_TOKEN")?,
            database_url: vars.required("DATABASE_URL")?,
            tripay_private_key: vars.required("TRIPAY_PRIVATE_KEY")?,
            allowed_origins: vars
                .optional("ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            listen_addr: vars.parsed("WEBHOOK_ADDR", SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)))?,
        })
    }
}
