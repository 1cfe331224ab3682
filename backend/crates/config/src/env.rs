use rowsync_common::{SyncError, SyncResult};
use std::env;
use std::str::FromStr;

pub const DEFAULT_SMARTSUITE_BASE_URL: &str = "https://app.smartsuite.com/api/v1";
/// Upper bound for `DESTINATION_MAX_RETRIES`; larger values are clamped.
pub const MAX_DESTINATION_RETRIES: u32 = 10;

/// How to reach the source MySQL database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MySqlSettings {
    Url(String),
    Parts {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
}

impl MySqlSettings {
    /// `MYSQL_URL` wins; otherwise all of `MYSQL_HOST`, `MYSQL_USER`,
    /// `MYSQL_PASSWORD` and `MYSQL_DATABASE` are required.
    pub fn from_env() -> SyncResult<Self> {
        if let Ok(url) = env::var("MYSQL_URL") {
            if !url.trim().is_empty() {
                return Ok(Self::Url(url));
            }
        }

        Ok(Self::Parts {
            host: get_var("MYSQL_HOST")?,
            port: parse_var("MYSQL_PORT", 3306)?,
            user: get_var("MYSQL_USER")?,
            password: get_var("MYSQL_PASSWORD")?,
            database: get_var("MYSQL_DATABASE")?,
        })
    }

    /// Connection target safe to log.
    pub fn redacted(&self) -> String {
        match self {
            Self::Url(url) => match url.split_once('@') {
                Some((_, rest)) => format!("mysql://***@{rest}"),
                None => url.clone(),
            },
            Self::Parts {
                host,
                port,
                database,
                ..
            } => format!("{host}:{port}/{database}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSettings {
    pub token: String,
    pub account_id: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl DestinationSettings {
    pub fn from_env() -> SyncResult<Self> {
        let max_retries: u32 = parse_var("DESTINATION_MAX_RETRIES", 2)?;
        if max_retries > MAX_DESTINATION_RETRIES {
            tracing::warn!(
                requested = max_retries,
                max = MAX_DESTINATION_RETRIES,
                "DESTINATION_MAX_RETRIES clamped"
            );
        }

        Ok(Self {
            token: get_var("SMARTSUITE_TOKEN")?,
            account_id: get_var("SMARTSUITE_ACCOUNT_ID")?,
            base_url: get_var_or("SMARTSUITE_BASE_URL", DEFAULT_SMARTSUITE_BASE_URL)
                .trim_end_matches('/')
                .to_owned(),
            timeout_secs: parse_var("DESTINATION_TIMEOUT_SECS", 30)?,
            max_retries: max_retries.min(MAX_DESTINATION_RETRIES),
        })
    }
}

/// Settings needed by commands that only touch local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSettings {
    pub state_db_path: String,
    pub sync_interval_minutes: u64,
    pub log_level: String,
}

impl StateSettings {
    pub fn from_env() -> SyncResult<Self> {
        let _ = dotenvy::dotenv();

        let sync_interval_minutes = parse_var("SYNC_INTERVAL_MINUTES", 5)?;
        if sync_interval_minutes == 0 {
            return Err(SyncError::Config(
                "SYNC_INTERVAL_MINUTES must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            state_db_path: get_var_or("STATE_DB_PATH", "sync_state.db"),
            sync_interval_minutes,
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub mysql: MySqlSettings,
    pub destination: DestinationSettings,
    pub state: StateSettings,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> SyncResult<Self> {
        let state = StateSettings::from_env()?;

        Ok(Self {
            mysql: MySqlSettings::from_env()?,
            destination: DestinationSettings::from_env()?,
            state,
        })
    }
}

fn get_var(key: &str) -> SyncResult<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SyncError::Config(format!("{key} is required but not set"))),
    }
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str, default: T) -> SyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SyncError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
