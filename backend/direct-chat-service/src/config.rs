use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!("unknown STORE_BACKEND: {other}"))),
        }
    }
}

/// Knobs for behavior the messaging contract leaves to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Allow the sender to edit a message the receiver has already seen
    pub edit_after_seen: bool,
    /// Allow a `for_both` delete of a message the receiver has already seen
    pub delete_after_seen: bool,
    /// Allow editing a message after any delete scope was applied
    pub edit_after_delete: bool,
    /// On join, flip the user's backlog of `sent` messages to `delivered`
    pub deliver_backlog_on_join: bool,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            edit_after_seen: true,
            delete_after_seen: true,
            edit_after_delete: false,
            deliver_backlog_on_join: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_secs: u64,
    pub client_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_body_len: usize,
    pub history: HistoryConfig,
    pub ws: WsConfig,
    pub policy: LifecyclePolicy,
}

impl Config {
    fn parse_bool(key: &str, default: bool) -> Result<bool, AppError> {
        match env::var(key) {
            Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(AppError::Config(format!("{key} must be a boolean, got {other}"))),
            },
            Err(_) => Ok(default),
        }
    }

    fn parse_num<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
        match env::var(key) {
            Ok(v) => v
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{key} must be a number, got {v}"))),
            Err(_) => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = Self::parse_num("PORT", 8080u16)?;
        let store_backend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".into())
            .parse::<StoreBackend>()?;

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config(
                "DATABASE_URL missing (required when STORE_BACKEND=postgres)".into(),
            ));
        }

        let history = HistoryConfig {
            default_limit: Self::parse_num("HISTORY_DEFAULT_LIMIT", 100usize)?,
            max_limit: Self::parse_num("HISTORY_MAX_LIMIT", 100usize)?,
        };
        if history.default_limit == 0 || history.max_limit == 0 {
            return Err(AppError::Config("history limits must be positive".into()));
        }

        let defaults = LifecyclePolicy::default();
        let policy = LifecyclePolicy {
            edit_after_seen: Self::parse_bool("POLICY_EDIT_AFTER_SEEN", defaults.edit_after_seen)?,
            delete_after_seen: Self::parse_bool(
                "POLICY_DELETE_AFTER_SEEN",
                defaults.delete_after_seen,
            )?,
            edit_after_delete: Self::parse_bool(
                "POLICY_EDIT_AFTER_DELETE",
                defaults.edit_after_delete,
            )?,
            deliver_backlog_on_join: Self::parse_bool(
                "POLICY_DELIVER_BACKLOG_ON_JOIN",
                defaults.deliver_backlog_on_join,
            )?,
        };

        Ok(Self {
            port,
            store_backend,
            database_url,
            max_body_len: Self::parse_num("MAX_BODY_LEN", 4096usize)?,
            history,
            ws: WsConfig {
                heartbeat_secs: Self::parse_num("WS_HEARTBEAT_SECS", 5u64)?,
                client_timeout_secs: Self::parse_num("WS_CLIENT_TIMEOUT_SECS", 30u64)?,
            },
            policy,
        })
    }

    /// In-memory configuration used by tests and local runs.
    pub fn for_memory() -> Self {
        Self {
            port: 8080,
            store_backend: StoreBackend::Memory,
            database_url: None,
            max_body_len: 4096,
            history: HistoryConfig::default(),
            ws: WsConfig {
                heartbeat_secs: 5,
                client_timeout_secs: 30,
            },
            policy: LifecyclePolicy::default(),
        }
    }
}
