use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub rust_log: String,
    pub session: SessionSettings,
}

/// Timing knobs shared by every editing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub autosave_debounce: Duration,
    pub autosave_cooldown: Duration,
    pub collab_throttle: Duration,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            autosave_debounce: Duration::from_millis(2000),
            autosave_cooldown: Duration::from_millis(2000),
            collab_throttle: Duration::from_millis(300),
            reconnect_max_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            autosave_debounce: env_millis("AUTOSAVE_DEBOUNCE_MS", defaults.autosave_debounce)?,
            autosave_cooldown: env_millis("AUTOSAVE_COOLDOWN_MS", defaults.autosave_cooldown)?,
            collab_throttle: env_millis("COLLAB_THROTTLE_MS", defaults.collab_throttle)?,
            reconnect_max_attempts: env_or("RECONNECT_MAX_ATTEMPTS", defaults.reconnect_max_attempts)?,
            reconnect_base_delay: env_millis(
                "RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay,
            )?,
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            port: env_or("PORT", 8080u16).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            session: SessionSettings::from_env()?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    let ms = env_or(key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))?;
    Ok(Duration::from_millis(ms))
}
