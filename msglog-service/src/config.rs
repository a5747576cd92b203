//! Configuration module for environment variable parsing.
//!
//! All settings are read once at startup. A missing `WEBHOOK_SECRET` is not an
//! error: the service still starts, but the webhook rejects every request and
//! readiness reports not-ready.

use std::env;
use std::path::PathBuf;

use tracing::warn;

/// Default SQLite location when `DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:////data/app.db";

/// URL that selects a private in-memory database.
pub const IN_MEMORY_DATABASE_URL: &str = "sqlite::memory:";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (`sqlite:///abs/path.db`, `sqlite://rel/path.db` or `sqlite::memory:`)
    pub database_url: String,

    /// Shared secret used to sign webhook bodies
    pub webhook_secret: Option<String>,

    /// Fallback log filter when `RUST_LOG` is not set
    pub log_level: String,

    /// Port for the web server to listen on
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            webhook_secret: None,
            log_level: "info".to_string(),
            port: 8000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.database_url),

            webhook_secret: env::var("WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            log_level: env::var("LOG_LEVEL")
                .map(|v| v.trim().to_lowercase())
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.log_level),

            port: parse_port("PORT", defaults.port),
        }
    }

    /// Whether the write path can accept signed requests at all.
    pub fn has_webhook_secret(&self) -> bool {
        self.webhook_secret
            .as_ref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Resolve a database URL into a filesystem path, `None` for in-memory.
///
/// Everything after `sqlite://` is the path, so `sqlite:///tmp/app.db` is
/// absolute and `sqlite://app.db` is relative to the working directory. The
/// extra slash in `sqlite:////data/app.db` is collapsed. A bare path without
/// a scheme is used as-is.
pub fn database_path_from_url(url: &str) -> Option<PathBuf> {
    if url == IN_MEMORY_DATABASE_URL || url == ":memory:" {
        return None;
    }

    let path = if let Some(rest) = url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = url.strip_prefix("sqlite:") {
        rest
    } else {
        url
    };

    // Drop query parameters such as `?mode=rwc`
    let path = path.split('?').next().unwrap_or(path);

    let path = if path.starts_with("//") {
        &path[1..]
    } else {
        path
    };

    Some(PathBuf::from(path))
}

fn parse_port(name: &str, default: u16) -> u16 {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid port, using default");
            default
        }
    }
}
