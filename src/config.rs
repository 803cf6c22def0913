//! Process configuration.
//!
//! Every option can be given as a flag or through the environment. The
//! library itself only consumes the plain [`PoolConfig`] and
//! [`ChannelConfig`] structs, so it can be used without clap.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use miette::Diagnostic;
use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite://dashboard.db?mode=rwc";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

/// Transport security for outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum TlsMode {
    /// Plain connections are accepted.
    #[default]
    Disable,
    /// Only encrypted, certificate-verified connections are accepted.
    Require,
}

#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(dashboard::config::invalid))]
    Invalid { message: String },
}

/// Command line / environment configuration for the dashboard server.
#[derive(Parser, Debug, Clone)]
#[command(name = "dashboard-server")]
#[command(author, version, about = "Dashboard data and real-time update server", long_about = None)]
pub struct Config {
    /// Database connection string
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// Maximum number of pooled connections
    #[arg(long, env = "DB_POOL_MAX", default_value_t = 20)]
    pub pool_max: u32,

    /// Seconds an idle connection is kept before it is closed
    #[arg(long, env = "DB_IDLE_TIMEOUT_SECS", default_value_t = 30)]
    pub idle_timeout_secs: u64,

    /// Seconds to wait for a connection before failing
    #[arg(long, env = "DB_CONNECT_TIMEOUT_SECS", default_value_t = 2)]
    pub connect_timeout_secs: u64,

    /// Callers allowed to queue for a connection before new ones are rejected
    #[arg(long, env = "DB_POOL_MAX_WAITERS", default_value_t = 256)]
    pub pool_max_waiters: usize,

    /// Deployment environment
    #[arg(long, env = "APP_ENV", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    /// Transport security mode
    #[arg(long, env = "TLS_MODE", value_enum, default_value_t = TlsMode::Disable)]
    pub tls_mode: TlsMode,

    /// Real-time channel endpoint advertised to clients
    #[arg(long, env = "REALTIME_URL", default_value = "ws://127.0.0.1:3000/ws")]
    pub realtime_url: String,

    /// Host address to bind to
    #[arg(long, env = "DASHBOARD_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "DASHBOARD_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Seconds between fallback refreshes while the channel is down
    #[arg(long, env = "REFRESH_POLL_SECS", default_value_t = 30)]
    pub refresh_poll_secs: u64,
}

impl Config {
    /// Check cross-field constraints clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_max == 0 {
            return Err(invalid("pool max size must be at least 1"));
        }
        if is_in_memory(&self.database_url) && self.pool_max > 1 {
            // each in-memory connection is a separate, empty database
            return Err(invalid("an in-memory database needs a pool max size of 1"));
        }
        if self.idle_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(invalid("timeouts must be greater than zero"));
        }
        if self.refresh_poll_secs == 0 {
            return Err(invalid("refresh poll interval must be greater than zero"));
        }
        if self.environment == Environment::Production
            && self.tls_mode == TlsMode::Require
            && !self.realtime_url.starts_with("wss://")
        {
            return Err(invalid(
                "production with TLS_MODE=require needs a wss:// realtime endpoint",
            ));
        }
        Ok(())
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            url: self.database_url.clone(),
            max_connections: self.pool_max,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_waiters: self.pool_max_waiters,
        }
    }

    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            url: self.realtime_url.clone(),
            tls_mode: self.tls_mode,
            poll_interval: Duration::from_secs(self.refresh_poll_secs),
            ..ChannelConfig::default()
        }
    }
}

fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:")
        || (url.contains("mode=memory") && !url.contains("cache=shared"))
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}

/// Settings for [`crate::db::DatabasePool`].
#[derive(Clone)]
pub struct PoolConfig {
    /// Connection string
    ///
    /// Default: `sqlite://dashboard.db?mode=rwc`
    pub url: String,

    /// Upper bound on concurrently borrowed connections
    ///
    /// Default: 20
    pub max_connections: u32,

    /// Idle connections older than this are closed by the pool reaper
    ///
    /// Default: 30 seconds
    pub idle_timeout: Duration,

    /// Bound on how long acquire (and the startup probe) may wait
    ///
    /// Default: 2 seconds
    pub connect_timeout: Duration,

    /// Callers allowed to queue for a connection at once
    ///
    /// Default: 256
    pub max_waiters: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 20,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
            max_waiters: 256,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &redact_url(&self.url))
            .field("max_connections", &self.max_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_waiters", &self.max_waiters)
            .finish()
    }
}

/// Settings for the client side of the real-time channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub tls_mode: TlsMode,
    /// Bound on a single connect attempt
    pub connect_timeout: Duration,
    /// First reconnect delay; doubles per failed attempt
    pub backoff_base: Duration,
    /// Largest reconnect delay
    pub backoff_max: Duration,
    /// Fallback refresh interval while disconnected
    pub poll_interval: Duration,
    /// An open connection silent for this long is treated as dead. The
    /// server pings every 30 seconds, so this should stay well above that.
    pub keepalive_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000/ws".to_string(),
            tls_mode: TlsMode::Disable,
            connect_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(60),
        }
    }
}

/// Replace the password component of a URL with `***`.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..scheme_end + 3],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}
