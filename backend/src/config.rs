use crate::service::transport::RetryPolicy;
use crate::service::update_channel::ChannelConfig;
use crate::telemetry::DEFAULT_LOG_FILTER;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub rust_log: String,
    /// Empty means any origin
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
}

/// Buffering and recovery knobs for the delta pipeline
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    pub delta_buffer_capacity: usize,
    pub delta_buffer_retention_secs: u64,
    pub broadcast_capacity: usize,
    pub reorder_window: usize,
    pub poll_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_resync_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delta_buffer_capacity: 256,
            delta_buffer_retention_secs: 300,
            broadcast_capacity: 1024,
            reorder_window: 64,
            poll_timeout_secs: 10,
            poll_interval_ms: 250,
            max_resync_failures: 3,
        }
    }
}

impl SyncConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            buffer_capacity: self.delta_buffer_capacity,
            retention: Duration::from_secs(self.delta_buffer_retention_secs),
            broadcast_capacity: self.broadcast_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_resync_failures,
            ..RetryPolicy::default()
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let defaults = SyncConfig::default();
        Ok(SyncConfig {
            delta_buffer_capacity: env_or("DELTA_BUFFER_CAPACITY", defaults.delta_buffer_capacity)?,
            delta_buffer_retention_secs: env_or(
                "DELTA_BUFFER_RETENTION_SECS",
                defaults.delta_buffer_retention_secs,
            )?,
            broadcast_capacity: env_or("BROADCAST_CAPACITY", defaults.broadcast_capacity)?,
            reorder_window: env_or("REORDER_WINDOW", defaults.reorder_window)?,
            poll_timeout_secs: env_or("POLL_TIMEOUT_SECS", defaults.poll_timeout_secs)?,
            poll_interval_ms: env_or("POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            max_resync_failures: env_or("MAX_RESYNC_FAILURES", defaults.max_resync_failures)?,
        })
    }
}

/// Settings for `livescore-follower`, a remote view of one match
#[derive(Debug, Deserialize, Clone)]
pub struct FollowerConfig {
    pub rust_log: String,
    /// Base URL of the service that owns the match
    pub server_url: String,
    pub match_id: Uuid,
    /// Follow through the Redis relay instead of polling
    pub redis: Option<RedisConfig>,
    pub sync: SyncConfig,
}

impl FollowerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        let server_url =
            env::var("LIVESCORE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let match_id = env::var("FOLLOW_MATCH_ID")?
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid FOLLOW_MATCH_ID: {}", e))?;
        let redis = env::var("REDIS_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .map(|url| RedisConfig { url });

        Ok(FollowerConfig {
            rust_log,
            server_url,
            match_id,
            redis,
            sync: SyncConfig::from_env()?,
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let port: u16 = env_or("PORT", 8080)?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        let cors_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        // Without a database the journal stays in memory
        let database = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .map(|url| DatabaseConfig { url });
        let redis = env::var("REDIS_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .map(|url| RedisConfig { url });

        let jwt_secret = env::var("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 bytes");
        }
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "livescore".to_string());

        let sync = SyncConfig::from_env()?;

        Ok(Config {
            server: ServerConfig {
                port,
                host,
                rust_log,
                cors_origins,
            },
            database,
            redis,
            auth: AuthConfig {
                jwt_secret,
                jwt_issuer,
            },
            sync,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}
