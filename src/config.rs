use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Polling faster than this hammers the provider's rate limits.
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub http_bind: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub log_level: String,
    pub webhook_shared_secret: Option<String>,

    pub telematics_api_url: String,
    pub telematics_timeout_secs: u64,
    pub poll_enabled: bool,
    pub poll_interval_secs: u64,
    pub poll_lookback_minutes: i64,
    pub poll_max_retries: u32,
    pub poll_circuit_breaker_cooldown: u64,

    pub channel_gateway_url: String,
    pub channel_gateway_token: String,
    pub channel_timeout_secs: u64,

    pub escalation_sweep_secs: u64,
    pub stale_sweep_secs: u64,
    pub pattern_sweep_secs: u64,
    pub revalidation_sweep_secs: u64,
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let http_bind = env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "fleet_alerts".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "fleet".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "fleet".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let webhook_shared_secret = env::var("WEBHOOK_SHARED_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let telematics_api_url = env::var("TELEMATICS_API_URL")
            .unwrap_or_else(|_| "https://api.samsara.com".to_string());
        let channel_gateway_url = env::var("CHANNEL_GATEWAY_URL")
            .unwrap_or_else(|_| "http://localhost:9000".to_string());
        let channel_gateway_token = env::var("CHANNEL_GATEWAY_TOKEN").unwrap_or_default();

        let poll_interval_secs =
            var_or("POLL_INTERVAL_SECS", 30u64).max(MIN_POLL_INTERVAL_SECS);

        Ok(Self {
            http_bind,
            database_url,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", 20),
            run_migrations: var_or("RUN_MIGRATIONS", true),
            log_level,
            webhook_shared_secret,
            telematics_api_url,
            telematics_timeout_secs: var_or("TELEMATICS_TIMEOUT_SECS", 20),
            poll_enabled: var_or("POLL_ENABLED", true),
            poll_interval_secs,
            poll_lookback_minutes: var_or("POLL_LOOKBACK_MINUTES", 60),
            poll_max_retries: var_or("POLL_MAX_RETRIES", 5),
            poll_circuit_breaker_cooldown: var_or("POLL_CIRCUIT_BREAKER_COOLDOWN", 300),
            channel_gateway_url,
            channel_gateway_token,
            channel_timeout_secs: var_or("CHANNEL_TIMEOUT_SECS", 15),
            escalation_sweep_secs: var_or("ESCALATION_SWEEP_SECS", 60),
            stale_sweep_secs: var_or("STALE_SWEEP_SECS", 300),
            pattern_sweep_secs: var_or("PATTERN_SWEEP_SECS", 600),
            revalidation_sweep_secs: var_or("REVALIDATION_SWEEP_SECS", 60),
        })
    }
}
