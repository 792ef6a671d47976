use std::{env, str::FromStr, time::Duration};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub gateway: GatewayConfig,
}

/// Credentials and call policy for the external payment processor.
///
/// Built once at startup and handed to the gateway client and the payment
/// service; nothing reads these values from the environment afterwards.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Upper bound for a single gateway round trip.
    pub call_timeout: Duration,
    /// Retries granted to a capture after the first transient failure.
    pub retry_budget: u32,
    /// Linear backoff unit: the n-th retry waits `n * backoff_step`.
    pub backoff_step: Duration,
    /// How long a capture attempt holds its claim on a pending payment.
    pub capture_lease: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-m.sandbox.paypal.com".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            call_timeout: Duration::from_secs(15),
            retry_budget: 3,
            backoff_step: Duration::from_secs(1),
            capture_lease: Duration::from_secs(120),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let jwt_ttl_hours = parse_or("JWT_TTL_HOURS", 24);
        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            jwt_ttl_hours,
            gateway: GatewayConfig::from_env(),
        })
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("PAYPAL_BASE_URL").unwrap_or(defaults.base_url),
            client_id: env::var("PAYPAL_CLIENT_ID").unwrap_or_default(),
            client_secret: env::var("PAYPAL_CLIENT_SECRET").unwrap_or_default(),
            call_timeout: Duration::from_secs(parse_or("PAYMENT_CALL_TIMEOUT_SECS", 15)),
            retry_budget: parse_or("PAYMENT_RETRY_BUDGET", defaults.retry_budget),
            backoff_step: Duration::from_millis(parse_or("PAYMENT_BACKOFF_STEP_MS", 1000)),
            capture_lease: Duration::from_secs(parse_or("PAYMENT_CAPTURE_LEASE_SECS", 120)),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}
