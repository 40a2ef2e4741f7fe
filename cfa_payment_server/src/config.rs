use std::{env, time::Duration};

use cfa_common::{helpers::parse_boolean_flag, Secret};
use cfa_payment_engine::RelayConfig;
use log::*;

const DEFAULT_CFA_HOST: &str = "127.0.0.1";
const DEFAULT_CFA_PORT: u16 = 8330;
const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:8330";
const DEFAULT_IDEMPOTENCY_TTL_HOURS: i64 = 24;
const DEFAULT_VALIDATE_TIMEOUT_SECS: u64 = 10;
const SANDBOX_GATEWAY_URL: &str = "https://sandbox.sslcommerz.com";
const LIVE_GATEWAY_URL: &str = "https://securepay.sslcommerz.com";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The externally reachable base URL of this server. The gateway redirect and IPN URLs are
    /// derived from it.
    pub public_base_url: String,
    /// How long a stored idempotent response keeps answering for its key.
    pub idempotency_ttl_hours: i64,
    /// Ceiling on the IPN validation round-trip to the gateway.
    pub gateway_validate_timeout: Duration,
    pub outbox: RelayConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HMAC secret for access-token verification. Shared with the identity service that issues
    /// the tokens.
    pub jwt_secret: Secret<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: Secret::new(String::default()) }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub store_id: String,
    pub store_password: Secret<String>,
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_id: String::default(),
            store_password: Secret::new(String::default()),
            base_url: SANDBOX_GATEWAY_URL.to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CFA_HOST.to_string(),
            port: DEFAULT_CFA_PORT,
            database_url: String::default(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            idempotency_ttl_hours: DEFAULT_IDEMPOTENCY_TTL_HOURS,
            gateway_validate_timeout: Duration::from_secs(DEFAULT_VALIDATE_TIMEOUT_SECS),
            outbox: RelayConfig::default(),
            auth: AuthConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("CFA_HOST").ok().unwrap_or_else(|| DEFAULT_CFA_HOST.into());
        let port = env_parse("CFA_PORT", DEFAULT_CFA_PORT);
        let database_url = env::var("CFA_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ CFA_DATABASE_URL is not set. Please set it to the URL for the payments database.");
            String::default()
        });
        let public_base_url = env::var("CFA_PUBLIC_BASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ CFA_PUBLIC_BASE_URL is not set. Gateway callbacks will use {DEFAULT_PUBLIC_BASE_URL}.");
            DEFAULT_PUBLIC_BASE_URL.into()
        });
        let idempotency_ttl_hours = env_parse("CFA_IDEMPOTENCY_TTL_HOURS", DEFAULT_IDEMPOTENCY_TTL_HOURS);
        let gateway_validate_timeout =
            Duration::from_secs(env_parse("CFA_GATEWAY_VALIDATE_TIMEOUT_SECS", DEFAULT_VALIDATE_TIMEOUT_SECS));
        let outbox = outbox_from_env();
        let auth = AuthConfig::try_from_env().unwrap_or_else(|e| {
            warn!("🪛️ Could not load the authentication configuration from environment variables. {e}");
            AuthConfig::default()
        });
        let gateway = GatewayConfig::from_env_or_default();
        Self {
            host,
            port,
            database_url,
            public_base_url,
            idempotency_ttl_hours,
            gateway_validate_timeout,
            outbox,
            auth,
            gateway,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    T::Err: std::fmt::Display,
{
    let Ok(raw) = env::var(key) else { return default };
    match raw.parse::<T>() {
        Ok(value) => value,
        Err(e) => {
            error!("🪛️ '{raw}' is not a valid value for {key}. {e} Using the default, {default}, instead.");
            default
        },
    }
}

fn outbox_from_env() -> RelayConfig {
    let defaults = RelayConfig::default();
    RelayConfig {
        poll_interval: Duration::from_secs(env_parse(
            "CFA_OUTBOX_POLL_INTERVAL_SECS",
            defaults.poll_interval.as_secs(),
        )),
        batch_size: env_parse("CFA_OUTBOX_BATCH_SIZE", defaults.batch_size),
        max_retries: env_parse("CFA_OUTBOX_MAX_RETRIES", defaults.max_retries),
    }
}

impl AuthConfig {
    pub fn try_from_env() -> Result<Self, String> {
        let jwt_secret = env::var("CFA_JWT_SECRET").map_err(|_| "CFA_JWT_SECRET is not set".to_string())?;
        if jwt_secret.is_empty() {
            return Err("CFA_JWT_SECRET is empty".to_string());
        }
        Ok(Self { jwt_secret: Secret::new(jwt_secret) })
    }
}

impl GatewayConfig {
    pub fn from_env_or_default() -> Self {
        let store_id = env::var("CFA_SSLC_STORE_ID").ok().unwrap_or_else(|| {
            warn!("🪛️ CFA_SSLC_STORE_ID is not set. Gateway calls will be rejected upstream.");
            String::default()
        });
        let store_password = Secret::new(env::var("CFA_SSLC_STORE_PASSWORD").ok().unwrap_or_default());
        let live = parse_boolean_flag(env::var("CFA_SSLC_LIVE").ok(), false);
        let base_url = env::var("CFA_SSLC_BASE_URL").ok().unwrap_or_else(|| {
            if live { LIVE_GATEWAY_URL.to_string() } else { SANDBOX_GATEWAY_URL.to_string() }
        });
        Self { store_id, store_password, base_url }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Env vars are process-global, so everything lives in one test to avoid interleaving.
    #[test]
    fn config_from_env() {
        env::set_var("CFA_PORT", "not-a-port");
        env::set_var("CFA_DATABASE_URL", "sqlite://data/test.db");
        env::set_var("CFA_JWT_SECRET", "s3cret");
        env::set_var("CFA_SSLC_LIVE", "true");
        env::remove_var("CFA_SSLC_BASE_URL");
        env::remove_var("CFA_IDEMPOTENCY_TTL_HOURS");
        let config = ServerConfig::from_env_or_default();
        assert_eq!(config.port, DEFAULT_CFA_PORT);
        assert_eq!(config.database_url, "sqlite://data/test.db");
        assert_eq!(config.auth.jwt_secret.reveal().as_str(), "s3cret");
        assert_eq!(config.gateway.base_url, LIVE_GATEWAY_URL);
        assert_eq!(config.idempotency_ttl_hours, DEFAULT_IDEMPOTENCY_TTL_HOURS);
        assert_eq!(config.outbox.max_retries, RelayConfig::default().max_retries);

        env::set_var("CFA_PORT", "4000");
        env::set_var("CFA_SSLC_LIVE", "0");
        env::set_var("CFA_IDEMPOTENCY_TTL_HOURS", "48");
        env::set_var("CFA_GATEWAY_VALIDATE_TIMEOUT_SECS", "3");
        env::set_var("CFA_OUTBOX_POLL_INTERVAL_SECS", "1");
        env::set_var("CFA_OUTBOX_BATCH_SIZE", "50");
        env::set_var("CFA_OUTBOX_MAX_RETRIES", "5");
        let config = ServerConfig::from_env_or_default();
        assert_eq!(config.port, 4000);
        assert_eq!(config.gateway.base_url, SANDBOX_GATEWAY_URL);
        assert_eq!(config.idempotency_ttl_hours, 48);
        assert_eq!(config.gateway_validate_timeout, Duration::from_secs(3));
        assert_eq!(config.outbox.poll_interval, Duration::from_secs(1));
        assert_eq!(config.outbox.batch_size, 50);
        assert_eq!(config.outbox.max_retries, 5);
    }
}
