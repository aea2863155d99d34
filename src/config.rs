use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::services::UsersStore;
use crate::utils::jwt::JwtManager;

/// Application configuration loaded from environment variables.
///
/// Required options fail the process at startup; everything else has a
/// development default or enables degraded mode when absent.
#[derive(Clone, Debug)]
pub struct Config {
    // Gateway store
    pub database_url: String,

    // JWT
    pub jwt_secret: String,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,

    // Users store (projection target + delegated identity provider)
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,

    // Cache
    pub redis_url: Option<String>,

    // CORS
    pub cors_origins: Vec<String>,

    // Sealing key for secrets stored at rest (hex, 32 bytes)
    pub api_key_encryption_key: Option<[u8; 32]>,

    // Issued API-key prefix for the active environment
    pub api_key_prefix: String,

    // Project-scope isolation policy
    pub project_scope_required: bool,
    pub project_scope_allowed: Vec<String>,

    // Dual-path validation
    pub auth_gateway_url: String,
    pub gateway_client_id: Option<String>,
    pub gateway_client_secret: Option<String>,

    // Browser flows
    pub login_url: String,
    pub session_expiry_secs: i64,
    pub cookie_domain: Option<String>,

    // Server
    pub server_host: String,
    pub server_port: u16,

    // Outbox forwarder
    pub outbox_poll_interval_secs: u64,
    pub outbox_batch_size: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;

        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| anyhow::anyhow!("JWT_SECRET is required"))?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 bytes");
        }

        let api_key_encryption_key = match std::env::var("API_KEY_ENCRYPTION_KEY") {
            Ok(raw) => Some(Self::parse_encryption_key(&raw)?),
            Err(_) => None,
        };

        let environment =
            std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let api_key_prefix = Self::select_api_key_prefix(&environment)?;

        let cors_origins = std::env::var("CORS_ORIGIN")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let project_scope_allowed = std::env::var("PROJECT_SCOPE_ALLOWED")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let server_port: u16 = std::env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()?;

        Ok(Self {
            database_url,
            jwt_secret,
            access_token_expiry_secs: std::env::var("ACCESS_TOKEN_EXPIRY_SECS")
                .unwrap_or_else(|_| "900".to_string()) // 15 minutes
                .parse()?,
            refresh_token_expiry_secs: std::env::var("REFRESH_TOKEN_EXPIRY_SECS")
                .unwrap_or_else(|_| "604800".to_string()) // 7 days
                .parse()?,
            supabase_url: std::env::var("MAIN_SUPABASE_URL").ok(),
            supabase_service_role_key: std::env::var("MAIN_SUPABASE_SERVICE_ROLE_KEY").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            cors_origins,
            api_key_encryption_key,
            api_key_prefix,
            project_scope_required: std::env::var("PROJECT_SCOPE_REQUIRED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            project_scope_allowed,
            auth_gateway_url: std::env::var("AUTH_GATEWAY_URL")
                .unwrap_or_else(|_| format!("http://127.0.0.1:{server_port}")),
            gateway_client_id: std::env::var("GATEWAY_CLIENT_ID").ok(),
            gateway_client_secret: std::env::var("GATEWAY_CLIENT_SECRET").ok(),
            login_url: std::env::var("LOGIN_URL").unwrap_or_else(|_| "/login".to_string()),
            session_expiry_secs: std::env::var("SESSION_EXPIRY_SECS")
                .unwrap_or_else(|_| "86400".to_string()) // 1 day
                .parse()?,
            cookie_domain: std::env::var("COOKIE_DOMAIN").ok(),
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port,
            outbox_poll_interval_secs: std::env::var("OUTBOX_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            outbox_batch_size: std::env::var("OUTBOX_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
        })
    }

    /// Get the socket address for the server
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(format!("{}:{}", self.server_host, self.server_port).parse()?)
    }

    /// True when both Users-store credentials are present. The forwarder
    /// refuses to start without them.
    pub fn users_store_configured(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_service_role_key.is_some()
    }

    fn parse_encryption_key(raw: &str) -> anyhow::Result<[u8; 32]> {
        let bytes = hex::decode(raw)
            .map_err(|_| anyhow::anyhow!("API_KEY_ENCRYPTION_KEY must be hex"))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("API_KEY_ENCRYPTION_KEY must be 32 bytes"))?;
        Ok(key)
    }

    fn select_api_key_prefix(environment: &str) -> anyhow::Result<String> {
        if environment == "production" {
            let prefix = std::env::var("API_KEY_PREFIX_PRODUCTION")
                .unwrap_or_else(|_| "sk_live_".to_string());
            if prefix.contains("test") {
                anyhow::bail!("API_KEY_PREFIX_PRODUCTION must not contain \"test\"");
            }
            Ok(prefix)
        } else {
            Ok(std::env::var("API_KEY_PREFIX_DEVELOPMENT")
                .unwrap_or_else(|_| "sk_test_".to_string()))
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub cache: Cache,
    pub users: Option<UsersStore>,
    /// Client for calls to our own introspection endpoint (dual-path
    /// validation). Bounded timeout so a hung introspection falls back to
    /// local verification instead of stalling the request.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pool: PgPool, cache: Cache, config: Config) -> anyhow::Result<Self> {
        let jwt = JwtManager::new(config.jwt_secret.as_bytes(), config.access_token_expiry_secs)
            .map_err(|e| anyhow::anyhow!("Failed to create JWT manager: {e}"))?;

        let users = match (&config.supabase_url, &config.supabase_service_role_key) {
            (Some(url), Some(key)) => Some(UsersStore::new(url, key)?),
            _ => None,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            jwt,
            cache,
            users,
            http,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_prefix_must_not_contain_test() {
        std::env::set_var("API_KEY_PREFIX_PRODUCTION", "sk_test_");
        let result = Config::select_api_key_prefix("production");
        std::env::remove_var("API_KEY_PREFIX_PRODUCTION");
        assert!(result.is_err());
    }

    #[test]
    fn development_prefix_defaults() {
        let prefix = Config::select_api_key_prefix("development").unwrap();
        assert_eq!(prefix, "sk_test_");
    }

    #[test]
    fn encryption_key_must_be_32_hex_bytes() {
        assert!(Config::parse_encryption_key("zz").is_err());
        assert!(Config::parse_encryption_key("abcd").is_err());
        let key = Config::parse_encryption_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key.len(), 32);
    }
}
