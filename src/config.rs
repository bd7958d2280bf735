//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::community::Platform;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    /// Public base URL of this server, used to build broker callback URLs
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 8000,
            public_url: "http://localhost:8000".to_string(),
        }
    }
}

/// Database configuration (optional - without it the stores stay in memory)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Governance broker (Metagov) configuration
#[derive(Debug, Clone)]
pub struct MetagovConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for MetagovConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Session and login configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// FORCE_SLACK_LOGIN: readable name of a Slack user to log in as (development only)
    pub force_login: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "policykit-dev-secret-change-in-production".to_string(),
            force_login: None,
        }
    }
}

/// OAuth app registered with a platform, for exchanging install codes
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
    /// Overrides the platform's token endpoint
    pub token_url: Option<String>,
}

/// OAuth apps keyed by platform, from `<PLATFORM>_CLIENT_ID`,
/// `<PLATFORM>_CLIENT_SECRET` and optional `<PLATFORM>_TOKEN_URL`
#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    pub apps: HashMap<Platform, OAuthApp>,
}

/// Platform dispatch retry policy
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            timeout_secs: 15,
        }
    }
}

/// Background task cadence
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub count_votes_interval_secs: u64,
    pub poll_processes_interval_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            count_votes_interval_secs: 60,
            poll_processes_interval_secs: 30,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub metagov: MetagovConfig,
    pub auth: AuthConfig,
    pub oauth: OAuthConfig,
    pub dispatch: DispatchConfig,
    pub tasks: TaskConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let defaults = ServerConfig::default();
        let port = env_parse("PORT").unwrap_or(defaults.port);
        let server = ServerConfig {
            host: env_parse("HOST").unwrap_or(defaults.host),
            port,
            public_url: std::env::var("SERVER_URL")
                .map(|u| Self::parse_base_url("SERVER_URL", &u))
                .unwrap_or_else(|_| Ok(format!("http://localhost:{}", port)))?,
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(database_url) => Some(Self::parse_database_url(&database_url)?),
            Err(_) => None,
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let metagov = MetagovConfig {
            enabled: env_parse("METAGOV_ENABLED").unwrap_or(true),
            url: match std::env::var("METAGOV_URL") {
                Ok(u) => Self::parse_base_url("METAGOV_URL", &u)?,
                Err(_) => MetagovConfig::default().url,
            },
        };

        let auth = AuthConfig {
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| {
                warn!("JWT_SECRET not set, using default (INSECURE - set in production!)");
                AuthConfig::default().jwt_secret
            }),
            force_login: std::env::var("FORCE_SLACK_LOGIN")
                .ok()
                .filter(|name| !name.trim().is_empty()),
        };

        let mut oauth = OAuthConfig::default();
        for platform in Platform::ALL {
            let prefix = platform.as_str().to_uppercase();
            let var = |suffix: &str| std::env::var(format!("{}_{}", prefix, suffix)).ok();
            let (Some(client_id), Some(client_secret)) = (var("CLIENT_ID"), var("CLIENT_SECRET")) else {
                continue;
            };
            let token_url = match var("TOKEN_URL") {
                Some(url) => Some(Self::parse_base_url(&format!("{}_TOKEN_URL", prefix), &url)?),
                None => None,
            };
            oauth.apps.insert(
                platform,
                OAuthApp {
                    client_id,
                    client_secret,
                    token_url,
                },
            );
        }

        let dispatch_defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            max_attempts: env_parse("DISPATCH_MAX_ATTEMPTS")
                .unwrap_or(dispatch_defaults.max_attempts)
                .max(1),
            backoff_ms: env_parse("DISPATCH_BACKOFF_MS").unwrap_or(dispatch_defaults.backoff_ms),
            timeout_secs: env_parse("DISPATCH_TIMEOUT_SECS").unwrap_or(dispatch_defaults.timeout_secs),
        };

        let task_defaults = TaskConfig::default();
        let tasks = TaskConfig {
            count_votes_interval_secs: env_parse("COUNT_VOTES_INTERVAL_SECS")
                .unwrap_or(task_defaults.count_votes_interval_secs),
            poll_processes_interval_secs: env_parse("POLL_PROCESSES_INTERVAL_SECS")
                .unwrap_or(task_defaults.poll_processes_interval_secs),
        };

        Ok(Self {
            server,
            database,
            cors,
            metagov,
            auth,
            oauth,
            dispatch,
            tasks,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let require_tls = host.contains("neon.tech")
            || parsed
                .query_pairs()
                .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            host,
            database,
            max_pool_size: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            require_tls,
        })
    }

    /// Validate an http(s) base URL and strip any trailing slash
    fn parse_base_url(var: &str, value: &str) -> Result<String, ConfigError> {
        let parsed = url::Url::parse(value)
            .map_err(|e| ConfigError::InvalidValue(format!("{} is not a valid URL: {}", var, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue(format!(
                "{} must use http or https",
                var
            )));
        }
        Ok(value.trim_end_matches('/').to_string())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
