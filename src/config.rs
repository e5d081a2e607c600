use std::env;

/// Deployment environment. Anti-fraud enforcement, quarantine transitions,
/// and HTTPS endpoint validation are only active in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    /// Parse from the NODE_ENV convention: exactly `production` enables
    /// production mode, anything else is development.
    pub fn from_node_env(value: &str) -> Self {
        if value == "production" {
            Self::Production
        } else {
            Self::Development
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment (from NODE_ENV)
    pub environment: Environment,
    /// Registry master secret: signs session tokens and derives the
    /// AES key for provider-secret encryption
    pub jwt_secret: String,
    /// Database connection URL assembled from DATABASE_* variables
    pub database_url: String,
    /// Maximum database connections in pool
    pub database_max_connections: u32,
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Whether x-forwarded-for is trusted for caller identity derivation
    pub trust_proxy: bool,
    /// Log a per-agent score breakdown on every search
    pub search_debug: bool,
    /// Request-scoped deadline for handler work, in seconds
    pub request_timeout_secs: u64,
    /// Whether the in-process auto-review job runs
    pub auto_review_enabled: bool,
    /// Auto-review interval in hours
    pub auto_review_interval_hours: u64,
}

/// Minimum master secret length accepted at startup.
const MIN_JWT_SECRET_LEN: usize = 16;

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_node_env(
            &env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingEnvVar("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakSecret("JWT_SECRET"));
        }

        let database_host =
            env::var("DATABASE_HOST").map_err(|_| ConfigError::MissingEnvVar("DATABASE_HOST"))?;
        let database_port: u16 = env::var("DATABASE_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_PORT"))?;
        let database_name =
            env::var("DATABASE_NAME").map_err(|_| ConfigError::MissingEnvVar("DATABASE_NAME"))?;
        let database_user =
            env::var("DATABASE_USER").map_err(|_| ConfigError::MissingEnvVar("DATABASE_USER"))?;
        let database_password = env::var("DATABASE_PASSWORD").unwrap_or_default();

        let database_url = format!(
            "postgres://{database_user}:{database_password}@{database_host}:{database_port}/{database_name}"
        );

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let trust_proxy = parse_bool(env::var("TRUST_PROXY").ok().as_deref(), true)
            .ok_or(ConfigError::InvalidValue("TRUST_PROXY"))?;

        let search_debug = parse_bool(env::var("SEARCH_DEBUG").ok().as_deref(), false)
            .ok_or(ConfigError::InvalidValue("SEARCH_DEBUG"))?;

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("REQUEST_TIMEOUT_SECS"))?;

        let auto_review_enabled = parse_bool(env::var("AUTO_REVIEW_ENABLED").ok().as_deref(), true)
            .ok_or(ConfigError::InvalidValue("AUTO_REVIEW_ENABLED"))?;

        let auto_review_interval_hours = env::var("AUTO_REVIEW_INTERVAL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("AUTO_REVIEW_INTERVAL_HOURS"))?;

        Ok(Self {
            environment,
            jwt_secret,
            database_url,
            database_max_connections,
            host,
            port,
            trust_proxy,
            search_debug,
            request_timeout_secs,
            auto_review_enabled,
            auto_review_interval_hours,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> Option<bool> {
    match value {
        None => Some(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
    #[error("{0} must be at least 16 characters")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing() {
        assert_eq!(
            Environment::from_node_env("production"),
            Environment::Production
        );
        assert_eq!(
            Environment::from_node_env("development"),
            Environment::Development
        );
        assert_eq!(Environment::from_node_env("test"), Environment::Development);
        assert_eq!(Environment::from_node_env(""), Environment::Development);
        // Case-sensitive on purpose: "Production" does not enable enforcement.
        assert_eq!(
            Environment::from_node_env("Production"),
            Environment::Development
        );
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool(None, true), Some(true));
        assert_eq!(parse_bool(None, false), Some(false));
        assert_eq!(parse_bool(Some("true"), false), Some(true));
        assert_eq!(parse_bool(Some("TRUE"), false), Some(true));
        assert_eq!(parse_bool(Some("1"), false), Some(true));
        assert_eq!(parse_bool(Some("no"), true), Some(false));
        assert_eq!(parse_bool(Some("0"), true), Some(false));
        assert_eq!(parse_bool(Some("maybe"), true), None);
    }
}
