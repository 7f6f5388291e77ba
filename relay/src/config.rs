//! Configuration management for the relay.

use std::env;

/// Relay configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub host: String,
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    pub max_connections: u32,
    /// Domain part of member ids, as in `@alice:{server_name}`
    pub server_name: String,
    /// Upper bound on a requested lock TTL
    pub max_lock_ttl_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;

        let max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("DB_MAX_CONNECTIONS"))?;

        let server_name =
            env::var("TESSERA_SERVER_NAME").unwrap_or_else(|_| "tessera.local".to_string());
        if server_name.is_empty() || server_name.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid("TESSERA_SERVER_NAME"));
        }

        let max_lock_ttl_ms = env::var("TESSERA_MAX_LOCK_TTL_MS")
            .unwrap_or_else(|_| "300000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("TESSERA_MAX_LOCK_TTL_MS"))?;

        Ok(Self {
            host,
            port,
            database_url,
            max_connections,
            server_name,
            max_lock_ttl_ms,
        })
    }

    /// The member id a username maps to on this relay.
    pub fn member_id(&self, username: &str) -> String {
        format!("@{username}:{}", self.server_name)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid {0} value")]
    Invalid(&'static str),
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: "postgres://localhost/tessera_test".to_string(),
            max_connections: 1,
            server_name: "relay.test".to_string(),
            max_lock_ttl_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ids_carry_the_server_name() {
        let config = Config::for_tests();
        assert_eq!(config.member_id("alice"), "@alice:relay.test");
    }
}
