//! Configuration management for the node.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tessera_engine::{DEFAULT_MAX_REPRESENTATION_ATTEMPTS, DEFAULT_MAX_RESTARTS};

/// Node configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name of the project database to open or create
    pub project: String,
    /// Name of this device
    pub device_name: String,
    /// Stable id of this node; prefixes transaction ids
    pub node_id: String,
    /// Base URL of the relay; in-process transport when absent
    pub relay_url: Option<String>,
    /// Transport account of this device
    pub account: Option<TransportAccount>,
    /// Where the local store snapshot is kept
    pub state_path: PathBuf,
    pub sync_interval: Duration,
    /// How long state publication waits for the room lock
    pub lock_timeout: Duration,
    /// Expiry of a held room lock
    pub lock_ttl: Duration,
    /// Consecutive flush restarts without progress before a flush gives up
    pub max_flush_restarts: u32,
    /// Transient failures before a representation is given up on
    pub max_representation_attempts: u32,
}

/// Credentials of an existing transport member.
#[derive(Clone)]
pub struct TransportAccount {
    pub member_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for TransportAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAccount")
            .field("member_id", &self.member_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let project = lookup("TESSERA_PROJECT").unwrap_or_else(|| "default".to_string());
        let device_name = lookup("TESSERA_DEVICE_NAME").unwrap_or_else(|| "device".to_string());
        let node_id = lookup("TESSERA_NODE_ID").unwrap_or_else(|| device_name.clone());
        let relay_url = lookup("TESSERA_RELAY_URL").map(|u| u.trim_end_matches('/').to_string());

        let account = match (lookup("TESSERA_MEMBER_ID"), lookup("TESSERA_ACCESS_TOKEN")) {
            (Some(member_id), Some(access_token)) => Some(TransportAccount {
                member_id,
                access_token,
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteAccount),
        };
        if account.is_some() && relay_url.is_none() {
            return Err(ConfigError::MissingRelayUrl);
        }

        let state_path = lookup("TESSERA_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("tessera-state.json"));

        let sync_interval = Duration::from_secs(parse(&lookup, "TESSERA_SYNC_INTERVAL_SECS", 5)?);
        let lock_timeout = Duration::from_millis(parse(&lookup, "TESSERA_LOCK_TIMEOUT_MS", 5_000)?);
        let lock_ttl = Duration::from_millis(parse(&lookup, "TESSERA_LOCK_TTL_MS", 30_000)?);
        let max_flush_restarts = parse(
            &lookup,
            "TESSERA_MAX_FLUSH_RESTARTS",
            DEFAULT_MAX_RESTARTS as u64,
        )? as u32;
        let max_representation_attempts = parse(
            &lookup,
            "TESSERA_MAX_REPRESENTATION_ATTEMPTS",
            DEFAULT_MAX_REPRESENTATION_ATTEMPTS as u64,
        )?
        .max(1) as u32;

        Ok(Self {
            project,
            device_name,
            node_id,
            relay_url,
            account,
            state_path,
            sync_interval,
            lock_timeout,
            lock_ttl,
            max_flush_restarts,
            max_representation_attempts,
        })
    }
}

fn parse(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TESSERA_MEMBER_ID and TESSERA_ACCESS_TOKEN must be set together")]
    IncompleteAccount,

    #[error("TESSERA_RELAY_URL is required when a transport account is configured")]
    MissingRelayUrl,

    #[error("Invalid {key} value: {value}")]
    InvalidNumber { key: &'static str, value: String },
}
