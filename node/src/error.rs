//! Error types for the device runtime.

use crate::config::ConfigError;

/// All errors surfaced by the node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("engine error: {0}")]
    Engine(#[from] tessera_engine::Error),

    #[error("delivery to target {target_id} failed: {message}")]
    ReplicationDelivery { target_id: String, message: String },

    #[error("representation {method} failed: {message}")]
    RepresentationApply { method: String, message: String },

    #[error("could not acquire lock {key} in room {room_id}")]
    LockAcquire { room_id: String, key: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport rejected the request ({status}): {message}")]
    TransportStatus { status: u16, message: String },

    #[error("unknown representation method: {0}")]
    UnknownRepresentation(String),

    #[error("no driver registered for target kind: {0}")]
    UnknownTargetKind(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Transport(_)
            | NodeError::ReplicationDelivery { .. }
            | NodeError::LockAcquire { .. }
            | NodeError::Io(_) => true,
            NodeError::TransportStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        NodeError::Transport(err.to_string())
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_convert() {
        let err: NodeError = tessera_engine::Error::NotInTransaction.into();
        assert!(matches!(err, NodeError::Engine(_)));
        assert_eq!(
            err.to_string(),
            "engine error: replication can only be deferred inside an active transaction"
        );
    }

    #[test]
    fn transient_errors() {
        assert!(NodeError::Transport("connection reset".into()).is_transient());
        assert!(NodeError::TransportStatus {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!NodeError::TransportStatus {
            status: 403,
            message: "forbidden".into()
        }
        .is_transient());
        assert!(!NodeError::UnknownRepresentation("calendar".into()).is_transient());
        assert!(!NodeError::RepresentationApply {
            method: "room".into(),
            message: "gone".into()
        }
        .is_transient());
    }

    #[test]
    fn lock_error_display() {
        let err = NodeError::LockAcquire {
            room_id: "!r".into(),
            key: "tessera.database".into(),
        };
        assert_eq!(
            err.to_string(),
            "could not acquire lock tessera.database in room !r"
        );
    }
}
