//! Error types for the Tessera engine.

use crate::{CollectionName, EntityId, EntityKind, EntityRef, LogId, SchemaVersion, Version};
use thiserror::Error;

/// All possible errors from the Tessera engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Versioning errors
    #[error("stale write to {id}: proposed version {proposed}, stored version {stored}")]
    StaleWrite {
        id: EntityId,
        proposed: Version,
        stored: Version,
    },

    // Buffer errors
    #[error("replication can only be deferred inside an active transaction")]
    NotInTransaction,

    // Lookup errors
    #[error("entity not found: {0}")]
    EntityNotFound(EntityRef),

    #[error("log not found: {0}")]
    LogNotFound(LogId),

    #[error("no database owns entity {0} and no current database is configured")]
    NoDatabase(EntityId),

    #[error("unknown target kind: {0}")]
    UnknownTargetKind(String),

    #[error("entity kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: EntityKind,
        actual: EntityKind,
    },

    // Uniqueness invariants
    #[error("database {database_id} already has a primary replication target")]
    DuplicatePrimaryTarget { database_id: EntityId },

    #[error("current database is already configured as {existing}")]
    DuplicateDatabaseConfig { existing: EntityId },

    // Validation errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Flush errors
    #[error("flush restarted more than {limit} times")]
    FlushRestartLimit { limit: u32 },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
