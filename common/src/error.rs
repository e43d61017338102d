//! Structured error types for the docker quota attribution engine.
//!
//! Every fallible operation returns one of the five kinds from the error
//! handling design: `BackendUnavailable`, `BadData`, `StoreConflict`,
//! `UserResolutionFailure`, `EnforcementActionFailed`. Nothing in the engine
//! panics or raises past a scheduled task boundary; callers match on
//! `ErrorKind` to decide whether to log-and-continue or abort the pass.

use thiserror::Error;

/// The five recoverable error kinds a scheduled task distinguishes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BackendUnavailable,
    BadData,
    StoreConflict,
    UserResolutionFailure,
    EnforcementActionFailed,
}

/// Errors from the Docker inspector (container/image/event listing).
#[derive(Error, Debug)]
pub enum InspectorError {
    #[error("docker daemon unreachable: {0}")]
    Unreachable(#[from] bollard::errors::Error),

    #[error("container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("image '{id}' not found")]
    ImageNotFound { id: String },

    #[error("event collection exceeded its ceiling ({events} events / {seconds}s)")]
    CollectionCeilingHit { events: usize, seconds: f64 },

    #[error("malformed docker response: {0}")]
    BadData(String),
}

impl InspectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InspectorError::Unreachable(_)
            | InspectorError::ContainerNotFound { .. }
            | InspectorError::ImageNotFound { .. }
            | InspectorError::CollectionCeilingHit { .. } => ErrorKind::BackendUnavailable,
            InspectorError::BadData(_) => ErrorKind::BadData,
        }
    }
}

/// Errors from the Linux audit reader (`ausearch` invocation and parsing).
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("ausearch not available on this host")]
    ToolMissing,

    #[error("ausearch timed out after {0}s")]
    Timeout(u64),

    #[error("ausearch exited with status {0}")]
    NonZeroExit(i32),

    #[error("unparseable audit record: {0}")]
    BadRecord(String),

    #[error("io error invoking ausearch: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::ToolMissing | AuditError::Timeout(_) | AuditError::NonZeroExit(_) => {
                ErrorKind::BackendUnavailable
            }
            AuditError::BadRecord(_) => ErrorKind::BadData,
            AuditError::Io(_) => ErrorKind::BackendUnavailable,
        }
    }
}

/// Errors from the attribution store (sqlite-backed persistence).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("unique-key conflict on {entity} for key {key}")]
    Conflict { entity: String, key: String },

    #[error("record not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Database(_) | StoreError::Migration(_) | StoreError::NotFound(_) => {
                ErrorKind::BackendUnavailable
            }
            StoreError::Conflict { .. } => ErrorKind::StoreConflict,
        }
    }
}

/// Errors from the Redis-backed cache layer. Every call site is expected to
/// degrade to a live read on any of these, never to propagate them.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("cache backend not configured")]
    NotConfigured,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Redis(_) | CacheError::NotConfigured => ErrorKind::BackendUnavailable,
            CacheError::Decode(_) => ErrorKind::BadData,
        }
    }
}

/// Errors surfaced while resolving a uid to a host username.
#[derive(Error, Debug)]
pub enum UserResolutionError {
    #[error("uid {0} has no passwd entry")]
    UnknownUid(u32),

    #[error("username '{0}' has no passwd entry")]
    UnknownName(String),
}

impl UserResolutionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UserResolutionFailure
    }
}

/// Errors from the synchroniser phases (attribution_sync).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Inspector(#[from] InspectorError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    UserResolution(#[from] UserResolutionError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Inspector(e) => e.kind(),
            SyncError::Audit(e) => e.kind(),
            SyncError::Store(e) => e.kind(),
            SyncError::UserResolution(e) => e.kind(),
        }
    }
}

/// Errors from the enforcement pass.
#[derive(Error, Debug)]
pub enum EnforcementError {
    #[error(transparent)]
    Inspector(#[from] InspectorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to stop/remove container {container}: {message}")]
    ActionFailed { container: String, message: String },
}

impl EnforcementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnforcementError::Inspector(e) => e.kind(),
            EnforcementError::Store(e) => e.kind(),
            EnforcementError::ActionFailed { .. } => ErrorKind::EnforcementActionFailed,
        }
    }
}

/// Umbrella error for binary entry points and HTTP handlers.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Inspector(#[from] InspectorError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    UserResolution(#[from] UserResolutionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Enforcement(#[from] EnforcementError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
