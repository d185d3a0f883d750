//! Error taxonomy for the session lifecycle.

use thiserror::Error;

use crate::types::key::FactoryKey;

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the lifecycle machinery itself.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No factory under the default key. The registry was probably never
    /// initialized at startup.
    #[error("no default session factory registered; initialize the registry at startup")]
    DefaultFactoryMissing,

    /// No factory under a named key.
    #[error("no session factory registered under key `{0}`")]
    UnknownFactory(FactoryKey),

    /// A session was requested but no lifecycle listener is attached to
    /// the unit of work.
    #[error("no lifecycle listener attached to this unit of work")]
    ListenerNotConfigured,

    /// A query expected to be unique matched more than one row.
    #[error("query for `{class}` matched more than one row")]
    MultipleResults { class: &'static str },

    /// The session is already attached to another unit of work.
    #[error("session is already attached to a unit of work")]
    AlreadyAttached,

    /// An entity value could not be encoded or decoded.
    #[error("failed to decode `{class}` entity: {source}")]
    Decode {
        class: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Orm(#[from] OrmError),
}

impl SessionError {
    /// True when this is an optimistic-concurrency conflict.
    pub fn is_stale_version(&self) -> bool {
        matches!(self, SessionError::Orm(OrmError::StaleVersion { .. }))
    }
}

/// Errors surfaced by the underlying ORM session.
#[derive(Debug, Error)]
pub enum OrmError {
    #[error("session is closed")]
    SessionClosed,

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("a transaction is already active")]
    TransactionActive,

    /// Optimistic lock failure: the row changed since it was read.
    #[error("stale version for {class}#{id}: expected {expected}, found {found}")]
    StaleVersion {
        class: String,
        id: u64,
        expected: u64,
        found: u64,
    },

    #[error("storage error: {0}")]
    Backend(String),
}
