//! The opaque ORM surface the lifecycle machinery drives.
//!
//! The real mapping engine lives outside this crate. These traits are the
//! minimal contract it must expose: open sessions, run one transaction at
//! a time, flush pending changes, and track entity identity. The [`stub`]
//! module provides an in-memory implementation for tests and examples.

pub mod stub;

use serde_json::Value;

use crate::types::error::OrmError;

/// Identifier assigned to a persisted entity.
pub type EntityId = u64;

pub type OrmResult<T> = Result<T, OrmError>;

/// Controls whether pending changes reach the transaction without an
/// explicit flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlushMode {
    #[default]
    Auto,
    /// Changes accumulate in the session until [`OrmSession::flush`] is
    /// called. Conversation sessions run in this mode so nothing reaches
    /// storage before the final commit.
    Manual,
}

/// Conjunction of field-equality restrictions, for unique lookups.
#[derive(Clone, Debug, Default)]
pub struct Criteria {
    restrictions: Vec<(String, Value)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.restrictions.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, value: &Value) -> bool {
        self.restrictions
            .iter()
            .all(|(field, expected)| value.get(field) == Some(expected))
    }

    pub fn is_empty(&self) -> bool {
        self.restrictions.is_empty()
    }
}

/// Source of ORM sessions for one database.
pub trait SessionFactory: Send + Sync + std::fmt::Debug {
    fn open_session(&self) -> OrmResult<Box<dyn OrmSession>>;
}

/// One ORM session: an identity-tracking cache plus at most one active
/// transaction at a time.
///
/// A session whose transaction was committed or rolled back must either
/// be closed or have a new transaction begun before further use.
pub trait OrmSession: Send {
    fn begin(&mut self) -> OrmResult<()>;
    /// Commit the active transaction. May fail with
    /// [`OrmError::StaleVersion`] when a row changed under us.
    fn commit(&mut self) -> OrmResult<()>;
    fn rollback(&mut self) -> OrmResult<()>;
    fn close(&mut self) -> OrmResult<()>;

    fn is_open(&self) -> bool;
    fn transaction_active(&self) -> bool;

    fn set_flush_mode(&mut self, mode: FlushMode);
    fn flush_mode(&self) -> FlushMode;
    /// Push pending changes into the current transaction.
    fn flush(&mut self) -> OrmResult<()>;
    /// True while the session holds changes that have not been flushed.
    fn is_dirty(&self) -> bool;

    fn get(&mut self, class: &str, id: EntityId) -> OrmResult<Option<Value>>;
    fn save(&mut self, class: &str, value: Value) -> OrmResult<EntityId>;
    fn update(&mut self, class: &str, id: EntityId, value: Value) -> OrmResult<()>;
    /// Identifier of a tracked entity equal to `value`, if any.
    fn contains(&self, class: &str, value: &Value) -> Option<EntityId>;
    fn find_matching(&mut self, class: &str, criteria: &Criteria)
        -> OrmResult<Vec<(EntityId, Value)>>;
    /// Optimistic-lock version of a persisted entity.
    fn version_of(&mut self, class: &str, id: EntityId) -> OrmResult<Option<u64>>;
}
