//! Transactional commit helper for form submissions.

use crate::orm::OrmSession;
use crate::session::SharedSession;
use crate::types::{SessionError, SessionResult};

/// Message recorded on the validation outcome when a commit hits an
/// optimistic-concurrency conflict.
pub const VERSION_MISMATCH: &str = "version mismatch: this record was changed by someone else";

/// Validation outcome of a form submission. Stands in for the hosting
/// form framework, which is outside this crate.
#[derive(Debug, Default)]
pub struct Validation {
    errors: Vec<String>,
}

impl Validation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user-visible validation error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Result of [`commit_if_valid`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Pending changes were flushed and committed, and a new transaction
    /// is active on the same session.
    Committed,
    /// Validation errors were present; nothing was touched.
    SkippedInvalid,
    /// The commit hit a stale version, recorded on the validation value.
    /// The transaction is left in whatever state the ORM left it; do not
    /// assume a new transaction was begun.
    Conflict,
}

/// Flush and commit the session's transaction when validation passed,
/// then immediately begin a new transaction so the session stays usable
/// without a fresh bind.
///
/// The flush is required for conversation sessions, which never flush on
/// their own; it is harmless otherwise. `before_commit` runs after the
/// flush, against the same session.
pub fn commit_if_valid(
    session: &SharedSession,
    validation: &mut Validation,
    before_commit: impl FnOnce(&mut dyn OrmSession) -> SessionResult<()>,
) -> SessionResult<CommitOutcome> {
    if validation.has_errors() {
        return Ok(CommitOutcome::SkippedInvalid);
    }

    if let Err(e) = session.flush() {
        return conflict_or(e.into(), validation);
    }
    session.with(|s| before_commit(s))?;
    if let Err(e) = session.commit() {
        return conflict_or(e.into(), validation);
    }
    session.begin()?;
    tracing::debug!("transaction committed, new transaction begun");
    Ok(CommitOutcome::Committed)
}

fn conflict_or(
    err: SessionError,
    validation: &mut Validation,
) -> SessionResult<CommitOutcome> {
    if err.is_stale_version() {
        tracing::info!("optimistic conflict on commit: {err}");
        validation.error(VERSION_MISMATCH);
        Ok(CommitOutcome::Conflict)
    } else {
        Err(err)
    }
}
