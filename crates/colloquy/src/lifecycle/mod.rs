//! Unit-of-work lifecycle listeners.

pub mod conversation;
pub mod request;

pub use conversation::ConversationLifecycle;
pub use request::RequestLifecycle;

use crate::session::{SharedSession, UowState};
use crate::types::{FactoryKey, SessionResult};

/// Contract between the hosting runtime and the session lifecycle.
///
/// The runtime calls these at well-defined points: unit-of-work start,
/// first data access per key, normal end, and exceptional end.
pub trait LifecycleListener: Send + Sync {
    fn on_unit_of_work_start(&self, _state: &mut UowState) {}

    /// A session was requested for `key` and none is bound yet. Must
    /// leave a bound session behind and return it.
    fn on_session_requested(
        &self,
        state: &mut UowState,
        key: &FactoryKey,
    ) -> SessionResult<SharedSession>;

    /// Normal completion: unwind every opened key. Uncommitted
    /// transactions are rolled back.
    fn on_unit_of_work_end(&self, state: &mut UowState) -> SessionResult<()>;

    /// Exceptional completion: clean up so the triggering error can
    /// propagate and later work in the same unit of work still finds a
    /// usable session. Cleanup failures must not mask the original error.
    fn on_unit_of_work_error(&self, state: &mut UowState);
}

/// Open a session from the keyed factory, begin a transaction, bind it to
/// the unit of work, and record the key: the shared first-access step of
/// every listener.
pub fn open_bound_session(state: &mut UowState, key: &FactoryKey) -> SessionResult<SharedSession> {
    let factory = state.registry().lookup(key)?;
    let session = SharedSession::new(factory.open_session()?);
    if let Err(e) = session.begin() {
        if let Err(close_err) = session.close() {
            tracing::warn!(key = %key, "failed to close session after begin failure: {close_err}");
        }
        return Err(e.into());
    }
    if let Err(e) = state.bind(key.clone(), session.clone()) {
        if let Err(cleanup_err) = session.rollback_if_active().and_then(|_| session.close()) {
            tracing::warn!(key = %key, "failed to discard unbindable session: {cleanup_err}");
        }
        return Err(e);
    }
    state.record_opened(key);
    tracing::debug!(uow = %state.id(), key = %key, "opened session");
    Ok(session)
}

/// Roll back any active transaction, then close the session. Rollback
/// failures are logged and do not prevent the close.
pub(crate) fn rollback_and_close(session: &SharedSession, key: &FactoryKey) -> SessionResult<()> {
    if !session.is_open() {
        return Ok(());
    }
    if session.transaction_active() {
        tracing::debug!(key = %key, "rolling back uncommitted transaction");
        if let Err(e) = session.rollback() {
            tracing::warn!(key = %key, "rollback failed: {e}");
        }
    }
    session.close()?;
    Ok(())
}
