//! Base lifecycle listener: one session and transaction per request.

use crate::session::{SharedSession, UowState};
use crate::types::{FactoryKey, SessionResult};

use super::{open_bound_session, rollback_and_close, LifecycleListener};

/// Opens sessions and transactions as required and closes them at the end
/// of the unit of work. Uncommitted transactions are rolled back; commits
/// must be explicit (see [`crate::commit::commit_if_valid`]).
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLifecycle;

impl RequestLifecycle {
    pub fn new() -> Self {
        Self
    }
}

impl LifecycleListener for RequestLifecycle {
    fn on_session_requested(
        &self,
        state: &mut UowState,
        key: &FactoryKey,
    ) -> SessionResult<SharedSession> {
        open_bound_session(state, key)
    }

    fn on_unit_of_work_end(&self, state: &mut UowState) -> SessionResult<()> {
        let mut first_error = None;
        for key in state.opened_keys() {
            let Some(session) = state.unbind(&key) else {
                continue;
            };
            if let Err(e) = rollback_and_close(&session, &key) {
                tracing::error!(key = %key, "failed to close session: {e}");
                first_error.get_or_insert(e);
            }
        }
        state.clear_opened();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn on_unit_of_work_error(&self, state: &mut UowState) {
        // same unwind, but an error is already in flight: everything here
        // is logged, nothing propagates; the next access reopens lazily
        for key in state.opened_keys() {
            let Some(session) = state.unbind(&key) else {
                continue;
            };
            if let Err(e) = rollback_and_close(&session, &key) {
                tracing::warn!(key = %key, "cleanup after error failed: {e}");
            }
        }
        state.clear_opened();
    }
}
