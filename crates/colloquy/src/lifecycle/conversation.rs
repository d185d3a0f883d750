//! Conversational lifecycle listener: sessions that span requests.

use std::time::Duration;

use chrono::Utc;

use crate::config::LifecycleConfig;
use crate::orm::FlushMode;
use crate::session::{SharedSession, UowState};
use crate::types::{FactoryKey, SessionResult};
use crate::workflow::{ConversationHandle, WorkflowTarget};

use super::{open_bound_session, rollback_and_close, LifecycleListener};

/// Extends the per-request lifecycle with long conversations.
///
/// A conversation-aware workflow context keeps its session, and any
/// unflushed changes, across requests until an explicit commit leaves
/// nothing left to track. Conversation sessions run in manual flush mode,
/// so intermediate requests never write to storage.
#[derive(Debug, Default)]
pub struct ConversationLifecycle {
    idle_timeout: Option<Duration>,
}

impl ConversationLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `[conversation]` settings from configuration.
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            idle_timeout: config.conversation.idle_timeout(),
        }
    }

    /// The stored session for `key`, discarding it first when it has sat
    /// idle past the configured limit.
    fn stored_session(
        &self,
        handle: &ConversationHandle,
        key: &FactoryKey,
    ) -> Option<SharedSession> {
        let session = handle.get(key)?;
        if let (Some(limit), Some(last_used)) = (self.idle_timeout, handle.last_used(key)) {
            let idle = Utc::now().signed_duration_since(last_used);
            if idle.to_std().is_ok_and(|idle| idle > limit) {
                tracing::info!(
                    key = %key,
                    "discarding conversation session idle for {}s",
                    idle.num_seconds()
                );
                if session.is_open() {
                    if let Err(e) = rollback_and_close(&session, key) {
                        tracing::warn!(key = %key, "failed to close expired conversation session: {e}");
                    }
                }
                handle.set(key, None);
                return None;
            }
        }
        Some(session)
    }
}

impl LifecycleListener for ConversationLifecycle {
    fn on_session_requested(
        &self,
        state: &mut UowState,
        key: &FactoryKey,
    ) -> SessionResult<SharedSession> {
        match state.target().clone() {
            // destination not instantiated yet: open eagerly so entity
            // loads within this request already see a consistent view
            WorkflowTarget::Pending { conversational } => {
                let session = open_bound_session(state, key)?;
                if conversational {
                    session.set_flush_mode(FlushMode::Manual);
                }
                Ok(session)
            }
            WorkflowTarget::Active(scope) => {
                let Some(handle) = scope.conversation() else {
                    // plain context: standard per-request session
                    return open_bound_session(state, key);
                };
                if let Some(session) = self.stored_session(handle, key) {
                    if session.is_open() {
                        state.bind(key.clone(), session.clone())?;
                        match session.begin() {
                            Ok(()) => {
                                state.record_opened(key);
                                handle.set(key, Some(session.clone()));
                                tracing::debug!(
                                    uow = %state.id(), key = %key,
                                    "resumed conversation session"
                                );
                                return Ok(session);
                            }
                            Err(e) => {
                                state.unbind(key);
                                tracing::warn!(
                                    key = %key,
                                    "could not restart conversation session, opening new: {e}"
                                );
                            }
                        }
                    }
                }
                let session = open_bound_session(state, key)?;
                session.set_flush_mode(FlushMode::Manual);
                handle.set(key, Some(session.clone()));
                Ok(session)
            }
            WorkflowTarget::None => open_bound_session(state, key),
        }
    }

    fn on_unit_of_work_end(&self, state: &mut UowState) -> SessionResult<()> {
        let target = state.target().clone();
        let handle = match &target {
            WorkflowTarget::Active(scope) => scope.conversation(),
            _ => None,
        };

        let mut first_error = None;
        for key in state.opened_keys() {
            let Some(session) = state.unbind(&key) else {
                continue;
            };
            // an open transaction at request end is never committed
            // implicitly; only an explicit earlier commit counts
            let transaction_committed = if session.transaction_active() {
                if let Err(e) = session.rollback() {
                    tracing::warn!(key = %key, "rollback failed: {e}");
                }
                false
            } else {
                true
            };

            match handle {
                Some(handle) => {
                    if transaction_committed && !session.is_dirty() {
                        // nothing left to track: the conversation ends
                        if let Err(e) = session.close() {
                            tracing::error!(key = %key, "failed to close conversation session: {e}");
                            first_error.get_or_insert(e.into());
                        }
                        handle.set(&key, None);
                    } else {
                        handle.set(&key, Some(session));
                    }
                }
                None => {
                    if session.is_open() {
                        if let Err(e) = session.close() {
                            tracing::error!(key = %key, "failed to close session: {e}");
                            first_error.get_or_insert(e.into());
                        }
                    }
                }
            }
        }
        state.clear_opened();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn on_unit_of_work_error(&self, state: &mut UowState) {
        for key in state.opened_keys() {
            if let Some(session) = state.unbind(&key) {
                if let Err(e) = rollback_and_close(&session, &key) {
                    tracing::warn!(key = %key, "cleanup after error failed: {e}");
                }
            }
            // reopen inline so unrelated work later in the failed unit of
            // work still finds a usable session
            if let Err(e) = open_bound_session(state, &key) {
                tracing::error!(key = %key, "failed to reopen session after error: {e}");
            }
        }
    }
}
