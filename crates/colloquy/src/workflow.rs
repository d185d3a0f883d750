//! Workflow-context contract: conversation capability and cross-request
//! session storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::session::SharedSession;
use crate::types::FactoryKey;

/// Where the current unit of work is headed.
#[derive(Clone, Default)]
pub enum WorkflowTarget {
    /// Nothing known about the destination.
    #[default]
    None,
    /// The destination is known by type only; it has not been
    /// instantiated yet.
    Pending { conversational: bool },
    /// The destination context is live.
    Active(Arc<dyn WorkflowScope>),
}

/// Capability surface of a workflow context, typically a page.
///
/// Contexts that keep a session alive across requests return their
/// [`ConversationHandle`]; everything else takes the default. The
/// lifecycle dispatches on the presence of the handle, never on the
/// concrete context type.
pub trait WorkflowScope: Send + Sync {
    fn conversation(&self) -> Option<&ConversationHandle> {
        None
    }
}

/// Cross-request session storage owned by one long-lived workflow context.
///
/// Created empty; the conversational lifecycle populates it on first
/// access and clears it when the conversation ends naturally. A dirty,
/// uncommitted conversation stays alive indefinitely by design; use
/// [`ConversationHandle::abandon`] or the configured idle timeout to
/// bound its lifetime.
#[derive(Default)]
pub struct ConversationHandle {
    slots: Mutex<HashMap<FactoryKey, Slot>>,
}

struct Slot {
    session: SharedSession,
    last_used: DateTime<Utc>,
}

impl ConversationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored session for `key`, if any.
    pub fn get(&self, key: &FactoryKey) -> Option<SharedSession> {
        self.lock().get(key).map(|slot| slot.session.clone())
    }

    /// Store or clear the session for `key`.
    pub fn set(&self, key: &FactoryKey, session: Option<SharedSession>) {
        let mut slots = self.lock();
        match session {
            Some(session) => {
                slots.insert(
                    key.clone(),
                    Slot {
                        session,
                        last_used: Utc::now(),
                    },
                );
            }
            None => {
                slots.remove(key);
            }
        }
    }

    /// When the session for `key` was last stored.
    pub fn last_used(&self, key: &FactoryKey) -> Option<DateTime<Utc>> {
        self.lock().get(key).map(|slot| slot.last_used)
    }

    /// Roll back and close every stored session and clear the slots: the
    /// explicit way out of a conversation that will never commit.
    pub fn abandon(&self) {
        let slots: Vec<Slot> = self.lock().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if !slot.session.is_open() {
                continue;
            }
            if let Err(e) = slot.session.rollback_if_active() {
                tracing::warn!("failed to roll back abandoned conversation session: {e}");
            }
            if let Err(e) = slot.session.close() {
                tracing::warn!("failed to close abandoned conversation session: {e}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FactoryKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
