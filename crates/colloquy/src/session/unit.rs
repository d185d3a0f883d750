//! The unit of work: per-request session bindings and the accessor surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::lifecycle::LifecycleListener;
use crate::registry::SessionFactoryRegistry;
use crate::session::SharedSession;
use crate::types::{FactoryKey, SessionError, SessionResult};
use crate::workflow::WorkflowTarget;

/// Per-unit-of-work state the lifecycle listener operates on: the keyed
/// session bindings, the set of keys opened so far, and the workflow
/// target the request is headed for.
pub struct UowState {
    id: Uuid,
    registry: Arc<SessionFactoryRegistry>,
    bindings: HashMap<FactoryKey, SharedSession>,
    opened: HashSet<FactoryKey>,
    target: WorkflowTarget,
}

impl UowState {
    fn new(registry: Arc<SessionFactoryRegistry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            bindings: HashMap::new(),
            opened: HashSet::new(),
            target: WorkflowTarget::None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &SessionFactoryRegistry {
        &self.registry
    }

    /// Bind a session for `key`, making this unit of work its owner.
    pub fn bind(&mut self, key: FactoryKey, session: SharedSession) -> SessionResult<()> {
        session.attach()?;
        if let Some(old) = self.bindings.insert(key, session) {
            old.detach();
        }
        Ok(())
    }

    /// Remove and detach the binding for `key`.
    pub fn unbind(&mut self, key: &FactoryKey) -> Option<SharedSession> {
        let session = self.bindings.remove(key);
        if let Some(session) = &session {
            session.detach();
        }
        session
    }

    pub fn bound(&self, key: &FactoryKey) -> Option<SharedSession> {
        self.bindings.get(key).cloned()
    }

    pub fn is_bound(&self, key: &FactoryKey) -> bool {
        self.bindings.contains_key(key)
    }

    /// Record that a session was opened for `key` during this unit of work.
    pub fn record_opened(&mut self, key: &FactoryKey) {
        self.opened.insert(key.clone());
    }

    /// Snapshot of the keys opened so far, in a stable order.
    pub fn opened_keys(&self) -> Vec<FactoryKey> {
        let mut keys: Vec<_> = self.opened.iter().cloned().collect();
        keys.sort_by_key(|key| key.to_string());
        keys
    }

    pub fn clear_opened(&mut self) {
        self.opened.clear();
    }

    pub fn target(&self) -> &WorkflowTarget {
        &self.target
    }

    pub fn set_target(&mut self, target: WorkflowTarget) {
        self.target = target;
    }
}

/// One request's (or equivalent task's) unit of work.
///
/// Sessions open lazily on first access through the attached lifecycle
/// listener, and are unwound when the unit of work ends. Concurrent
/// requests each get their own `UnitOfWork` over the shared registry.
pub struct UnitOfWork {
    state: UowState,
    listener: Option<Arc<dyn LifecycleListener>>,
}

impl UnitOfWork {
    /// Start a unit of work with no lifecycle listener. `current_session`
    /// will refuse to open sessions; [`UnitOfWork::with_session`] still
    /// works for out-of-band tasks.
    pub fn new(registry: Arc<SessionFactoryRegistry>) -> Self {
        Self {
            state: UowState::new(registry),
            listener: None,
        }
    }

    /// Start a unit of work managed by `listener`.
    pub fn with_listener(
        registry: Arc<SessionFactoryRegistry>,
        listener: Arc<dyn LifecycleListener>,
    ) -> Self {
        let mut uow = Self::new(registry);
        listener.on_unit_of_work_start(&mut uow.state);
        tracing::debug!(uow = %uow.state.id(), "unit of work started");
        uow.listener = Some(listener);
        uow
    }

    /// Tell the lifecycle machinery where this request is headed.
    pub fn set_target(&mut self, target: WorkflowTarget) {
        self.state.set_target(target);
    }

    /// The session bound for `key`, opening one through the lifecycle
    /// listener on first access.
    pub fn current_session(&mut self, key: &FactoryKey) -> SessionResult<SharedSession> {
        if let Some(session) = self.state.bound(key) {
            return Ok(session);
        }
        let listener = self
            .listener
            .clone()
            .ok_or(SessionError::ListenerNotConfigured)?;
        listener.on_session_requested(&mut self.state, key)
    }

    /// True iff a session is currently bound for `key`.
    pub fn has_bound_session(&self, key: &FactoryKey) -> bool {
        self.state.is_bound(key)
    }

    /// End the unit of work normally. Uncommitted transactions are rolled
    /// back and every opened session is closed and unbound; commits must
    /// have happened explicitly (see [`crate::commit::commit_if_valid`]).
    pub fn end(&mut self) -> SessionResult<()> {
        match self.listener.clone() {
            Some(listener) => listener.on_unit_of_work_end(&mut self.state),
            None => Ok(()),
        }
    }

    /// Clean up after a failure mid-unit-of-work. The triggering error is
    /// the caller's to propagate; cleanup failures are only logged, so the
    /// first error wins.
    pub fn recover(&mut self) {
        if let Some(listener) = self.listener.clone() {
            tracing::debug!(uow = %self.state.id(), "recovering unit of work after error");
            listener.on_unit_of_work_error(&mut self.state);
        }
    }

    /// Run a request body with guaranteed cleanup: [`UnitOfWork::end`] on
    /// success, [`UnitOfWork::recover`] on error.
    pub fn scope<R>(
        &mut self,
        f: impl FnOnce(&mut UnitOfWork) -> SessionResult<R>,
    ) -> SessionResult<R> {
        match f(self) {
            Ok(value) => {
                self.end()?;
                Ok(value)
            }
            Err(err) => {
                self.recover();
                Err(err)
            }
        }
    }

    /// Run `f` with a guaranteed usable session for `key`.
    ///
    /// Reuses the bound session when one exists; the caller remains
    /// responsible for committing. Otherwise opens a short-lived session
    /// and transaction, and whatever `f` does, the transaction is rolled
    /// back and the session closed before this returns. Intended for work
    /// outside a normal unit of work, such as startup tasks.
    pub fn with_session<R>(
        &mut self,
        key: &FactoryKey,
        f: impl FnOnce(&SharedSession) -> SessionResult<R>,
    ) -> SessionResult<R> {
        if let Some(session) = self.state.bound(key) {
            return f(&session);
        }
        let factory = self.state.registry().lookup(key)?;
        let session = SharedSession::new(factory.open_session()?);
        let _guard = TempSession {
            session: session.clone(),
        };
        session.begin()?;
        f(&session)
    }
}

/// Drop guard for temporary sessions: rollback-if-active then close on
/// every exit path, including panics.
struct TempSession {
    session: SharedSession,
}

impl Drop for TempSession {
    fn drop(&mut self) {
        if !self.session.is_open() {
            return;
        }
        if let Err(e) = self.session.rollback_if_active() {
            tracing::warn!("failed to roll back temporary session: {e}");
        }
        if let Err(e) = self.session.close() {
            tracing::warn!("failed to close temporary session: {e}");
        }
    }
}
