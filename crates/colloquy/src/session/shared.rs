//! Shared session wrapper with single-owner attachment tracking.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::orm::{FlushMode, OrmResult, OrmSession};
use crate::types::{SessionError, SessionResult};

/// A session handle that can outlive one unit of work.
///
/// The wrapper is shared between the lifecycle listener (for the duration
/// of one request) and a
/// [`ConversationHandle`](crate::workflow::ConversationHandle) (between
/// requests). The attached flag marks which side currently owns it:
/// exactly one unit of work may have it bound at a time, and a second
/// binding attempt fails with [`SessionError::AlreadyAttached`].
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Cell>>,
}

impl fmt::Debug for SharedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSession")
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

struct Cell {
    session: Box<dyn OrmSession>,
    attached: bool,
}

impl SharedSession {
    pub(crate) fn new(session: Box<dyn OrmSession>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cell {
                session,
                attached: false,
            })),
        }
    }

    /// Run `f` against the underlying ORM session.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn OrmSession) -> R) -> R {
        let mut cell = self.lock();
        f(cell.session.as_mut())
    }

    /// True when both handles refer to the same session.
    pub fn same(&self, other: &SharedSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach(&self) -> SessionResult<()> {
        let mut cell = self.lock();
        if cell.attached {
            return Err(SessionError::AlreadyAttached);
        }
        cell.attached = true;
        Ok(())
    }

    pub(crate) fn detach(&self) {
        self.lock().attached = false;
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub fn begin(&self) -> OrmResult<()> {
        self.with(|s| s.begin())
    }

    pub fn commit(&self) -> OrmResult<()> {
        self.with(|s| s.commit())
    }

    pub fn rollback(&self) -> OrmResult<()> {
        self.with(|s| s.rollback())
    }

    /// Roll back the transaction if one is active.
    pub fn rollback_if_active(&self) -> OrmResult<()> {
        self.with(|s| {
            if s.transaction_active() {
                s.rollback()
            } else {
                Ok(())
            }
        })
    }

    pub fn close(&self) -> OrmResult<()> {
        self.with(|s| s.close())
    }

    pub fn flush(&self) -> OrmResult<()> {
        self.with(|s| s.flush())
    }

    pub fn is_open(&self) -> bool {
        self.with(|s| s.is_open())
    }

    pub fn transaction_active(&self) -> bool {
        self.with(|s| s.transaction_active())
    }

    pub fn is_dirty(&self) -> bool {
        self.with(|s| s.is_dirty())
    }

    pub fn set_flush_mode(&self, mode: FlushMode) {
        self.with(|s| s.set_flush_mode(mode));
    }

    fn lock(&self) -> MutexGuard<'_, Cell> {
        // a panicked unit of work must still be able to roll back and close
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
