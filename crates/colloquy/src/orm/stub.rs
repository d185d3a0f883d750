//! In-memory ORM backend with transactional and identity-tracking
//! semantics. Backs the test suite and examples; not a mapping engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::types::error::OrmError;

use super::{Criteria, EntityId, FlushMode, OrmResult, OrmSession, SessionFactory};

/// Shared storage behind every session a [`StubFactory`] opens.
pub struct StubDatabase {
    tables: Mutex<HashMap<String, Table>>,
}

#[derive(Default)]
struct Table {
    rows: HashMap<EntityId, Row>,
    next_id: EntityId,
}

#[derive(Clone)]
struct Row {
    value: Value,
    version: u64,
}

impl StubDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Committed row count for a class, for test assertions.
    pub fn row_count(&self, class: &str) -> usize {
        self.lock().get(class).map_or(0, |table| table.rows.len())
    }

    /// Committed value of a row, for test assertions.
    pub fn committed(&self, class: &str, id: EntityId) -> Option<Value> {
        self.lock()
            .get(class)
            .and_then(|table| table.rows.get(&id))
            .map(|row| row.value.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Table>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn allocate_id(&self, class: &str) -> EntityId {
        let mut tables = self.lock();
        let table = tables.entry(class.to_string()).or_default();
        table.next_id += 1;
        table.next_id
    }

    fn fetch(&self, class: &str, id: EntityId) -> Option<Row> {
        self.lock()
            .get(class)
            .and_then(|table| table.rows.get(&id))
            .cloned()
    }

    fn scan(&self, class: &str) -> Vec<(EntityId, Row)> {
        self.lock().get(class).map_or_else(Vec::new, |table| {
            table
                .rows
                .iter()
                .map(|(id, row)| (*id, row.clone()))
                .collect()
        })
    }

    /// Apply a batch of writes atomically, checking optimistic versions
    /// before anything is mutated.
    fn apply(&self, writes: &[Write]) -> OrmResult<Vec<(String, EntityId, u64)>> {
        let mut tables = self.lock();
        for write in writes {
            if let Write::Update {
                class,
                id,
                expected_version,
                ..
            } = write
            {
                let found = tables
                    .get(class)
                    .and_then(|table| table.rows.get(id))
                    .map(|row| row.version)
                    .ok_or_else(|| OrmError::Backend(format!("row {class}#{id} does not exist")))?;
                if found != *expected_version {
                    return Err(OrmError::StaleVersion {
                        class: class.clone(),
                        id: *id,
                        expected: *expected_version,
                        found,
                    });
                }
            }
        }

        let mut applied = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                Write::Insert { class, id, value } => {
                    let table = tables.entry(class.clone()).or_default();
                    table.rows.insert(
                        *id,
                        Row {
                            value: value.clone(),
                            version: 1,
                        },
                    );
                    applied.push((class.clone(), *id, 1));
                }
                Write::Update {
                    class, id, value, ..
                } => {
                    if let Some(row) = tables.get_mut(class).and_then(|t| t.rows.get_mut(id)) {
                        row.value = value.clone();
                        row.version += 1;
                        applied.push((class.clone(), *id, row.version));
                    }
                }
            }
        }
        Ok(applied)
    }
}

/// Opens [`StubSession`]s over a shared [`StubDatabase`].
pub struct StubFactory {
    db: Arc<StubDatabase>,
    open_sessions: Arc<AtomicUsize>,
    fail_begins: Arc<AtomicUsize>,
}

impl std::fmt::Debug for StubFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubFactory")
            .field("open_sessions", &self.open_sessions())
            .finish_non_exhaustive()
    }
}

impl StubFactory {
    pub fn new(db: Arc<StubDatabase>) -> Arc<Self> {
        Arc::new(Self {
            db,
            open_sessions: Arc::new(AtomicUsize::new(0)),
            fail_begins: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of sessions currently open, for leak assertions.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Make the next `count` calls to `begin` on any session from this
    /// factory fail, to exercise reuse-failure paths.
    pub fn fail_next_begins(&self, count: usize) {
        self.fail_begins.store(count, Ordering::SeqCst);
    }

    pub fn database(&self) -> &Arc<StubDatabase> {
        &self.db
    }
}

impl SessionFactory for StubFactory {
    fn open_session(&self) -> OrmResult<Box<dyn OrmSession>> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSession {
            db: self.db.clone(),
            open_sessions: self.open_sessions.clone(),
            fail_begins: self.fail_begins.clone(),
            open: true,
            txn_active: false,
            flush_mode: FlushMode::Auto,
            tracked: HashMap::new(),
            pending: Vec::new(),
            staged: Vec::new(),
        }))
    }
}

enum Write {
    Insert {
        class: String,
        id: EntityId,
        value: Value,
    },
    Update {
        class: String,
        id: EntityId,
        value: Value,
        expected_version: u64,
    },
}

/// Version 0 marks an entity saved in this session but not yet committed.
struct Tracked {
    value: Value,
    version: u64,
}

/// One in-memory session: a first-level cache plus buffered writes that
/// reach the database only at commit.
pub struct StubSession {
    db: Arc<StubDatabase>,
    open_sessions: Arc<AtomicUsize>,
    fail_begins: Arc<AtomicUsize>,
    open: bool,
    txn_active: bool,
    flush_mode: FlushMode,
    tracked: HashMap<(String, EntityId), Tracked>,
    /// Changes not yet flushed; survives rollback, the way an ORM's
    /// in-memory object state does.
    pending: Vec<Write>,
    /// Flushed writes awaiting commit; discarded on rollback.
    staged: Vec<Write>,
}

impl StubSession {
    fn ensure_open(&self) -> OrmResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(OrmError::SessionClosed)
        }
    }

    fn flush_pending(&mut self) {
        for write in std::mem::take(&mut self.pending) {
            if let Write::Update {
                class, id, value, ..
            } = &write
            {
                // a later update folds into the staged write for the row
                if amend_row(&mut self.staged, class, *id, value) {
                    continue;
                }
            }
            self.staged.push(write);
        }
    }
}

impl OrmSession for StubSession {
    fn begin(&mut self) -> OrmResult<()> {
        self.ensure_open()?;
        if self.txn_active {
            return Err(OrmError::TransactionActive);
        }
        if self
            .fail_begins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(OrmError::Backend("simulated begin failure".into()));
        }
        self.txn_active = true;
        Ok(())
    }

    fn commit(&mut self) -> OrmResult<()> {
        self.ensure_open()?;
        if !self.txn_active {
            return Err(OrmError::NoActiveTransaction);
        }
        if self.flush_mode == FlushMode::Auto {
            self.flush_pending();
        }
        // a stale version leaves the transaction and staged writes as-is
        let applied = self.db.apply(&self.staged)?;
        self.staged.clear();
        self.txn_active = false;
        for (class, id, version) in applied {
            if let Some(tracked) = self.tracked.get_mut(&(class, id)) {
                tracked.version = version;
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> OrmResult<()> {
        self.ensure_open()?;
        if !self.txn_active {
            return Err(OrmError::NoActiveTransaction);
        }
        self.staged.clear();
        self.txn_active = false;
        Ok(())
    }

    fn close(&mut self) -> OrmResult<()> {
        self.ensure_open()?;
        self.open = false;
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn transaction_active(&self) -> bool {
        self.txn_active
    }

    fn set_flush_mode(&mut self, mode: FlushMode) {
        self.flush_mode = mode;
    }

    fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    fn flush(&mut self) -> OrmResult<()> {
        self.ensure_open()?;
        self.flush_pending();
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    fn get(&mut self, class: &str, id: EntityId) -> OrmResult<Option<Value>> {
        self.ensure_open()?;
        let key = (class.to_string(), id);
        if let Some(tracked) = self.tracked.get(&key) {
            return Ok(Some(tracked.value.clone()));
        }
        match self.db.fetch(class, id) {
            Some(row) => {
                self.tracked.insert(
                    key,
                    Tracked {
                        value: row.value.clone(),
                        version: row.version,
                    },
                );
                Ok(Some(row.value))
            }
            None => Ok(None),
        }
    }

    fn save(&mut self, class: &str, value: Value) -> OrmResult<EntityId> {
        self.ensure_open()?;
        let id = self.db.allocate_id(class);
        self.tracked.insert(
            (class.to_string(), id),
            Tracked {
                value: value.clone(),
                version: 0,
            },
        );
        self.pending.push(Write::Insert {
            class: class.to_string(),
            id,
            value,
        });
        Ok(id)
    }

    fn update(&mut self, class: &str, id: EntityId, value: Value) -> OrmResult<()> {
        self.ensure_open()?;
        let key = (class.to_string(), id);
        let expected_version = match self.tracked.get(&key) {
            Some(tracked) => tracked.version,
            None => self
                .db
                .fetch(class, id)
                .map(|row| row.version)
                .ok_or_else(|| OrmError::Backend(format!("row {class}#{id} does not exist")))?,
        };
        if expected_version == 0 {
            // still an uncommitted insert: amend it in place
            if !amend_row(&mut self.pending, class, id, &value)
                && !amend_row(&mut self.staged, class, id, &value)
            {
                // the insert was discarded by a rollback after a flush;
                // queue it again so the tracked object is not lost
                self.pending.push(Write::Insert {
                    class: class.to_string(),
                    id,
                    value: value.clone(),
                });
            }
        } else if !amend_row(&mut self.pending, class, id, &value) {
            self.pending.push(Write::Update {
                class: class.to_string(),
                id,
                value: value.clone(),
                expected_version,
            });
        }
        self.tracked.insert(
            key,
            Tracked {
                value,
                version: expected_version,
            },
        );
        Ok(())
    }

    fn contains(&self, class: &str, value: &Value) -> Option<EntityId> {
        self.tracked
            .iter()
            .find(|((c, _), tracked)| c == class && &tracked.value == value)
            .map(|((_, id), _)| *id)
    }

    fn find_matching(
        &mut self,
        class: &str,
        criteria: &Criteria,
    ) -> OrmResult<Vec<(EntityId, Value)>> {
        self.ensure_open()?;
        let mut matches: Vec<(EntityId, Value)> = self
            .tracked
            .iter()
            .filter(|((c, _), tracked)| c == class && criteria.matches(&tracked.value))
            .map(|((_, id), tracked)| (*id, tracked.value.clone()))
            .collect();
        for (id, row) in self.db.scan(class) {
            if !self.tracked.contains_key(&(class.to_string(), id)) && criteria.matches(&row.value)
            {
                matches.push((id, row.value));
            }
        }
        matches.sort_by_key(|(id, _)| *id);
        Ok(matches)
    }

    fn version_of(&mut self, class: &str, id: EntityId) -> OrmResult<Option<u64>> {
        self.ensure_open()?;
        if let Some(tracked) = self.tracked.get(&(class.to_string(), id)) {
            return Ok((tracked.version > 0).then_some(tracked.version));
        }
        Ok(self.db.fetch(class, id).map(|row| row.version))
    }
}

impl Drop for StubSession {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Rewrite the buffered value for a row, if a write for it exists.
fn amend_row(writes: &mut [Write], class: &str, id: EntityId, value: &Value) -> bool {
    for write in writes.iter_mut() {
        match write {
            Write::Insert {
                class: c,
                id: i,
                value: v,
            }
            | Write::Update {
                class: c,
                id: i,
                value: v,
                ..
            } => {
                if c == class && *i == id {
                    *v = value.clone();
                    return true;
                }
            }
        }
    }
    false
}
