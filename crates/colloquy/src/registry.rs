//! Registry of keyed session factories.

use std::collections::HashMap;
use std::sync::Arc;

use crate::orm::SessionFactory;
use crate::types::{FactoryKey, SessionError, SessionResult};

/// Maps factory keys to the session factories the hosting application
/// registered at startup.
///
/// Build it once, then share it read-only behind an `Arc`. Per-request
/// state never lives here; it belongs to the unit of work.
#[derive(Default)]
pub struct SessionFactoryRegistry {
    factories: HashMap<FactoryKey, Arc<dyn SessionFactory>>,
}

impl SessionFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `key`, replacing any existing entry.
    /// Re-registration is allowed for re-initialization.
    pub fn register(&mut self, key: FactoryKey, factory: Arc<dyn SessionFactory>) {
        if self.factories.insert(key.clone(), factory).is_some() {
            tracing::info!(key = %key, "replaced session factory");
        }
    }

    /// The factory registered under `key`.
    pub fn lookup(&self, key: &FactoryKey) -> SessionResult<Arc<dyn SessionFactory>> {
        self.factories.get(key).cloned().ok_or_else(|| match key {
            FactoryKey::Default => SessionError::DefaultFactoryMissing,
            FactoryKey::Named(_) => SessionError::UnknownFactory(key.clone()),
        })
    }

    pub fn contains(&self, key: &FactoryKey) -> bool {
        self.factories.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
