//! Test fixtures: stub-backed registries, pages, and entities.
#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use colloquy::orm::stub::{StubDatabase, StubFactory};
use colloquy::orm::SessionFactory;
use colloquy::workflow::{ConversationHandle, WorkflowScope};
use colloquy::{FactoryKey, Persistent, SessionFactoryRegistry};

/// Registry with a single stub factory under the default key.
pub fn stub_registry() -> (Arc<SessionFactoryRegistry>, Arc<StubFactory>) {
    let factory = StubFactory::new(StubDatabase::new());
    let mut registry = SessionFactoryRegistry::new();
    registry.register(FactoryKey::Default, factory.clone());
    (Arc::new(registry), factory)
}

/// Insert and commit a row directly, outside any unit of work.
pub fn seed_row(factory: &StubFactory, class: &str, value: Value) -> u64 {
    let mut session = factory.open_session().expect("Failed to open session");
    session.begin().expect("Failed to begin transaction");
    let id = session.save(class, value).expect("Failed to save row");
    session.commit().expect("Failed to commit seed row");
    session.close().expect("Failed to close session");
    id
}

/// A page that takes part in conversations.
#[derive(Default)]
pub struct ConversationPage {
    handle: ConversationHandle,
}

impl ConversationPage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handle(&self) -> &ConversationHandle {
        &self.handle
    }
}

impl WorkflowScope for ConversationPage {
    fn conversation(&self) -> Option<&ConversationHandle> {
        Some(&self.handle)
    }
}

/// A page with no conversation support.
#[derive(Default)]
pub struct PlainPage;

impl PlainPage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl WorkflowScope for PlainPage {}

/// Versioned entity used across the test suite.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Ticket {
    pub title: String,
    pub status: String,
}

impl Persistent for Ticket {
    fn entity_class() -> &'static str {
        "Ticket"
    }
}
