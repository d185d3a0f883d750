//! Concurrent units of work over shared factories.
//!
//! Tests verify that simultaneous requests get independent session
//! bindings, and that a stored conversation can only be claimed by one
//! unit of work at a time.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Barrier;

use colloquy::orm::stub::{StubDatabase, StubFactory};
use colloquy::workflow::{ConversationHandle, WorkflowScope, WorkflowTarget};
use colloquy::{
    ConversationLifecycle, FactoryKey, RequestLifecycle, SessionError, SessionFactoryRegistry,
    UnitOfWork,
};

// ─── Helpers ───────────────────────────────────────────────────────────────

fn stub_registry() -> (Arc<SessionFactoryRegistry>, Arc<StubFactory>) {
    let factory = StubFactory::new(StubDatabase::new());
    let mut registry = SessionFactoryRegistry::new();
    registry.register(FactoryKey::Default, factory.clone());
    (Arc::new(registry), factory)
}

#[derive(Default)]
struct WizardPage {
    handle: ConversationHandle,
}

impl WorkflowScope for WizardPage {
    fn conversation(&self) -> Option<&ConversationHandle> {
        Some(&self.handle)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────

/// Concurrent requests get independent bindings over the shared registry.
#[tokio::test]
async fn concurrent_units_of_work_bind_independently() {
    let (registry, factory) = stub_registry();
    let barrier = Arc::new(Barrier::new(5));
    let mut handles = vec![];

    for worker in 0..5u32 {
        let registry = registry.clone();
        let barrier = barrier.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await; // Synchronize start

            let mut uow =
                UnitOfWork::with_listener(registry, Arc::new(RequestLifecycle::new()));
            let session = uow.current_session(&FactoryKey::Default).unwrap();
            assert!(session.transaction_active());
            session
                .with(|s| s.save("Note", json!({"worker": worker})))
                .unwrap();
            uow.end().unwrap();

            worker
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    // every unit of work unwound its own session, nothing was committed
    assert_eq!(factory.open_sessions(), 0);
    assert_eq!(factory.database().row_count("Note"), 0);
}

/// Two units of work racing for one stored conversation: exactly one wins.
#[tokio::test]
async fn conversation_claim_is_exclusive() {
    let (registry, _factory) = stub_registry();
    let page = Arc::new(WizardPage::default());

    // seed the page with a dirty stored session
    {
        let mut uow = UnitOfWork::with_listener(
            registry.clone(),
            Arc::new(ConversationLifecycle::new()),
        );
        uow.set_target(WorkflowTarget::Active(page.clone()));
        let session = uow.current_session(&FactoryKey::Default).unwrap();
        session
            .with(|s| s.save("Note", json!({"body": "pending"})))
            .unwrap();
        uow.end().unwrap();
    }

    let start = Arc::new(Barrier::new(2));
    let attempted = Arc::new(Barrier::new(2));
    let mut handles = vec![];

    for _ in 0..2 {
        let registry = registry.clone();
        let page = page.clone();
        let start = start.clone();
        let attempted = attempted.clone();

        handles.push(tokio::spawn(async move {
            let mut uow = UnitOfWork::with_listener(
                registry,
                Arc::new(ConversationLifecycle::new()),
            );
            uow.set_target(WorkflowTarget::Active(page));

            start.wait().await;
            let claim = uow.current_session(&FactoryKey::Default);
            // hold the claim until both tabs have tried
            attempted.wait().await;

            match claim {
                Ok(_) => {
                    uow.end().unwrap();
                    true
                }
                Err(err) => {
                    assert!(matches!(err, SessionError::AlreadyAttached));
                    false
                }
            }
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1, "exactly one tab should claim the conversation");
}
