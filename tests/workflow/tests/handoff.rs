//! Sequential request handoff: a wizard-style edit conversation.
//!
//! Simulates a multi-step workflow where every request revises the same
//! pending entity and nothing reaches storage until the final commit.

use std::sync::Arc;

use serde_json::json;

use colloquy::workflow::{ConversationHandle, WorkflowScope, WorkflowTarget};
use colloquy::{ConversationLifecycle, FactoryKey, SessionFactoryRegistry, UnitOfWork};

use colloquy::orm::stub::{StubDatabase, StubFactory};

#[derive(Default)]
struct WizardPage {
    handle: ConversationHandle,
}

impl WizardPage {
    fn handle(&self) -> &ConversationHandle {
        &self.handle
    }
}

impl WorkflowScope for WizardPage {
    fn conversation(&self) -> Option<&ConversationHandle> {
        Some(&self.handle)
    }
}

fn wizard_uow(registry: &Arc<SessionFactoryRegistry>, page: &Arc<WizardPage>) -> UnitOfWork {
    let mut uow =
        UnitOfWork::with_listener(registry.clone(), Arc::new(ConversationLifecycle::new()));
    uow.set_target(WorkflowTarget::Active(page.clone()));
    uow
}

#[test]
fn ten_step_edit_commits_only_at_the_end() {
    let factory = StubFactory::new(StubDatabase::new());
    let mut registry = SessionFactoryRegistry::new();
    registry.register(FactoryKey::Default, factory.clone());
    let registry = Arc::new(registry);
    let page = Arc::new(WizardPage::default());

    // request 0 creates the draft
    let id = {
        let mut uow = wizard_uow(&registry, &page);
        let session = uow.current_session(&FactoryKey::Default).unwrap();
        let id = session
            .with(|s| s.save("Draft", json!({"title": "v0", "step": 0})))
            .unwrap();
        uow.end().unwrap();
        id
    };

    // requests 1..=9 each revise the pending draft
    for step in 1..10u32 {
        let mut uow = wizard_uow(&registry, &page);
        let session = uow.current_session(&FactoryKey::Default).unwrap();

        let draft = session.with(|s| s.get("Draft", id)).unwrap().unwrap();
        assert_eq!(draft["step"], step - 1, "should see the previous revision");

        session
            .with(|s| {
                s.update(
                    "Draft",
                    id,
                    json!({"title": format!("v{step}"), "step": step}),
                )
            })
            .unwrap();
        uow.end().unwrap();

        // still nothing in storage mid-conversation
        assert_eq!(factory.database().row_count("Draft"), 0);
    }

    // final request flushes and commits, ending the conversation
    {
        let mut uow = wizard_uow(&registry, &page);
        let session = uow.current_session(&FactoryKey::Default).unwrap();
        session.flush().unwrap();
        session.commit().unwrap();
        uow.end().unwrap();
    }

    assert!(page.handle().get(&FactoryKey::Default).is_none());
    assert_eq!(factory.open_sessions(), 0);
    let committed = factory.database().committed("Draft", id).unwrap();
    assert_eq!(committed["title"], "v9");
    assert_eq!(committed["step"], 9);
}
