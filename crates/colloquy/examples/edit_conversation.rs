//! Example: a three-request edit conversation.
//!
//! Walks one entity through a multi-step edit workflow: created in the
//! first request, revised in the second, committed in the third. Nothing
//! reaches storage until the final commit, even though three separate
//! units of work run in between.
//!
//! Usage:
//!   cargo run --example edit_conversation

use std::sync::Arc;

use serde_json::json;

use colloquy::orm::stub::{StubDatabase, StubFactory};
use colloquy::workflow::{ConversationHandle, WorkflowScope, WorkflowTarget};
use colloquy::{
    commit_if_valid, ConversationLifecycle, FactoryKey, SessionFactoryRegistry, SessionResult,
    UnitOfWork, Validation,
};

/// A page that keeps its session alive between requests.
#[derive(Default)]
struct EditPage {
    handle: ConversationHandle,
}

impl EditPage {
    fn handle(&self) -> &ConversationHandle {
        &self.handle
    }
}

impl WorkflowScope for EditPage {
    fn conversation(&self) -> Option<&ConversationHandle> {
        Some(&self.handle)
    }
}

fn request(registry: &Arc<SessionFactoryRegistry>, page: &Arc<EditPage>) -> UnitOfWork {
    let mut uow =
        UnitOfWork::with_listener(registry.clone(), Arc::new(ConversationLifecycle::new()));
    uow.set_target(WorkflowTarget::Active(page.clone()));
    uow
}

fn main() -> SessionResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // startup: the hosting application registers its factories once
    let factory = StubFactory::new(StubDatabase::new());
    let mut registry = SessionFactoryRegistry::new();
    registry.register(FactoryKey::Default, factory.clone());
    let registry = Arc::new(registry);

    let page = Arc::new(EditPage::default());

    // request 1: create a draft article inside the conversation
    let id = {
        let mut uow = request(&registry, &page);
        let session = uow.current_session(&FactoryKey::Default)?;
        let id = session.with(|s| s.save("Article", json!({"title": "Draft", "body": ""})))?;
        uow.end()?;
        id
    };
    println!(
        "after request 1: {} committed rows, session kept: {}",
        factory.database().row_count("Article"),
        page.handle().get(&FactoryKey::Default).is_some()
    );

    // request 2: revise the pending draft; still nothing in storage
    {
        let mut uow = request(&registry, &page);
        let session = uow.current_session(&FactoryKey::Default)?;
        session.with(|s| {
            s.update(
                "Article",
                id,
                json!({"title": "Sessions in conversation", "body": "..."}),
            )
        })?;
        uow.end()?;
    }
    println!(
        "after request 2: {} committed rows",
        factory.database().row_count("Article")
    );

    // request 3: the form submission passes validation and commits
    {
        let mut uow = request(&registry, &page);
        let session = uow.current_session(&FactoryKey::Default)?;
        let mut validation = Validation::new();
        let outcome = commit_if_valid(&session, &mut validation, |_| Ok(()))?;
        println!("commit outcome: {outcome:?}");
        // the helper keeps the session usable; this workflow is done, so
        // let the conversation end by leaving nothing uncommitted
        session.commit()?;
        uow.end()?;
    }
    println!(
        "after request 3: {} committed rows, session kept: {}",
        factory.database().row_count("Article"),
        page.handle().get(&FactoryKey::Default).is_some()
    );

    Ok(())
}
