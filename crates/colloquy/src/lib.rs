//! Request-scoped database session and transaction lifecycle for
//! multi-page web workflows.
//!
//! A [`UnitOfWork`] binds ORM sessions to one request, opening
//! transactions lazily on first access and rolling back whatever was not
//! explicitly committed when the request ends. The
//! [`ConversationLifecycle`] listener extends this with sessions that
//! span several requests, accumulating unflushed changes until a commit
//! (or abandonment) ends the conversation.

pub mod commit;
pub mod config;
pub mod lifecycle;
pub mod models;
pub mod orm;
pub mod registry;
pub mod session;
pub mod types;
pub mod workflow;

pub use commit::{commit_if_valid, CommitOutcome, Validation};
pub use lifecycle::{ConversationLifecycle, LifecycleListener, RequestLifecycle};
pub use models::{ObjectBinding, Persistent};
pub use orm::{Criteria, EntityId, FlushMode, OrmSession, SessionFactory};
pub use registry::SessionFactoryRegistry;
pub use session::{SharedSession, UnitOfWork};
pub use types::{FactoryKey, OrmError, SessionError, SessionResult};
pub use workflow::{ConversationHandle, WorkflowScope, WorkflowTarget};
