//! Session sharing and the per-request unit of work.

pub mod shared;
pub mod unit;

pub use shared::SharedSession;
pub use unit::{UnitOfWork, UowState};
