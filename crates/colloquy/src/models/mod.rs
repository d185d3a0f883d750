//! Models binding entities to the unit of work.

pub mod object;

pub use object::{ObjectBinding, Persistent};
