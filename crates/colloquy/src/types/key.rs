//! Keys identifying registered session factories.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one registered session factory.
///
/// Most applications register a single factory under
/// [`FactoryKey::Default`]; applications talking to more than one
/// database register additional [`FactoryKey::Named`] entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactoryKey {
    #[default]
    Default,
    Named(String),
}

impl FactoryKey {
    /// A named key for a non-default factory.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl fmt::Display for FactoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryKey::Default => f.write_str("default"),
            FactoryKey::Named(name) => f.write_str(name),
        }
    }
}
