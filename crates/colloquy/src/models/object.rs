//! A model wrapping one persisted (or to-be-persisted) entity reference.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::orm::{Criteria, EntityId};
use crate::session::UnitOfWork;
use crate::types::{FactoryKey, SessionError, SessionResult};

/// An entity type the ORM can load and store.
pub trait Persistent: Serialize + DeserializeOwned + Default {
    /// Mapped class name, unique per entity type.
    fn entity_class() -> &'static str;
}

/// How the wrapped object is located in persistent storage.
#[derive(Clone, Debug, Default)]
enum Locator {
    #[default]
    None,
    Id(EntityId),
    Criteria(Criteria),
}

/// Wraps one entity reference and loads it through the current unit of
/// work.
///
/// A binding is "bound" once it can be loaded by identifier or unique
/// criteria. Unbound bindings either retain their unsaved object between
/// requests (the default; the value is kept serialized so it survives
/// context storage) or recreate a blank instance on every load.
pub struct ObjectBinding<T: Persistent> {
    key: FactoryKey,
    locator: Locator,
    retained: Option<Value>,
    retain_unsaved: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Persistent> ObjectBinding<T> {
    /// Bind to an entity id. Loads null when nothing matches.
    pub fn by_id(id: EntityId) -> Self {
        Self::with_locator(Locator::Id(id))
    }

    /// A binding with no existing persistent object; loads a blank
    /// instance until an object is set or bound.
    pub fn blank() -> Self {
        Self::with_locator(Locator::None)
    }

    /// Bind to the unique entity matching `criteria`.
    ///
    /// Criteria matching more than one row make loading fail with
    /// [`SessionError::MultipleResults`]; zero matches load null.
    pub fn matching(criteria: Criteria) -> Self {
        Self::with_locator(Locator::Criteria(criteria))
    }

    fn with_locator(locator: Locator) -> Self {
        Self {
            key: FactoryKey::Default,
            locator,
            retained: None,
            retain_unsaved: true,
            _entity: PhantomData,
        }
    }

    /// Use a factory other than the default.
    pub fn with_factory_key(mut self, key: FactoryKey) -> Self {
        self.key = key;
        self
    }

    pub fn factory_key(&self) -> &FactoryKey {
        &self.key
    }

    /// Keep unsaved objects between requests (the default). When
    /// disabled, unsaved objects are discarded and recreated blank on
    /// the next load.
    pub fn set_retain_unsaved(&mut self, retain: bool) {
        self.retain_unsaved = retain;
    }

    /// True once the object can be loaded by id or criteria.
    pub fn is_bound(&self) -> bool {
        !matches!(self.locator, Locator::None)
    }

    pub fn identifier(&self) -> Option<EntityId> {
        match self.locator {
            Locator::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Replace the wrapped object. An object the session already tracks
    /// binds by its identifier; an unsaved one is retained, or discarded
    /// when retention is off.
    pub fn set_object(&mut self, uow: &mut UnitOfWork, object: Option<T>) -> SessionResult<()> {
        self.unbind();
        let Some(object) = object else {
            return Ok(());
        };
        let value = encode::<T>(&object)?;
        let session = uow.current_session(&self.key)?;
        if let Some(id) = session.with(|s| s.contains(T::entity_class(), &value)) {
            self.locator = Locator::Id(id);
        } else if self.retain_unsaved {
            self.retained = Some(value);
        }
        Ok(())
    }

    /// Load the object: by id or criteria when bound, from the retained
    /// value when present, and as a blank default instance otherwise.
    pub fn load(&mut self, uow: &mut UnitOfWork) -> SessionResult<Option<T>> {
        match &self.locator {
            Locator::Id(id) => {
                let id = *id;
                let session = uow.current_session(&self.key)?;
                let value = session.with(|s| s.get(T::entity_class(), id))?;
                value.map(decode::<T>).transpose()
            }
            Locator::Criteria(criteria) => {
                let criteria = criteria.clone();
                let session = uow.current_session(&self.key)?;
                let mut matches = session.with(|s| s.find_matching(T::entity_class(), &criteria))?;
                if matches.len() > 1 {
                    return Err(SessionError::MultipleResults {
                        class: T::entity_class(),
                    });
                }
                matches.pop().map(|(_, value)| decode::<T>(value)).transpose()
            }
            Locator::None => {
                if self.retain_unsaved {
                    if let Some(value) = &self.retained {
                        return Ok(Some(decode::<T>(value.clone())?));
                    }
                    let blank = T::default();
                    self.retained = Some(encode::<T>(&blank)?);
                    return Ok(Some(blank));
                }
                Ok(Some(T::default()))
            }
        }
    }

    /// Promote a retained object to a bound one once the session tracks
    /// it as persisted, e.g. after a save elsewhere in the unit of work.
    pub fn check_binding(&mut self, uow: &mut UnitOfWork) -> SessionResult<()> {
        if self.is_bound() {
            return Ok(());
        }
        let Some(value) = self.retained.clone() else {
            return Ok(());
        };
        let session = uow.current_session(&self.key)?;
        if let Some(id) = session.with(|s| s.contains(T::entity_class(), &value)) {
            self.locator = Locator::Id(id);
            self.retained = None;
        }
        Ok(())
    }

    /// Optimistic-lock version of the bound entity, when persisted.
    pub fn version(&self, uow: &mut UnitOfWork) -> SessionResult<Option<u64>> {
        let Some(id) = self.identifier() else {
            return Ok(None);
        };
        let session = uow.current_session(&self.key)?;
        Ok(session.with(|s| s.version_of(T::entity_class(), id))?)
    }

    /// Disassociate from any persistent object. The entity type is kept,
    /// so a blank instance can be constructed on the next load.
    pub fn unbind(&mut self) {
        self.locator = Locator::None;
        self.retained = None;
    }
}

fn encode<T: Persistent>(object: &T) -> SessionResult<Value> {
    serde_json::to_value(object).map_err(|source| SessionError::Decode {
        class: T::entity_class(),
        source,
    })
}

fn decode<T: Persistent>(value: Value) -> SessionResult<T> {
    serde_json::from_value(value).map_err(|source| SessionError::Decode {
        class: T::entity_class(),
        source,
    })
}
