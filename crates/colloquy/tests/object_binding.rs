//! Bound object model: binding, retention, and promotion.

mod common;

use std::sync::Arc;

use serde_json::json;

use colloquy::{
    Criteria, FactoryKey, ObjectBinding, RequestLifecycle, SessionError, SessionFactoryRegistry,
    UnitOfWork,
};

use common::fixtures::{seed_row, stub_registry, Ticket};

fn request_uow(registry: &Arc<SessionFactoryRegistry>) -> UnitOfWork {
    UnitOfWork::with_listener(registry.clone(), Arc::new(RequestLifecycle::new()))
}

#[test]
fn blank_binding_loads_a_default_instance() {
    let (registry, _factory) = stub_registry();
    let mut uow = request_uow(&registry);

    let mut binding = ObjectBinding::<Ticket>::blank();
    assert!(!binding.is_bound());

    let ticket = binding.load(&mut uow).unwrap().unwrap();
    assert_eq!(ticket, Ticket::default());

    uow.end().unwrap();
}

#[test]
fn id_binding_loads_the_row_or_null() {
    let (registry, factory) = stub_registry();
    let id = seed_row(
        &factory,
        "Ticket",
        json!({"title": "stored", "status": "open"}),
    );
    let mut uow = request_uow(&registry);

    let mut binding = ObjectBinding::<Ticket>::by_id(id);
    let ticket = binding.load(&mut uow).unwrap().unwrap();
    assert_eq!(ticket.title, "stored");
    assert_eq!(binding.identifier(), Some(id));

    let mut missing = ObjectBinding::<Ticket>::by_id(9999);
    assert!(missing.load(&mut uow).unwrap().is_none());

    uow.end().unwrap();
}

#[test]
fn set_object_with_a_tracked_entity_binds_by_id() {
    let (registry, _factory) = stub_registry();
    let mut uow = request_uow(&registry);

    let ticket = Ticket {
        title: "tracked".into(),
        status: "open".into(),
    };
    let id = {
        let session = uow.current_session(&FactoryKey::Default).unwrap();
        session
            .with(|s| s.save("Ticket", serde_json::to_value(&ticket).unwrap()))
            .unwrap()
    };

    let mut binding = ObjectBinding::<Ticket>::blank();
    binding.set_object(&mut uow, Some(ticket)).unwrap();

    assert!(binding.is_bound());
    assert_eq!(binding.identifier(), Some(id));

    uow.end().unwrap();
}

#[test]
fn unsaved_objects_are_retained_across_requests() {
    let (registry, _factory) = stub_registry();

    let mut binding = ObjectBinding::<Ticket>::blank();
    {
        let mut uow = request_uow(&registry);
        let ticket = Ticket {
            title: "unsaved".into(),
            status: "draft".into(),
        };
        binding.set_object(&mut uow, Some(ticket)).unwrap();
        assert!(!binding.is_bound());
        uow.end().unwrap();
    }

    // a later unit of work still sees the retained object
    let mut uow = request_uow(&registry);
    let ticket = binding.load(&mut uow).unwrap().unwrap();
    assert_eq!(ticket.title, "unsaved");
    uow.end().unwrap();
}

#[test]
fn retention_off_discards_unsaved_objects() {
    let (registry, _factory) = stub_registry();
    let mut uow = request_uow(&registry);

    let mut binding = ObjectBinding::<Ticket>::blank();
    binding.set_retain_unsaved(false);
    let ticket = Ticket {
        title: "ephemeral".into(),
        status: "draft".into(),
    };
    binding.set_object(&mut uow, Some(ticket)).unwrap();

    // recreated fresh instead of retained
    let loaded = binding.load(&mut uow).unwrap().unwrap();
    assert_eq!(loaded, Ticket::default());

    uow.end().unwrap();
}

#[test]
fn check_binding_promotes_once_the_session_tracks_the_object() {
    let (registry, _factory) = stub_registry();
    let mut uow = request_uow(&registry);

    let ticket = Ticket {
        title: "promoted".into(),
        status: "open".into(),
    };
    let mut binding = ObjectBinding::<Ticket>::blank();
    binding.set_object(&mut uow, Some(ticket.clone())).unwrap();
    assert!(!binding.is_bound());

    // promotion is a no-op until something saves the object
    binding.check_binding(&mut uow).unwrap();
    assert!(!binding.is_bound());

    let id = {
        let session = uow.current_session(&FactoryKey::Default).unwrap();
        session
            .with(|s| s.save("Ticket", serde_json::to_value(&ticket).unwrap()))
            .unwrap()
    };

    binding.check_binding(&mut uow).unwrap();
    assert!(binding.is_bound());
    assert_eq!(binding.identifier(), Some(id));

    uow.end().unwrap();
}

#[test]
fn criteria_bindings_require_a_unique_match() {
    let (registry, factory) = stub_registry();
    seed_row(&factory, "Ticket", json!({"title": "a", "status": "open"}));
    seed_row(&factory, "Ticket", json!({"title": "b", "status": "open"}));
    seed_row(&factory, "Ticket", json!({"title": "c", "status": "closed"}));
    let mut uow = request_uow(&registry);

    let mut unique =
        ObjectBinding::<Ticket>::matching(Criteria::new().eq("status", "closed"));
    let ticket = unique.load(&mut uow).unwrap().unwrap();
    assert_eq!(ticket.title, "c");

    let mut ambiguous =
        ObjectBinding::<Ticket>::matching(Criteria::new().eq("status", "open"));
    let err = ambiguous.load(&mut uow).unwrap_err();
    assert!(matches!(err, SessionError::MultipleResults { class: "Ticket" }));

    let mut none =
        ObjectBinding::<Ticket>::matching(Criteria::new().eq("status", "archived"));
    assert!(none.load(&mut uow).unwrap().is_none());

    uow.end().unwrap();
}

#[test]
fn unbind_keeps_the_class_for_a_fresh_start() {
    let (registry, factory) = stub_registry();
    let id = seed_row(
        &factory,
        "Ticket",
        json!({"title": "old", "status": "open"}),
    );
    let mut uow = request_uow(&registry);

    let mut binding = ObjectBinding::<Ticket>::by_id(id);
    binding.load(&mut uow).unwrap().unwrap();

    binding.unbind();
    assert!(!binding.is_bound());
    assert_eq!(binding.identifier(), None);

    // the entity type survives, so loading starts over blank
    let fresh = binding.load(&mut uow).unwrap().unwrap();
    assert_eq!(fresh, Ticket::default());

    uow.end().unwrap();
}

#[test]
fn version_is_exposed_for_persisted_objects() {
    let (registry, factory) = stub_registry();
    let id = seed_row(
        &factory,
        "Ticket",
        json!({"title": "versioned", "status": "open"}),
    );
    let mut uow = request_uow(&registry);

    let binding = ObjectBinding::<Ticket>::by_id(id);
    assert_eq!(binding.version(&mut uow).unwrap(), Some(1));

    let unbound = ObjectBinding::<Ticket>::blank();
    assert_eq!(unbound.version(&mut uow).unwrap(), None);

    uow.end().unwrap();
}
