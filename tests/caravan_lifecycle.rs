//! Caravan lifecycle: create, load, prepare, depart and collect.
mod common;

use caravan_engine::caravan::{CaravanError, CaravanStatus, NoticeKind};
use chrono::Duration;
use common::{harness, start_time};

#[test]
fn bare_cart_departs_for_fifty_gold_and_two_hours() {
    let h = harness(vec![]);
    let caravan = h.loaded_cart();
    assert_eq!(caravan.total_items(), 10);
    assert_eq!(caravan.capacity, 10);
    assert_eq!(h.held("alice", "salt"), 40);

    let departed = h.engine.depart("alice", &caravan.id).expect("depart");
    assert_eq!(departed.status, CaravanStatus::InProgress);
    assert_eq!(h.gold("alice"), 450);
    assert_eq!(departed.departed_at, Some(start_time()));
    assert_eq!(departed.arrives_at, Some(start_time() + Duration::hours(2)));
    assert_eq!(departed.total_items(), 10);
    assert_eq!(departed.departure_bill.as_ref().map(|b| b.total), Some(50));
    assert_eq!(h.notices.count(NoticeKind::Departed), 1);
}

#[test]
fn collect_is_rejected_before_arrival() {
    let h = harness(vec![]);
    let caravan = h.departed_cart();

    h.clock.advance(Duration::minutes(119));
    let err = h.engine.collect("alice", &caravan.id).unwrap_err();
    assert!(
        matches!(err, CaravanError::InvalidStateTransition { .. }),
        "got {:?}",
        err
    );
    assert_eq!(h.held("alice", "salt"), 40);

    h.clock.advance(Duration::minutes(1));
    let collected = h.engine.collect("alice", &caravan.id).expect("collect");
    assert_eq!(collected.status, CaravanStatus::Completed);
    assert!(collected.cargo.is_empty());
    assert_eq!(h.held("alice", "salt"), 50);

    let again = h.engine.collect("alice", &caravan.id).unwrap_err();
    assert!(matches!(again, CaravanError::InvalidStateTransition { .. }));
    assert_eq!(h.held("alice", "salt"), 50);
}

#[test]
fn pending_caravans_cannot_be_collected() {
    let h = harness(vec![]);
    let caravan = h.loaded_cart();
    let err = h.engine.collect("alice", &caravan.id).unwrap_err();
    assert!(matches!(err, CaravanError::InvalidStateTransition { .. }));
}

#[test]
fn load_then_unload_restores_cargo_and_inventory() {
    let h = harness(vec![]);
    let caravan = h
        .engine
        .create_caravan("bob", "port", "oasis", "wagon")
        .expect("create");
    h.engine.load_cargo("bob", &caravan.id, "salt", 4).unwrap();
    let before = h.store.get_trader("bob").unwrap();
    let before_cargo = h.store.get_caravan(&caravan.id).unwrap().cargo;

    h.engine.load_cargo("bob", &caravan.id, "silk", 7).unwrap();
    h.engine.unload_cargo("bob", &caravan.id, "silk", 7).unwrap();

    let after = h.store.get_trader("bob").unwrap();
    assert_eq!(after.inventory, before.inventory);
    assert_eq!(after.gold, before.gold);
    assert_eq!(h.store.get_caravan(&caravan.id).unwrap().cargo, before_cargo);
}

#[test]
fn capacity_is_never_exceeded() {
    let h = harness(vec![]);
    let caravan = h
        .engine
        .create_caravan("alice", "port", "oasis", "cart")
        .unwrap();

    let err = h
        .engine
        .load_cargo("alice", &caravan.id, "salt", 11)
        .unwrap_err();
    assert!(matches!(
        err,
        CaravanError::CapacityExceeded {
            capacity: 10,
            loaded: 0,
            requested: 11
        }
    ));

    h.engine.load_cargo("alice", &caravan.id, "salt", 8).unwrap();
    assert!(h
        .engine
        .load_cargo("alice", &caravan.id, "spice", 3)
        .is_err());
    let full = h
        .engine
        .load_cargo("alice", &caravan.id, "spice", 2)
        .unwrap();
    assert_eq!(full.total_items(), 10);
    assert_eq!(full.cargo.len(), 2);
    // Failed loads leave the inventory untouched
    assert_eq!(h.held("alice", "spice"), 48);
}

#[test]
fn load_checks_inventory_and_quantity() {
    let h = harness(vec![]);
    let caravan = h
        .engine
        .create_caravan("alice", "port", "oasis", "cart")
        .unwrap();

    let err = h
        .engine
        .load_cargo("alice", &caravan.id, "silk", 1)
        .unwrap_err();
    assert!(matches!(
        err,
        CaravanError::InsufficientInventory { available: 0, .. }
    ));
    assert!(matches!(
        h.engine.load_cargo("alice", &caravan.id, "salt", 0),
        Err(CaravanError::Validation(_))
    ));
    assert!(matches!(
        h.engine.load_cargo("alice", &caravan.id, "gold-dust", 1),
        Err(CaravanError::NotFound(_))
    ));
    assert!(h.store.get_caravan(&caravan.id).unwrap().cargo.is_empty());
}

#[test]
fn unload_more_than_carried_fails() {
    let h = harness(vec![]);
    let caravan = h.loaded_cart();
    let err = h
        .engine
        .unload_cargo("alice", &caravan.id, "salt", 11)
        .unwrap_err();
    assert!(matches!(
        err,
        CaravanError::InsufficientCargo { available: 10, .. }
    ));
}

#[test]
fn cargo_is_frozen_after_departure() {
    let h = harness(vec![]);
    let caravan = h.departed_cart();
    for result in [
        h.engine.load_cargo("alice", &caravan.id, "spice", 1),
        h.engine.unload_cargo("alice", &caravan.id, "salt", 1),
        h.engine.hire_escort("alice", &caravan.id, "guards"),
        h.engine.depart("alice", &caravan.id),
    ] {
        assert!(matches!(
            result,
            Err(CaravanError::InvalidStateTransition { .. })
        ));
    }
    assert_eq!(h.gold("alice"), 450);
}

#[test]
fn departure_requires_cargo_and_gold() {
    let h = harness(vec![]);
    let empty = h
        .engine
        .create_caravan("alice", "port", "oasis", "cart")
        .unwrap();
    assert!(matches!(
        h.engine.depart("alice", &empty.id),
        Err(CaravanError::InvalidStateTransition { .. })
    ));

    let caravan = h.loaded_cart();
    h.engine.grant_gold("alice", -460).unwrap();
    let err = h.engine.depart("alice", &caravan.id).unwrap_err();
    assert!(matches!(
        err,
        CaravanError::InsufficientFunds {
            needed: 50,
            available: 40
        }
    ));
    let stored = h.store.get_caravan(&caravan.id).unwrap();
    assert_eq!(stored.status, CaravanStatus::Pending);
    assert_eq!(h.gold("alice"), 40);
}

#[test]
fn escort_and_insurance_are_charged_at_departure() {
    let h = harness(vec![]);
    let caravan = h.loaded_cart();

    assert!(matches!(
        h.engine.hire_escort("alice", &caravan.id, "dragons"),
        Err(CaravanError::Validation(_))
    ));
    h.engine.hire_escort("alice", &caravan.id, "guards").unwrap();
    assert!(matches!(
        h.engine.hire_escort("alice", &caravan.id, "knights"),
        Err(CaravanError::InvalidStateTransition { .. })
    ));
    h.engine
        .purchase_insurance("alice", &caravan.id, "full")
        .unwrap();
    assert!(matches!(
        h.engine.purchase_insurance("alice", &caravan.id, "basic"),
        Err(CaravanError::InvalidStateTransition { .. })
    ));
    assert_eq!(h.gold("alice"), 500);

    let quote = h.engine.quote_departure("alice", &caravan.id).unwrap();
    assert_eq!(quote.caravan_cost, 50);
    assert_eq!(quote.escort_cost, 25);
    assert_eq!(quote.insurance_premium, 9);
    assert_eq!(quote.total, 84);
    // Quoting changes nothing
    assert_eq!(h.store.get_caravan(&caravan.id).unwrap().version, 3);

    let departed = h.engine.depart("alice", &caravan.id).unwrap();
    assert_eq!(h.gold("alice"), 416);
    assert_eq!(departed.departure_bill, Some(quote));
}

#[test]
fn insurance_needs_cargo() {
    let h = harness(vec![]);
    let caravan = h
        .engine
        .create_caravan("alice", "port", "oasis", "cart")
        .unwrap();
    assert!(matches!(
        h.engine.purchase_insurance("alice", &caravan.id, "basic"),
        Err(CaravanError::InvalidStateTransition { .. })
    ));
}

#[test]
fn create_validates_request() {
    let h = harness(vec![]);
    assert!(matches!(
        h.engine.create_caravan("alice", "port", "PORT", "cart"),
        Err(CaravanError::Validation(_))
    ));
    assert!(matches!(
        h.engine.create_caravan("alice", "port", "oasis", "zeppelin"),
        Err(CaravanError::Validation(_))
    ));
    assert!(matches!(
        h.engine.create_caravan("alice", "port", "citadel", "cart"),
        Err(CaravanError::NotFound(_))
    ));
    // Wagons need level 3
    assert!(matches!(
        h.engine.create_caravan("alice", "port", "oasis", "wagon"),
        Err(CaravanError::Validation(_))
    ));
    assert!(matches!(
        h.engine.create_caravan("mallory", "port", "oasis", "cart"),
        Err(CaravanError::NotFound(_))
    ));
    // Routes work in both directions
    let reverse = h
        .engine
        .create_caravan("alice", "oasis", "port", "cart")
        .unwrap();
    assert_eq!(reverse.status, CaravanStatus::Pending);
}

#[test]
fn other_owners_caravans_look_absent() {
    let h = harness(vec![]);
    let caravan = h.loaded_cart();
    assert!(matches!(
        h.engine.get_caravan("bob", &caravan.id),
        Err(CaravanError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.unload_cargo("bob", &caravan.id, "salt", 1),
        Err(CaravanError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.depart("bob", &caravan.id),
        Err(CaravanError::NotFound(_))
    ));
    assert!(h.engine.list_caravans("bob").unwrap().is_empty());
}

#[test]
fn listing_reports_derived_progress() {
    let h = harness(vec![]);
    let pending = h.loaded_cart();
    let travelling = h.departed_cart();

    h.clock.advance(Duration::hours(1));
    let list = h.engine.list_caravans("alice").unwrap();
    assert_eq!(list.len(), 2);
    let by_id = |id: &str| list.iter().find(|s| s.id == id).unwrap();
    assert_eq!(by_id(&pending.id).progress, 0.0);
    assert!((by_id(&travelling.id).progress - 0.5).abs() < 1e-9);
    assert_eq!(by_id(&travelling.id).status, CaravanStatus::InProgress);
    assert!(by_id(&travelling.id).summary_line().contains("50%"));
}

#[test]
fn market_price_is_snapshotted_at_load() {
    let h = harness(vec![]);
    let caravan = h
        .engine
        .create_caravan("alice", "port", "oasis", "cart")
        .unwrap();
    h.engine.load_cargo("alice", &caravan.id, "salt", 2).unwrap();
    h.store
        .put_item(caravan_engine::caravan::ItemRecord::new("salt", "Salt", 9))
        .unwrap();
    let loaded = h.engine.load_cargo("alice", &caravan.id, "salt", 2).unwrap();
    assert_eq!(loaded.cargo.len(), 1);
    assert_eq!(loaded.cargo[0].unit_value, 5);
    assert_eq!(loaded.cargo_value(), 20);
}

#[test]
fn registering_an_existing_trader_keeps_their_wallet() {
    let h = harness(vec![]);
    let err = h.engine.register_trader("alice", 1, 0).unwrap_err();
    assert!(matches!(err, CaravanError::Validation(_)), "got {:?}", err);
    assert_eq!(h.gold("alice"), 500);
    assert_eq!(h.held("alice", "salt"), 50);

    let carol = h.engine.register_trader("carol", 2, 75).unwrap();
    assert_eq!(carol.gold, 75);
    assert_eq!(h.gold("carol"), 75);
}
