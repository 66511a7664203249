//! Test utilities & fixtures.
//! A throwaway sled store seeded with two traders, a few market items and the
//! port <-> oasis road, plus an engine wired to a manual clock, scripted rolls and
//! an in-memory notifier.
#![allow(dead_code)]

use std::sync::Arc;

use caravan_engine::caravan::{
    CaravanEngine, CaravanRecord, CaravanStore, CaravanStoreBuilder, Catalog, Clock, ItemRecord,
    ManualClock, RecordingNotifier, Route, ScriptedRolls, TraderRecord, TravelRiskScheduler,
};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<CaravanStore>,
    pub clock: Arc<ManualClock>,
    pub notices: Arc<RecordingNotifier>,
    pub engine: Arc<CaravanEngine>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

/// Fresh seeded store with an engine whose rolls replay `rolls`.
pub fn harness(rolls: Vec<f64>) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let store = Arc::new(CaravanStoreBuilder::new(dir.path()).open().expect("store"));
    seed(&store);

    let clock = Arc::new(ManualClock::new(start_time()));
    let notices = Arc::new(RecordingNotifier::new());
    let engine = CaravanEngine::new(store.clone(), Catalog::default())
        .with_clock(clock.clone())
        .with_notifier(notices.clone())
        .with_rolls(Box::new(ScriptedRolls::new(rolls)));

    Harness {
        dir,
        store,
        clock,
        notices,
        engine: Arc::new(engine),
    }
}

fn seed(store: &CaravanStore) {
    // 120 distance units at 60s each: two hours for a 1.0x cart
    store
        .put_route(Route::new("port", "oasis", 120, 6))
        .expect("route");
    store
        .put_route(Route::new("oasis", "citadel", 60, 2))
        .expect("route");
    store.put_item(ItemRecord::new("salt", "Salt", 5)).expect("item");
    store.put_item(ItemRecord::new("spice", "Spice", 5)).expect("item");
    store.put_item(ItemRecord::new("silk", "Silk", 20)).expect("item");
    store
        .put_trader(
            TraderRecord::new("alice", 1, 500)
                .with_item("salt", 50)
                .with_item("spice", 50),
        )
        .expect("trader");
    store
        .put_trader(
            TraderRecord::new("bob", 10, 500)
                .with_item("salt", 50)
                .with_item("spice", 50)
                .with_item("silk", 10),
        )
        .expect("trader");
}

impl Harness {
    pub fn scheduler(&self) -> TravelRiskScheduler {
        TravelRiskScheduler::new(self.engine.clone())
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn gold(&self, username: &str) -> i64 {
        self.store.get_trader(username).expect("trader").gold
    }

    pub fn held(&self, username: &str, item_id: &str) -> u32 {
        self.store
            .get_trader(username)
            .expect("trader")
            .item_quantity(item_id)
    }

    /// Alice's cart from port to oasis carrying 10 salt (50g).
    pub fn loaded_cart(&self) -> CaravanRecord {
        let caravan = self
            .engine
            .create_caravan("alice", "port", "oasis", "cart")
            .expect("create");
        self.engine
            .load_cargo("alice", &caravan.id, "salt", 10)
            .expect("load")
    }

    /// Alice's loaded cart, departed at the harness start time.
    pub fn departed_cart(&self) -> CaravanRecord {
        let caravan = self.loaded_cart();
        self.engine.depart("alice", &caravan.id).expect("depart")
    }
}
