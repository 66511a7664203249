//! Travel risk scheduler: arrival notices, ambush rolls and races with owners.
mod common;

use std::collections::HashMap;
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::time::Duration as StdDuration;

use caravan_engine::caravan::{
    start_scheduler, CaravanEngine, CaravanError, CaravanStatus, Catalog, NoticeKind,
    RecordingNotifier, Route, RouteKey, RouteLookup, SchedulerConfig, ScriptedRolls,
    StaticRoutes, TravelRiskScheduler,
};
use chrono::Duration;
use common::harness;

#[test]
fn danger_six_unescorted_caravan_is_ambushed_below_thirty_percent() {
    let h = harness(vec![0.29]);
    let caravan = h.departed_cart();
    h.clock.advance(Duration::minutes(10));

    let report = h.scheduler().tick().unwrap();
    assert_eq!(report.in_flight, 1);
    assert_eq!(report.rolled, 1);
    assert_eq!(report.ambushed, 1);

    let stored = h.store.get_caravan(&caravan.id).unwrap();
    assert_eq!(stored.status, CaravanStatus::Failed);
    let event = stored.ambush.expect("ambush event");
    assert_eq!(event.danger_rating, 6);
    assert_eq!(event.at, h.clock_now());

    let notices = h.notices.notices();
    let ambushed: Vec<_> = notices
        .iter()
        .filter(|n| n.kind == NoticeKind::Ambushed)
        .collect();
    assert_eq!(ambushed.len(), 1);
    assert_eq!(ambushed[0].owner, "alice");
    assert_eq!(ambushed[0].payload["danger_rating"], 6);
}

#[test]
fn rolls_above_the_chance_leave_caravans_travelling() {
    let h = harness(vec![0.31]);
    let caravan = h.departed_cart();
    let report = h.scheduler().tick().unwrap();
    assert_eq!(report.rolled, 1);
    assert_eq!(report.ambushed, 0);
    assert_eq!(
        h.store.get_caravan(&caravan.id).unwrap().status,
        CaravanStatus::InProgress
    );
}

#[test]
fn escorts_lower_the_chance() {
    // guards: 30% - 10% = 20%
    let h = harness(vec![0.25]);
    let caravan = h.loaded_cart();
    h.engine.hire_escort("alice", &caravan.id, "guards").unwrap();
    h.engine.depart("alice", &caravan.id).unwrap();
    let report = h.scheduler().tick().unwrap();
    assert_eq!(report.ambushed, 0);

    // knights on a danger 2 road: chance clamps to zero, even a zero roll misses
    let h = harness(vec![0.0]);
    let caravan = h
        .engine
        .create_caravan("alice", "oasis", "citadel", "cart")
        .unwrap();
    h.engine.load_cargo("alice", &caravan.id, "salt", 1).unwrap();
    h.engine.hire_escort("alice", &caravan.id, "knights").unwrap();
    h.engine.depart("alice", &caravan.id).unwrap();
    let report = h.scheduler().tick().unwrap();
    assert_eq!(report.rolled, 1);
    assert_eq!(report.ambushed, 0);
}

#[test]
fn caravans_are_ambushed_at_most_once() {
    let h = harness(vec![0.0, 0.0, 0.0]);
    let caravan = h.departed_cart();
    let scheduler = h.scheduler();
    assert_eq!(scheduler.tick().unwrap().ambushed, 1);
    h.clock.advance(Duration::minutes(5));
    let second = scheduler.tick().unwrap();
    assert_eq!(second.in_flight, 0);
    assert_eq!(second.rolled, 0);
    assert_eq!(second.ambushed, 0);

    let stored = h.store.get_caravan(&caravan.id).unwrap();
    assert_eq!(stored.version, 3); // create, load, depart, ambush -> 0..3
    assert_eq!(h.notices.count(NoticeKind::Ambushed), 1);
}

#[test]
fn arrivals_are_announced_once_and_never_transition() {
    let h = harness(vec![0.0]);
    let caravan = h.departed_cart();
    h.clock.advance(Duration::hours(2));

    let scheduler = h.scheduler();
    let first = scheduler.tick().unwrap();
    assert_eq!(first.arrivals_notified, 1);
    // Arrived caravans are no longer exposed to ambushes
    assert_eq!(first.rolled, 0);
    let second = scheduler.tick().unwrap();
    assert_eq!(second.arrivals_notified, 0);

    let stored = h.store.get_caravan(&caravan.id).unwrap();
    assert_eq!(stored.status, CaravanStatus::InProgress);
    assert_eq!(stored.version, 2);
    assert_eq!(h.notices.count(NoticeKind::Arrived), 1);

    h.engine.collect("alice", &caravan.id).unwrap();
    assert_eq!(scheduler.tick().unwrap().in_flight, 0);
}

#[test]
fn missing_routes_are_skipped_without_aborting_the_batch() {
    let h = harness(vec![0.0, 0.0]);
    let lost = h.departed_cart();
    let other = h
        .engine
        .create_caravan("alice", "oasis", "citadel", "cart")
        .unwrap();
    h.engine.load_cargo("alice", &other.id, "spice", 1).unwrap();
    h.engine.depart("alice", &other.id).unwrap();

    // A scheduler whose route table forgot port <-> oasis
    let engine = CaravanEngine::new(h.store.clone(), Catalog::default())
        .with_clock(h.clock.clone())
        .with_notifier(Arc::new(RecordingNotifier::new()))
        .with_rolls(Box::new(ScriptedRolls::always(0.0)))
        .with_routes(Arc::new(StaticRoutes::new([Route::new(
            "oasis", "citadel", 60, 2,
        )])));
    let report = TravelRiskScheduler::new(Arc::new(engine)).tick().unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.rolled, 1);
    assert_eq!(report.ambushed, 1);
    assert_eq!(
        h.store.get_caravan(&lost.id).unwrap().status,
        CaravanStatus::InProgress
    );
    assert_eq!(
        h.store.get_caravan(&other.id).unwrap().status,
        CaravanStatus::Failed
    );
}

#[test]
fn ambush_against_a_stale_snapshot_is_a_conflict() {
    let h = harness(vec![]);
    let caravan = h.departed_cart();

    // The scheduler read the caravan just before arrival...
    h.clock.advance(Duration::minutes(119));
    let tick_time = h.clock_now();
    let snapshot = h.store.get_caravan(&caravan.id).unwrap();

    // ...and the owner collected it at the arrival instant.
    h.clock.advance(Duration::minutes(1));
    h.engine.collect("alice", &caravan.id).unwrap();

    let err = h.engine.ambush(&snapshot, 6, 0.3, tick_time).unwrap_err();
    assert!(err.is_conflict(), "got {:?}", err);
    let stored = h.store.get_caravan(&caravan.id).unwrap();
    assert_eq!(stored.status, CaravanStatus::Completed);
    assert!(stored.ambush.is_none());
    assert_eq!(h.held("alice", "salt"), 50);
}

#[test]
fn racing_ambush_and_collect_have_exactly_one_winner() {
    for _ in 0..8 {
        let h = harness(vec![]);
        let caravan = h.departed_cart();
        h.clock.advance(Duration::minutes(119));
        let tick_time = h.clock_now();
        let snapshot = h.store.get_caravan(&caravan.id).unwrap();
        h.clock.advance(Duration::minutes(1));

        let barrier = Barrier::new(2);
        let (ambush, collect) = std::thread::scope(|s| {
            let a = s.spawn(|| {
                barrier.wait();
                h.engine.ambush(&snapshot, 6, 0.3, tick_time)
            });
            let c = s.spawn(|| {
                barrier.wait();
                h.engine.collect("alice", &caravan.id)
            });
            (a.join().unwrap(), c.join().unwrap())
        });

        assert!(
            ambush.is_ok() ^ collect.is_ok(),
            "ambush {:?} collect {:?}",
            ambush,
            collect
        );
        // The scheduler's snapshot always predates the race, so a losing ambush is a
        // version conflict. A losing collect conflicts too unless its own read already
        // saw the ambush.
        if let Err(err) = &ambush {
            assert!(err.is_conflict(), "ambush lost with {:?}", err);
        }
        if let Err(err) = &collect {
            assert!(
                err.is_conflict()
                    || matches!(
                        err,
                        CaravanError::InvalidStateTransition {
                            status: CaravanStatus::Failed,
                            ..
                        }
                    ),
                "collect lost with {:?}",
                err
            );
        }

        let stored = h.store.get_caravan(&caravan.id).unwrap();
        match stored.status {
            CaravanStatus::Completed => assert_eq!(h.held("alice", "salt"), 50),
            CaravanStatus::Failed => assert_eq!(h.held("alice", "salt"), 40),
            other => panic!("unexpected status {}", other),
        }
    }
}

#[test]
fn collect_after_a_committed_ambush_names_the_failed_state() {
    let h = harness(vec![]);
    let caravan = h.departed_cart();
    h.clock.advance(Duration::minutes(119));
    let snapshot = h.store.get_caravan(&caravan.id).unwrap();
    h.engine.ambush(&snapshot, 6, 0.3, h.clock_now()).unwrap();

    h.clock.advance(Duration::minutes(1));
    let err = h.engine.collect("alice", &caravan.id).unwrap_err();
    assert!(
        matches!(
            err,
            CaravanError::InvalidStateTransition {
                status: CaravanStatus::Failed,
                ..
            }
        ),
        "got {:?}",
        err
    );
    assert_eq!(h.held("alice", "salt"), 40);
}

/// Route lookup that parks inside the bulk query until released.
struct GatedRoutes {
    inner: StaticRoutes,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl RouteLookup for GatedRoutes {
    fn get_route(&self, from: &str, to: &str) -> Result<Option<Route>, CaravanError> {
        self.inner.get_route(from, to)
    }

    fn get_routes(&self, keys: &[RouteKey]) -> Result<HashMap<RouteKey, Route>, CaravanError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(StdDuration::from_secs(5));
        self.inner.get_routes(keys)
    }
}

#[test]
fn overlapping_ticks_are_skipped() {
    let h = harness(vec![]);
    h.departed_cart();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let routes = GatedRoutes {
        inner: StaticRoutes::new([Route::new("port", "oasis", 120, 6)]),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let engine = CaravanEngine::new(h.store.clone(), Catalog::default())
        .with_clock(h.clock.clone())
        .with_rolls(Box::new(ScriptedRolls::always(0.99)))
        .with_routes(Arc::new(routes));
    let scheduler = Arc::new(TravelRiskScheduler::new(Arc::new(engine)));

    let background = {
        let scheduler = scheduler.clone();
        std::thread::spawn(move || scheduler.tick())
    };
    entered_rx
        .recv_timeout(StdDuration::from_secs(5))
        .expect("first tick reached the route lookup");

    let overlapped = scheduler.tick().unwrap();
    assert!(overlapped.overlapped);
    assert_eq!(overlapped.rolled, 0);

    release_tx.send(()).unwrap();
    let first = background.join().unwrap().unwrap();
    assert!(!first.overlapped);
    assert_eq!(first.rolled, 1);
}

#[tokio::test]
async fn background_loop_ticks_on_demand_and_shuts_down() {
    let h = harness(vec![0.0]);
    let caravan = h.departed_cart();
    let scheduler = Arc::new(h.scheduler());
    let handle = start_scheduler(
        scheduler,
        SchedulerConfig {
            enabled: true,
            tick_interval_secs: 3600,
        },
    );

    let report = handle.tick_now().await.expect("report");
    assert_eq!(report.ambushed, 1);
    let stats = handle.snapshot().await.expect("stats");
    assert_eq!(stats.ticks, 1);
    assert_eq!(stats.ambushes_total, 1);
    assert_eq!(stats.last_report, Some(report));

    handle.shutdown().await;
    assert!(handle.snapshot().await.is_none());
    assert_eq!(
        h.store.get_caravan(&caravan.id).unwrap().status,
        CaravanStatus::Failed
    );
}
