//! Travel risk scheduler
//!
//! One periodic batch job replaces per-caravan timers. Every tick runs two passes over
//! the IN_PROGRESS caravans:
//!
//! * Arrival pass: caravans whose `arrives_at` has passed get one arrival notice.
//!   Nothing is transitioned; the owner still has to collect.
//! * Ambush pass: caravans still in transit are rolled once each against their route's
//!   danger rating (minus escort mitigation). A hit moves the caravan to FAILED.
//!
//! Every ambush commits against the snapshot that was rolled, so a caravan collected
//! or otherwise changed mid-tick is skipped as a conflict instead of being clobbered.
//! Ticks are single-flight: an overlapping call returns immediately.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use super::engine::CaravanEngine;
use super::errors::CaravanError;
use super::notify::NoticeKind;
use super::risk::ambush_chance;
use super::routes::RouteKey;
use super::types::CaravanStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub in_flight: usize,
    pub arrivals_notified: usize,
    pub rolled: usize,
    pub ambushed: usize,
    /// Caravans left alone because of a missing route or a storage failure.
    pub skipped: usize,
    /// Ambushes dropped because the caravan changed after it was read.
    pub conflicts: usize,
    /// True when the tick did nothing because another tick was running.
    pub overlapped: bool,
}

impl TickReport {
    fn is_quiet(&self) -> bool {
        self.arrivals_notified == 0 && self.ambushed == 0 && self.skipped == 0 && self.conflicts == 0
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TravelRiskScheduler {
    engine: Arc<CaravanEngine>,
    running: AtomicBool,
}

impl TravelRiskScheduler {
    pub fn new(engine: Arc<CaravanEngine>) -> Self {
        Self {
            engine,
            running: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &Arc<CaravanEngine> {
        &self.engine
    }

    /// Run one tick at the engine's current time.
    pub fn tick(&self) -> Result<TickReport, CaravanError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("travel risk tick skipped: previous tick still running");
            return Ok(TickReport {
                overlapped: true,
                ..TickReport::default()
            });
        }
        let _guard = RunningGuard(&self.running);

        let now = self.engine.now();
        let in_flight = self
            .engine
            .store()
            .list_caravans_with_status(CaravanStatus::InProgress)?;
        let mut report = TickReport {
            in_flight: in_flight.len(),
            ..TickReport::default()
        };

        // Arrival pass
        for caravan in in_flight.iter().filter(|c| c.has_arrived(now)) {
            match self.engine.store().mark_arrival_notified(&caravan.id) {
                Ok(true) => {
                    debug!("caravan {} arrived at {}", caravan.id, caravan.destination);
                    self.engine.notify(
                        &caravan.owner,
                        NoticeKind::Arrived,
                        json!({
                            "caravan_id": caravan.id,
                            "destination": caravan.destination,
                            "arrived_at": caravan.arrives_at,
                        }),
                    );
                    report.arrivals_notified += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("arrival marker for caravan {} failed: {}", caravan.id, e);
                    report.skipped += 1;
                }
            }
        }

        // Ambush pass
        let travelling: Vec<_> = in_flight.iter().filter(|c| c.in_transit(now)).collect();
        if !travelling.is_empty() {
            let keys: Vec<RouteKey> = travelling
                .iter()
                .map(|c| RouteKey::new(&c.origin, &c.destination))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let routes = match self.engine.routes().get_routes(&keys) {
                Ok(routes) => routes,
                Err(e) => {
                    warn!("route lookup failed, skipping ambush pass: {}", e);
                    report.skipped += travelling.len();
                    self.log_report(&report);
                    return Ok(report);
                }
            };

            let rules = self.engine.rules();
            for caravan in travelling {
                let key = RouteKey::new(&caravan.origin, &caravan.destination);
                let Some(route) = routes.get(&key) else {
                    warn!(
                        "caravan {}: no route {} <-> {}, skipping",
                        caravan.id, caravan.origin, caravan.destination
                    );
                    report.skipped += 1;
                    continue;
                };
                let bonus = caravan
                    .escort
                    .as_ref()
                    .map(|e| e.safety_bonus_percent)
                    .unwrap_or(0);
                let chance = ambush_chance(route.danger_rating, rules.base_rate_per_danger, bonus);
                let roll = self.engine.roll()?;
                report.rolled += 1;
                debug!(
                    "caravan {}: danger {} bonus {}% chance {:.3} roll {:.3}",
                    caravan.id, route.danger_rating, bonus, chance, roll
                );
                if roll >= chance {
                    continue;
                }

                match self.engine.ambush(caravan, route.danger_rating, chance, now) {
                    Ok(_) => report.ambushed += 1,
                    Err(e) if e.is_conflict() => {
                        debug!("caravan {} changed during tick, ambush dropped", caravan.id);
                        report.conflicts += 1;
                    }
                    Err(e) => {
                        warn!("ambush of caravan {} failed: {}", caravan.id, e);
                        report.skipped += 1;
                    }
                }
            }
        }

        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &TickReport) {
        if report.is_quiet() {
            debug!(
                "travel risk tick: {} in flight, {} rolled",
                report.in_flight, report.rolled
            );
        } else {
            info!(
                "travel risk tick: {} in flight, {} arrivals, {} rolled, {} ambushed, {} skipped, {} conflicts",
                report.in_flight,
                report.arrivals_notified,
                report.rolled,
                report.ambushed,
                report.skipped,
                report.conflicts
            );
        }
    }
}

// ============================================================================
// Background loop
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub arrivals_total: u64,
    pub ambushes_total: u64,
    pub last_report: Option<TickReport>,
}

impl SchedulerStats {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.arrivals_total += report.arrivals_notified as u64;
        self.ambushes_total += report.ambushed as u64;
        self.last_report = Some(*report);
    }
}

enum SchedulerCommand {
    TickNow(oneshot::Sender<Option<TickReport>>),
    Snapshot(oneshot::Sender<SchedulerStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Run a tick immediately instead of waiting for the next period.
    pub async fn tick_now(&self) -> Option<TickReport> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SchedulerCommand::TickNow(tx)).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn snapshot(&self) -> Option<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SchedulerCommand::Snapshot(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(SchedulerCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

async fn run_tick(scheduler: &Arc<TravelRiskScheduler>, stats: &mut SchedulerStats) -> Option<TickReport> {
    let worker = scheduler.clone();
    match tokio::task::spawn_blocking(move || worker.tick()).await {
        Ok(Ok(report)) => {
            if !report.overlapped {
                stats.record(&report);
            }
            Some(report)
        }
        Ok(Err(e)) => {
            stats.failed_ticks += 1;
            warn!("travel risk tick failed: {}", e);
            None
        }
        Err(e) => {
            stats.failed_ticks += 1;
            warn!("travel risk tick panicked: {}", e);
            None
        }
    }
}

/// Spawn the periodic tick loop on the current tokio runtime.
pub fn start_scheduler(scheduler: Arc<TravelRiskScheduler>, cfg: SchedulerConfig) -> SchedulerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<SchedulerCommand>();
    let handle = SchedulerHandle { tx };

    tokio::spawn(async move {
        let mut stats = SchedulerStats::default();
        let mut interval = tokio::time::interval(cfg.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the first pass runs one period after start.
        interval.tick().await;
        info!(
            "travel risk scheduler started (every {}s)",
            cfg.tick_interval().as_secs()
        );
        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => {
                    match cmd {
                        SchedulerCommand::TickNow(resp) => {
                            let report = run_tick(&scheduler, &mut stats).await;
                            let _ = resp.send(report);
                        }
                        SchedulerCommand::Snapshot(resp) => { let _ = resp.send(stats); }
                        SchedulerCommand::Shutdown(done) => { let _ = done.send(()); break; }
                    }
                }
                _ = interval.tick() => {
                    run_tick(&scheduler, &mut stats).await;
                }
            }
        }
        info!("travel risk scheduler stopped after {} ticks", stats.ticks);
    });

    handle
}
