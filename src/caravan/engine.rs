//! Caravan lifecycle: every owner-facing operation and the scheduler's ambush
//! transition. Each mutation validates against a snapshot and commits through
//! [`CaravanStore::commit_caravan`], so a concurrent change turns into a
//! [`CaravanError::ConcurrencyConflict`] instead of a lost update.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use super::ambush::{self, RiskRules};
use super::cargo;
use super::catalog::Catalog;
use super::clock::{Clock, SystemClock};
use super::departure::plan_departure;
use super::errors::CaravanError;
use super::notify::{MailboxNotifier, NoticeKind, Notifier};
use super::risk::{RandomRolls, RollSource};
use super::routes::RouteLookup;
use super::storage::{CaravanStore, TraderAdjustment};
use super::types::{
    AmbushChoice, AmbushEvent, AmbushResolution, CaravanRecord, CaravanStatus, CaravanSummary,
    DepartureQuote, Route, TraderRecord,
};

pub const DEFAULT_SECONDS_PER_DISTANCE: u64 = 60;

pub struct CaravanEngine {
    store: Arc<CaravanStore>,
    catalog: Catalog,
    rules: RiskRules,
    seconds_per_distance: u64,
    routes: Arc<dyn RouteLookup>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    rolls: Mutex<Box<dyn RollSource>>,
}

impl CaravanEngine {
    /// Engine over `store` with the store's routes, mailbox notices, wall-clock time and
    /// OS-seeded rolls.
    pub fn new(store: Arc<CaravanStore>, catalog: Catalog) -> Self {
        let routes: Arc<dyn RouteLookup> = store.clone();
        let notifier: Arc<dyn Notifier> = Arc::new(MailboxNotifier::new(store.clone()));
        Self {
            store,
            catalog,
            rules: RiskRules::default(),
            seconds_per_distance: DEFAULT_SECONDS_PER_DISTANCE,
            routes,
            notifier,
            clock: Arc::new(SystemClock),
            rolls: Mutex::new(Box::new(RandomRolls::from_entropy())),
        }
    }

    /// Replace the risk rules; reseeds the roll source when the rules carry a seed.
    pub fn with_rules(mut self, rules: RiskRules) -> Self {
        if let Some(seed) = rules.rng_seed {
            self.rolls = Mutex::new(Box::new(RandomRolls::seeded(seed)));
        }
        self.rules = rules;
        self
    }

    pub fn with_seconds_per_distance(mut self, seconds: u64) -> Self {
        self.seconds_per_distance = seconds;
        self
    }

    pub fn with_routes(mut self, routes: Arc<dyn RouteLookup>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rolls(mut self, rolls: Box<dyn RollSource>) -> Self {
        self.rolls = Mutex::new(rolls);
        self
    }

    pub fn store(&self) -> &Arc<CaravanStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn rules(&self) -> &RiskRules {
        &self.rules
    }

    pub fn routes(&self) -> &Arc<dyn RouteLookup> {
        &self.routes
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Draw one uniform roll from the injected source.
    pub fn roll(&self) -> Result<f64, CaravanError> {
        let mut rolls = self
            .rolls
            .lock()
            .map_err(|_| CaravanError::Internal("roll source lock poisoned".to_string()))?;
        Ok(rolls.roll())
    }

    /// Send a notice; failures are logged and never surface to the caller.
    pub fn notify(&self, owner: &str, kind: NoticeKind, payload: Value) {
        if let Err(e) = self.notifier.notify(owner, kind, payload) {
            warn!("failed to deliver {} notice to {}: {}", kind, owner, e);
        }
    }

    /// Fetch a caravan on behalf of `owner`. Other owners' caravans look absent.
    pub fn get_caravan(&self, owner: &str, caravan_id: &str) -> Result<CaravanRecord, CaravanError> {
        let caravan = self.store.get_caravan(caravan_id)?;
        if !caravan.owner.eq_ignore_ascii_case(owner) {
            return Err(CaravanError::NotFound(format!("caravan: {}", caravan_id)));
        }
        Ok(caravan)
    }

    /// All of an owner's caravans with derived progress.
    pub fn list_caravans(&self, owner: &str) -> Result<Vec<CaravanSummary>, CaravanError> {
        let now = self.now();
        Ok(self
            .store
            .list_caravans_for_owner(owner)?
            .iter()
            .map(|c| c.summary(now))
            .collect())
    }

    fn route_between(&self, from: &str, to: &str) -> Result<Route, CaravanError> {
        self.routes
            .get_route(from, to)?
            .ok_or_else(|| CaravanError::NotFound(format!("route: {} <-> {}", from, to)))
    }

    fn require_pending(caravan: &CaravanRecord, action: &'static str) -> Result<(), CaravanError> {
        if caravan.status != CaravanStatus::Pending {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                action,
                "caravan has already departed",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Creation and preparation
    // ------------------------------------------------------------------------

    pub fn create_caravan(
        &self,
        owner: &str,
        from: &str,
        to: &str,
        type_key: &str,
    ) -> Result<CaravanRecord, CaravanError> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(CaravanError::Validation(
                "origin and destination are required".to_string(),
            ));
        }
        if from.eq_ignore_ascii_case(to) {
            return Err(CaravanError::Validation(
                "origin and destination must differ".to_string(),
            ));
        }
        let caravan_type = self
            .catalog
            .caravan_type(type_key)
            .ok_or_else(|| CaravanError::Validation(format!("unknown caravan type: {}", type_key)))?;
        let trader = self.store.get_trader(owner)?;
        if trader.level < caravan_type.min_level {
            return Err(CaravanError::Validation(format!(
                "{} requires level {} (you are level {})",
                caravan_type.name, caravan_type.min_level, trader.level
            )));
        }
        self.route_between(from, to)?;

        let id = Uuid::new_v4().simple().to_string();
        let record = CaravanRecord::new(
            &id,
            &trader.username,
            from,
            to,
            &caravan_type.key,
            caravan_type.capacity,
            caravan_type.cost,
            caravan_type.speed_multiplier,
            self.now(),
        );
        let record = self.store.insert_caravan(record)?;
        info!(
            "caravan {} created by {}: {} -> {} ({})",
            record.id, record.owner, record.origin, record.destination, record.caravan_type
        );
        Ok(record)
    }

    /// Move `quantity` units from the owner's inventory into a pending caravan.
    pub fn load_cargo(
        &self,
        owner: &str,
        caravan_id: &str,
        item_id: &str,
        quantity: u32,
    ) -> Result<CaravanRecord, CaravanError> {
        if quantity == 0 {
            return Err(CaravanError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        let caravan = self.get_caravan(owner, caravan_id)?;
        Self::require_pending(&caravan, "load")?;
        let item = self.store.get_item(item_id)?;
        cargo::check_capacity(&caravan, quantity)?;

        let mut next = caravan.clone();
        cargo::load_line(&mut next.cargo, &item, quantity);
        next.updated_at = self.now();
        let adjustment = TraderAdjustment::none().with_item(&item.id, -(quantity as i64));
        let committed = self.store.commit_caravan(&caravan, next, &adjustment)?;
        info!(
            "caravan {} loaded {}x {} ({}/{})",
            committed.id,
            quantity,
            item.id,
            committed.total_items(),
            committed.capacity
        );
        Ok(committed)
    }

    /// Move `quantity` units from a pending caravan back into the owner's inventory.
    pub fn unload_cargo(
        &self,
        owner: &str,
        caravan_id: &str,
        item_id: &str,
        quantity: u32,
    ) -> Result<CaravanRecord, CaravanError> {
        if quantity == 0 {
            return Err(CaravanError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        let caravan = self.get_caravan(owner, caravan_id)?;
        Self::require_pending(&caravan, "unload")?;

        let mut next = caravan.clone();
        let unloaded = cargo::unload_line(&mut next.cargo, item_id, quantity)?;
        next.updated_at = self.now();
        let adjustment = TraderAdjustment::none().with_item(&unloaded.item_id, quantity as i64);
        let committed = self.store.commit_caravan(&caravan, next, &adjustment)?;
        info!(
            "caravan {} unloaded {}x {} ({}/{})",
            committed.id,
            quantity,
            unloaded.item_id,
            committed.total_items(),
            committed.capacity
        );
        Ok(committed)
    }

    pub fn hire_escort(
        &self,
        owner: &str,
        caravan_id: &str,
        escort_key: &str,
    ) -> Result<CaravanRecord, CaravanError> {
        let caravan = self.get_caravan(owner, caravan_id)?;
        Self::require_pending(&caravan, "hire escort for")?;
        if caravan.escort.is_some() {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "hire escort for",
                "an escort is already hired",
            ));
        }
        let tier = self
            .catalog
            .escort(escort_key)
            .ok_or_else(|| CaravanError::Validation(format!("unknown escort: {}", escort_key)))?;

        let mut next = caravan.clone();
        next.escort = Some(tier.to_choice());
        next.updated_at = self.now();
        let committed = self
            .store
            .commit_caravan(&caravan, next, &TraderAdjustment::none())?;
        info!(
            "caravan {} hired {} (+{}% safety, {}g at departure)",
            committed.id, tier.key, tier.safety_bonus_percent, tier.cost
        );
        Ok(committed)
    }

    pub fn purchase_insurance(
        &self,
        owner: &str,
        caravan_id: &str,
        coverage_key: &str,
    ) -> Result<CaravanRecord, CaravanError> {
        let caravan = self.get_caravan(owner, caravan_id)?;
        Self::require_pending(&caravan, "insure")?;
        if caravan.cargo.is_empty() {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "insure",
                "load cargo before buying insurance",
            ));
        }
        if caravan.insurance.is_some() {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "insure",
                "insurance is already purchased",
            ));
        }
        let tier = self
            .catalog
            .coverage(coverage_key)
            .ok_or_else(|| CaravanError::Validation(format!("unknown coverage: {}", coverage_key)))?;

        let mut next = caravan.clone();
        next.insurance = Some(tier.to_choice());
        next.updated_at = self.now();
        let committed = self
            .store
            .commit_caravan(&caravan, next, &TraderAdjustment::none())?;
        info!(
            "caravan {} insured with {} coverage ({:.0}% payout)",
            committed.id,
            tier.key,
            tier.payout_rate * 100.0
        );
        Ok(committed)
    }

    // ------------------------------------------------------------------------
    // Travel
    // ------------------------------------------------------------------------

    /// Preview the departure bill and arrival time.
    pub fn quote_departure(
        &self,
        owner: &str,
        caravan_id: &str,
    ) -> Result<DepartureQuote, CaravanError> {
        let caravan = self.get_caravan(owner, caravan_id)?;
        let route = self.route_between(&caravan.origin, &caravan.destination)?;
        plan_departure(&caravan, &route, self.seconds_per_distance, self.now())
    }

    /// PENDING -> IN_PROGRESS, charging the whole bill in one debit.
    pub fn depart(&self, owner: &str, caravan_id: &str) -> Result<CaravanRecord, CaravanError> {
        let caravan = self.get_caravan(owner, caravan_id)?;
        let route = self.route_between(&caravan.origin, &caravan.destination)?;
        let now = self.now();
        let quote = plan_departure(&caravan, &route, self.seconds_per_distance, now)?;

        let mut next = caravan.clone();
        next.status = CaravanStatus::InProgress;
        next.departed_at = Some(quote.departs_at);
        next.arrives_at = Some(quote.arrives_at);
        next.departure_bill = Some(quote.clone());
        next.updated_at = now;
        let committed =
            self.store
                .commit_caravan(&caravan, next, &TraderAdjustment::gold(-quote.total))?;

        info!(
            "caravan {} departed {} -> {}: paid {}g, arrives {}",
            committed.id,
            committed.origin,
            committed.destination,
            quote.total,
            quote.arrives_at.to_rfc3339()
        );
        self.notify(
            &committed.owner,
            NoticeKind::Departed,
            json!({
                "caravan_id": committed.id,
                "destination": committed.destination,
                "paid": quote.total,
                "arrives_at": quote.arrives_at,
            }),
        );
        Ok(committed)
    }

    /// IN_PROGRESS -> COMPLETED once arrived; all cargo goes to the owner's inventory.
    pub fn collect(&self, owner: &str, caravan_id: &str) -> Result<CaravanRecord, CaravanError> {
        let caravan = self.get_caravan(owner, caravan_id)?;
        if caravan.status != CaravanStatus::InProgress {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "collect",
                "only travelling caravans can be collected",
            ));
        }
        let now = self.now();
        if !caravan.has_arrived(now) {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "collect",
                "caravan has not arrived yet",
            ));
        }

        let adjustment = credit_cargo(&caravan);
        let mut next = caravan.clone();
        next.cargo.clear();
        next.status = CaravanStatus::Completed;
        next.collected_at = Some(now);
        next.updated_at = now;
        let committed = self.store.commit_caravan(&caravan, next, &adjustment)?;

        info!(
            "caravan {} collected at {}: {} items worth {}g",
            committed.id,
            committed.destination,
            caravan.total_items(),
            caravan.cargo_value()
        );
        self.notify(
            &committed.owner,
            NoticeKind::Collected,
            json!({
                "caravan_id": committed.id,
                "items": caravan.total_items(),
                "cargo_value": caravan.cargo_value(),
            }),
        );
        Ok(committed)
    }

    /// IN_PROGRESS -> FAILED, driven by the scheduler.
    ///
    /// `snapshot` is the record the scheduler rolled against; if anything changed it
    /// since, the commit fails with [`CaravanError::ConcurrencyConflict`].
    pub fn ambush(
        &self,
        snapshot: &CaravanRecord,
        danger_rating: u8,
        chance: f64,
        now: DateTime<Utc>,
    ) -> Result<CaravanRecord, CaravanError> {
        if !snapshot.in_transit(now) {
            return Err(CaravanError::invalid_state(
                &snapshot.id,
                snapshot.status,
                "ambush",
                "caravan is not in transit",
            ));
        }

        let event = AmbushEvent {
            at: now,
            danger_rating,
            chance,
            cargo_value: snapshot.cargo_value(),
        };
        let mut next = snapshot.clone();
        next.status = CaravanStatus::Failed;
        next.ambush = Some(event);
        next.updated_at = now;
        let committed = self
            .store
            .commit_caravan(snapshot, next, &TraderAdjustment::none())?;

        info!(
            "caravan {} ambushed on {} -> {} (danger {}, chance {:.2})",
            committed.id, committed.origin, committed.destination, danger_rating, chance
        );
        self.notify(
            &committed.owner,
            NoticeKind::Ambushed,
            json!({
                "caravan_id": committed.id,
                "danger_rating": danger_rating,
                "cargo_value": committed.cargo_value(),
            }),
        );
        Ok(committed)
    }

    /// The owner's one-time response to an ambush.
    pub fn resolve_ambush(
        &self,
        owner: &str,
        caravan_id: &str,
        choice: AmbushChoice,
    ) -> Result<AmbushResolution, CaravanError> {
        let caravan = self.get_caravan(owner, caravan_id)?;
        if caravan.status != CaravanStatus::Failed {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "resolve ambush for",
                "caravan was not ambushed",
            ));
        }
        if caravan.resolution.is_some() {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "resolve ambush for",
                "ambush is already resolved",
            ));
        }

        let trader = self.store.get_trader(&caravan.owner)?;
        let now = self.now();
        let resolution = {
            let mut rolls = self
                .rolls
                .lock()
                .map_err(|_| CaravanError::Internal("roll source lock poisoned".to_string()))?;
            ambush::resolve(
                choice,
                &caravan.cargo,
                caravan.insurance.as_ref(),
                &self.rules,
                &mut **rolls,
                trader.gold,
                now,
            )?
        };

        let mut next = caravan.clone();
        next.cargo = resolution.remaining_lines.clone();
        next.resolution = Some(resolution.clone());
        next.updated_at = now;
        let adjustment = TraderAdjustment::gold(resolution.insurance_payout - resolution.gold_lost);
        let committed = self.store.commit_caravan(&caravan, next, &adjustment)?;

        info!(
            "caravan {} ambush resolved by {:?}: {} (lost {}g cargo, {}g gold, payout {}g)",
            committed.id,
            choice,
            resolution.outcome,
            resolution.cargo_lost_value,
            resolution.gold_lost,
            resolution.insurance_payout
        );
        self.notify(
            &committed.owner,
            NoticeKind::AmbushResolved,
            json!({
                "caravan_id": committed.id,
                "outcome": resolution.outcome,
                "cargo_lost_value": resolution.cargo_lost_value,
                "gold_lost": resolution.gold_lost,
                "insurance_payout": resolution.insurance_payout,
            }),
        );
        Ok(resolution)
    }

    /// Recover whatever survived a resolved ambush.
    pub fn salvage(&self, owner: &str, caravan_id: &str) -> Result<CaravanRecord, CaravanError> {
        let caravan = self.get_caravan(owner, caravan_id)?;
        if caravan.status != CaravanStatus::Failed || caravan.resolution.is_none() {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "salvage",
                "only resolved ambushes can be salvaged",
            ));
        }
        if caravan.salvaged_at.is_some() {
            return Err(CaravanError::invalid_state(
                &caravan.id,
                caravan.status,
                "salvage",
                "caravan was already salvaged",
            ));
        }

        let now = self.now();
        let adjustment = credit_cargo(&caravan);
        let mut next = caravan.clone();
        next.cargo.clear();
        next.salvaged_at = Some(now);
        next.updated_at = now;
        let committed = self.store.commit_caravan(&caravan, next, &adjustment)?;

        info!(
            "caravan {} salvaged: {} items worth {}g recovered",
            committed.id,
            caravan.total_items(),
            caravan.cargo_value()
        );
        self.notify(
            &committed.owner,
            NoticeKind::Salvaged,
            json!({
                "caravan_id": committed.id,
                "items": caravan.total_items(),
                "cargo_value": caravan.cargo_value(),
            }),
        );
        Ok(committed)
    }

    // ------------------------------------------------------------------------
    // Trader administration
    // ------------------------------------------------------------------------

    pub fn register_trader(&self, username: &str, level: u32, gold: i64) -> Result<TraderRecord, CaravanError> {
        if username.trim().is_empty() {
            return Err(CaravanError::Validation("username is required".to_string()));
        }
        let trader = self
            .store
            .insert_trader(TraderRecord::new(username, level, gold))?;
        debug!("registered trader {} (level {}, {}g)", username, level, gold);
        Ok(trader)
    }

    pub fn grant_gold(&self, username: &str, amount: i64) -> Result<TraderRecord, CaravanError> {
        let trader = self
            .store
            .adjust_trader(username, &TraderAdjustment::gold(amount))?;
        info!("granted {}g to {} (now {}g)", amount, trader.username, trader.gold);
        Ok(trader)
    }

    pub fn grant_items(
        &self,
        username: &str,
        item_id: &str,
        quantity: u32,
    ) -> Result<TraderRecord, CaravanError> {
        let item = self.store.get_item(item_id)?;
        let trader = self.store.adjust_trader(
            username,
            &TraderAdjustment::none().with_item(&item.id, quantity as i64),
        )?;
        info!("granted {}x {} to {}", quantity, item.id, trader.username);
        Ok(trader)
    }
}

/// Adjustment crediting every cargo line back to the owner.
fn credit_cargo(caravan: &CaravanRecord) -> TraderAdjustment {
    caravan
        .cargo
        .iter()
        .fold(TraderAdjustment::none(), |adj, line| {
            adj.with_item(&line.item_id, line.quantity as i64)
        })
}
