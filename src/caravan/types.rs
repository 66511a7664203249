use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const CARAVAN_SCHEMA_VERSION: u8 = 1;
pub const TRADER_SCHEMA_VERSION: u8 = 1;
pub const ITEM_SCHEMA_VERSION: u8 = 1;
pub const ROUTE_SCHEMA_VERSION: u8 = 1;

// ============================================================================
// Caravan
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaravanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for CaravanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CaravanStatus::Pending => "PENDING",
            CaravanStatus::InProgress => "IN_PROGRESS",
            CaravanStatus::Completed => "COMPLETED",
            CaravanStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// One line of a caravan's cargo. `unit_value` is the market price snapshotted at load time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CargoLine {
    pub item_id: String,
    pub item_name: String,
    pub quantity: u32,
    pub unit_value: i64,
}

impl CargoLine {
    pub fn new(item_id: &str, item_name: &str, quantity: u32, unit_value: i64) -> Self {
        Self {
            item_id: item_id.to_string(),
            item_name: item_name.to_string(),
            quantity,
            unit_value,
        }
    }

    pub fn value(&self) -> i64 {
        self.unit_value.saturating_mul(self.quantity as i64)
    }
}

/// Escort hired for a caravan, copied out of the catalog when hired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscortChoice {
    pub key: String,
    pub cost: i64,
    pub safety_bonus_percent: u32,
}

/// Insurance bought for a caravan, copied out of the catalog when purchased.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsuranceChoice {
    pub key: String,
    pub premium_rate: f64,
    pub payout_rate: f64,
}

/// Bill computed by the departure planner and charged in one debit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartureQuote {
    pub caravan_cost: i64,
    pub escort_cost: i64,
    pub insurance_premium: i64,
    pub total: i64,
    pub cargo_value: i64,
    pub travel_secs: i64,
    pub departs_at: DateTime<Utc>,
    pub arrives_at: DateTime<Utc>,
}

/// Stamped by the scheduler together with the IN_PROGRESS -> FAILED transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmbushEvent {
    pub at: DateTime<Utc>,
    pub danger_rating: u8,
    pub chance: f64,
    pub cargo_value: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AmbushChoice {
    Fight,
    Ransom,
    Flee,
}

impl AmbushChoice {
    /// Parse from a string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fight" | "f" => Some(AmbushChoice::Fight),
            "ransom" | "pay" | "r" => Some(AmbushChoice::Ransom),
            "flee" | "run" | "l" => Some(AmbushChoice::Flee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AmbushOutcome {
    Victory,
    Defeat,
    Ransomed,
    Fled,
}

impl fmt::Display for AmbushOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AmbushOutcome::Victory => "victory",
            AmbushOutcome::Defeat => "defeat",
            AmbushOutcome::Ransomed => "ransomed",
            AmbushOutcome::Fled => "fled",
        };
        f.write_str(label)
    }
}

/// Result of the owner's one-time response to an ambush.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmbushResolution {
    pub choice: AmbushChoice,
    pub outcome: AmbushOutcome,
    pub cargo_value_before: i64,
    pub lost_lines: Vec<CargoLine>,
    pub remaining_lines: Vec<CargoLine>,
    pub cargo_lost_value: i64,
    pub gold_lost: i64,
    pub insurance_payout: i64,
    pub resolved_at: DateTime<Utc>,
}

impl AmbushResolution {
    pub fn remaining_value(&self) -> i64 {
        self.remaining_lines.iter().map(CargoLine::value).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaravanRecord {
    pub id: String,
    pub owner: String,
    pub origin: String,
    pub destination: String,
    pub caravan_type: String,
    /// Capacity, cost and speed are copied from the catalog at creation.
    pub capacity: u32,
    pub departure_cost: i64,
    pub speed_multiplier: f64,
    pub cargo: Vec<CargoLine>,
    pub status: CaravanStatus,
    pub escort: Option<EscortChoice>,
    pub insurance: Option<InsuranceChoice>,
    pub departed_at: Option<DateTime<Utc>>,
    pub arrives_at: Option<DateTime<Utc>>,
    pub departure_bill: Option<DepartureQuote>,
    pub ambush: Option<AmbushEvent>,
    pub resolution: Option<AmbushResolution>,
    pub collected_at: Option<DateTime<Utc>>,
    pub salvaged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed mutation; guards optimistic updates.
    pub version: u64,
    pub schema_version: u8,
}

impl CaravanRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: &str,
        owner: &str,
        origin: &str,
        destination: &str,
        caravan_type: &str,
        capacity: u32,
        departure_cost: i64,
        speed_multiplier: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            owner: owner.to_string(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            caravan_type: caravan_type.to_string(),
            capacity,
            departure_cost,
            speed_multiplier,
            cargo: Vec::new(),
            status: CaravanStatus::Pending,
            escort: None,
            insurance: None,
            departed_at: None,
            arrives_at: None,
            departure_bill: None,
            ambush: None,
            resolution: None,
            collected_at: None,
            salvaged_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
            schema_version: CARAVAN_SCHEMA_VERSION,
        }
    }

    pub fn total_items(&self) -> u32 {
        self.cargo.iter().map(|line| line.quantity).sum()
    }

    pub fn cargo_value(&self) -> i64 {
        self.cargo.iter().map(CargoLine::value).sum()
    }

    /// Still travelling: departed and not yet due.
    pub fn in_transit(&self, now: DateTime<Utc>) -> bool {
        self.status == CaravanStatus::InProgress && self.arrives_at.is_some_and(|at| at > now)
    }

    /// Departed and due (collectable).
    pub fn has_arrived(&self, now: DateTime<Utc>) -> bool {
        self.status == CaravanStatus::InProgress && self.arrives_at.is_some_and(|at| at <= now)
    }

    /// Journey progress in `[0, 1]`. Derived on demand, never stored.
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        let (Some(departed), Some(arrives)) = (self.departed_at, self.arrives_at) else {
            return 0.0;
        };
        let at = match self.status {
            CaravanStatus::Pending => return 0.0,
            CaravanStatus::Completed => return 1.0,
            CaravanStatus::Failed => self.ambush.as_ref().map(|a| a.at).unwrap_or(now),
            CaravanStatus::InProgress => now,
        };
        let total = (arrives - departed).num_milliseconds();
        if total <= 0 {
            return 1.0;
        }
        let elapsed = (at - departed).num_milliseconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn summary(&self, now: DateTime<Utc>) -> CaravanSummary {
        CaravanSummary {
            id: self.id.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            caravan_type: self.caravan_type.clone(),
            status: self.status,
            total_items: self.total_items(),
            capacity: self.capacity,
            cargo_value: self.cargo_value(),
            progress: self.progress(now),
            arrives_at: self.arrives_at,
            awaiting_resolution: self.status == CaravanStatus::Failed && self.resolution.is_none(),
        }
    }
}

/// Listing view of a caravan with derived progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaravanSummary {
    pub id: String,
    pub origin: String,
    pub destination: String,
    pub caravan_type: String,
    pub status: CaravanStatus,
    pub total_items: u32,
    pub capacity: u32,
    pub cargo_value: i64,
    pub progress: f64,
    pub arrives_at: Option<DateTime<Utc>>,
    pub awaiting_resolution: bool,
}

impl CaravanSummary {
    /// Format a compact one-line summary
    pub fn summary_line(&self) -> String {
        let flag = if self.awaiting_resolution {
            " | AMBUSHED"
        } else {
            ""
        };
        format!(
            "{} | {} -> {} | {} | {} | {}/{} | {}g | {:.0}%{}",
            self.id,
            self.origin,
            self.destination,
            self.caravan_type,
            self.status,
            self.total_items,
            self.capacity,
            self.cargo_value,
            self.progress * 100.0,
            flag
        )
    }
}

// ============================================================================
// Traders (wallet + inventory collaborator)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemStack {
    pub item_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraderRecord {
    pub username: String,
    pub level: u32,
    pub gold: i64,
    pub inventory: Vec<ItemStack>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl TraderRecord {
    pub fn new(username: &str, level: u32, gold: i64) -> Self {
        let now = Utc::now();
        Self {
            username: username.to_string(),
            level,
            gold,
            inventory: Vec::new(),
            created_at: now,
            updated_at: now,
            schema_version: TRADER_SCHEMA_VERSION,
        }
    }

    pub fn with_item(mut self, item_id: &str, quantity: u32) -> Self {
        self.credit_item(item_id, quantity);
        self
    }

    pub fn item_quantity(&self, item_id: &str) -> u32 {
        self.inventory
            .iter()
            .find(|s| s.item_id == item_id)
            .map(|s| s.quantity)
            .unwrap_or(0)
    }

    pub fn credit_item(&mut self, item_id: &str, quantity: u32) {
        if quantity == 0 {
            return;
        }
        if let Some(stack) = self.inventory.iter_mut().find(|s| s.item_id == item_id) {
            stack.quantity = stack.quantity.saturating_add(quantity);
        } else {
            self.inventory.push(ItemStack {
                item_id: item_id.to_string(),
                quantity,
            });
        }
    }

    /// Remove `quantity` units; returns the quantity held when there are not enough.
    pub fn debit_item(&mut self, item_id: &str, quantity: u32) -> Result<(), u32> {
        let Some(index) = self.inventory.iter().position(|s| s.item_id == item_id) else {
            return Err(0);
        };
        let held = self.inventory[index].quantity;
        if held < quantity {
            return Err(held);
        }
        if held == quantity {
            self.inventory.remove(index);
        } else {
            self.inventory[index].quantity = held - quantity;
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Market items and routes (read-only collaborators)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    pub id: String,
    pub name: String,
    /// Current market price per unit, in gold.
    pub unit_value: i64,
    pub schema_version: u8,
}

impl ItemRecord {
    pub fn new(id: &str, name: &str, unit_value: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            unit_value,
            schema_version: ITEM_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Route {
    pub from: String,
    pub to: String,
    /// Abstract distance units; travel time is `distance * seconds_per_distance`.
    pub distance: u32,
    /// 1 (safe) to 10 (deadly).
    pub danger_rating: u8,
    pub schema_version: u8,
}

impl Route {
    pub fn new(from: &str, to: &str, distance: u32, danger_rating: u8) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            distance,
            danger_rating,
            schema_version: ROUTE_SCHEMA_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn departed(now: DateTime<Utc>) -> CaravanRecord {
        let mut caravan =
            CaravanRecord::new("c1", "alice", "port", "oasis", "cart", 10, 50, 1.0, now);
        caravan.status = CaravanStatus::InProgress;
        caravan.departed_at = Some(now);
        caravan.arrives_at = Some(now + Duration::hours(2));
        caravan
    }

    #[test]
    fn progress_is_derived_from_timestamps() {
        let now = Utc::now();
        let caravan = departed(now);
        assert_eq!(caravan.progress(now), 0.0);
        assert!((caravan.progress(now + Duration::hours(1)) - 0.5).abs() < 1e-9);
        assert_eq!(caravan.progress(now + Duration::hours(5)), 1.0);
    }

    #[test]
    fn failed_progress_freezes_at_ambush() {
        let now = Utc::now();
        let mut caravan = departed(now);
        caravan.status = CaravanStatus::Failed;
        caravan.ambush = Some(AmbushEvent {
            at: now + Duration::minutes(30),
            danger_rating: 6,
            chance: 0.3,
            cargo_value: 0,
        });
        assert!((caravan.progress(now + Duration::hours(3)) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn transit_and_arrival_are_exclusive() {
        let now = Utc::now();
        let caravan = departed(now);
        let due = now + Duration::hours(2);
        assert!(caravan.in_transit(now));
        assert!(!caravan.has_arrived(now));
        assert!(!caravan.in_transit(due));
        assert!(caravan.has_arrived(due));
    }

    #[test]
    fn trader_debit_removes_empty_stacks() {
        let mut trader = TraderRecord::new("alice", 1, 0).with_item("silk", 3);
        assert_eq!(trader.debit_item("silk", 4), Err(3));
        assert_eq!(trader.debit_item("silk", 3), Ok(()));
        assert!(trader.inventory.is_empty());
        assert_eq!(trader.debit_item("silk", 1), Err(0));
    }

    #[test]
    fn ambush_choice_parsing() {
        assert_eq!(AmbushChoice::parse("FIGHT"), Some(AmbushChoice::Fight));
        assert_eq!(AmbushChoice::parse(" pay "), Some(AmbushChoice::Ransom));
        assert_eq!(AmbushChoice::parse("flee"), Some(AmbushChoice::Flee));
        assert_eq!(AmbushChoice::parse("surrender"), None);
    }
}
