//! Departure planning: the bill charged at departure and the arrival time.

use chrono::{DateTime, Duration, Utc};

use super::cargo::portion;
use super::errors::CaravanError;
use super::types::{CaravanRecord, CaravanStatus, DepartureQuote, Route};

/// Seconds of travel for `distance` at `speed_multiplier`.
///
/// `distance * seconds_per_distance / speed_multiplier`, rounded to whole seconds.
pub fn travel_seconds(distance: u32, seconds_per_distance: u64, speed_multiplier: f64) -> i64 {
    let base = distance as f64 * seconds_per_distance as f64;
    if speed_multiplier <= 0.0 {
        return base.round() as i64;
    }
    (base / speed_multiplier).round() as i64
}

/// Build the departure bill for a PENDING caravan without touching any state.
pub fn plan_departure(
    caravan: &CaravanRecord,
    route: &Route,
    seconds_per_distance: u64,
    now: DateTime<Utc>,
) -> Result<DepartureQuote, CaravanError> {
    if caravan.status != CaravanStatus::Pending {
        return Err(CaravanError::invalid_state(
            &caravan.id,
            caravan.status,
            "depart",
            "only pending caravans can depart",
        ));
    }
    if caravan.total_items() == 0 {
        return Err(CaravanError::invalid_state(
            &caravan.id,
            caravan.status,
            "depart",
            "caravan has no cargo",
        ));
    }

    let cargo_value = caravan.cargo_value();
    let escort_cost = caravan.escort.as_ref().map(|e| e.cost).unwrap_or(0);
    let insurance_premium = caravan
        .insurance
        .as_ref()
        .map(|i| portion(cargo_value, i.premium_rate))
        .unwrap_or(0);
    let travel_secs = travel_seconds(route.distance, seconds_per_distance, caravan.speed_multiplier);

    Ok(DepartureQuote {
        caravan_cost: caravan.departure_cost,
        escort_cost,
        insurance_premium,
        total: caravan.departure_cost + escort_cost + insurance_premium,
        cargo_value,
        travel_secs,
        departs_at: now,
        arrives_at: now + Duration::seconds(travel_secs),
    })
}
