//! Ambush resolver: turns the owner's response into cargo and gold effects.
//!
//! The resolver is pure. It works on a copy of the cargo ledger and reports what the
//! engine must commit; the engine applies the result in one transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cargo::{portion, take_value, total_value};
use super::errors::CaravanError;
use super::risk::RollSource;
use super::types::{AmbushChoice, AmbushOutcome, AmbushResolution, CargoLine, InsuranceChoice};

/// Fixed probabilities and fractions of the ambush model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskRules {
    /// Ambush chance added per danger point before escort mitigation.
    pub base_rate_per_danger: f64,
    pub fight_success_chance: f64,
    pub fight_loss_fraction: f64,
    pub ransom_fraction: f64,
    pub flee_loss_fraction: f64,
    /// Seeds the roll source for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            base_rate_per_danger: 0.05,
            fight_success_chance: 0.40,
            fight_loss_fraction: 0.40,
            ransom_fraction: 0.30,
            flee_loss_fraction: 0.20,
            rng_seed: None,
        }
    }
}

impl RiskRules {
    pub fn validate(&self) -> Result<(), String> {
        let rates = [
            ("base_rate_per_danger", self.base_rate_per_danger),
            ("fight_success_chance", self.fight_success_chance),
            ("fight_loss_fraction", self.fight_loss_fraction),
            ("ransom_fraction", self.ransom_fraction),
            ("flee_loss_fraction", self.flee_loss_fraction),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("risk.{} must be within [0, 1], got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Resolve one ambush response against the current cargo.
///
/// `owner_gold` is only consulted for a ransom; an unaffordable ransom fails with
/// [`CaravanError::InsufficientFunds`] and nothing is resolved.
pub fn resolve(
    choice: AmbushChoice,
    cargo: &[CargoLine],
    insurance: Option<&InsuranceChoice>,
    rules: &RiskRules,
    rolls: &mut dyn RollSource,
    owner_gold: i64,
    now: DateTime<Utc>,
) -> Result<AmbushResolution, CaravanError> {
    let cargo_value_before = total_value(cargo);
    let mut remaining = cargo.to_vec();
    let mut gold_lost = 0;

    let (outcome, lost_lines) = match choice {
        AmbushChoice::Fight => {
            if rolls.roll() < rules.fight_success_chance {
                (AmbushOutcome::Victory, Vec::new())
            } else {
                let target = portion(cargo_value_before, rules.fight_loss_fraction);
                (AmbushOutcome::Defeat, take_value(&mut remaining, target))
            }
        }
        AmbushChoice::Ransom => {
            let ransom = portion(cargo_value_before, rules.ransom_fraction);
            if ransom > owner_gold {
                return Err(CaravanError::InsufficientFunds {
                    needed: ransom,
                    available: owner_gold,
                });
            }
            gold_lost = ransom;
            (AmbushOutcome::Ransomed, Vec::new())
        }
        AmbushChoice::Flee => {
            let target = portion(cargo_value_before, rules.flee_loss_fraction);
            (AmbushOutcome::Fled, take_value(&mut remaining, target))
        }
    };

    let cargo_lost_value = total_value(&lost_lines);
    let insurance_payout = match insurance {
        Some(policy) if cargo_lost_value > 0 => portion(cargo_lost_value, policy.payout_rate),
        _ => 0,
    };

    Ok(AmbushResolution {
        choice,
        outcome,
        cargo_value_before,
        lost_lines,
        remaining_lines: remaining,
        cargo_lost_value,
        gold_lost,
        insurance_payout,
        resolved_at: now,
    })
}
