//! Fixed catalogs of caravan types, escorts and insurance coverage.
//!
//! The catalogs are configuration, not state: a caravan copies the entry it was
//! created/hired/insured with, so editing the catalog never rewrites caravans in flight.

use serde::{Deserialize, Serialize};

use super::types::{EscortChoice, InsuranceChoice};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaravanType {
    pub key: String,
    pub name: String,
    /// Maximum total items carried
    pub capacity: u32,
    /// Flat departure fee in gold
    pub cost: i64,
    /// Travel time is divided by this
    pub speed_multiplier: f64,
    /// Trader level required to create one
    pub min_level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscortTier {
    pub key: String,
    pub name: String,
    pub cost: i64,
    /// Percentage points subtracted from the ambush chance
    pub safety_bonus_percent: u32,
}

impl EscortTier {
    pub fn to_choice(&self) -> EscortChoice {
        EscortChoice {
            key: self.key.clone(),
            cost: self.cost,
            safety_bonus_percent: self.safety_bonus_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageTier {
    pub key: String,
    pub name: String,
    /// Fraction of cargo value charged at departure
    pub premium_rate: f64,
    /// Fraction of ambush losses reimbursed
    pub payout_rate: f64,
}

impl CoverageTier {
    pub fn to_choice(&self) -> InsuranceChoice {
        InsuranceChoice {
            key: self.key.clone(),
            premium_rate: self.premium_rate,
            payout_rate: self.payout_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub caravan_types: Vec<CaravanType>,
    pub escorts: Vec<EscortTier>,
    pub coverage: Vec<CoverageTier>,
}

impl Catalog {
    pub fn caravan_type(&self, key: &str) -> Option<&CaravanType> {
        let key = key.to_ascii_lowercase();
        self.caravan_types.iter().find(|t| t.key == key)
    }

    pub fn escort(&self, key: &str) -> Option<&EscortTier> {
        let key = key.to_ascii_lowercase();
        self.escorts.iter().find(|e| e.key == key)
    }

    pub fn coverage(&self, key: &str) -> Option<&CoverageTier> {
        let key = key.to_ascii_lowercase();
        self.coverage.iter().find(|c| c.key == key)
    }

    /// Sanity checks used by config validation.
    pub fn validate(&self) -> Result<(), String> {
        fn unique<'a>(kind: &str, keys: impl Iterator<Item = &'a str>) -> Result<(), String> {
            let mut seen = std::collections::HashSet::new();
            for key in keys {
                if key.is_empty() {
                    return Err(format!("{} with empty key", kind));
                }
                if key != key.to_ascii_lowercase() {
                    return Err(format!("{} key '{}' must be lowercase", kind, key));
                }
                if !seen.insert(key) {
                    return Err(format!("duplicate {} key '{}'", kind, key));
                }
            }
            Ok(())
        }

        if self.caravan_types.is_empty() {
            return Err("at least one caravan type is required".to_string());
        }
        unique("caravan type", self.caravan_types.iter().map(|t| t.key.as_str()))?;
        unique("escort", self.escorts.iter().map(|e| e.key.as_str()))?;
        unique("coverage", self.coverage.iter().map(|c| c.key.as_str()))?;

        for t in &self.caravan_types {
            if t.capacity == 0 {
                return Err(format!("caravan type '{}' has zero capacity", t.key));
            }
            if t.speed_multiplier <= 0.0 || !t.speed_multiplier.is_finite() {
                return Err(format!("caravan type '{}' needs a positive speed", t.key));
            }
            if t.cost < 0 {
                return Err(format!("caravan type '{}' has a negative cost", t.key));
            }
        }
        for e in &self.escorts {
            if e.cost < 0 || e.safety_bonus_percent > 100 {
                return Err(format!("escort '{}' is out of range", e.key));
            }
        }
        for c in &self.coverage {
            if !(0.0..=1.0).contains(&c.premium_rate) || !(0.0..=1.0).contains(&c.payout_rate) {
                return Err(format!("coverage '{}' rates must be within 0..=1", c.key));
            }
        }
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            caravan_types: vec![
                CaravanType {
                    key: "cart".to_string(),
                    name: "Hand Cart".to_string(),
                    capacity: 10,
                    cost: 50,
                    speed_multiplier: 1.0,
                    min_level: 1,
                },
                CaravanType {
                    key: "wagon".to_string(),
                    name: "Covered Wagon".to_string(),
                    capacity: 30,
                    cost: 120,
                    speed_multiplier: 0.8,
                    min_level: 3,
                },
                CaravanType {
                    key: "caravan".to_string(),
                    name: "Camel Caravan".to_string(),
                    capacity: 60,
                    cost: 250,
                    speed_multiplier: 1.25,
                    min_level: 6,
                },
            ],
            escorts: vec![
                EscortTier {
                    key: "guards".to_string(),
                    name: "Town Guards".to_string(),
                    cost: 25,
                    safety_bonus_percent: 10,
                },
                EscortTier {
                    key: "mercenaries".to_string(),
                    name: "Mercenary Band".to_string(),
                    cost: 60,
                    safety_bonus_percent: 20,
                },
                EscortTier {
                    key: "knights".to_string(),
                    name: "Knight Errant".to_string(),
                    cost: 120,
                    safety_bonus_percent: 35,
                },
            ],
            coverage: vec![
                CoverageTier {
                    key: "basic".to_string(),
                    name: "Basic Cover".to_string(),
                    premium_rate: 0.05,
                    payout_rate: 0.5,
                },
                CoverageTier {
                    key: "standard".to_string(),
                    name: "Standard Cover".to_string(),
                    premium_rate: 0.10,
                    payout_rate: 0.75,
                },
                CoverageTier {
                    key: "full".to_string(),
                    name: "Full Cover".to_string(),
                    premium_rate: 0.18,
                    payout_rate: 1.0,
                },
            ],
        }
    }
}
