//! # Configuration Management Module
//!
//! Configuration for the caravan engine and its scheduler, loaded from a TOML file.
//! Every section has defaults, so a partial file (or an empty one) is valid.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - Sled database location
//! - [`SchedulerConfig`] - Travel risk tick period
//! - [`TravelConfig`] - Distance to travel time conversion
//! - [`RiskRules`] - Ambush probabilities and loss fractions
//! - [`LoggingConfig`] - Log level and optional log file
//! - `caravan_types`, `escorts`, `coverage` - the fixed catalogs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use caravan_engine::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("caravans.toml").await?;
//!     let config = Config::load("caravans.toml").await?;
//!     println!("Tick every {}s", config.scheduler.tick_interval_secs);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data/caravans"
//!
//! [scheduler]
//! enabled = true
//! tick_interval_secs = 300
//!
//! [risk]
//! base_rate_per_danger = 0.05
//! rng_seed = 42
//!
//! [[caravan_types]]
//! key = "cart"
//! name = "Hand Cart"
//! capacity = 10
//! cost = 50
//! speed_multiplier = 1.0
//! min_level = 1
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::caravan::{
    Catalog, CaravanType, CoverageTier, EscortTier, RiskRules, SchedulerConfig,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/caravans".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TravelConfig {
    /// Base travel time per unit of route distance, before the caravan's speed multiplier.
    pub seconds_per_distance: u64,
}

impl Default for TravelConfig {
    fn default() -> Self {
        Self {
            seconds_per_distance: crate::caravan::engine::DEFAULT_SECONDS_PER_DISTANCE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("caravans.log".to_string()),
        }
    }
}

fn default_caravan_types() -> Vec<CaravanType> {
    Catalog::default().caravan_types
}

fn default_escorts() -> Vec<EscortTier> {
    Catalog::default().escorts
}

fn default_coverage() -> Vec<CoverageTier> {
    Catalog::default().coverage
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub travel: TravelConfig,
    #[serde(default)]
    pub risk: RiskRules,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_caravan_types")]
    pub caravan_types: Vec<CaravanType>,
    #[serde(default = "default_escorts")]
    pub escorts: Vec<EscortTier>,
    #[serde(default = "default_coverage")]
    pub coverage: Vec<CoverageTier>,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn catalog(&self) -> Catalog {
        Catalog {
            caravan_types: self.caravan_types.clone(),
            escorts: self.escorts.clone(),
            coverage: self.coverage.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(anyhow!("scheduler.tick_interval_secs must be positive"));
        }
        if self.travel.seconds_per_distance == 0 {
            return Err(anyhow!("travel.seconds_per_distance must be positive"));
        }
        self.risk.validate().map_err(|e| anyhow!(e))?;
        self.catalog().validate().map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let catalog = Catalog::default();
        Config {
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
            travel: TravelConfig::default(),
            risk: RiskRules::default(),
            logging: LoggingConfig::default(),
            caravan_types: catalog.caravan_types,
            escorts: catalog.escorts,
            coverage: catalog.coverage,
        }
    }
}
