//! # Caravan Engine - Trade Caravans with Travel Risk
//!
//! Players send caravans of cargo between locations. A caravan travels in real
//! time, may be ambushed along the way depending on the route's danger and the
//! escort it hired, and must be collected (or its ambush resolved) by its owner.
//!
//! ## Features
//!
//! - **Cargo Ledger**: Capacity-checked loading and unloading with market prices snapshotted at load time.
//! - **Lifecycle**: `PENDING -> IN_PROGRESS -> COMPLETED | FAILED` with escorts, insurance and one-debit departure bills.
//! - **Travel Risk Scheduler**: One periodic batch job for arrival notices and ambush rolls, single-flight and conflict-safe.
//! - **Ambush Resolution**: Fight, ransom or flee, with insurance payouts on cargo losses.
//! - **Atomic Persistence**: Sled transactions pair every caravan change with its gold/inventory adjustment.
//! - **Deterministic Testing**: Injected clock and roll source.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use caravan_engine::caravan::{CaravanEngine, CaravanStore, Catalog};
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(CaravanStore::open("./data/caravans")?);
//!     let engine = CaravanEngine::new(store, Catalog::default());
//!     for summary in engine.list_caravans("alice")? {
//!         println!("{}", summary.summary_line());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`caravan`] - Data model, storage, lifecycle engine, scheduler and ambush resolver
//! - [`config`] - Configuration loading and validation

pub mod caravan;
pub mod config;
