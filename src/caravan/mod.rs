//! Caravan data model, persistence and travel risk.
//! Caravans carry cargo between two locations over real time; the scheduler
//! notices arrivals and rolls ambushes, and owners resolve the aftermath.

pub mod ambush;
pub mod cargo;
pub mod catalog;
pub mod clock;
pub mod departure;
pub mod engine;
pub mod errors;
pub mod notify;
pub mod risk;
pub mod routes;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use ambush::{resolve as resolve_ambush_choice, RiskRules};
pub use cargo::{check_capacity, format_manifest, load_line, portion, take_value, unload_line};
pub use catalog::{Catalog, CaravanType, CoverageTier, EscortTier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use departure::{plan_departure, travel_seconds};
pub use engine::CaravanEngine;
pub use errors::CaravanError;
pub use notify::{
    drain_notices, ChannelNotifier, MailboxNotifier, Notice, NoticeKind, Notifier, NullNotifier,
    RecordingNotifier,
};
pub use risk::{ambush_chance, RandomRolls, RollSource, ScriptedRolls};
pub use routes::{RouteKey, RouteLookup, StaticRoutes};
pub use scheduler::{
    start_scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats, TickReport,
    TravelRiskScheduler,
};
pub use storage::{CaravanStore, CaravanStoreBuilder, TraderAdjustment};
pub use types::*;
