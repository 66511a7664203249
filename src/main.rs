//! Binary entrypoint for the caravan engine CLI.
//!
//! Commands:
//! - `init` - write a starter `caravans.toml` and create the data directory
//! - `run` - run the travel risk scheduler until Ctrl-C
//! - `tick` - run one scheduler pass now and print the report
//! - `route add`, `item add`, `trader add|grant-gold|grant-item` - seed collaborators
//! - `create`, `load`, `unload`, `escort`, `insure`, `quote`, `depart`, `collect`,
//!   `resolve`, `salvage`, `list`, `notices` - act as `--user`
//!
//! See the library crate docs for module-level details: `caravan_engine::`.
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use caravan_engine::caravan::{
    cargo::format_manifest, drain_notices, start_scheduler, AmbushChoice, CaravanEngine,
    CaravanStore, ItemRecord, Route, TravelRiskScheduler,
};
use caravan_engine::config::Config;

#[derive(Parser)]
#[command(name = "caravan-engine")]
#[command(about = "Trade caravans with travel risk, ambushes and insurance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "caravans.toml", global = true)]
    config: String,

    /// Trader acting on caravans
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Run the travel risk scheduler until interrupted
    Run,
    /// Run one scheduler tick now
    Tick,
    /// Manage routes
    #[command(subcommand)]
    Route(RouteCommand),
    /// Manage market items
    #[command(subcommand)]
    Item(ItemCommand),
    /// Manage traders
    #[command(subcommand)]
    Trader(TraderCommand),
    /// Create a caravan
    Create {
        from: String,
        to: String,
        /// Caravan type key (cart, wagon, caravan)
        #[arg(default_value = "cart")]
        kind: String,
    },
    /// Load cargo from your inventory
    Load {
        caravan: String,
        item: String,
        quantity: u32,
    },
    /// Unload cargo back into your inventory
    Unload {
        caravan: String,
        item: String,
        quantity: u32,
    },
    /// Hire an escort
    Escort { caravan: String, tier: String },
    /// Buy insurance coverage
    Insure { caravan: String, coverage: String },
    /// Preview the departure bill
    Quote { caravan: String },
    /// Send a caravan on its way
    Depart { caravan: String },
    /// Collect an arrived caravan
    Collect { caravan: String },
    /// Respond to an ambush: fight, ransom or flee
    Resolve { caravan: String, choice: String },
    /// Recover the surviving cargo of a resolved ambush
    Salvage { caravan: String },
    /// List your caravans
    List,
    /// Show and clear your pending notices
    Notices,
}

#[derive(Subcommand)]
enum RouteCommand {
    /// Add or replace a route
    Add {
        from: String,
        to: String,
        distance: u32,
        /// 1 (safe) to 10 (deadly)
        danger: u8,
    },
}

#[derive(Subcommand)]
enum ItemCommand {
    /// Add or reprice a market item
    Add { id: String, name: String, value: i64 },
}

#[derive(Subcommand)]
enum TraderCommand {
    /// Register a trader
    Add {
        username: String,
        #[arg(short, long, default_value_t = 1)]
        level: u32,
        #[arg(short, long, default_value_t = 0)]
        gold: i64,
    },
    /// Credit (or debit, if negative) gold
    GrantGold {
        username: String,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },
    /// Credit items to a trader's inventory
    GrantItem {
        username: String,
        item: String,
        quantity: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        info!("Initializing caravan configuration");
        Config::create_default(&cli.config).await?;
        let config = Config::load(&cli.config).await?;
        CaravanStore::open(&config.storage.data_dir)
            .with_context(|| format!("opening store at {}", config.storage.data_dir))?;
        info!(
            "Configuration file created at {}, data in {}",
            cli.config, config.storage.data_dir
        );
        return Ok(());
    }

    let config = load_config(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    let engine = build_engine(&config)?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Run => {
            if !config.scheduler.enabled {
                warn!("scheduler.enabled is false; nothing to run");
                return Ok(());
            }
            info!("Starting caravan engine v{}", env!("CARGO_PKG_VERSION"));
            let scheduler = Arc::new(TravelRiskScheduler::new(engine));
            let handle = start_scheduler(scheduler, config.scheduler.clone());
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            if let Some(stats) = handle.snapshot().await {
                info!(
                    "scheduler ran {} ticks: {} arrivals, {} ambushes, {} failed ticks",
                    stats.ticks, stats.arrivals_total, stats.ambushes_total, stats.failed_ticks
                );
            }
            handle.shutdown().await;
        }
        Commands::Tick => {
            let scheduler = TravelRiskScheduler::new(engine);
            let report = tokio::task::spawn_blocking(move || scheduler.tick()).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Route(RouteCommand::Add {
            from,
            to,
            distance,
            danger,
        }) => {
            engine
                .store()
                .put_route(Route::new(&from, &to, distance, danger))?;
            println!("Route {} <-> {}: distance {}, danger {}", from, to, distance, danger);
        }
        Commands::Item(ItemCommand::Add { id, name, value }) => {
            if value < 0 {
                return Err(anyhow!("item value must not be negative"));
            }
            engine.store().put_item(ItemRecord::new(&id, &name, value))?;
            println!("Item {} ({}) priced at {}g", id, name, value);
        }
        Commands::Trader(TraderCommand::Add {
            username,
            level,
            gold,
        }) => {
            let trader = engine.register_trader(&username, level, gold)?;
            println!(
                "Trader {} (level {}) with {}g",
                trader.username, trader.level, trader.gold
            );
        }
        Commands::Trader(TraderCommand::GrantGold { username, amount }) => {
            let trader = engine.grant_gold(&username, amount)?;
            println!("{} now has {}g", trader.username, trader.gold);
        }
        Commands::Trader(TraderCommand::GrantItem {
            username,
            item,
            quantity,
        }) => {
            let trader = engine.grant_items(&username, &item, quantity)?;
            println!(
                "{} now holds {}x {}",
                trader.username,
                trader.item_quantity(&item),
                item
            );
        }
        Commands::Create { from, to, kind } => {
            let user = require_user(&cli.user)?;
            let caravan = engine.create_caravan(user, &from, &to, &kind)?;
            println!(
                "Created {} {}: {} -> {} (capacity {})",
                caravan.caravan_type, caravan.id, caravan.origin, caravan.destination, caravan.capacity
            );
        }
        Commands::Load {
            caravan,
            item,
            quantity,
        } => {
            let user = require_user(&cli.user)?;
            let record = engine.load_cargo(user, &caravan, &item, quantity)?;
            print_lines(&format_manifest(&record));
        }
        Commands::Unload {
            caravan,
            item,
            quantity,
        } => {
            let user = require_user(&cli.user)?;
            let record = engine.unload_cargo(user, &caravan, &item, quantity)?;
            print_lines(&format_manifest(&record));
        }
        Commands::Escort { caravan, tier } => {
            let user = require_user(&cli.user)?;
            let record = engine.hire_escort(user, &caravan, &tier)?;
            if let Some(escort) = record.escort {
                println!(
                    "Hired {}: -{}% ambush chance, {}g due at departure",
                    escort.key, escort.safety_bonus_percent, escort.cost
                );
            }
        }
        Commands::Insure { caravan, coverage } => {
            let user = require_user(&cli.user)?;
            let record = engine.purchase_insurance(user, &caravan, &coverage)?;
            if let Some(policy) = record.insurance {
                println!(
                    "Insured with {}: {:.0}% premium, {:.0}% payout",
                    policy.key,
                    policy.premium_rate * 100.0,
                    policy.payout_rate * 100.0
                );
            }
        }
        Commands::Quote { caravan } => {
            let user = require_user(&cli.user)?;
            let quote = engine.quote_departure(user, &caravan)?;
            println!(
                "Caravan {}g + escort {}g + insurance {}g = {}g",
                quote.caravan_cost, quote.escort_cost, quote.insurance_premium, quote.total
            );
            println!(
                "Cargo worth {}g, travel {}s, arrives {}",
                quote.cargo_value,
                quote.travel_secs,
                quote.arrives_at.to_rfc3339()
            );
        }
        Commands::Depart { caravan } => {
            let user = require_user(&cli.user)?;
            let record = engine.depart(user, &caravan)?;
            let paid = record.departure_bill.as_ref().map(|b| b.total).unwrap_or(0);
            println!(
                "Departed for {}: paid {}g, arrives {}",
                record.destination,
                paid,
                record
                    .arrives_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default()
            );
        }
        Commands::Collect { caravan } => {
            let user = require_user(&cli.user)?;
            let record = engine.collect(user, &caravan)?;
            println!("Collected caravan {} at {}", record.id, record.destination);
        }
        Commands::Resolve { caravan, choice } => {
            let user = require_user(&cli.user)?;
            let choice = AmbushChoice::parse(&choice)
                .ok_or_else(|| anyhow!("choice must be fight, ransom or flee"))?;
            let resolution = engine.resolve_ambush(user, &caravan, choice)?;
            println!(
                "Outcome: {} | cargo lost {}g | gold lost {}g | insurance paid {}g | {}g remaining",
                resolution.outcome,
                resolution.cargo_lost_value,
                resolution.gold_lost,
                resolution.insurance_payout,
                resolution.remaining_value()
            );
        }
        Commands::Salvage { caravan } => {
            let user = require_user(&cli.user)?;
            let record = engine.salvage(user, &caravan)?;
            println!("Salvaged caravan {}", record.id);
        }
        Commands::List => {
            let user = require_user(&cli.user)?;
            let caravans = engine.list_caravans(user)?;
            if caravans.is_empty() {
                println!("No caravans.");
            }
            for summary in caravans {
                println!("{}", summary.summary_line());
            }
        }
        Commands::Notices => {
            let user = require_user(&cli.user)?;
            let notices = drain_notices(engine.store(), user)?;
            if notices.is_empty() {
                println!("No notices.");
            }
            for notice in notices {
                println!(
                    "{} [{}] {}",
                    notice.sent_at.format("%Y-%m-%d %H:%M"),
                    notice.kind,
                    notice.payload
                );
            }
        }
    }

    Ok(())
}

async fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).await
    } else {
        Ok(Config::default())
    }
}

fn build_engine(config: &Config) -> Result<Arc<CaravanEngine>> {
    let store = CaravanStore::open(&config.storage.data_dir)
        .with_context(|| format!("opening store at {}", config.storage.data_dir))?;
    let engine = CaravanEngine::new(Arc::new(store), config.catalog())
        .with_rules(config.risk.clone())
        .with_seconds_per_distance(config.travel.seconds_per_distance);
    Ok(Arc::new(engine))
}

fn require_user(user: &Option<String>) -> Result<&str> {
    user.as_deref()
        .ok_or_else(|| anyhow!("--user is required for this command"))
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|cfg| cfg.logging.file.clone());
    let opened = log_file.as_ref().and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    if let Some(f) = opened {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Only echo to the console when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
