use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::warn;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::IVec;

use crate::caravan::errors::CaravanError;
use crate::caravan::routes::{RouteKey, RouteLookup};
use crate::caravan::types::{
    CaravanRecord, CaravanStatus, ItemRecord, Route, TraderRecord, CARAVAN_SCHEMA_VERSION,
    ITEM_SCHEMA_VERSION, ROUTE_SCHEMA_VERSION, TRADER_SCHEMA_VERSION,
};

const TREE_CARAVANS: &str = "caravans";
const TREE_TRADERS: &str = "caravan_traders";
const TREE_ITEMS: &str = "caravan_items";
const TREE_ROUTES: &str = "caravan_routes";
const TREE_MAIL: &str = "caravan_mail";
const TREE_ARRIVALS: &str = "caravan_arrivals";

fn next_timestamp_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1000)
}

type TxResult<T> = Result<T, ConflictableTransactionError<CaravanError>>;

fn abort<T>(err: CaravanError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

/// Gold and item deltas applied to a trader in the same transaction as a caravan commit.
/// Positive values credit, negative values debit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraderAdjustment {
    pub gold: i64,
    pub items: Vec<(String, i64)>,
}

impl TraderAdjustment {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn gold(delta: i64) -> Self {
        Self {
            gold: delta,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item_id: &str, delta: i64) -> Self {
        if delta != 0 {
            self.items.push((item_id.to_string(), delta));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.gold == 0 && self.items.is_empty()
    }

    /// Apply to a trader copy; fails without partial effects worth keeping.
    pub fn apply(&self, trader: &mut TraderRecord) -> Result<(), CaravanError> {
        let Some(gold) = trader.gold.checked_add(self.gold) else {
            return Err(CaravanError::Validation(format!(
                "gold balance out of range: {} + {}",
                trader.gold, self.gold
            )));
        };
        if self.gold < 0 && gold < 0 {
            return Err(CaravanError::InsufficientFunds {
                needed: -self.gold,
                available: trader.gold,
            });
        }
        trader.gold = gold;

        for (item_id, delta) in &self.items {
            let quantity = u32::try_from(delta.unsigned_abs()).map_err(|_| {
                CaravanError::Validation(format!("item delta out of range: {}", delta))
            })?;
            if *delta > 0 {
                trader.credit_item(item_id, quantity);
            } else if let Err(available) = trader.debit_item(item_id, quantity) {
                return Err(CaravanError::InsufficientInventory {
                    item_id: item_id.clone(),
                    requested: quantity,
                    available,
                });
            }
        }
        Ok(())
    }
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct CaravanStoreBuilder {
    path: PathBuf,
    temporary: bool,
}

impl CaravanStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    /// Delete the database when the store is dropped.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn open(self) -> Result<CaravanStore, CaravanError> {
        CaravanStore::open_with_options(self.path, self.temporary)
    }
}

/// Sled-backed persistence for caravans plus the trader, market, route and mailbox
/// collaborators the engine consumes.
pub struct CaravanStore {
    db: sled::Db,
    caravans: sled::Tree,
    traders: sled::Tree,
    items: sled::Tree,
    routes: sled::Tree,
    mail: sled::Tree,
    arrivals: sled::Tree,
}

impl CaravanStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaravanError> {
        Self::open_with_options(path, false)
    }

    fn open_with_options<P: AsRef<Path>>(path: P, temporary: bool) -> Result<Self, CaravanError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::Config::new()
            .path(path_ref)
            .temporary(temporary)
            .open()?;
        let caravans = db.open_tree(TREE_CARAVANS)?;
        let traders = db.open_tree(TREE_TRADERS)?;
        let items = db.open_tree(TREE_ITEMS)?;
        let routes = db.open_tree(TREE_ROUTES)?;
        let mail = db.open_tree(TREE_MAIL)?;
        let arrivals = db.open_tree(TREE_ARRIVALS)?;
        Ok(Self {
            db,
            caravans,
            traders,
            items,
            routes,
            mail,
            arrivals,
        })
    }

    fn caravan_key(id: &str) -> Vec<u8> {
        format!("caravans:{}", id).into_bytes()
    }

    fn trader_key(username: &str) -> Vec<u8> {
        format!("traders:{}", username.to_ascii_lowercase()).into_bytes()
    }

    fn item_key(item_id: &str) -> Vec<u8> {
        format!("items:{}", item_id.to_ascii_lowercase()).into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CaravanError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CaravanError> {
        Ok(bincode::deserialize::<T>(bytes)?)
    }

    fn decode_caravan(bytes: &[u8]) -> Result<CaravanRecord, CaravanError> {
        let record: CaravanRecord = Self::deserialize(bytes)?;
        if record.schema_version != CARAVAN_SCHEMA_VERSION {
            return Err(CaravanError::SchemaMismatch {
                entity: "caravan",
                expected: CARAVAN_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    fn decode_trader(bytes: &[u8]) -> Result<TraderRecord, CaravanError> {
        let record: TraderRecord = Self::deserialize(bytes)?;
        if record.schema_version != TRADER_SCHEMA_VERSION {
            return Err(CaravanError::SchemaMismatch {
                entity: "trader",
                expected: TRADER_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    // ------------------------------------------------------------------------
    // Caravans
    // ------------------------------------------------------------------------

    /// Persist a freshly created caravan. Fails if the id is already taken.
    pub fn insert_caravan(&self, mut caravan: CaravanRecord) -> Result<CaravanRecord, CaravanError> {
        caravan.schema_version = CARAVAN_SCHEMA_VERSION;
        caravan.version = 0;
        let key = Self::caravan_key(&caravan.id);
        let bytes = Self::serialize(&caravan)?;
        if self
            .caravans
            .compare_and_swap(key, None::<&[u8]>, Some(bytes))?
            .is_err()
        {
            return Err(CaravanError::ConcurrencyConflict(caravan.id));
        }
        self.caravans.flush()?;
        Ok(caravan)
    }

    /// Fetch a caravan record by id.
    pub fn get_caravan(&self, id: &str) -> Result<CaravanRecord, CaravanError> {
        let Some(bytes) = self.caravans.get(Self::caravan_key(id))? else {
            return Err(CaravanError::NotFound(format!("caravan: {}", id)));
        };
        Self::decode_caravan(&bytes)
    }

    fn scan_caravans(
        &self,
        mut keep: impl FnMut(&CaravanRecord) -> bool,
    ) -> Result<Vec<CaravanRecord>, CaravanError> {
        let mut out = Vec::new();
        for entry in self.caravans.scan_prefix(b"caravans:") {
            let (key, value) = entry?;
            match Self::decode_caravan(&value) {
                Ok(record) if keep(&record) => out.push(record),
                Ok(_) => {}
                Err(e) => warn!(
                    "skipping unreadable caravan record {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(out)
    }

    /// All caravans owned by `owner`, oldest first.
    pub fn list_caravans_for_owner(&self, owner: &str) -> Result<Vec<CaravanRecord>, CaravanError> {
        let mut caravans = self.scan_caravans(|c| c.owner.eq_ignore_ascii_case(owner))?;
        caravans.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(caravans)
    }

    /// All caravans currently in `status`.
    pub fn list_caravans_with_status(
        &self,
        status: CaravanStatus,
    ) -> Result<Vec<CaravanRecord>, CaravanError> {
        self.scan_caravans(|c| c.status == status)
    }

    /// Commit `next` only if the stored caravan still has `expected.version`.
    ///
    /// `adjustment` is applied to the owner's wallet and inventory inside the same
    /// transaction, so the caravan and the trader change together or not at all.
    /// A version mismatch aborts with [`CaravanError::ConcurrencyConflict`].
    pub fn commit_caravan(
        &self,
        expected: &CaravanRecord,
        mut next: CaravanRecord,
        adjustment: &TraderAdjustment,
    ) -> Result<CaravanRecord, CaravanError> {
        next.version = expected.version + 1;
        next.schema_version = CARAVAN_SCHEMA_VERSION;
        let key = Self::caravan_key(&next.id);
        let bytes = Self::serialize(&next)?;
        let trader_key = Self::trader_key(&next.owner);

        let result: Result<(), TransactionError<CaravanError>> = (&self.caravans, &self.traders)
            .transaction(|(caravans, traders)| {
                let current = match caravans.get(key.as_slice())? {
                    Some(stored) => match Self::decode_caravan(&stored) {
                        Ok(record) => record,
                        Err(e) => return abort(e),
                    },
                    None => return abort(CaravanError::NotFound(format!("caravan: {}", next.id))),
                };
                if current.version != expected.version {
                    return abort(CaravanError::ConcurrencyConflict(next.id.clone()));
                }

                if !adjustment.is_empty() {
                    let Some(stored) = traders.get(trader_key.as_slice())? else {
                        return abort(CaravanError::NotFound(format!("trader: {}", next.owner)));
                    };
                    let mut trader = match Self::decode_trader(&stored) {
                        Ok(trader) => trader,
                        Err(e) => return abort(e),
                    };
                    if let Err(e) = adjustment.apply(&mut trader) {
                        return abort(e);
                    }
                    trader.touch();
                    let encoded = match Self::serialize(&trader) {
                        Ok(encoded) => encoded,
                        Err(e) => return abort(e),
                    };
                    traders.insert(trader_key.as_slice(), encoded)?;
                }

                caravans.insert(key.as_slice(), bytes.as_slice())?;
                Ok(())
            });
        result?;
        self.caravans.flush()?;
        Ok(next)
    }

    // ------------------------------------------------------------------------
    // Traders (wallet + inventory)
    // ------------------------------------------------------------------------

    /// Insert or update a trader record.
    pub fn put_trader(&self, mut trader: TraderRecord) -> Result<(), CaravanError> {
        trader.schema_version = TRADER_SCHEMA_VERSION;
        trader.touch();
        let key = Self::trader_key(&trader.username);
        let bytes = Self::serialize(&trader)?;
        self.traders.insert(key, bytes)?;
        self.traders.flush()?;
        Ok(())
    }

    /// Create a trader record, refusing to replace one that already exists.
    pub fn insert_trader(&self, mut trader: TraderRecord) -> Result<TraderRecord, CaravanError> {
        trader.schema_version = TRADER_SCHEMA_VERSION;
        trader.touch();
        let key = Self::trader_key(&trader.username);
        let bytes = Self::serialize(&trader)?;
        if self
            .traders
            .compare_and_swap(key, None::<&[u8]>, Some(bytes))?
            .is_err()
        {
            return Err(CaravanError::Validation(format!(
                "trader {} already exists",
                trader.username
            )));
        }
        self.traders.flush()?;
        Ok(trader)
    }

    /// Fetch a trader record by username.
    pub fn get_trader(&self, username: &str) -> Result<TraderRecord, CaravanError> {
        let Some(bytes) = self.traders.get(Self::trader_key(username))? else {
            return Err(CaravanError::NotFound(format!("trader: {}", username)));
        };
        Self::decode_trader(&bytes)
    }

    /// List all trader usernames currently stored.
    pub fn list_trader_ids(&self) -> Result<Vec<String>, CaravanError> {
        let mut ids = Vec::new();
        for entry in self.traders.scan_prefix(b"traders:") {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key);
            if let Some(username) = text.strip_prefix("traders:") {
                ids.push(username.to_string());
            }
        }
        Ok(ids)
    }

    /// Atomically apply a wallet/inventory adjustment outside of any caravan change.
    pub fn adjust_trader(
        &self,
        username: &str,
        adjustment: &TraderAdjustment,
    ) -> Result<TraderRecord, CaravanError> {
        let key = Self::trader_key(username);
        let result: Result<TraderRecord, TransactionError<CaravanError>> =
            self.traders.transaction(|traders| {
                let Some(stored) = traders.get(key.as_slice())? else {
                    return abort(CaravanError::NotFound(format!("trader: {}", username)));
                };
                let mut trader = match Self::decode_trader(&stored) {
                    Ok(trader) => trader,
                    Err(e) => return abort(e),
                };
                if let Err(e) = adjustment.apply(&mut trader) {
                    return abort(e);
                }
                trader.touch();
                let encoded = match Self::serialize(&trader) {
                    Ok(encoded) => encoded,
                    Err(e) => return abort(e),
                };
                traders.insert(key.as_slice(), encoded)?;
                Ok(trader)
            });
        let trader = result?;
        self.traders.flush()?;
        Ok(trader)
    }

    // ------------------------------------------------------------------------
    // Market items
    // ------------------------------------------------------------------------

    /// Insert or update a market item and its current price.
    pub fn put_item(&self, mut item: ItemRecord) -> Result<(), CaravanError> {
        item.schema_version = ITEM_SCHEMA_VERSION;
        let key = Self::item_key(&item.id);
        let bytes = Self::serialize(&item)?;
        self.items.insert(key, bytes)?;
        self.items.flush()?;
        Ok(())
    }

    pub fn get_item(&self, item_id: &str) -> Result<ItemRecord, CaravanError> {
        let Some(bytes) = self.items.get(Self::item_key(item_id))? else {
            return Err(CaravanError::NotFound(format!("item: {}", item_id)));
        };
        let record: ItemRecord = Self::deserialize(&bytes)?;
        if record.schema_version != ITEM_SCHEMA_VERSION {
            return Err(CaravanError::SchemaMismatch {
                entity: "item",
                expected: ITEM_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    // ------------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------------

    /// Insert or update a route (stored once for both directions).
    pub fn put_route(&self, mut route: Route) -> Result<(), CaravanError> {
        if !(1..=10).contains(&route.danger_rating) {
            return Err(CaravanError::Validation(format!(
                "danger rating must be 1-10, got {}",
                route.danger_rating
            )));
        }
        route.schema_version = ROUTE_SCHEMA_VERSION;
        let key = RouteKey::of(&route).storage_key();
        let bytes = Self::serialize(&route)?;
        self.routes.insert(key, bytes)?;
        self.routes.flush()?;
        Ok(())
    }

    fn load_route(&self, key: &RouteKey) -> Result<Option<Route>, CaravanError> {
        let Some(bytes) = self.routes.get(key.storage_key())? else {
            return Ok(None);
        };
        let route: Route = Self::deserialize(&bytes)?;
        if route.schema_version != ROUTE_SCHEMA_VERSION {
            return Err(CaravanError::SchemaMismatch {
                entity: "route",
                expected: ROUTE_SCHEMA_VERSION,
                found: route.schema_version,
            });
        }
        Ok(Some(route))
    }

    // ------------------------------------------------------------------------
    // Mailbox and arrival markers
    // ------------------------------------------------------------------------

    /// Store a notice payload for a trader.
    pub fn enqueue_mail(&self, username: &str, body: &str) -> Result<(), CaravanError> {
        let key = format!(
            "mail:{}:{:020}:{:020}",
            username.to_ascii_lowercase(),
            next_timestamp_nanos(),
            self.db.generate_id()?
        )
        .into_bytes();
        self.mail.insert(key, body.as_bytes())?;
        self.mail.flush()?;
        Ok(())
    }

    /// Remove and return every queued notice for a trader, oldest first.
    pub fn drain_mail(&self, username: &str) -> Result<Vec<String>, CaravanError> {
        let prefix = format!("mail:{}:", username.to_ascii_lowercase());
        let entries: Vec<(IVec, IVec)> = self
            .mail
            .scan_prefix(prefix.as_bytes())
            .collect::<Result<_, _>>()?;
        let mut bodies = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            self.mail.remove(key)?;
            bodies.push(String::from_utf8_lossy(&value).into_owned());
        }
        self.mail.flush()?;
        Ok(bodies)
    }

    /// Record that the arrival of `caravan_id` was announced. Returns false if it
    /// already was. Never touches the caravan record itself.
    pub fn mark_arrival_notified(&self, caravan_id: &str) -> Result<bool, CaravanError> {
        let key = format!("arrivals:{}", caravan_id).into_bytes();
        let stamp = next_timestamp_nanos().to_be_bytes().to_vec();
        let swapped = self
            .arrivals
            .compare_and_swap(key, None::<&[u8]>, Some(stamp))?
            .is_ok();
        if swapped {
            self.arrivals.flush()?;
        }
        Ok(swapped)
    }
}

impl RouteLookup for CaravanStore {
    fn get_route(&self, from: &str, to: &str) -> Result<Option<Route>, CaravanError> {
        self.load_route(&RouteKey::new(from, to))
    }

    fn get_routes(&self, keys: &[RouteKey]) -> Result<HashMap<RouteKey, Route>, CaravanError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if found.contains_key(key) {
                continue;
            }
            if let Some(route) = self.load_route(key)? {
                found.insert(key.clone(), route);
            }
        }
        Ok(found)
    }
}
