//! Route lookup seam. Routes are read-only to the engine and direction-agnostic:
//! `port -> oasis` and `oasis -> port` are the same road.

use std::collections::HashMap;

use super::errors::CaravanError;
use super::types::Route;

/// Direction-agnostic identity of a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    a: String,
    b: String,
}

impl RouteKey {
    pub fn new(from: &str, to: &str) -> Self {
        let from = from.to_ascii_lowercase();
        let to = to.to_ascii_lowercase();
        if from <= to {
            Self { a: from, b: to }
        } else {
            Self { a: to, b: from }
        }
    }

    pub fn of(route: &Route) -> Self {
        Self::new(&route.from, &route.to)
    }

    pub fn storage_key(&self) -> Vec<u8> {
        format!("routes:{}|{}", self.a, self.b).into_bytes()
    }
}

pub trait RouteLookup: Send + Sync {
    /// Route between two locations in either direction.
    fn get_route(&self, from: &str, to: &str) -> Result<Option<Route>, CaravanError>;

    /// Resolve many routes in one query. Missing routes are absent from the map.
    fn get_routes(&self, keys: &[RouteKey]) -> Result<HashMap<RouteKey, Route>, CaravanError>;
}

/// Fixed in-memory route table.
#[derive(Debug, Clone, Default)]
pub struct StaticRoutes {
    routes: HashMap<RouteKey, Route>,
}

impl StaticRoutes {
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            routes: routes.into_iter().map(|r| (RouteKey::of(&r), r)).collect(),
        }
    }
}

impl RouteLookup for StaticRoutes {
    fn get_route(&self, from: &str, to: &str) -> Result<Option<Route>, CaravanError> {
        Ok(self.routes.get(&RouteKey::new(from, to)).cloned())
    }

    fn get_routes(&self, keys: &[RouteKey]) -> Result<HashMap<RouteKey, Route>, CaravanError> {
        Ok(keys
            .iter()
            .filter_map(|key| self.routes.get(key).map(|r| (key.clone(), r.clone())))
            .collect())
    }
}
