use crate::error::StoreResult;
use crate::manager::{fmt_ts, DbModelManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_domain::{SystemSymbol, Waypoint, WaypointSymbol};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable waypoint cache. Unscoped: waypoint geography is the same for every
/// player.
#[automock]
#[async_trait]
pub trait WaypointBmcTrait: Send + Sync + Debug {
    async fn upsert_waypoints(&self, waypoints: &[Waypoint], now: DateTime<Utc>) -> StoreResult<()>;
    async fn get_waypoint(&self, symbol: &WaypointSymbol) -> StoreResult<Option<Waypoint>>;
    async fn get_system_waypoints(&self, system_symbol: &SystemSymbol) -> StoreResult<Vec<Waypoint>>;
}

#[derive(Debug, FromRow)]
struct WaypointRow {
    entry: String,
}

#[derive(Debug)]
pub struct DbWaypointBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl WaypointBmcTrait for DbWaypointBmc {
    async fn upsert_waypoints(&self, waypoints: &[Waypoint], now: DateTime<Utc>) -> StoreResult<()> {
        for waypoint in waypoints {
            let mut stamped = waypoint.clone();
            stamped.synced_at = Some(now);
            sqlx::query(
                r#"
insert into waypoints (waypoint_symbol, system_symbol, entry, synced_at)
values ($1, $2, $3, $4)
on conflict (waypoint_symbol) do update
    set entry = excluded.entry
      , synced_at = excluded.synced_at
        "#,
            )
            .bind(&waypoint.symbol.0)
            .bind(&waypoint.system_symbol.0)
            .bind(serde_json::to_string(&stamped)?)
            .bind(fmt_ts(now))
            .execute(self.mm.pool())
            .await?;
        }
        Ok(())
    }

    async fn get_waypoint(&self, symbol: &WaypointSymbol) -> StoreResult<Option<Waypoint>> {
        let row: Option<WaypointRow> = sqlx::query_as("select entry from waypoints where waypoint_symbol = $1")
            .bind(&symbol.0)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(|r| serde_json::from_str(&r.entry).map_err(Into::into)).transpose()
    }

    async fn get_system_waypoints(&self, system_symbol: &SystemSymbol) -> StoreResult<Vec<Waypoint>> {
        let rows: Vec<WaypointRow> = sqlx::query_as("select entry from waypoints where system_symbol = $1 order by waypoint_symbol")
            .bind(&system_symbol.0)
            .fetch_all(self.mm.pool())
            .await?;

        rows.into_iter().map(|r| serde_json::from_str(&r.entry).map_err(Into::into)).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWaypointBmc {
    state: Arc<RwLock<HashMap<WaypointSymbol, Waypoint>>>,
}

impl InMemoryWaypointBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaypointBmcTrait for InMemoryWaypointBmc {
    async fn upsert_waypoints(&self, waypoints: &[Waypoint], now: DateTime<Utc>) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        for waypoint in waypoints {
            let mut stamped = waypoint.clone();
            stamped.synced_at = Some(now);
            guard.insert(waypoint.symbol.clone(), stamped);
        }
        Ok(())
    }

    async fn get_waypoint(&self, symbol: &WaypointSymbol) -> StoreResult<Option<Waypoint>> {
        Ok(self.state.read().await.get(symbol).cloned())
    }

    async fn get_system_waypoints(&self, system_symbol: &SystemSymbol) -> StoreResult<Vec<Waypoint>> {
        let mut waypoints: Vec<Waypoint> = self
            .state
            .read()
            .await
            .values()
            .filter(|wp| wp.system_symbol == *system_symbol)
            .cloned()
            .collect();
        waypoints.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(waypoints)
    }
}
