use crate::error::{StoreError, StoreResult};
use crate::manager::{fmt_ts, DbModelManager};
use crate::Ctx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_domain::{PlayerId, Route, RouteStatus};
use mockall::automock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[automock]
#[async_trait]
pub trait RouteBmcTrait: Send + Sync + Debug {
    async fn save_route(&self, ctx: &Ctx, route: &Route, status: RouteStatus, now: DateTime<Utc>) -> StoreResult<()>;
    async fn get_route(&self, ctx: &Ctx, route_id: &str) -> StoreResult<Option<(Route, RouteStatus)>>;
}

#[derive(Debug, sqlx::FromRow)]
struct RouteRow {
    entry: String,
    status: String,
}

#[derive(Debug)]
pub struct DbRouteBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl RouteBmcTrait for DbRouteBmc {
    async fn save_route(&self, ctx: &Ctx, route: &Route, status: RouteStatus, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
insert into routes (route_id, player_id, ship_symbol, entry, status, created_at)
values ($1, $2, $3, $4, $5, $6)
on conflict (player_id, route_id) do update
    set entry = excluded.entry
      , status = excluded.status
        "#,
        )
        .bind(&route.route_id)
        .bind(ctx.player_id.0)
        .bind(&route.ship_symbol.0)
        .bind(serde_json::to_string(route)?)
        .bind(status.to_string())
        .bind(fmt_ts(now))
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn get_route(&self, ctx: &Ctx, route_id: &str) -> StoreResult<Option<(Route, RouteStatus)>> {
        let row: Option<RouteRow> = sqlx::query_as("select entry, status from routes where player_id = $1 and route_id = $2")
            .bind(ctx.player_id.0)
            .bind(route_id)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(|r| {
            let route: Route = serde_json::from_str(&r.entry)?;
            let status = RouteStatus::from_str(&r.status).map_err(|e| StoreError::Fatal(format!("bad route status: {e}")))?;
            Ok((route, status))
        })
        .transpose()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRouteBmc {
    state: Arc<RwLock<HashMap<(PlayerId, String), (Route, RouteStatus)>>>,
}

impl InMemoryRouteBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteBmcTrait for InMemoryRouteBmc {
    async fn save_route(&self, ctx: &Ctx, route: &Route, status: RouteStatus, _now: DateTime<Utc>) -> StoreResult<()> {
        self.state
            .write()
            .await
            .insert((ctx.player_id, route.route_id.clone()), (route.clone(), status));
        Ok(())
    }

    async fn get_route(&self, ctx: &Ctx, route_id: &str) -> StoreResult<Option<(Route, RouteStatus)>> {
        Ok(self.state.read().await.get(&(ctx.player_id, route_id.to_string())).cloned())
    }
}
