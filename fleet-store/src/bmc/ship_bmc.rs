use crate::error::StoreResult;
use crate::manager::{fmt_ts, DbModelManager};
use crate::Ctx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_domain::{PlayerId, Ship, ShipSymbol};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cache of the game API's ship state. The API stays the source of truth;
/// rows here only feed diagnostics and post-mortems.
#[automock]
#[async_trait]
pub trait ShipBmcTrait: Send + Sync + Debug {
    async fn upsert_ship(&self, ctx: &Ctx, ship: &Ship, now: DateTime<Utc>) -> StoreResult<()>;
    async fn get_ship(&self, ctx: &Ctx, ship_symbol: &ShipSymbol) -> StoreResult<Option<Ship>>;
    async fn list_ships(&self, ctx: &Ctx) -> StoreResult<Vec<Ship>>;
}

#[derive(Debug, FromRow)]
struct ShipRow {
    entry: String,
}

#[derive(Debug)]
pub struct DbShipBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl ShipBmcTrait for DbShipBmc {
    async fn upsert_ship(&self, ctx: &Ctx, ship: &Ship, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
insert into ships (player_id, ship_symbol, entry, updated_at)
values ($1, $2, $3, $4)
on conflict (player_id, ship_symbol) do update
    set entry = excluded.entry
      , updated_at = excluded.updated_at
        "#,
        )
        .bind(ctx.player_id.0)
        .bind(&ship.symbol.0)
        .bind(serde_json::to_string(ship)?)
        .bind(fmt_ts(now))
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn get_ship(&self, ctx: &Ctx, ship_symbol: &ShipSymbol) -> StoreResult<Option<Ship>> {
        let row: Option<ShipRow> = sqlx::query_as("select entry from ships where player_id = $1 and ship_symbol = $2")
            .bind(ctx.player_id.0)
            .bind(&ship_symbol.0)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(|r| serde_json::from_str(&r.entry).map_err(Into::into)).transpose()
    }

    async fn list_ships(&self, ctx: &Ctx) -> StoreResult<Vec<Ship>> {
        let rows: Vec<ShipRow> = sqlx::query_as("select entry from ships where player_id = $1 order by ship_symbol")
            .bind(ctx.player_id.0)
            .fetch_all(self.mm.pool())
            .await?;

        rows.into_iter().map(|r| serde_json::from_str(&r.entry).map_err(Into::into)).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryShipBmc {
    state: Arc<RwLock<HashMap<(PlayerId, ShipSymbol), Ship>>>,
}

impl InMemoryShipBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShipBmcTrait for InMemoryShipBmc {
    async fn upsert_ship(&self, ctx: &Ctx, ship: &Ship, _now: DateTime<Utc>) -> StoreResult<()> {
        self.state
            .write()
            .await
            .insert((ctx.player_id, ship.symbol.clone()), ship.clone());
        Ok(())
    }

    async fn get_ship(&self, ctx: &Ctx, ship_symbol: &ShipSymbol) -> StoreResult<Option<Ship>> {
        Ok(self.state.read().await.get(&(ctx.player_id, ship_symbol.clone())).cloned())
    }

    async fn list_ships(&self, ctx: &Ctx) -> StoreResult<Vec<Ship>> {
        let mut ships: Vec<Ship> = self
            .state
            .read()
            .await
            .iter()
            .filter(|((player_id, _), _)| *player_id == ctx.player_id)
            .map(|(_, ship)| ship.clone())
            .collect();
        ships.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(ships)
    }
}
