use crate::error::StoreResult;
use crate::manager::{fmt_ts, DbModelManager};
use crate::Ctx;
use async_trait::async_trait;
use fleet_domain::{MarketData, PlayerId, TradeGoodSymbol, WaypointSymbol};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

#[automock]
#[async_trait]
pub trait MarketBmcTrait: Send + Sync + Debug {
    async fn upsert_market_data(&self, ctx: &Ctx, market: &MarketData) -> StoreResult<()>;
    async fn get_market_data(&self, ctx: &Ctx, waypoint: &WaypointSymbol) -> StoreResult<Option<MarketData>>;
    async fn list_markets_selling(&self, ctx: &Ctx, good: &TradeGoodSymbol) -> StoreResult<Vec<MarketData>>;
}

#[derive(Debug, FromRow)]
struct MarketRow {
    entry: String,
}

#[derive(Debug)]
pub struct DbMarketBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl MarketBmcTrait for DbMarketBmc {
    async fn upsert_market_data(&self, ctx: &Ctx, market: &MarketData) -> StoreResult<()> {
        sqlx::query(
            r#"
insert into market_data (player_id, waypoint_symbol, entry, scanned_at)
values ($1, $2, $3, $4)
on conflict (player_id, waypoint_symbol) do update
    set entry = excluded.entry
      , scanned_at = excluded.scanned_at
        "#,
        )
        .bind(ctx.player_id.0)
        .bind(&market.waypoint.0)
        .bind(serde_json::to_string(market)?)
        .bind(fmt_ts(market.scanned_at))
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn get_market_data(&self, ctx: &Ctx, waypoint: &WaypointSymbol) -> StoreResult<Option<MarketData>> {
        let row: Option<MarketRow> = sqlx::query_as("select entry from market_data where player_id = $1 and waypoint_symbol = $2")
            .bind(ctx.player_id.0)
            .bind(&waypoint.0)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(|r| serde_json::from_str(&r.entry).map_err(Into::into)).transpose()
    }

    async fn list_markets_selling(&self, ctx: &Ctx, good: &TradeGoodSymbol) -> StoreResult<Vec<MarketData>> {
        let rows: Vec<MarketRow> = sqlx::query_as("select entry from market_data where player_id = $1")
            .bind(ctx.player_id.0)
            .fetch_all(self.mm.pool())
            .await?;

        let mut markets = Vec::new();
        for row in rows {
            let market: MarketData = serde_json::from_str(&row.entry)?;
            if market.sells(good) {
                markets.push(market);
            }
        }
        Ok(markets)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMarketBmc {
    state: Arc<RwLock<HashMap<(PlayerId, WaypointSymbol), MarketData>>>,
}

impl InMemoryMarketBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketBmcTrait for InMemoryMarketBmc {
    async fn upsert_market_data(&self, ctx: &Ctx, market: &MarketData) -> StoreResult<()> {
        self.state
            .write()
            .await
            .insert((ctx.player_id, market.waypoint.clone()), market.clone());
        Ok(())
    }

    async fn get_market_data(&self, ctx: &Ctx, waypoint: &WaypointSymbol) -> StoreResult<Option<MarketData>> {
        Ok(self.state.read().await.get(&(ctx.player_id, waypoint.clone())).cloned())
    }

    async fn list_markets_selling(&self, ctx: &Ctx, good: &TradeGoodSymbol) -> StoreResult<Vec<MarketData>> {
        Ok(self
            .state
            .read()
            .await
            .iter()
            .filter(|((player_id, _), _)| *player_id == ctx.player_id)
            .filter(|(_, market)| market.sells(good))
            .map(|(_, market)| market.clone())
            .collect())
    }
}
