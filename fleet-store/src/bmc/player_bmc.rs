use crate::error::{StoreError, StoreResult};
use crate::manager::{fmt_ts, parse_ts, DbModelManager};
use async_trait::async_trait;
use fleet_domain::{AgentSymbol, Player, PlayerId};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Players are created by registration, outside the daemon; this repository
/// only resolves and refreshes them.
#[automock]
#[async_trait]
pub trait PlayerBmcTrait: Send + Sync + Debug {
    async fn get_by_id(&self, player_id: PlayerId) -> StoreResult<Option<Player>>;
    async fn get_by_agent_symbol(&self, agent_symbol: &AgentSymbol) -> StoreResult<Option<Player>>;
    async fn upsert(&self, player: &Player) -> StoreResult<()>;
}

#[derive(Debug, FromRow)]
struct PlayerRow {
    id: i64,
    agent_symbol: String,
    token: String,
    credits: i64,
    created_at: String,
}

impl PlayerRow {
    fn into_domain(self) -> StoreResult<Player> {
        Ok(Player {
            id: PlayerId(self.id),
            agent_symbol: AgentSymbol(self.agent_symbol),
            token: self.token,
            credits: self.credits,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug)]
pub struct DbPlayerBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl PlayerBmcTrait for DbPlayerBmc {
    async fn get_by_id(&self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        let row: Option<PlayerRow> = sqlx::query_as("select id, agent_symbol, token, credits, created_at from players where id = $1")
            .bind(player_id.0)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(PlayerRow::into_domain).transpose()
    }

    async fn get_by_agent_symbol(&self, agent_symbol: &AgentSymbol) -> StoreResult<Option<Player>> {
        let row: Option<PlayerRow> =
            sqlx::query_as("select id, agent_symbol, token, credits, created_at from players where agent_symbol = $1")
                .bind(&agent_symbol.0)
                .fetch_optional(self.mm.pool())
                .await?;

        row.map(PlayerRow::into_domain).transpose()
    }

    async fn upsert(&self, player: &Player) -> StoreResult<()> {
        sqlx::query(
            r#"
insert into players (id, agent_symbol, token, credits, created_at)
values ($1, $2, $3, $4, $5)
on conflict (id) do update
    set agent_symbol = excluded.agent_symbol
      , token = excluded.token
      , credits = excluded.credits
        "#,
        )
        .bind(player.id.0)
        .bind(&player.agent_symbol.0)
        .bind(&player.token)
        .bind(player.credits)
        .bind(fmt_ts(player.created_at))
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPlayerBmc {
    state: Arc<RwLock<HashMap<PlayerId, Player>>>,
}

impl InMemoryPlayerBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlayerBmcTrait for InMemoryPlayerBmc {
    async fn get_by_id(&self, player_id: PlayerId) -> StoreResult<Option<Player>> {
        Ok(self.state.read().await.get(&player_id).cloned())
    }

    async fn get_by_agent_symbol(&self, agent_symbol: &AgentSymbol) -> StoreResult<Option<Player>> {
        Ok(self
            .state
            .read()
            .await
            .values()
            .find(|p| p.agent_symbol == *agent_symbol)
            .cloned())
    }

    async fn upsert(&self, player: &Player) -> StoreResult<()> {
        if self
            .state
            .read()
            .await
            .values()
            .any(|p| p.agent_symbol == player.agent_symbol && p.id != player.id)
        {
            return Err(StoreError::Conflict(format!("agent symbol {} already registered", player.agent_symbol)));
        }
        self.state.write().await.insert(player.id, player.clone());
        Ok(())
    }
}
