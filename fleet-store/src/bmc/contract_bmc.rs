use crate::error::StoreResult;
use crate::manager::{fmt_ts, DbModelManager};
use crate::Ctx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_domain::{Contract, ContractId, PlayerId};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

#[automock]
#[async_trait]
pub trait ContractBmcTrait: Send + Sync + Debug {
    async fn upsert_contract(&self, ctx: &Ctx, contract: &Contract, now: DateTime<Utc>) -> StoreResult<()>;
    async fn get_contract(&self, ctx: &Ctx, contract_id: &ContractId) -> StoreResult<Option<Contract>>;

    /// The most recently updated contract that is neither fulfilled nor
    /// expired. Lets the workflow resume after an "already has contract"
    /// upstream refusal.
    async fn get_active_contract(&self, ctx: &Ctx, now: DateTime<Utc>) -> StoreResult<Option<Contract>>;
}

#[derive(Debug, FromRow)]
struct ContractRow {
    entry: String,
}

#[derive(Debug)]
pub struct DbContractBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl ContractBmcTrait for DbContractBmc {
    async fn upsert_contract(&self, ctx: &Ctx, contract: &Contract, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
insert into contracts (contract_id, player_id, entry, updated_at)
values ($1, $2, $3, $4)
on conflict (player_id, contract_id) do update
    set entry = excluded.entry
      , updated_at = excluded.updated_at
        "#,
        )
        .bind(&contract.contract_id.0)
        .bind(ctx.player_id.0)
        .bind(serde_json::to_string(contract)?)
        .bind(fmt_ts(now))
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn get_contract(&self, ctx: &Ctx, contract_id: &ContractId) -> StoreResult<Option<Contract>> {
        let row: Option<ContractRow> = sqlx::query_as("select entry from contracts where player_id = $1 and contract_id = $2")
            .bind(ctx.player_id.0)
            .bind(&contract_id.0)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(|r| serde_json::from_str(&r.entry).map_err(Into::into)).transpose()
    }

    async fn get_active_contract(&self, ctx: &Ctx, now: DateTime<Utc>) -> StoreResult<Option<Contract>> {
        let rows: Vec<ContractRow> = sqlx::query_as("select entry from contracts where player_id = $1 order by updated_at desc")
            .bind(ctx.player_id.0)
            .fetch_all(self.mm.pool())
            .await?;

        for row in rows {
            let contract: Contract = serde_json::from_str(&row.entry)?;
            if !contract.fulfilled && contract.expires_at > now {
                return Ok(Some(contract));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryContractBmc {
    state: Arc<RwLock<HashMap<(PlayerId, ContractId), (Contract, DateTime<Utc>)>>>,
}

impl InMemoryContractBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContractBmcTrait for InMemoryContractBmc {
    async fn upsert_contract(&self, ctx: &Ctx, contract: &Contract, now: DateTime<Utc>) -> StoreResult<()> {
        self.state
            .write()
            .await
            .insert((ctx.player_id, contract.contract_id.clone()), (contract.clone(), now));
        Ok(())
    }

    async fn get_contract(&self, ctx: &Ctx, contract_id: &ContractId) -> StoreResult<Option<Contract>> {
        Ok(self
            .state
            .read()
            .await
            .get(&(ctx.player_id, contract_id.clone()))
            .map(|(contract, _)| contract.clone()))
    }

    async fn get_active_contract(&self, ctx: &Ctx, now: DateTime<Utc>) -> StoreResult<Option<Contract>> {
        Ok(self
            .state
            .read()
            .await
            .iter()
            .filter(|((player_id, _), _)| *player_id == ctx.player_id)
            .filter(|(_, (contract, _))| !contract.fulfilled && contract.expires_at > now)
            .max_by_key(|(_, (_, updated_at))| *updated_at)
            .map(|(_, (contract, _))| contract.clone()))
    }
}
