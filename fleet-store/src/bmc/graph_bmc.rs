use crate::error::StoreResult;
use crate::manager::{fmt_ts, DbModelManager};
use async_trait::async_trait;
use fleet_domain::{SystemGraph, SystemSymbol};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable tier of the graph cache. Each graph is one serialized value keyed
/// by system; nodes reference each other by symbol only.
#[automock]
#[async_trait]
pub trait GraphBmcTrait: Send + Sync + Debug {
    async fn save_graph(&self, graph: &SystemGraph) -> StoreResult<()>;
    async fn load_graph(&self, system_symbol: &SystemSymbol) -> StoreResult<Option<SystemGraph>>;
}

#[derive(Debug, FromRow)]
struct GraphRow {
    entry: String,
}

#[derive(Debug)]
pub struct DbGraphBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl GraphBmcTrait for DbGraphBmc {
    async fn save_graph(&self, graph: &SystemGraph) -> StoreResult<()> {
        sqlx::query(
            r#"
insert into system_graphs (system_symbol, entry, last_updated)
values ($1, $2, $3)
on conflict (system_symbol) do update
    set entry = excluded.entry
      , last_updated = excluded.last_updated
        "#,
        )
        .bind(&graph.system_symbol.0)
        .bind(serde_json::to_string(graph)?)
        .bind(fmt_ts(graph.last_updated))
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn load_graph(&self, system_symbol: &SystemSymbol) -> StoreResult<Option<SystemGraph>> {
        let row: Option<GraphRow> = sqlx::query_as("select entry from system_graphs where system_symbol = $1")
            .bind(&system_symbol.0)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(|r| serde_json::from_str(&r.entry).map_err(Into::into)).transpose()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryGraphBmc {
    state: Arc<RwLock<HashMap<SystemSymbol, SystemGraph>>>,
}

impl InMemoryGraphBmc {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphBmcTrait for InMemoryGraphBmc {
    async fn save_graph(&self, graph: &SystemGraph) -> StoreResult<()> {
        self.state.write().await.insert(graph.system_symbol.clone(), graph.clone());
        Ok(())
    }

    async fn load_graph(&self, system_symbol: &SystemSymbol) -> StoreResult<Option<SystemGraph>> {
        Ok(self.state.read().await.get(system_symbol).cloned())
    }
}
