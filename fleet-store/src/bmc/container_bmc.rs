use crate::bmc::assignment_bmc::{insert_active_assignment, InMemoryAssignmentBmc};
use crate::error::{StoreError, StoreResult};
use crate::manager::{fmt_ts, parse_ts, DbModelManager};
use crate::Ctx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_domain::{Container, ContainerConfig, ContainerId, ContainerStatus, ContainerType, PlayerId, RestartPolicy, ShipSymbol};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[automock]
#[async_trait]
pub trait ContainerBmcTrait: Send + Sync + Debug {
    /// Inserts the container row and, when a ship is given, claims it in the
    /// same transaction. A claim conflict rolls the container row back.
    async fn create_with_claim<'a>(&self, ctx: &Ctx, container: &Container, ship_symbol: Option<&'a ShipSymbol>) -> StoreResult<()>;

    async fn update_status(
        &self,
        ctx: &Ctx,
        container_id: &ContainerId,
        status: ContainerStatus,
        stopped_at: Option<DateTime<Utc>>,
        exit_code: Option<i32>,
    ) -> StoreResult<()>;

    async fn set_restart_count(&self, ctx: &Ctx, container_id: &ContainerId, restart_count: u32) -> StoreResult<()>;

    async fn get(&self, ctx: &Ctx, container_id: &ContainerId) -> StoreResult<Option<Container>>;

    async fn list(&self, ctx: &Ctx) -> StoreResult<Vec<Container>>;

    async fn list_active_by_type(&self, ctx: &Ctx, container_type: ContainerType) -> StoreResult<Vec<Container>>;

    async fn delete(&self, ctx: &Ctx, container_id: &ContainerId) -> StoreResult<()>;

    /// Daemon-wide: marks every non-terminal container from a previous run
    /// as failed. Part of the startup zombie sweep.
    async fn fail_all_non_terminal(&self, now: DateTime<Utc>, exit_code: i32) -> StoreResult<u64>;
}

#[derive(Debug, FromRow)]
struct ContainerRow {
    container_id: String,
    container_type: String,
    config: String,
    status: String,
    restart_policy: String,
    restart_count: i64,
    started_at: String,
    stopped_at: Option<String>,
    exit_code: Option<i64>,
}

impl ContainerRow {
    fn into_domain(self) -> StoreResult<Container> {
        Ok(Container {
            container_id: ContainerId(self.container_id),
            container_type: ContainerType::from_str(&self.container_type)
                .map_err(|e| StoreError::Fatal(format!("bad container type: {e}")))?,
            config: serde_json::from_str::<ContainerConfig>(&self.config)?,
            status: ContainerStatus::from_str(&self.status).map_err(|e| StoreError::Fatal(format!("bad container status: {e}")))?,
            restart_policy: RestartPolicy::from_str(&self.restart_policy)
                .map_err(|e| StoreError::Fatal(format!("bad restart policy: {e}")))?,
            restart_count: self.restart_count as u32,
            started_at: parse_ts(&self.started_at)?,
            stopped_at: self.stopped_at.as_deref().map(parse_ts).transpose()?,
            exit_code: self.exit_code.map(|c| c as i32),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
select container_id, container_type, config, status, restart_policy, restart_count, started_at, stopped_at, exit_code
  from containers
"#;

#[derive(Debug)]
pub struct DbContainerBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl ContainerBmcTrait for DbContainerBmc {
    async fn create_with_claim<'a>(&self, ctx: &Ctx, container: &Container, ship_symbol: Option<&'a ShipSymbol>) -> StoreResult<()> {
        let mut tx = self.mm.pool().begin().await?;

        sqlx::query(
            r#"
insert into containers (container_id, player_id, container_type, config, status, restart_policy, restart_count, started_at)
values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
        )
        .bind(&container.container_id.0)
        .bind(ctx.player_id.0)
        .bind(container.container_type.to_string())
        .bind(serde_json::to_string(&container.config)?)
        .bind(container.status.to_string())
        .bind(container.restart_policy.to_string())
        .bind(container.restart_count as i64)
        .bind(fmt_ts(container.started_at))
        .execute(&mut *tx)
        .await?;

        if let Some(ship_symbol) = ship_symbol {
            if let Err(err) = insert_active_assignment(&mut *tx, ctx.player_id, ship_symbol, &container.container_id, container.started_at).await
            {
                tx.rollback().await?;
                return Err(err);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        ctx: &Ctx,
        container_id: &ContainerId,
        status: ContainerStatus,
        stopped_at: Option<DateTime<Utc>>,
        exit_code: Option<i32>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
update containers
   set status = $1
     , stopped_at = $2
     , exit_code = $3
 where player_id = $4
   and container_id = $5
        "#,
        )
        .bind(status.to_string())
        .bind(stopped_at.map(fmt_ts))
        .bind(exit_code.map(|c| c as i64))
        .bind(ctx.player_id.0)
        .bind(&container_id.0)
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn set_restart_count(&self, ctx: &Ctx, container_id: &ContainerId, restart_count: u32) -> StoreResult<()> {
        sqlx::query(
            r#"
update containers
   set restart_count = $1
 where player_id = $2
   and container_id = $3
        "#,
        )
        .bind(restart_count as i64)
        .bind(ctx.player_id.0)
        .bind(&container_id.0)
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn get(&self, ctx: &Ctx, container_id: &ContainerId) -> StoreResult<Option<Container>> {
        let row: Option<ContainerRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} where player_id = $1 and container_id = $2"))
            .bind(ctx.player_id.0)
            .bind(&container_id.0)
            .fetch_optional(self.mm.pool())
            .await?;

        row.map(ContainerRow::into_domain).transpose()
    }

    async fn list(&self, ctx: &Ctx) -> StoreResult<Vec<Container>> {
        let rows: Vec<ContainerRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} where player_id = $1 order by started_at desc"))
            .bind(ctx.player_id.0)
            .fetch_all(self.mm.pool())
            .await?;

        rows.into_iter().map(ContainerRow::into_domain).collect()
    }

    async fn list_active_by_type(&self, ctx: &Ctx, container_type: ContainerType) -> StoreResult<Vec<Container>> {
        let rows: Vec<ContainerRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} where player_id = $1 and container_type = $2 and status in ('STARTING', 'RUNNING')"
        ))
        .bind(ctx.player_id.0)
        .bind(container_type.to_string())
        .fetch_all(self.mm.pool())
        .await?;

        rows.into_iter().map(ContainerRow::into_domain).collect()
    }

    async fn delete(&self, ctx: &Ctx, container_id: &ContainerId) -> StoreResult<()> {
        sqlx::query("delete from containers where player_id = $1 and container_id = $2")
            .bind(ctx.player_id.0)
            .bind(&container_id.0)
            .execute(self.mm.pool())
            .await?;

        Ok(())
    }

    async fn fail_all_non_terminal(&self, now: DateTime<Utc>, exit_code: i32) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
update containers
   set status = 'FAILED'
     , stopped_at = $1
     , exit_code = $2
 where status in ('STARTING', 'RUNNING')
        "#,
        )
        .bind(fmt_ts(now))
        .bind(exit_code as i64)
        .execute(self.mm.pool())
        .await?;

        Ok(result.rows_affected())
    }
}

/// In-memory variant; mirrors the transactional claim by consulting the
/// in-memory assignment registry before inserting the container row.
#[derive(Debug)]
pub struct InMemoryContainerBmc {
    state: Arc<RwLock<HashMap<(PlayerId, ContainerId), Container>>>,
    assignments: Arc<InMemoryAssignmentBmc>,
}

impl InMemoryContainerBmc {
    pub fn new(assignments: Arc<InMemoryAssignmentBmc>) -> Self {
        Self {
            state: Default::default(),
            assignments,
        }
    }
}

#[async_trait]
impl ContainerBmcTrait for InMemoryContainerBmc {
    async fn create_with_claim<'a>(&self, ctx: &Ctx, container: &Container, ship_symbol: Option<&'a ShipSymbol>) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        let key = (ctx.player_id, container.container_id.clone());
        if guard.contains_key(&key) {
            return Err(StoreError::Conflict(format!("container {} already exists", container.container_id)));
        }

        if let Some(ship_symbol) = ship_symbol {
            self.assignments
                .try_claim(ctx.player_id, ship_symbol, &container.container_id, container.started_at)
                .await?;
        }

        guard.insert(key, container.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        ctx: &Ctx,
        container_id: &ContainerId,
        status: ContainerStatus,
        stopped_at: Option<DateTime<Utc>>,
        exit_code: Option<i32>,
    ) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        if let Some(container) = guard.get_mut(&(ctx.player_id, container_id.clone())) {
            container.status = status;
            container.stopped_at = stopped_at;
            container.exit_code = exit_code;
        }
        Ok(())
    }

    async fn set_restart_count(&self, ctx: &Ctx, container_id: &ContainerId, restart_count: u32) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        if let Some(container) = guard.get_mut(&(ctx.player_id, container_id.clone())) {
            container.restart_count = restart_count;
        }
        Ok(())
    }

    async fn get(&self, ctx: &Ctx, container_id: &ContainerId) -> StoreResult<Option<Container>> {
        Ok(self.state.read().await.get(&(ctx.player_id, container_id.clone())).cloned())
    }

    async fn list(&self, ctx: &Ctx) -> StoreResult<Vec<Container>> {
        Ok(self
            .state
            .read()
            .await
            .iter()
            .filter(|((player_id, _), _)| *player_id == ctx.player_id)
            .map(|(_, container)| container.clone())
            .collect())
    }

    async fn list_active_by_type(&self, ctx: &Ctx, container_type: ContainerType) -> StoreResult<Vec<Container>> {
        Ok(self
            .list(ctx)
            .await?
            .into_iter()
            .filter(|c| c.container_type == container_type && !c.status.is_terminal())
            .collect())
    }

    async fn delete(&self, ctx: &Ctx, container_id: &ContainerId) -> StoreResult<()> {
        self.state.write().await.remove(&(ctx.player_id, container_id.clone()));
        Ok(())
    }

    async fn fail_all_non_terminal(&self, now: DateTime<Utc>, exit_code: i32) -> StoreResult<u64> {
        let mut guard = self.state.write().await;
        let mut failed = 0;
        for container in guard.values_mut().filter(|c| !c.status.is_terminal()) {
            container.status = ContainerStatus::Failed;
            container.stopped_at = Some(now);
            container.exit_code = Some(exit_code);
            failed += 1;
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, ship: Option<&str>) -> Container {
        Container {
            container_id: ContainerId(id.to_string()),
            container_type: ContainerType::Navigate,
            config: ContainerConfig {
                ship_symbol: ship.map(|s| ShipSymbol(s.to_string())),
                ..Default::default()
            },
            status: ContainerStatus::Starting,
            restart_policy: RestartPolicy::No,
            restart_count: 0,
            started_at: Utc::now(),
            stopped_at: None,
            exit_code: None,
        }
    }

    #[tokio::test]
    async fn claim_conflict_rolls_back_the_container_row() {
        let assignments = Arc::new(InMemoryAssignmentBmc::new());
        let bmc = InMemoryContainerBmc::new(Arc::clone(&assignments));
        let ctx = Ctx::new(PlayerId(1));
        let ship = ShipSymbol("S-1".to_string());

        bmc.create_with_claim(&ctx, &container("c-1", Some("S-1")), Some(&ship)).await.unwrap();

        let second = bmc.create_with_claim(&ctx, &container("c-2", Some("S-1")), Some(&ship)).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
        assert!(bmc.get(&ctx, &ContainerId("c-2".to_string())).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fail_all_non_terminal_spares_finished_containers() {
        let assignments = Arc::new(InMemoryAssignmentBmc::new());
        let bmc = InMemoryContainerBmc::new(assignments);
        let ctx = Ctx::new(PlayerId(1));

        bmc.create_with_claim(&ctx, &container("c-1", None), None).await.unwrap();
        bmc.create_with_claim(&ctx, &container("c-2", None), None).await.unwrap();
        bmc.update_status(&ctx, &ContainerId("c-2".to_string()), ContainerStatus::Stopped, Some(Utc::now()), Some(0))
            .await
            .unwrap();

        let failed = bmc.fail_all_non_terminal(Utc::now(), 1).await.unwrap();
        assert_eq!(failed, 1);

        let c2 = bmc.get(&ctx, &ContainerId("c-2".to_string())).await.unwrap().unwrap();
        assert_eq!(c2.status, ContainerStatus::Stopped);
        assert_eq!(c2.exit_code, Some(0));
    }
}
