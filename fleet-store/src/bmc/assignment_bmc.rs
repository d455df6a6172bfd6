use crate::error::{StoreError, StoreResult};
use crate::manager::{fmt_ts, parse_ts, DbModelManager};
use crate::Ctx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_domain::{AssignmentStatus, ContainerId, PlayerId, ReleaseReason, ShipAssignment, ShipSymbol};
use mockall::automock;
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[automock]
#[async_trait]
pub trait AssignmentBmcTrait: Send + Sync + Debug {
    /// Atomic claim. Fails with `Conflict` when an active row already exists
    /// for `(player, ship)`; the partial unique index linearizes racers.
    async fn claim(&self, ctx: &Ctx, ship_symbol: &ShipSymbol, container_id: &ContainerId, now: DateTime<Utc>) -> StoreResult<()>;

    /// Idempotent: releasing an already-released (or never-claimed) ship is a
    /// no-op.
    async fn release(&self, ctx: &Ctx, ship_symbol: &ShipSymbol, reason: ReleaseReason, now: DateTime<Utc>) -> StoreResult<()>;

    /// Owner-scoped release: only touches the active row if `container_id`
    /// still holds it. The container runtime's cleanup path uses this so a
    /// stale task can never free a lock a newer container has re-claimed.
    async fn release_owned(
        &self,
        ctx: &Ctx,
        ship_symbol: &ShipSymbol,
        container_id: &ContainerId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Startup sweep across all players. Returns the number of zombie rows
    /// released.
    async fn release_all_active(&self, reason: ReleaseReason, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn get_active(&self, ctx: &Ctx, ship_symbol: &ShipSymbol) -> StoreResult<Option<ShipAssignment>>;

    async fn list_active(&self, ctx: &Ctx) -> StoreResult<Vec<ShipAssignment>>;
}

/// Shared with the container repository so a container insert and its ship
/// claim can run inside one transaction.
pub(crate) async fn insert_active_assignment<'e, E>(
    executor: E,
    player_id: PlayerId,
    ship_symbol: &ShipSymbol,
    container_id: &ContainerId,
    now: DateTime<Utc>,
) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Any>,
{
    sqlx::query(
        r#"
insert into ship_assignments (player_id, ship_symbol, container_id, status, claimed_at)
values ($1, $2, $3, 'active', $4)
        "#,
    )
    .bind(player_id.0)
    .bind(&ship_symbol.0)
    .bind(&container_id.0)
    .bind(fmt_ts(now))
    .execute(executor)
    .await
    .map_err(|e| match StoreError::from(e) {
        StoreError::Conflict(_) => StoreError::Conflict(format!("ship {} is already claimed by another container", ship_symbol)),
        other => other,
    })?;

    Ok(())
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    ship_symbol: String,
    container_id: String,
    status: String,
    claimed_at: String,
    released_at: Option<String>,
    release_reason: Option<String>,
}

impl AssignmentRow {
    fn into_domain(self) -> StoreResult<ShipAssignment> {
        Ok(ShipAssignment {
            ship_symbol: ShipSymbol(self.ship_symbol),
            container_id: ContainerId(self.container_id),
            status: AssignmentStatus::from_str(&self.status).map_err(|e| StoreError::Fatal(format!("bad assignment status: {e}")))?,
            claimed_at: parse_ts(&self.claimed_at)?,
            released_at: self.released_at.as_deref().map(parse_ts).transpose()?,
            release_reason: self
                .release_reason
                .as_deref()
                .map(|r| ReleaseReason::from_str(r).map_err(|e| StoreError::Fatal(format!("bad release reason: {e}"))))
                .transpose()?,
        })
    }
}

#[derive(Debug)]
pub struct DbAssignmentBmc {
    pub(crate) mm: DbModelManager,
}

#[async_trait]
impl AssignmentBmcTrait for DbAssignmentBmc {
    async fn claim(&self, ctx: &Ctx, ship_symbol: &ShipSymbol, container_id: &ContainerId, now: DateTime<Utc>) -> StoreResult<()> {
        insert_active_assignment(self.mm.pool(), ctx.player_id, ship_symbol, container_id, now).await
    }

    async fn release(&self, ctx: &Ctx, ship_symbol: &ShipSymbol, reason: ReleaseReason, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
update ship_assignments
   set status = 'released'
     , released_at = $1
     , release_reason = $2
 where player_id = $3
   and ship_symbol = $4
   and status = 'active'
        "#,
        )
        .bind(fmt_ts(now))
        .bind(reason.to_string())
        .bind(ctx.player_id.0)
        .bind(&ship_symbol.0)
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn release_owned(
        &self,
        ctx: &Ctx,
        ship_symbol: &ShipSymbol,
        container_id: &ContainerId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
update ship_assignments
   set status = 'released'
     , released_at = $1
     , release_reason = $2
 where player_id = $3
   and ship_symbol = $4
   and container_id = $5
   and status = 'active'
        "#,
        )
        .bind(fmt_ts(now))
        .bind(reason.to_string())
        .bind(ctx.player_id.0)
        .bind(&ship_symbol.0)
        .bind(&container_id.0)
        .execute(self.mm.pool())
        .await?;

        Ok(())
    }

    async fn release_all_active(&self, reason: ReleaseReason, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
update ship_assignments
   set status = 'released'
     , released_at = $1
     , release_reason = $2
 where status = 'active'
        "#,
        )
        .bind(fmt_ts(now))
        .bind(reason.to_string())
        .execute(self.mm.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_active(&self, ctx: &Ctx, ship_symbol: &ShipSymbol) -> StoreResult<Option<ShipAssignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            r#"
select ship_symbol, container_id, status, claimed_at, released_at, release_reason
  from ship_assignments
 where player_id = $1
   and ship_symbol = $2
   and status = 'active'
        "#,
        )
        .bind(ctx.player_id.0)
        .bind(&ship_symbol.0)
        .fetch_optional(self.mm.pool())
        .await?;

        row.map(AssignmentRow::into_domain).transpose()
    }

    async fn list_active(&self, ctx: &Ctx) -> StoreResult<Vec<ShipAssignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(
            r#"
select ship_symbol, container_id, status, claimed_at, released_at, release_reason
  from ship_assignments
 where player_id = $1
   and status = 'active'
        "#,
        )
        .bind(ctx.player_id.0)
        .fetch_all(self.mm.pool())
        .await?;

        rows.into_iter().map(AssignmentRow::into_domain).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAssignments {
    // full history per (player, ship); at most one entry may be active
    rows: HashMap<(PlayerId, ShipSymbol), Vec<ShipAssignment>>,
}

#[derive(Debug, Default)]
pub struct InMemoryAssignmentBmc {
    state: Arc<RwLock<InMemoryAssignments>>,
}

impl InMemoryAssignmentBmc {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn try_claim(
        &self,
        player_id: PlayerId,
        ship_symbol: &ShipSymbol,
        container_id: &ContainerId,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        let history = guard.rows.entry((player_id, ship_symbol.clone())).or_default();
        if history.iter().any(|a| a.status == AssignmentStatus::Active) {
            return Err(StoreError::Conflict(format!(
                "ship {} is already claimed by another container",
                ship_symbol
            )));
        }
        history.push(ShipAssignment {
            ship_symbol: ship_symbol.clone(),
            container_id: container_id.clone(),
            status: AssignmentStatus::Active,
            claimed_at: now,
            released_at: None,
            release_reason: None,
        });
        Ok(())
    }
}

#[async_trait]
impl AssignmentBmcTrait for InMemoryAssignmentBmc {
    async fn claim(&self, ctx: &Ctx, ship_symbol: &ShipSymbol, container_id: &ContainerId, now: DateTime<Utc>) -> StoreResult<()> {
        self.try_claim(ctx.player_id, ship_symbol, container_id, now).await
    }

    async fn release(&self, ctx: &Ctx, ship_symbol: &ShipSymbol, reason: ReleaseReason, now: DateTime<Utc>) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        if let Some(history) = guard.rows.get_mut(&(ctx.player_id, ship_symbol.clone())) {
            for assignment in history.iter_mut().filter(|a| a.status == AssignmentStatus::Active) {
                assignment.status = AssignmentStatus::Released;
                assignment.released_at = Some(now);
                assignment.release_reason = Some(reason);
            }
        }
        Ok(())
    }

    async fn release_owned(
        &self,
        ctx: &Ctx,
        ship_symbol: &ShipSymbol,
        container_id: &ContainerId,
        reason: ReleaseReason,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut guard = self.state.write().await;
        if let Some(history) = guard.rows.get_mut(&(ctx.player_id, ship_symbol.clone())) {
            for assignment in history
                .iter_mut()
                .filter(|a| a.status == AssignmentStatus::Active && a.container_id == *container_id)
            {
                assignment.status = AssignmentStatus::Released;
                assignment.released_at = Some(now);
                assignment.release_reason = Some(reason);
            }
        }
        Ok(())
    }

    async fn release_all_active(&self, reason: ReleaseReason, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut guard = self.state.write().await;
        let mut released = 0;
        for history in guard.rows.values_mut() {
            for assignment in history.iter_mut().filter(|a| a.status == AssignmentStatus::Active) {
                assignment.status = AssignmentStatus::Released;
                assignment.released_at = Some(now);
                assignment.release_reason = Some(reason);
                released += 1;
            }
        }
        Ok(released)
    }

    async fn get_active(&self, ctx: &Ctx, ship_symbol: &ShipSymbol) -> StoreResult<Option<ShipAssignment>> {
        let guard = self.state.read().await;
        Ok(guard
            .rows
            .get(&(ctx.player_id, ship_symbol.clone()))
            .and_then(|history| history.iter().find(|a| a.status == AssignmentStatus::Active).cloned()))
    }

    async fn list_active(&self, ctx: &Ctx) -> StoreResult<Vec<ShipAssignment>> {
        let guard = self.state.read().await;
        Ok(guard
            .rows
            .iter()
            .filter(|((player_id, _), _)| *player_id == ctx.player_id)
            .flat_map(|(_, history)| history.iter().filter(|a| a.status == AssignmentStatus::Active).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ship(symbol: &str) -> ShipSymbol {
        ShipSymbol(symbol.to_string())
    }

    #[tokio::test]
    async fn second_claim_conflicts_until_release() {
        let bmc = InMemoryAssignmentBmc::new();
        let ctx = Ctx::new(PlayerId(1));
        let now = Utc::now();

        bmc.claim(&ctx, &ship("S-1"), &ContainerId("c-1".to_string()), now).await.unwrap();
        let second = bmc.claim(&ctx, &ship("S-1"), &ContainerId("c-2".to_string()), now).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));

        bmc.release(&ctx, &ship("S-1"), ReleaseReason::Completed, now).await.unwrap();
        bmc.claim(&ctx, &ship("S-1"), &ContainerId("c-2".to_string()), now).await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let bmc = InMemoryAssignmentBmc::new();
        let ctx = Ctx::new(PlayerId(1));
        let now = Utc::now();

        bmc.release(&ctx, &ship("S-1"), ReleaseReason::Stopped, now).await.unwrap();
        bmc.claim(&ctx, &ship("S-1"), &ContainerId("c-1".to_string()), now).await.unwrap();
        bmc.release(&ctx, &ship("S-1"), ReleaseReason::Stopped, now).await.unwrap();
        bmc.release(&ctx, &ship("S-1"), ReleaseReason::Stopped, now).await.unwrap();

        assert!(bmc.get_active(&ctx, &ship("S-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn owned_release_spares_a_newer_claim() {
        let bmc = InMemoryAssignmentBmc::new();
        let ctx = Ctx::new(PlayerId(1));
        let now = Utc::now();

        bmc.claim(&ctx, &ship("S-1"), &ContainerId("c-old".to_string()), now).await.unwrap();
        bmc.release(&ctx, &ship("S-1"), ReleaseReason::Stopped, now).await.unwrap();
        bmc.claim(&ctx, &ship("S-1"), &ContainerId("c-new".to_string()), now).await.unwrap();

        // a stale cleanup path from c-old must not free c-new's lock
        bmc.release_owned(&ctx, &ship("S-1"), &ContainerId("c-old".to_string()), ReleaseReason::Failed, now)
            .await
            .unwrap();
        let active = bmc.get_active(&ctx, &ship("S-1")).await.unwrap().unwrap();
        assert_eq!(active.container_id, ContainerId("c-new".to_string()));

        bmc.release_owned(&ctx, &ship("S-1"), &ContainerId("c-new".to_string()), ReleaseReason::Completed, now)
            .await
            .unwrap();
        assert!(bmc.get_active(&ctx, &ship("S-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn startup_sweep_releases_every_active_row() {
        let bmc = InMemoryAssignmentBmc::new();
        let now = Utc::now();

        for (player, ship_symbol) in [(1, "S-1"), (1, "S-2"), (2, "S-1")] {
            let ctx = Ctx::new(PlayerId(player));
            bmc.claim(&ctx, &ship(ship_symbol), &ContainerId(format!("c-{player}-{ship_symbol}")), now)
                .await
                .unwrap();
        }

        let released = bmc.release_all_active(ReleaseReason::DaemonRestart, now).await.unwrap();
        assert_eq!(released, 3);
        assert!(bmc.list_active(&Ctx::new(PlayerId(1))).await.unwrap().is_empty());
        assert!(bmc.list_active(&Ctx::new(PlayerId(2))).await.unwrap().is_empty());

        let again = bmc.release_all_active(ReleaseReason::DaemonRestart, now).await.unwrap();
        assert_eq!(again, 0);
    }
}
