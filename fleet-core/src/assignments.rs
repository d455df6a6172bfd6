use chrono::Utc;
use fleet_domain::{ContainerId, PlayerId, ReleaseReason, Result, ShipAssignment, ShipSymbol};
use fleet_store::{with_transient_retry, AssignmentBmcTrait, Ctx};
use std::sync::Arc;
use tracing::{event, Level};

/// Exclusive ship→container lock registry. The database's partial unique
/// index is the linearization point; this wrapper only owns the calling
/// discipline (claim inside container creation, release on every exit path,
/// sweep on startup).
#[derive(Debug, Clone)]
pub struct AssignmentRegistry {
    assignments: Arc<dyn AssignmentBmcTrait>,
}

impl AssignmentRegistry {
    pub fn new(assignments: Arc<dyn AssignmentBmcTrait>) -> Self {
        Self { assignments }
    }

    pub async fn claim(&self, player_id: PlayerId, ship_symbol: &ShipSymbol, container_id: &ContainerId) -> Result<()> {
        self.assignments
            .claim(&Ctx::new(player_id), ship_symbol, container_id, Utc::now())
            .await
            .map_err(Into::into)
    }

    /// Idempotent; safe to call from several exit paths of the same
    /// container. A dropped release would strand the ship, so transient
    /// store errors are retried.
    pub async fn release(&self, player_id: PlayerId, ship_symbol: &ShipSymbol, reason: ReleaseReason) -> Result<()> {
        let ctx = Ctx::new(player_id);
        let now = Utc::now();
        with_transient_retry(|| self.assignments.release(&ctx, ship_symbol, reason, now))
            .await
            .map_err(Into::into)
    }

    /// Release only if `container_id` still owns the lock. The runtime's
    /// guaranteed-cleanup path goes through here so a lingering task cannot
    /// free a lock some newer container holds.
    pub async fn release_owned(
        &self,
        player_id: PlayerId,
        ship_symbol: &ShipSymbol,
        container_id: &ContainerId,
        reason: ReleaseReason,
    ) -> Result<()> {
        let ctx = Ctx::new(player_id);
        let now = Utc::now();
        with_transient_retry(|| self.assignments.release_owned(&ctx, ship_symbol, container_id, reason, now))
            .await
            .map_err(Into::into)
    }

    /// Zombie recovery. Runs once on daemon startup, before the RPC server
    /// accepts connections.
    pub async fn release_all_active(&self, reason: ReleaseReason) -> Result<u64> {
        let released = self.assignments.release_all_active(reason, Utc::now()).await?;
        if released > 0 {
            event!(Level::INFO, released, ?reason, "released zombie ship assignments");
        }
        Ok(released)
    }

    pub async fn get_active(&self, player_id: PlayerId, ship_symbol: &ShipSymbol) -> Result<Option<ShipAssignment>> {
        self.assignments
            .get_active(&Ctx::new(player_id), ship_symbol)
            .await
            .map_err(Into::into)
    }

    pub async fn list_active(&self, player_id: PlayerId) -> Result<Vec<ShipAssignment>> {
        self.assignments.list_active(&Ctx::new(player_id)).await.map_err(Into::into)
    }
}
