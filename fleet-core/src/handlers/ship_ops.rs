use crate::context::ExecCtx;
use crate::gateway::GameClientTrait;
use crate::mediator::Handler;
use chrono::Utc;
use fleet_domain::{
    DockShipCommand, GetShipQuery, ListShipsQuery, OrbitShipCommand, RefuelShipCommand, Result, SetFlightModeCommand, Ship, ShipSymbol,
};
use fleet_store::Bmc;
use std::sync::Arc;

/// Direct ship operations for the RPC surface: thin call + re-sync wrappers.
#[derive(Debug)]
pub struct ShipOpsHandler {
    client: Arc<dyn GameClientTrait>,
    bmc: Arc<dyn Bmc>,
}

impl ShipOpsHandler {
    pub fn new(client: Arc<dyn GameClientTrait>, bmc: Arc<dyn Bmc>) -> Self {
        Self { client, bmc }
    }

    async fn sync_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Ship> {
        let ship = self.client.get_ship(ctx, ship_symbol).await?;
        self.bmc.ship_bmc().upsert_ship(&ctx.store_ctx(), &ship, Utc::now()).await?;
        Ok(ship)
    }
}

#[async_trait::async_trait]
impl Handler<DockShipCommand> for ShipOpsHandler {
    async fn handle(&self, ctx: &ExecCtx, command: DockShipCommand) -> Result<Ship> {
        self.client.dock_ship(ctx, &command.ship_symbol).await?;
        self.sync_ship(ctx, &command.ship_symbol).await
    }
}

#[async_trait::async_trait]
impl Handler<OrbitShipCommand> for ShipOpsHandler {
    async fn handle(&self, ctx: &ExecCtx, command: OrbitShipCommand) -> Result<Ship> {
        self.client.orbit_ship(ctx, &command.ship_symbol).await?;
        self.sync_ship(ctx, &command.ship_symbol).await
    }
}

#[async_trait::async_trait]
impl Handler<RefuelShipCommand> for ShipOpsHandler {
    async fn handle(&self, ctx: &ExecCtx, command: RefuelShipCommand) -> Result<Ship> {
        self.client.refuel_ship(ctx, &command.ship_symbol, command.units).await?;
        self.sync_ship(ctx, &command.ship_symbol).await
    }
}

#[async_trait::async_trait]
impl Handler<SetFlightModeCommand> for ShipOpsHandler {
    async fn handle(&self, ctx: &ExecCtx, command: SetFlightModeCommand) -> Result<Ship> {
        self.client.set_flight_mode(ctx, &command.ship_symbol, command.mode).await?;
        self.sync_ship(ctx, &command.ship_symbol).await
    }
}

#[async_trait::async_trait]
impl Handler<GetShipQuery> for ShipOpsHandler {
    async fn handle(&self, ctx: &ExecCtx, command: GetShipQuery) -> Result<Ship> {
        self.sync_ship(ctx, &command.ship_symbol).await
    }
}

#[async_trait::async_trait]
impl Handler<ListShipsQuery> for ShipOpsHandler {
    async fn handle(&self, ctx: &ExecCtx, _command: ListShipsQuery) -> Result<Vec<Ship>> {
        let mut ships = Vec::new();
        let mut page = 1;
        loop {
            let (batch, total) = self.client.list_ships_page(ctx, page).await?;
            let fetched = batch.len();
            ships.extend(batch);
            if ships.len() as u64 >= total || fetched == 0 {
                break;
            }
            page += 1;
        }
        for ship in &ships {
            self.bmc.ship_bmc().upsert_ship(&ctx.store_ctx(), ship, Utc::now()).await?;
        }
        Ok(ships)
    }
}
