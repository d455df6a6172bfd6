use crate::calc_batches_based_on_volume_constraint;
use crate::context::ExecCtx;
use crate::gateway::{GameClientTrait, API_ERROR_EXISTING_CONTRACT};
use crate::mediator::{Handler, MediatorHandle};
use chrono::Utc;
use fleet_domain::{
    BatchContractWorkflowCommand, Contract, ContractBatchOutcome, ContractIterationResult, Error, NavigateShipCommand, Result, Ship,
    ShipSymbol, TradeGoodSymbol, WaypointSymbol, UNLIMITED_TRADE_VOLUME,
};
use fleet_store::Bmc;
use std::sync::Arc;

/// Multi-iteration negotiate → accept → buy → deliver → fulfill loop.
/// Travel runs through the mediator so the navigation executor keeps its
/// single-instance semantics.
#[derive(Debug)]
pub struct ContractWorkflowHandler {
    client: Arc<dyn GameClientTrait>,
    bmc: Arc<dyn Bmc>,
    mediator: MediatorHandle,
}

impl ContractWorkflowHandler {
    pub fn new(client: Arc<dyn GameClientTrait>, bmc: Arc<dyn Bmc>, mediator: MediatorHandle) -> Self {
        Self { client, bmc, mediator }
    }

    /// Structural faults abort the whole batch; everything else is recorded
    /// on the iteration and the loop moves on.
    fn is_structural(error: &Error) -> bool {
        matches!(error, Error::NotFound(_) | Error::InvalidArgument(_) | Error::Cancelled)
    }

    async fn persist_contract(&self, ctx: &ExecCtx, contract: &Contract) {
        if let Err(err) = self.bmc.contract_bmc().upsert_contract(&ctx.store_ctx(), contract, Utc::now()).await {
            ctx.warn(format!("failed to persist contract {}: {err}", contract.contract_id));
        }
    }

    /// Negotiate a contract, or resume the persisted one when the upstream
    /// reports the agent already has one.
    async fn ensure_contract(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, result: &mut ContractIterationResult) -> Result<Contract> {
        match self.client.negotiate_contract(ctx, ship_symbol).await {
            Ok(contract) => {
                result.negotiated = true;
                ctx.info(format!("negotiated contract {}", contract.contract_id));
                self.persist_contract(ctx, &contract).await;
                Ok(contract)
            }
            Err(Error::Upstream {
                code: Some(API_ERROR_EXISTING_CONTRACT),
                ..
            }) => self
                .bmc
                .contract_bmc()
                .get_active_contract(&ctx.store_ctx(), Utc::now())
                .await?
                .ok_or_else(|| Error::Conflict("upstream reports an existing contract but none is persisted".to_string())),
            Err(err) => Err(err),
        }
    }

    async fn navigate(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, destination: &WaypointSymbol) -> Result<Ship> {
        let outcome = self
            .mediator
            .get()?
            .send(ctx, NavigateShipCommand {
                ship_symbol: ship_symbol.clone(),
                destination: destination.clone(),
            })
            .await?;
        Ok(outcome.ship)
    }

    /// Cheapest known market selling the good, with its per-transaction cap.
    async fn cheapest_market_for(&self, ctx: &ExecCtx, good: &TradeGoodSymbol) -> Result<(WaypointSymbol, u32)> {
        let markets = self.bmc.market_bmc().list_markets_selling(&ctx.store_ctx(), good).await?;
        markets
            .iter()
            .filter_map(|market| {
                market
                    .trade_good(good)
                    .map(|tg| (market.waypoint.clone(), tg.purchase_price, tg.effective_trade_volume()))
            })
            .min_by_key(|(_, price, _)| *price)
            .map(|(waypoint, _, volume)| (waypoint, volume))
            .ok_or_else(|| Error::InvalidState(format!("no known market sells {good}; scout markets first")))
    }

    async fn run_delivery(
        &self,
        ctx: &ExecCtx,
        ship_symbol: &ShipSymbol,
        contract: &mut Contract,
        good: TradeGoodSymbol,
        destination: WaypointSymbol,
    ) -> Result<()> {
        loop {
            ctx.check_cancelled()?;
            let remaining = match contract
                .deliveries
                .iter()
                .find(|d| d.trade_symbol == good && d.destination == destination)
            {
                Some(delivery) if !delivery.is_satisfied() => delivery.units_remaining(),
                _ => return Ok(()),
            };

            let (market_waypoint, trade_volume) = self.cheapest_market_for(ctx, &good).await?;
            let mut ship = self.navigate(ctx, ship_symbol, &market_waypoint).await?;

            let trip_units = remaining.min(ship.cargo_capacity.saturating_sub(ship.cargo_units_of(&good)));
            if trip_units == 0 {
                return Err(Error::InvalidState(format!("ship {ship_symbol} has no cargo space for {good}")));
            }

            // jettison discipline: foreign cargo goes overboard before buying
            if ship.cargo_space_left() < trip_units {
                for (foreign, units) in ship.foreign_cargo(&good) {
                    ctx.warn(format!("jettisoning {units} {foreign} to make room for {good}"));
                    self.client.jettison_cargo(ctx, ship_symbol, &foreign, units).await?;
                }
                ship = self.client.get_ship(ctx, ship_symbol).await?;
            }

            self.client.dock_ship(ctx, ship_symbol).await?;
            for batch in calc_batches_based_on_volume_constraint(trip_units, trade_volume.min(UNLIMITED_TRADE_VOLUME)) {
                self.client.purchase_cargo(ctx, ship_symbol, &good, batch).await?;
            }

            let ship_after_purchase = self.client.get_ship(ctx, ship_symbol).await?;
            let units_held = ship_after_purchase.cargo_units_of(&good);

            self.navigate(ctx, ship_symbol, &destination).await?;
            self.client.dock_ship(ctx, ship_symbol).await?;

            // the API's fulfilled count is authoritative, not our arithmetic
            *contract = self.client.deliver_contract(ctx, &contract.contract_id, ship_symbol, &good, units_held).await?;
            self.persist_contract(ctx, contract).await;
            ctx.info(format!(
                "delivered {units_held} {good} to {destination} for contract {}",
                contract.contract_id
            ));
        }
    }

    async fn run_iteration(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<ContractIterationResult> {
        let mut result = ContractIterationResult::default();

        // ship existence is a structural precondition for the whole batch
        let _ = self.client.get_ship(ctx, ship_symbol).await?;

        let mut contract = match self.ensure_contract(ctx, ship_symbol, &mut result).await {
            Ok(contract) => contract,
            Err(err) if Self::is_structural(&err) => return Err(err),
            Err(err) => {
                result.failed = true;
                result.errors.push(err.to_string());
                return Ok(result);
            }
        };

        let step_result: Result<()> = async {
            if !contract.accepted {
                contract = self.client.accept_contract(ctx, &contract.contract_id).await?;
                result.accepted = true;
                self.persist_contract(ctx, &contract).await;
            }

            for delivery in contract.deliveries.clone() {
                if delivery.is_satisfied() {
                    continue;
                }
                self.run_delivery(ctx, ship_symbol, &mut contract, delivery.trade_symbol, delivery.destination)
                    .await?;
            }

            if contract.all_deliveries_satisfied() && !contract.fulfilled {
                contract = self.client.fulfill_contract(ctx, &contract.contract_id).await?;
                result.fulfilled = true;
                self.persist_contract(ctx, &contract).await;
                ctx.info(format!("fulfilled contract {}", contract.contract_id));
            }
            Ok(())
        }
        .await;

        match step_result {
            Ok(()) => Ok(result),
            Err(err) if Self::is_structural(&err) => Err(err),
            Err(err) => {
                result.failed = true;
                result.errors.push(err.to_string());
                Ok(result)
            }
        }
    }
}

#[async_trait::async_trait]
impl Handler<BatchContractWorkflowCommand> for ContractWorkflowHandler {
    async fn handle(&self, ctx: &ExecCtx, command: BatchContractWorkflowCommand) -> Result<ContractBatchOutcome> {
        if command.iterations == 0 {
            return Err(Error::InvalidArgument("contract batch needs at least one iteration".to_string()));
        }

        let mut outcome = ContractBatchOutcome::default();
        for iteration in 0..command.iterations {
            ctx.check_cancelled()?;
            ctx.info(format!("contract workflow iteration {} of {}", iteration + 1, command.iterations));
            let result = self.run_iteration(ctx, &command.ship_symbol).await?;
            outcome.iterations.push(result);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::Mediator;
    use crate::test_support::{docked_ship, waypoint, FakeGameApi};
    use fleet_domain::{Delivery, MarketData, MarketTradeGood, NavigationOutcome, NavigationStatus, PlayerId, Route};
    use fleet_store::{Bmc as BmcTrait, ContractBmcTrait, InMemoryBmc, MarketBmcTrait};

    /// Minimal stand-in for the navigation executor: orbit then a direct
    /// navigate against the fake universe.
    #[derive(Debug)]
    struct DirectNavHandler {
        api: Arc<FakeGameApi>,
    }

    #[async_trait::async_trait]
    impl Handler<NavigateShipCommand> for DirectNavHandler {
        async fn handle(&self, ctx: &ExecCtx, command: NavigateShipCommand) -> Result<NavigationOutcome> {
            let client: &dyn GameClientTrait = self.api.as_ref();
            let ship = client.get_ship(ctx, &command.ship_symbol).await?;
            if ship.location_waypoint != command.destination {
                if ship.nav_status == fleet_domain::ShipNavStatus::Docked {
                    client.orbit_ship(ctx, &command.ship_symbol).await?;
                }
                client.navigate_ship(ctx, &command.ship_symbol, &command.destination).await?;
            }
            let ship = client.get_ship(ctx, &command.ship_symbol).await?;
            Ok(NavigationOutcome {
                status: NavigationStatus::Arrived,
                route: Route::already_there(ship.symbol.clone(), ship.location_waypoint.clone(), ship.fuel_current),
                ship,
            })
        }
    }

    fn iron_market(at: &str, trade_volume: u32) -> MarketData {
        MarketData {
            waypoint: WaypointSymbol(at.to_string()),
            trade_goods: vec![MarketTradeGood {
                symbol: TradeGoodSymbol("IRON_ORE".to_string()),
                purchase_price: 40,
                sell_price: 30,
                supply: "ABUNDANT".to_string(),
                activity: None,
                trade_volume: Some(trade_volume),
            }],
            scanned_at: Utc::now(),
        }
    }

    struct ContractRig {
        api: Arc<FakeGameApi>,
        bmc: Arc<InMemoryBmc>,
        handler: ContractWorkflowHandler,
        ctx: ExecCtx,
    }

    async fn rig(trade_volume: u32) -> ContractRig {
        let api = Arc::new(FakeGameApi::new());
        api.add_waypoints(vec![
            waypoint("X1-T-A1", 0, 0, vec![]),
            waypoint("X1-T-MKT", 5, 0, vec!["MARKETPLACE"]),
            waypoint("X1-T-DLV", 10, 0, vec![]),
        ]);
        let mut ship = docked_ship("AGENT-1", "X1-T-A1", 1_000, 1_000);
        ship.fuel_capacity = 1_000;
        api.add_ship(ship);
        api.add_market(iron_market("X1-T-MKT", trade_volume));
        api.set_contract_template(vec![Delivery {
            trade_symbol: TradeGoodSymbol("IRON_ORE".to_string()),
            destination: WaypointSymbol("X1-T-DLV".to_string()),
            units_required: 200,
            units_fulfilled: 0,
        }]);

        let bmc = Arc::new(InMemoryBmc::new());
        let ctx = ExecCtx::new(PlayerId(1));
        bmc.market_bmc()
            .upsert_market_data(&ctx.store_ctx(), &iron_market("X1-T-MKT", trade_volume))
            .await
            .unwrap();

        let mediator_handle = MediatorHandle::new();
        let mut mediator = Mediator::new();
        mediator.register::<NavigateShipCommand>(Arc::new(DirectNavHandler { api: Arc::clone(&api) }));
        mediator_handle.set(Arc::new(mediator));

        let handler = ContractWorkflowHandler::new(
            Arc::clone(&api) as Arc<dyn GameClientTrait>,
            Arc::clone(&bmc) as Arc<dyn BmcTrait>,
            mediator_handle,
        );

        ContractRig { api, bmc, handler, ctx }
    }

    #[tokio::test]
    async fn s6_two_hundred_units_with_hundred_capacity_takes_two_round_trips() {
        let rig = rig(100).await;

        let outcome = rig
            .handler
            .handle(&rig.ctx, BatchContractWorkflowCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                iterations: 1,
            })
            .await
            .unwrap();

        assert_eq!(outcome.negotiated(), 1);
        assert_eq!(outcome.accepted(), 1);
        assert_eq!(outcome.fulfilled(), 1);

        let contract = rig.api.contract("contract-1");
        assert!(contract.fulfilled);
        assert_eq!(contract.deliveries[0].units_fulfilled, 200);

        let calls = rig.api.calls();
        let purchases = calls.iter().filter(|c| c.starts_with("purchase")).count();
        let deliveries = calls.iter().filter(|c| c.starts_with("deliver")).count();
        assert!(purchases >= 2, "cargo capacity forces at least two purchase trips");
        assert_eq!(deliveries, 2);
    }

    #[tokio::test]
    async fn transaction_splitting_respects_the_market_volume_cap() {
        // capacity 100, volume cap 60: each full trip buys 60 + 40
        let rig = rig(60).await;

        rig.handler
            .handle(&rig.ctx, BatchContractWorkflowCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                iterations: 1,
            })
            .await
            .unwrap();

        let calls = rig.api.calls();
        let purchases: Vec<&String> = calls.iter().filter(|c| c.starts_with("purchase")).collect();
        assert_eq!(
            purchases,
            vec![
                "purchase AGENT-1 IRON_ORE 60",
                "purchase AGENT-1 IRON_ORE 40",
                "purchase AGENT-1 IRON_ORE 60",
                "purchase AGENT-1 IRON_ORE 40",
            ]
        );
    }

    #[tokio::test]
    async fn each_iteration_negotiates_once_the_previous_contract_is_fulfilled() {
        let rig = rig(100).await;

        let outcome = rig
            .handler
            .handle(&rig.ctx, BatchContractWorkflowCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                iterations: 2,
            })
            .await
            .unwrap();

        assert_eq!(outcome.iterations.len(), 2);
        assert_eq!(outcome.negotiated(), 2);
        assert_eq!(outcome.fulfilled(), 2);
    }

    #[tokio::test]
    async fn already_has_contract_refusal_resumes_the_persisted_one() {
        let rig = rig(100).await;

        // an open contract exists upstream and in the store, as after a
        // daemon restart mid-workflow
        let ctx_nav = rig.ctx.clone();
        let client: &dyn GameClientTrait = rig.api.as_ref();
        let existing = client.negotiate_contract(&ctx_nav, &ShipSymbol("AGENT-1".to_string())).await.unwrap();
        rig.bmc
            .contract_bmc()
            .upsert_contract(&rig.ctx.store_ctx(), &existing, Utc::now())
            .await
            .unwrap();
        rig.api.take_calls();

        let outcome = rig
            .handler
            .handle(&rig.ctx, BatchContractWorkflowCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                iterations: 1,
            })
            .await
            .unwrap();

        // resumed, not re-negotiated: the refusal path completed the contract
        assert_eq!(outcome.negotiated(), 0);
        assert_eq!(outcome.fulfilled(), 1);
        assert!(rig.api.contract(&existing.contract_id.0).fulfilled);
    }

    #[tokio::test]
    async fn foreign_cargo_is_jettisoned_before_purchasing() {
        let rig = rig(100).await;
        {
            let mut ship = rig.api.ship("AGENT-1");
            ship.cargo_items.insert(TradeGoodSymbol("ICE_WATER".to_string()), 90);
            rig.api.add_ship(ship);
        }

        rig.handler
            .handle(&rig.ctx, BatchContractWorkflowCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                iterations: 1,
            })
            .await
            .unwrap();

        let calls = rig.api.calls();
        let jettison_pos = calls.iter().position(|c| c.starts_with("jettison AGENT-1 ICE_WATER")).expect("jettisoned");
        let first_purchase = calls.iter().position(|c| c.starts_with("purchase")).expect("purchased");
        assert!(jettison_pos < first_purchase);
    }

    #[tokio::test]
    async fn missing_market_knowledge_fails_the_iteration_not_the_batch() {
        let rig = rig(100).await;
        // wipe market knowledge by using a fresh handler over an empty store
        let empty_bmc = Arc::new(InMemoryBmc::new());
        let mediator_handle = MediatorHandle::new();
        let mut mediator = Mediator::new();
        mediator.register::<NavigateShipCommand>(Arc::new(DirectNavHandler { api: Arc::clone(&rig.api) }));
        mediator_handle.set(Arc::new(mediator));
        let handler = ContractWorkflowHandler::new(
            Arc::clone(&rig.api) as Arc<dyn GameClientTrait>,
            empty_bmc as Arc<dyn BmcTrait>,
            mediator_handle,
        );

        let outcome = handler
            .handle(&rig.ctx, BatchContractWorkflowCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                iterations: 1,
            })
            .await
            .unwrap();

        assert_eq!(outcome.iterations.len(), 1);
        assert!(outcome.iterations[0].failed);
        assert!(outcome.iterations[0].errors[0].contains("no known market sells"));
    }

    #[tokio::test]
    async fn missing_ship_aborts_the_batch() {
        let rig = rig(100).await;

        let result = rig
            .handler
            .handle(&rig.ctx, BatchContractWorkflowCommand {
                ship_symbol: ShipSymbol("GHOST-1".to_string()),
                iterations: 3,
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
