use crate::context::ExecCtx;
use crate::gateway::GameClientTrait;
use crate::mediator::{Handler, MediatorHandle};
use crate::routing::RoutePlanner;
use crate::runtime::{ContainerRuntime, CreateContainerSpec};
use crate::universe::GraphProvider;
use fleet_domain::{
    ContainerConfig, ContainerType, Error, NavigateShipCommand, RestartPolicy, Result, ScoutMarketsCommand, ScoutSpawnOutcome,
    ScoutTourCommand, ScoutTourOutcome, ShipSymbol, WaypointSymbol,
};
use fleet_store::Bmc;
use std::sync::Arc;
use std::time::Duration;

/// Single-market tours sleep this long between rounds (market refresh
/// cadence); multi-market tours are paced by travel time alone.
const SINGLE_MARKET_PAUSE: Duration = Duration::from_secs(60);

/// Partitions a market set across ships via the optimizer's VRP endpoint and
/// spawns one child `scout_tour` container per ship. Idempotent: a ship that
/// already runs an active scout tour keeps its container.
#[derive(Debug)]
pub struct ScoutFleetHandler {
    client: Arc<dyn GameClientTrait>,
    planner: Arc<RoutePlanner>,
    graphs: Arc<GraphProvider>,
    bmc: Arc<dyn Bmc>,
    runtime: Arc<ContainerRuntime>,
}

impl ScoutFleetHandler {
    pub fn new(
        client: Arc<dyn GameClientTrait>,
        planner: Arc<RoutePlanner>,
        graphs: Arc<GraphProvider>,
        bmc: Arc<dyn Bmc>,
        runtime: Arc<ContainerRuntime>,
    ) -> Self {
        Self {
            client,
            planner,
            graphs,
            bmc,
            runtime,
        }
    }

    async fn find_active_tour(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Option<fleet_domain::ContainerId>> {
        let active = self
            .bmc
            .container_bmc()
            .list_active_by_type(&ctx.store_ctx(), ContainerType::ScoutTour)
            .await?;
        Ok(active
            .into_iter()
            .find(|container| container.config.ship_symbol.as_ref() == Some(ship_symbol))
            .map(|container| container.container_id))
    }
}

#[async_trait::async_trait]
impl Handler<ScoutMarketsCommand> for ScoutFleetHandler {
    async fn handle(&self, ctx: &ExecCtx, command: ScoutMarketsCommand) -> Result<ScoutSpawnOutcome> {
        if command.ship_symbols.is_empty() {
            return Err(Error::InvalidArgument("scout command needs at least one ship".to_string()));
        }
        if command.markets.is_empty() {
            return Err(Error::InvalidArgument("scout command needs at least one market".to_string()));
        }

        let graph = self.graphs.get_graph(ctx, &command.system_symbol, false).await?;

        let mut located_ships: Vec<(ShipSymbol, WaypointSymbol)> = Vec::new();
        for ship_symbol in &command.ship_symbols {
            let ship = self.client.get_ship(ctx, ship_symbol).await?;
            located_ships.push((ship_symbol.clone(), ship.location_waypoint));
        }

        let partition = self.planner.partition_fleet(&located_ships, &command.markets, &graph).await?;

        let mut outcome = ScoutSpawnOutcome::default();
        for (ship_symbol, tour) in partition {
            if tour.is_empty() {
                continue;
            }

            if let Some(existing) = self.find_active_tour(ctx, &ship_symbol).await? {
                ctx.info(format!("reusing active scout container {existing} for {ship_symbol}"));
                outcome.reused.push(existing.clone());
                outcome.container_ids.push(existing);
                continue;
            }

            let created = self
                .runtime
                .create(ctx.player_id, CreateContainerSpec {
                    container_id: None,
                    container_type: ContainerType::ScoutTour,
                    config: ContainerConfig {
                        ship_symbol: Some(ship_symbol.clone()),
                        markets: tour,
                        ..Default::default()
                    },
                    restart_policy: RestartPolicy::OnFailure,
                })
                .await?;
            ctx.info(format!("spawned scout container {} for {ship_symbol}", created.container_id));
            outcome.created.push(created.container_id.clone());
            outcome.container_ids.push(created.container_id);
        }

        Ok(outcome)
    }
}

/// Child container body: visit the assigned markets in sequence, scanning
/// each on arrival, until stopped (or for a bounded number of rounds).
#[derive(Debug)]
pub struct ScoutTourHandler {
    client: Arc<dyn GameClientTrait>,
    bmc: Arc<dyn Bmc>,
    mediator: MediatorHandle,
}

impl ScoutTourHandler {
    pub fn new(client: Arc<dyn GameClientTrait>, bmc: Arc<dyn Bmc>, mediator: MediatorHandle) -> Self {
        Self { client, bmc, mediator }
    }

    async fn scan_market(&self, ctx: &ExecCtx, waypoint: &WaypointSymbol) -> Result<()> {
        let market = self.client.get_market(ctx, waypoint).await?;
        self.bmc.market_bmc().upsert_market_data(&ctx.store_ctx(), &market).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Handler<ScoutTourCommand> for ScoutTourHandler {
    async fn handle(&self, ctx: &ExecCtx, command: ScoutTourCommand) -> Result<ScoutTourOutcome> {
        if command.markets.is_empty() {
            return Err(Error::InvalidArgument("scout tour needs at least one market".to_string()));
        }

        let mediator = self.mediator.get()?;
        let mut outcome = ScoutTourOutcome::default();
        let mut round = 0;

        loop {
            for market in &command.markets {
                ctx.check_cancelled()?;
                mediator
                    .send(ctx, NavigateShipCommand {
                        ship_symbol: command.ship_symbol.clone(),
                        destination: market.clone(),
                    })
                    .await?;

                match self.scan_market(ctx, market).await {
                    Ok(()) => {
                        outcome.markets_scanned += 1;
                        ctx.info(format!("scanned market {market}"));
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(err) => ctx.warn(format!("scan of {market} failed: {err}")),
                }
            }

            round += 1;
            if let Some(rounds) = command.rounds {
                if round >= rounds {
                    return Ok(outcome);
                }
            }
            if command.markets.len() == 1 {
                ctx.sleep(SINGLE_MARKET_PAUSE).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsink::{LogSink, DEFAULT_SINK_CAPACITY};
    use crate::mediator::Mediator;
    use chrono::Utc;
    use crate::routing::optimizer_proto as proto;
    use crate::routing::{MockOptimizerApi, OptimizerApi};
    use crate::test_support::{fuel_market, orbiting_ship, waypoint, FakeGameApi};
    use fleet_domain::{NavigationOutcome, NavigationStatus, PlayerId, Route, SystemGraph, SystemSymbol};
    use fleet_store::{Bmc as BmcTrait, GraphBmcTrait, InMemoryBmc};
    use std::time::Duration as StdDuration;

    /// Keeps spawned tour containers alive (RUNNING) for the duration of the
    /// test so idempotent reuse can be observed.
    #[derive(Debug)]
    struct SleepyTourHandler;

    #[async_trait::async_trait]
    impl Handler<ScoutTourCommand> for SleepyTourHandler {
        async fn handle(&self, ctx: &ExecCtx, _command: ScoutTourCommand) -> Result<ScoutTourOutcome> {
            ctx.sleep(StdDuration::from_secs(3600)).await?;
            Ok(ScoutTourOutcome::default())
        }
    }

    struct ScoutRig {
        handler: ScoutFleetHandler,
        ctx: ExecCtx,
    }

    async fn rig(tours: Vec<(&str, Vec<&str>)>) -> ScoutRig {
        let api = Arc::new(FakeGameApi::new());
        let waypoints = vec![
            waypoint("X1-T-A1", 0, 0, vec![]),
            waypoint("X1-T-M1", 10, 0, vec!["MARKETPLACE"]),
            waypoint("X1-T-M2", 20, 0, vec!["MARKETPLACE"]),
        ];
        api.add_waypoints(waypoints.clone());
        api.add_ship(orbiting_ship("S-1", "X1-T-A1", 100, 200));
        api.add_ship(orbiting_ship("S-2", "X1-T-A1", 100, 200));
        api.add_market(fuel_market("X1-T-M1"));
        api.add_market(fuel_market("X1-T-M2"));

        let bmc = Arc::new(InMemoryBmc::new());
        let graph = SystemGraph::build(SystemSymbol("X1-T".to_string()), &waypoints, Utc::now());
        bmc.graph_bmc().save_graph(&graph).await.unwrap();

        let graphs = Arc::new(GraphProvider::new(
            bmc.graph_bmc(),
            bmc.waypoint_bmc(),
            Arc::clone(&api) as Arc<dyn GameClientTrait>,
        ));

        let tours: Vec<(String, Vec<String>)> = tours
            .into_iter()
            .map(|(ship, markets)| (ship.to_string(), markets.into_iter().map(String::from).collect()))
            .collect();
        let mut optimizer = MockOptimizerApi::new();
        optimizer.expect_partition_fleet().returning(move |_| {
            Ok(proto::PartitionFleetResponse {
                tours: tours
                    .iter()
                    .map(|(ship, markets)| proto::ShipTour {
                        ship_symbol: ship.clone(),
                        waypoints: markets.clone(),
                    })
                    .collect(),
            })
        });
        let planner = Arc::new(RoutePlanner::new(Arc::new(optimizer) as Arc<dyn OptimizerApi>));

        let sink = LogSink::spawn(bmc.log_bmc(), DEFAULT_SINK_CAPACITY);
        let mediator_handle = MediatorHandle::new();
        let mut mediator = Mediator::new();
        mediator.register::<ScoutTourCommand>(Arc::new(SleepyTourHandler));
        mediator_handle.set(Arc::new(mediator));
        let runtime = ContainerRuntime::new(Arc::clone(&bmc) as Arc<dyn BmcTrait>, sink, mediator_handle);

        let handler = ScoutFleetHandler::new(
            Arc::clone(&api) as Arc<dyn GameClientTrait>,
            planner,
            graphs,
            Arc::clone(&bmc) as Arc<dyn BmcTrait>,
            runtime,
        );

        ScoutRig {
            handler,
            ctx: ExecCtx::new(PlayerId(1)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawning_twice_reuses_the_active_containers() {
        let rig = rig(vec![("S-1", vec!["X1-T-M1"]), ("S-2", vec!["X1-T-M2"])]).await;

        let command = ScoutMarketsCommand {
            ship_symbols: vec![ShipSymbol("S-1".to_string()), ShipSymbol("S-2".to_string())],
            system_symbol: SystemSymbol("X1-T".to_string()),
            markets: vec![WaypointSymbol("X1-T-M1".to_string()), WaypointSymbol("X1-T-M2".to_string())],
        };

        let first = rig.handler.handle(&rig.ctx, command.clone()).await.unwrap();
        assert_eq!(first.created.len(), 2);
        assert!(first.reused.is_empty());
        tokio::task::yield_now().await;

        let second = rig.handler.handle(&rig.ctx, command).await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.reused.len(), 2);
        assert_eq!(first.container_ids, second.container_ids);
    }

    #[tokio::test(start_paused = true)]
    async fn ships_with_empty_tours_get_no_container() {
        let rig = rig(vec![("S-1", vec!["X1-T-M1", "X1-T-M2"]), ("S-2", vec![])]).await;

        let outcome = rig
            .handler
            .handle(&rig.ctx, ScoutMarketsCommand {
                ship_symbols: vec![ShipSymbol("S-1".to_string()), ShipSymbol("S-2".to_string())],
                system_symbol: SystemSymbol("X1-T".to_string()),
                markets: vec![WaypointSymbol("X1-T-M1".to_string()), WaypointSymbol("X1-T-M2".to_string())],
            })
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_ship_list_is_an_invalid_argument() {
        let rig = rig(vec![]).await;

        let result = rig
            .handler
            .handle(&rig.ctx, ScoutMarketsCommand {
                ship_symbols: vec![],
                system_symbol: SystemSymbol("X1-T".to_string()),
                markets: vec![WaypointSymbol("X1-T-M1".to_string())],
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn tour_visits_each_market_and_scans_it() {
        let api = Arc::new(FakeGameApi::new());
        api.add_waypoints(vec![
            waypoint("X1-T-A1", 0, 0, vec![]),
            waypoint("X1-T-M1", 10, 0, vec!["MARKETPLACE"]),
            waypoint("X1-T-M2", 20, 0, vec!["MARKETPLACE"]),
        ]);
        api.add_ship(orbiting_ship("S-1", "X1-T-A1", 500, 500));
        api.add_market(fuel_market("X1-T-M1"));
        api.add_market(fuel_market("X1-T-M2"));

        let bmc = Arc::new(InMemoryBmc::new());
        let mediator_handle = MediatorHandle::new();
        let mut mediator = Mediator::new();

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

        mediator.register::<NavigateShipCommand>(Arc::new(DirectNavHandler { api: Arc::clone(&api) }));
        mediator_handle.set(Arc::new(mediator));

        let handler = ScoutTourHandler::new(
            Arc::clone(&api) as Arc<dyn GameClientTrait>,
            Arc::clone(&bmc) as Arc<dyn BmcTrait>,
            mediator_handle,
        );

        let ctx = ExecCtx::new(PlayerId(1));
        let outcome = handler
            .handle(&ctx, ScoutTourCommand {
                ship_symbol: ShipSymbol("S-1".to_string()),
                markets: vec![WaypointSymbol("X1-T-M1".to_string()), WaypointSymbol("X1-T-M2".to_string())],
                rounds: Some(2),
            })
            .await
            .unwrap();

        assert_eq!(outcome.markets_scanned, 4);
        let scans = api.calls().iter().filter(|c| c.starts_with("get_market")).count();
        assert_eq!(scans, 4);
    }
}
