use crate::context::ExecCtx;
use crate::gateway::GameClientTrait;
use crate::mediator::Handler;
use crate::routing::{RoutePlanner, ShipRouteSpec};
use crate::universe::GraphProvider;
use chrono::Utc;
use fleet_domain::{
    Error, NavigateShipCommand, NavigationOutcome, NavigationStatus, Result, Route, RouteStatus, RouteStep, Ship, ShipNavStatus,
    SystemGraph, WaypointSymbol,
};
use fleet_store::Bmc;
use std::sync::Arc;
use std::time::Duration;

/// Extra slack after the reported arrival time before re-fetching the ship.
const ARRIVAL_BUFFER: Duration = Duration::from_secs(3);

/// Below this fuel ratio a fuel-capable waypoint triggers a top-up.
const REFUEL_THRESHOLD: f64 = 0.9;

/// Drives a planned route segment by segment: dock/orbit state machine,
/// flight-mode changes, arrival waits, and the two refuel rules. After every
/// side-effectful call the ship is re-synced from the API; no local
/// simulation is trusted past that point.
#[derive(Debug)]
pub struct NavigationHandler {
    client: Arc<dyn GameClientTrait>,
    graphs: Arc<GraphProvider>,
    planner: Arc<RoutePlanner>,
    bmc: Arc<dyn Bmc>,
    scan_markets: bool,
}

impl NavigationHandler {
    pub fn new(client: Arc<dyn GameClientTrait>, graphs: Arc<GraphProvider>, planner: Arc<RoutePlanner>, bmc: Arc<dyn Bmc>) -> Self {
        Self {
            client,
            graphs,
            planner,
            bmc,
            scan_markets: true,
        }
    }

    pub fn with_market_scanning(mut self, enabled: bool) -> Self {
        self.scan_markets = enabled;
        self
    }

    async fn sync_ship(&self, ctx: &ExecCtx, ship: &fleet_domain::ShipSymbol) -> Result<Ship> {
        let fresh = self.client.get_ship(ctx, ship).await?;
        self.bmc.ship_bmc().upsert_ship(&ctx.store_ctx(), &fresh, Utc::now()).await?;
        Ok(fresh)
    }

    async fn wait_for_arrival(&self, ctx: &ExecCtx, arrival: chrono::DateTime<Utc>) -> Result<()> {
        let remaining = (arrival - Utc::now()).to_std().unwrap_or_default();
        ctx.sleep(remaining + ARRIVAL_BUFFER).await
    }

    async fn ensure_orbit(&self, ctx: &ExecCtx, ship: &mut Ship) -> Result<()> {
        match ship.nav_status {
            ShipNavStatus::InOrbit => Ok(()),
            ShipNavStatus::Docked => {
                self.client.orbit_ship(ctx, &ship.symbol).await?;
                ship.nav_status = ShipNavStatus::InOrbit;
                Ok(())
            }
            ShipNavStatus::InTransit => Err(Error::InvalidState(format!("ship {} is in transit, cannot orbit", ship.symbol))),
        }
    }

    /// dock → refuel → orbit, re-syncing after each side effect. A no-op at
    /// ≥ 90% so the overlapping refuel paths (planner flag, DRIFT guard,
    /// opportunistic rule) can never fill the same tank twice in a row.
    async fn top_up(&self, ctx: &ExecCtx, ship: &mut Ship) -> Result<bool> {
        if ship.fuel_ratio() >= REFUEL_THRESHOLD {
            return Ok(false);
        }
        if ship.nav_status != ShipNavStatus::Docked {
            self.client.dock_ship(ctx, &ship.symbol).await?;
        }
        self.client.refuel_ship(ctx, &ship.symbol, None).await?;
        *ship = self.sync_ship(ctx, &ship.symbol).await?;
        self.client.orbit_ship(ctx, &ship.symbol).await?;
        *ship = self.sync_ship(ctx, &ship.symbol).await?;
        Ok(true)
    }

    fn node_has_fuel(graph: &SystemGraph, waypoint: &WaypointSymbol) -> bool {
        graph.node(waypoint).map(|n| n.has_fuel).unwrap_or(false)
    }

    /// Arrival-time market scan. Never fails the navigation.
    async fn scan_market_if_present(&self, ctx: &ExecCtx, waypoint: &WaypointSymbol) {
        if !self.scan_markets {
            return;
        }
        let is_marketplace = match self.bmc.waypoint_bmc().get_waypoint(waypoint).await {
            Ok(Some(wp)) => wp.has_marketplace(),
            _ => false,
        };
        if !is_marketplace {
            return;
        }
        match self.client.get_market(ctx, waypoint).await {
            Ok(market) => {
                if let Err(err) = self.bmc.market_bmc().upsert_market_data(&ctx.store_ctx(), &market).await {
                    ctx.warn(format!("failed to store market scan for {waypoint}: {err}"));
                }
            }
            Err(err) => ctx.warn(format!("market scan at {waypoint} failed: {err}")),
        }
    }

    async fn execute_route(&self, ctx: &ExecCtx, route: &Route, graph: &SystemGraph, mut ship: Ship) -> Result<Ship> {
        if route.refuel_before_departure {
            self.top_up(ctx, &mut ship).await?;
        }

        for segment in &route.segments {
            ctx.check_cancelled()?;

            match segment {
                // converted routes fold refuels into navigate segments, but
                // the executor honors the full step algebra
                RouteStep::Refuel { .. } => {
                    self.top_up(ctx, &mut ship).await?;
                }
                RouteStep::Navigate {
                    from,
                    to,
                    flight_mode,
                    requires_refuel,
                    ..
                } => {
                    // a DRIFT departure from a fuel waypoint with a low tank
                    // overrides the planner's stale fuel assumption
                    if *flight_mode == fleet_domain::FlightMode::Drift
                        && ship.location_waypoint == *from
                        && Self::node_has_fuel(graph, from)
                        && ship.fuel_ratio() < REFUEL_THRESHOLD
                    {
                        self.top_up(ctx, &mut ship).await?;
                    }

                    self.ensure_orbit(ctx, &mut ship).await?;

                    if ship.flight_mode != *flight_mode {
                        self.client.set_flight_mode(ctx, &ship.symbol, *flight_mode).await?;
                        ship.flight_mode = *flight_mode;
                    }

                    let update = self.client.navigate_ship(ctx, &ship.symbol, to).await?;
                    self.wait_for_arrival(ctx, update.arrival_time).await?;
                    ship = self.sync_ship(ctx, &ship.symbol).await?;

                    let arrival_has_fuel = Self::node_has_fuel(graph, to);
                    if arrival_has_fuel && ship.fuel_ratio() < REFUEL_THRESHOLD && !requires_refuel {
                        self.top_up(ctx, &mut ship).await?;
                    }
                    if *requires_refuel {
                        self.top_up(ctx, &mut ship).await?;
                    }

                    self.scan_market_if_present(ctx, to).await;
                }
            }
        }

        Ok(ship)
    }
}

#[async_trait::async_trait]
impl Handler<NavigateShipCommand> for NavigationHandler {
    async fn handle(&self, ctx: &ExecCtx, command: NavigateShipCommand) -> Result<NavigationOutcome> {
        ctx.info(format!("navigating {} to {}", command.ship_symbol, command.destination));

        let mut ship = self.sync_ship(ctx, &command.ship_symbol).await?;

        if ship.location_waypoint == command.destination {
            ctx.info(format!("{} is already at {}", command.ship_symbol, command.destination));
            let route = Route::already_there(ship.symbol.clone(), ship.location_waypoint.clone(), ship.fuel_current);
            return Ok(NavigationOutcome {
                status: NavigationStatus::AlreadyAtDestination,
                route,
                ship,
            });
        }

        if ship.nav_status == ShipNavStatus::InTransit {
            let arrival = ship
                .arrival_time
                .ok_or_else(|| Error::internal(format!("ship {} is in transit without an arrival time", ship.symbol)))?;
            ctx.info(format!("{} is mid-flight, waiting for arrival at {arrival}", ship.symbol));
            self.wait_for_arrival(ctx, arrival).await?;
            ship = self.sync_ship(ctx, &ship.symbol).await?;
            if ship.nav_status == ShipNavStatus::InTransit {
                return Err(Error::InTransit {
                    arrival: ship.arrival_time.unwrap_or(arrival),
                });
            }
            if ship.location_waypoint == command.destination {
                let route = Route::already_there(ship.symbol.clone(), ship.location_waypoint.clone(), ship.fuel_current);
                return Ok(NavigationOutcome {
                    status: NavigationStatus::AlreadyAtDestination,
                    route,
                    ship,
                });
            }
        }

        let system = command.destination.system_symbol();
        let graph = self.graphs.get_graph(ctx, &system, false).await?;
        if graph.is_empty() {
            return Err(Error::CacheEmpty(system));
        }
        if !graph.contains(&ship.location_waypoint) {
            return Err(Error::LocationMissing(ship.location_waypoint.clone()));
        }
        if !graph.contains(&command.destination) {
            return Err(Error::DestinationMissing(command.destination.clone()));
        }

        let spec = ShipRouteSpec {
            ship_symbol: ship.symbol.clone(),
            start: ship.location_waypoint.clone(),
            destination: command.destination.clone(),
            current_fuel: ship.fuel_current,
            fuel_capacity: ship.fuel_capacity,
            engine_speed: ship.engine_speed,
        };
        let route = self.planner.plan(&spec, &graph).await?;
        self.bmc
            .route_bmc()
            .save_route(&ctx.store_ctx(), &route, RouteStatus::InProgress, Utc::now())
            .await?;

        match self.execute_route(ctx, &route, &graph, ship).await {
            Ok(final_ship) => {
                self.bmc
                    .route_bmc()
                    .save_route(&ctx.store_ctx(), &route, RouteStatus::Completed, Utc::now())
                    .await?;
                ctx.info(format!("{} arrived at {}", command.ship_symbol, command.destination));
                Ok(NavigationOutcome {
                    status: NavigationStatus::Arrived,
                    route,
                    ship: final_ship,
                })
            }
            Err(err) => {
                let _ = self
                    .bmc
                    .route_bmc()
                    .save_route(&ctx.store_ctx(), &route, RouteStatus::Failed, Utc::now())
                    .await;
                ctx.error(format!(
                    "navigate {} -> {} failed: {err}",
                    command.ship_symbol, command.destination
                ));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::optimizer_proto as proto;
    use crate::routing::{MockOptimizerApi, OptimizerApi};
    use crate::test_support::{docked_ship, fuel_market, orbiting_ship, waypoint, FakeGameApi};
    use fleet_domain::{PlayerId, ShipSymbol, MARKETPLACE_TRAIT};
    use fleet_store::{Bmc as BmcTrait, GraphBmcTrait, InMemoryBmc, MarketBmcTrait, RouteBmcTrait, WaypointBmcTrait};

    struct NavRig {
        api: Arc<FakeGameApi>,
        bmc: Arc<InMemoryBmc>,
        handler: NavigationHandler,
    }

    fn travel(to: &str, mode: &str, fuel_cost: u32) -> proto::RouteStep {
        proto::RouteStep {
            kind: proto::StepKind::Travel as i32,
            waypoint: to.to_string(),
            mode: mode.to_string(),
            fuel_cost,
            time_sec: 60,
        }
    }

    fn refuel(at: &str) -> proto::RouteStep {
        proto::RouteStep {
            kind: proto::StepKind::Refuel as i32,
            waypoint: at.to_string(),
            mode: String::new(),
            fuel_cost: 0,
            time_sec: 0,
        }
    }

    async fn rig(waypoints: Vec<fleet_domain::Waypoint>, plan: Vec<proto::RouteStep>, scan_markets: bool) -> NavRig {
        let api = Arc::new(FakeGameApi::new());
        api.add_waypoints(waypoints.clone());

        let bmc = Arc::new(InMemoryBmc::new());
        bmc.waypoint_bmc().upsert_waypoints(&waypoints, Utc::now()).await.unwrap();

        // seed the durable graph so resolution never reaches the API and the
        // recorded call sequences stay exactly the executor's own
        let system = fleet_domain::SystemSymbol("X1-T".to_string());
        let graph = fleet_domain::SystemGraph::build(system, &waypoints, Utc::now());
        bmc.graph_bmc().save_graph(&graph).await.unwrap();

        let graphs = Arc::new(GraphProvider::new(
            bmc.graph_bmc(),
            bmc.waypoint_bmc(),
            Arc::clone(&api) as Arc<dyn GameClientTrait>,
        ));

        let mut optimizer = MockOptimizerApi::new();
        optimizer
            .expect_plan_route()
            .returning(move |_| Ok(proto::PlanRouteResponse { steps: plan.clone() }));
        let planner = Arc::new(RoutePlanner::new(Arc::new(optimizer) as Arc<dyn OptimizerApi>));

        let handler = NavigationHandler::new(
            Arc::clone(&api) as Arc<dyn GameClientTrait>,
            graphs,
            planner,
            Arc::clone(&bmc) as Arc<dyn BmcTrait>,
        )
        .with_market_scanning(scan_markets);

        NavRig { api, bmc, handler }
    }

    fn fuel_station(symbol: &str, x: i64, y: i64) -> fleet_domain::Waypoint {
        let mut wp = waypoint(symbol, x, y, vec![]);
        wp.waypoint_type = "FUEL_STATION".to_string();
        wp
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn s1_planned_refuel_stop_executes_in_order() {
        let rig = rig(
            vec![
                waypoint("X1-T-A1", 0, 0, vec![]),
                fuel_station("X1-T-B1", 80, 0),
                waypoint("X1-T-C1", 200, 0, vec![]),
            ],
            vec![travel("X1-T-B1", "CRUISE", 80), refuel("X1-T-B1"), travel("X1-T-C1", "CRUISE", 120)],
            false,
        )
        .await;
        rig.api.add_ship(docked_ship("AGENT-1", "X1-T-A1", 100, 200));

        let ctx = ExecCtx::new(PlayerId(1));
        let outcome = rig
            .handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-C1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, NavigationStatus::Arrived);
        assert_eq!(outcome.route.segments.len(), 2);
        assert!(matches!(&outcome.route.segments[0], RouteStep::Navigate { requires_refuel: true, .. }));

        assert_eq!(
            rig.api.calls(),
            vec![
                "get_ship AGENT-1",
                "orbit AGENT-1",
                "navigate AGENT-1 X1-T-B1",
                "get_ship AGENT-1",
                "dock AGENT-1",
                "refuel AGENT-1",
                "get_ship AGENT-1",
                "orbit AGENT-1",
                "get_ship AGENT-1",
                "navigate AGENT-1 X1-T-C1",
                "get_ship AGENT-1",
            ]
        );

        let ship = rig.api.ship("AGENT-1");
        assert_eq!(ship.location_waypoint.0, "X1-T-C1");
        assert_eq!(ship.nav_status, ShipNavStatus::InOrbit);
        // refueled at B1 to 200, spent 120 on the second hop
        assert_eq!(ship.fuel_current, 80);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn s2_opportunistic_refuel_after_unplanned_arrival_at_marketplace() {
        let rig = rig(
            vec![waypoint("X1-T-A1", 0, 0, vec![]), waypoint("X1-T-M1", 20, 0, vec![MARKETPLACE_TRAIT])],
            vec![travel("X1-T-M1", "CRUISE", 20)],
            true,
        )
        .await;
        rig.api.add_ship(orbiting_ship("AGENT-1", "X1-T-A1", 50, 100));
        rig.api.add_market(fuel_market("X1-T-M1"));

        let ctx = ExecCtx::new(PlayerId(1));
        rig.handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-M1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(
            rig.api.calls(),
            vec![
                "get_ship AGENT-1",
                "navigate AGENT-1 X1-T-M1",
                "get_ship AGENT-1",
                "dock AGENT-1",
                "refuel AGENT-1",
                "get_ship AGENT-1",
                "orbit AGENT-1",
                "get_ship AGENT-1",
                "get_market X1-T-M1",
            ]
        );
        assert_eq!(rig.api.ship("AGENT-1").fuel_current, 100);

        // the scan was persisted
        let stored = rig
            .bmc
            .market_bmc()
            .get_market_data(&ctx.store_ctx(), &WaypointSymbol("X1-T-M1".to_string()))
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn s3_drift_departure_from_fuel_station_tops_up_first() {
        let rig = rig(
            vec![fuel_station("X1-T-F1", 0, 0), waypoint("X1-T-Z9", 500, 0, vec![])],
            vec![travel("X1-T-Z9", "DRIFT", 1)],
            false,
        )
        .await;
        rig.api.add_ship(orbiting_ship("AGENT-1", "X1-T-F1", 40, 100));

        let ctx = ExecCtx::new(PlayerId(1));
        rig.handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-Z9".to_string()),
            })
            .await
            .unwrap();

        let calls = rig.api.calls();
        let refuel_pos = calls.iter().position(|c| c == "refuel AGENT-1").expect("guard refuel happened");
        let navigate_pos = calls.iter().position(|c| c.starts_with("navigate")).expect("navigate happened");
        assert!(refuel_pos < navigate_pos, "DRIFT guard must refuel before departing");
        assert!(calls.contains(&"set_flight_mode AGENT-1 DRIFT".to_string()));

        // departed with a full tank, drift cost 1
        assert_eq!(rig.api.ship("AGENT-1").fuel_current, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn drift_guard_is_skipped_at_or_above_ninety_percent() {
        let rig = rig(
            vec![fuel_station("X1-T-F1", 0, 0), waypoint("X1-T-Z9", 500, 0, vec![])],
            vec![travel("X1-T-Z9", "DRIFT", 1)],
            false,
        )
        .await;
        rig.api.add_ship(orbiting_ship("AGENT-1", "X1-T-F1", 90, 100));

        let ctx = ExecCtx::new(PlayerId(1));
        rig.handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-Z9".to_string()),
            })
            .await
            .unwrap();

        assert!(!rig.api.calls().iter().any(|c| c.starts_with("refuel")));
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_at_non_fuel_waypoint_never_refuels() {
        let rig = rig(
            vec![waypoint("X1-T-A1", 0, 0, vec![]), waypoint("X1-T-B1", 30, 0, vec![])],
            vec![travel("X1-T-B1", "CRUISE", 30)],
            false,
        )
        .await;
        rig.api.add_ship(orbiting_ship("AGENT-1", "X1-T-A1", 50, 200));

        let ctx = ExecCtx::new(PlayerId(1));
        rig.handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-B1".to_string()),
            })
            .await
            .unwrap();

        assert!(!rig.api.calls().iter().any(|c| c.starts_with("refuel")));
    }

    #[tokio::test(start_paused = true)]
    async fn navigating_to_the_current_location_is_a_pure_read() {
        let rig = rig(vec![waypoint("X1-T-A1", 0, 0, vec![])], vec![], false).await;
        rig.api.add_ship(docked_ship("AGENT-1", "X1-T-A1", 100, 200));

        let ctx = ExecCtx::new(PlayerId(1));
        let outcome = rig
            .handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-A1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(outcome.status, NavigationStatus::AlreadyAtDestination);
        assert!(outcome.route.segments.is_empty());
        assert_eq!(rig.api.calls(), vec!["get_ship AGENT-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn planner_refuel_before_departure_and_drift_guard_never_double_refuel() {
        let rig = rig(
            vec![fuel_station("X1-T-F1", 0, 0), waypoint("X1-T-Z9", 500, 0, vec![])],
            vec![refuel("X1-T-F1"), travel("X1-T-Z9", "DRIFT", 1)],
            false,
        )
        .await;
        rig.api.add_ship(orbiting_ship("AGENT-1", "X1-T-F1", 40, 100));

        let ctx = ExecCtx::new(PlayerId(1));
        rig.handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-Z9".to_string()),
            })
            .await
            .unwrap();

        let refuels = rig.api.calls().iter().filter(|c| c.starts_with("refuel")).count();
        assert_eq!(refuels, 1, "pre-departure refuel makes the DRIFT guard a no-op");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_destination_waypoint_is_reported_before_any_movement() {
        let rig = rig(vec![waypoint("X1-T-A1", 0, 0, vec![])], vec![], false).await;
        rig.api.add_ship(docked_ship("AGENT-1", "X1-T-A1", 100, 200));

        let ctx = ExecCtx::new(PlayerId(1));
        let err = rig
            .handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-GHOST".to_string()),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DestinationMissing(w) if w.0 == "X1-T-GHOST"));
        assert_eq!(rig.api.calls().iter().filter(|c| c.starts_with("navigate")).count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn api_error_mid_route_marks_the_route_failed() {
        let rig = rig(
            vec![waypoint("X1-T-A1", 0, 0, vec![]), waypoint("X1-T-B1", 30, 0, vec![])],
            vec![travel("X1-T-B1", "CRUISE", 30)],
            false,
        )
        .await;
        rig.api.add_ship(orbiting_ship("AGENT-1", "X1-T-A1", 100, 200));
        rig.api.inject_failure(
            "navigate",
            Error::Upstream {
                status: 502,
                code: None,
                message: "bad gateway".to_string(),
            },
        );

        let ctx = ExecCtx::new(PlayerId(1));
        let err = rig
            .handler
            .handle(&ctx, NavigateShipCommand {
                ship_symbol: ShipSymbol("AGENT-1".to_string()),
                destination: WaypointSymbol("X1-T-B1".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { status: 502, .. }));

        let stored = rig
            .bmc
            .route_bmc()
            .get_route(&ctx.store_ctx(), "AGENT-1_60")
            .await
            .unwrap()
            .expect("route row exists");
        assert_eq!(stored.1, RouteStatus::Failed);
    }
}
