use crate::routing::optimizer_proto as proto;
use crate::routing::optimizer_proto::optimizer_client::OptimizerClient;
use fleet_domain::{Error, FlightMode, Result, Route, RouteStep, ShipSymbol, SystemGraph, WaypointSymbol};
use mockall::automock;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tonic::transport::{Channel, Endpoint};
use tracing::{event, Level};

/// Route/VRP calls get a longer deadline than plain API calls.
pub const OPTIMIZER_DEADLINE: Duration = Duration::from_secs(35);

const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Thin client seam over the optimizer gRPC service.
#[automock]
#[async_trait::async_trait]
pub trait OptimizerApi: Send + Sync + Debug {
    async fn plan_route(&self, request: proto::PlanRouteRequest) -> Result<proto::PlanRouteResponse>;
    async fn optimize_tour(&self, request: proto::OptimizeTourRequest) -> Result<proto::OptimizeTourResponse>;
    async fn partition_fleet(&self, request: proto::PartitionFleetRequest) -> Result<proto::PartitionFleetResponse>;
}

pub struct GrpcOptimizer {
    channel: Channel,
}

impl Debug for GrpcOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcOptimizer").finish()
    }
}

impl GrpcOptimizer {
    /// Lazy connect: the daemon starts even when the optimizer is down; the
    /// circuit breaker handles it from there.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| Error::InvalidArgument(format!("bad optimizer url '{url}': {e}")))?
            .timeout(OPTIMIZER_DEADLINE)
            .connect_timeout(Duration::from_secs(5));
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }
}

fn status_to_error(status: tonic::Status) -> Error {
    Error::Upstream {
        status: 0,
        code: None,
        message: format!("optimizer: {}: {}", status.code(), status.message()),
    }
}

#[async_trait::async_trait]
impl OptimizerApi for GrpcOptimizer {
    async fn plan_route(&self, request: proto::PlanRouteRequest) -> Result<proto::PlanRouteResponse> {
        let mut client = OptimizerClient::new(self.channel.clone());
        Ok(client.plan_route(request).await.map_err(status_to_error)?.into_inner())
    }

    async fn optimize_tour(&self, request: proto::OptimizeTourRequest) -> Result<proto::OptimizeTourResponse> {
        let mut client = OptimizerClient::new(self.channel.clone());
        Ok(client.optimize_tour(request).await.map_err(status_to_error)?.into_inner())
    }

    async fn partition_fleet(&self, request: proto::PartitionFleetRequest) -> Result<proto::PartitionFleetResponse> {
        let mut client = OptimizerClient::new(self.channel.clone());
        Ok(client.partition_fleet(request).await.map_err(status_to_error)?.into_inner())
    }
}

/// Everything the planner needs to know about the ship asking for a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipRouteSpec {
    pub ship_symbol: ShipSymbol,
    pub start: WaypointSymbol,
    pub destination: WaypointSymbol,
    pub current_fuel: u32,
    pub fuel_capacity: u32,
    pub engine_speed: u32,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Builds executable `Route` values from optimizer responses. Repeated
/// optimizer failures open a circuit breaker; while it is open navigation
/// falls back to direct single-hop planning.
#[derive(Debug)]
pub struct RoutePlanner {
    optimizer: Arc<dyn OptimizerApi>,
    breaker: Mutex<BreakerState>,
}

impl RoutePlanner {
    pub fn new(optimizer: Arc<dyn OptimizerApi>) -> Self {
        Self {
            optimizer,
            breaker: Mutex::new(BreakerState::default()),
        }
    }

    pub async fn plan(&self, spec: &ShipRouteSpec, graph: &SystemGraph) -> Result<Route> {
        if self.breaker_is_open() {
            event!(Level::WARN, ship = %spec.ship_symbol, "optimizer circuit open, planning direct route");
            return direct_route(spec, graph);
        }

        let request = proto::PlanRouteRequest {
            ship_symbol: spec.ship_symbol.0.clone(),
            start: spec.start.0.clone(),
            goal: spec.destination.0.clone(),
            fuel_current: spec.current_fuel,
            fuel_capacity: spec.fuel_capacity,
            engine_speed: spec.engine_speed,
            waypoints: graph_waypoints(graph),
        };

        match self.optimizer.plan_route(request).await {
            Ok(response) => {
                self.record_success();
                convert_optimizer_steps(spec, &response.steps, graph)
            }
            Err(err) => {
                self.record_failure();
                event!(Level::WARN, ship = %spec.ship_symbol, error = %err, "optimizer call failed, planning direct route");
                direct_route(spec, graph)
            }
        }
    }

    pub async fn partition_fleet(
        &self,
        ships: &[(ShipSymbol, WaypointSymbol)],
        markets: &[WaypointSymbol],
        graph: &SystemGraph,
    ) -> Result<Vec<(ShipSymbol, Vec<WaypointSymbol>)>> {
        let request = proto::PartitionFleetRequest {
            ships: ships
                .iter()
                .map(|(symbol, location)| proto::FleetShip {
                    symbol: symbol.0.clone(),
                    location: location.0.clone(),
                })
                .collect(),
            markets: markets.iter().map(|m| m.0.clone()).collect(),
            graph: graph_waypoints(graph),
        };

        let response = self.optimizer.partition_fleet(request).await?;
        Ok(response
            .tours
            .into_iter()
            .map(|tour| {
                (
                    ShipSymbol(tour.ship_symbol),
                    tour.waypoints.into_iter().map(WaypointSymbol).collect(),
                )
            })
            .collect())
    }

    fn breaker_is_open(&self) -> bool {
        let mut state = self.breaker.lock().expect("breaker mutex poisoned");
        match state.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // cooldown elapsed, half-open: allow the next attempt
                state.open_until = None;
                false
            }
            None => false,
        }
    }

    fn record_success(&self) {
        let mut state = self.breaker.lock().expect("breaker mutex poisoned");
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    fn record_failure(&self) {
        let mut state = self.breaker.lock().expect("breaker mutex poisoned");
        state.consecutive_failures += 1;
        if state.consecutive_failures >= BREAKER_THRESHOLD {
            state.open_until = Some(Instant::now() + BREAKER_COOLDOWN);
            event!(Level::WARN, failures = state.consecutive_failures, "optimizer circuit breaker opened");
        }
    }
}

fn graph_waypoints(graph: &SystemGraph) -> Vec<proto::GraphWaypoint> {
    graph
        .waypoints
        .values()
        .map(|node| proto::GraphWaypoint {
            symbol: node.symbol.0.clone(),
            x: node.x,
            y: node.y,
            has_fuel: node.has_fuel,
            orbitals: vec![],
        })
        .collect()
}

fn no_route(spec: &ShipRouteSpec, graph: &SystemGraph) -> Error {
    Error::NoRouteFound {
        from: spec.start.clone(),
        to: spec.destination.clone(),
        cached_waypoints: graph.waypoints.len(),
        fuel_stations: graph.fuel_station_count(),
        fuel_ratio: if spec.fuel_capacity == 0 {
            1.0
        } else {
            spec.current_fuel as f64 / spec.fuel_capacity as f64
        },
    }
}

/// Converts the optimizer's step list into an executable `Route`:
/// leading `REFUEL`s collapse into `refuel_before_departure`, a later
/// `REFUEL` marks the preceding travel segment's `requires_refuel`, and the
/// fuel arithmetic is re-checked against the ship's tank.
pub fn convert_optimizer_steps(spec: &ShipRouteSpec, steps: &[proto::RouteStep], graph: &SystemGraph) -> Result<Route> {
    let mut segments: Vec<RouteStep> = Vec::new();
    let mut refuel_before_departure = false;
    let mut cursor = spec.start.clone();

    for step in steps {
        let waypoint = WaypointSymbol(step.waypoint.clone());
        if !graph.contains(&waypoint) {
            return Err(Error::WaypointMissing(waypoint));
        }

        match proto::StepKind::try_from(step.kind) {
            Ok(proto::StepKind::Travel) => {
                let flight_mode = FlightMode::from_str(&step.mode)
                    .map_err(|_| Error::internal(format!("optimizer returned unknown flight mode '{}'", step.mode)))?;
                segments.push(RouteStep::Navigate {
                    from: cursor.clone(),
                    to: waypoint.clone(),
                    flight_mode,
                    fuel_cost: step.fuel_cost,
                    travel_time_secs: step.time_sec,
                    requires_refuel: false,
                });
                cursor = waypoint;
            }
            Ok(proto::StepKind::Refuel) => {
                match segments.last_mut() {
                    // refuel happens on arrival of the preceding segment
                    Some(RouteStep::Navigate { requires_refuel, .. }) => *requires_refuel = true,
                    _ => refuel_before_departure = true,
                }
            }
            _ => {
                return Err(Error::internal(format!("optimizer returned unknown step kind {}", step.kind)));
            }
        }
    }

    if segments.is_empty() {
        return Err(no_route(spec, graph));
    }
    if cursor != spec.destination {
        return Err(Error::internal(format!(
            "optimizer route ends at {cursor} instead of {}",
            spec.destination
        )));
    }

    // re-run the fuel arithmetic; a plan the tank cannot execute is rejected
    let mut fuel = if refuel_before_departure { spec.fuel_capacity } else { spec.current_fuel };
    let mut total_fuel_cost = 0;
    let mut total_time_secs = 0;
    for segment in &segments {
        if let RouteStep::Navigate {
            fuel_cost,
            travel_time_secs,
            requires_refuel,
            ..
        } = segment
        {
            if fuel < *fuel_cost {
                return Err(Error::InsufficientFuel {
                    required: *fuel_cost,
                    available: fuel,
                });
            }
            fuel -= fuel_cost;
            total_fuel_cost += fuel_cost;
            total_time_secs += travel_time_secs;
            if *requires_refuel {
                fuel = spec.fuel_capacity;
            }
        }
    }

    Ok(Route {
        route_id: Route::route_id_for(&spec.ship_symbol, total_time_secs),
        ship_symbol: spec.ship_symbol.clone(),
        start: spec.start.clone(),
        destination: spec.destination.clone(),
        segments,
        refuel_before_departure,
        total_fuel_cost,
        total_time_secs,
        final_fuel: fuel,
    })
}

/// Fallback when the optimizer is unreachable: the start→goal edge alone, if
/// the tank allows it.
fn direct_route(spec: &ShipRouteSpec, graph: &SystemGraph) -> Result<Route> {
    if !graph.contains(&spec.start) {
        return Err(Error::LocationMissing(spec.start.clone()));
    }
    if !graph.contains(&spec.destination) {
        return Err(Error::DestinationMissing(spec.destination.clone()));
    }

    let distance = graph
        .distance(&spec.start, &spec.destination)
        .ok_or_else(|| no_route(spec, graph))?;
    let fuel_cost = FlightMode::Cruise.fuel_cost(distance);
    if fuel_cost > spec.current_fuel {
        return Err(no_route(spec, graph));
    }

    let travel_time_secs = FlightMode::Cruise.travel_time_secs(distance, spec.engine_speed.max(1));
    Ok(Route {
        route_id: Route::route_id_for(&spec.ship_symbol, travel_time_secs),
        ship_symbol: spec.ship_symbol.clone(),
        start: spec.start.clone(),
        destination: spec.destination.clone(),
        segments: vec![RouteStep::Navigate {
            from: spec.start.clone(),
            to: spec.destination.clone(),
            flight_mode: FlightMode::Cruise,
            fuel_cost,
            travel_time_secs,
            requires_refuel: false,
        }],
        refuel_before_departure: false,
        total_fuel_cost: fuel_cost,
        total_time_secs: travel_time_secs,
        final_fuel: spec.current_fuel - fuel_cost,
    })
}
