use crate::container::ContainerId;
use crate::model::{FlightMode, Ship, ShipSymbol, SystemSymbol, WaypointSymbol};
use crate::route::Route;
use serde::{Deserialize, Serialize};

/// Mediator request types. Player scoping and cancellation travel in the
/// execution context, not in the request payloads.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NavigateShipCommand {
    pub ship_symbol: ShipSymbol,
    pub destination: WaypointSymbol,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NavigationStatus {
    Arrived,
    AlreadyAtDestination,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationOutcome {
    pub status: NavigationStatus,
    pub route: Route,
    pub ship: Ship,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockShipCommand {
    pub ship_symbol: ShipSymbol,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrbitShipCommand {
    pub ship_symbol: ShipSymbol,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefuelShipCommand {
    pub ship_symbol: ShipSymbol,
    pub units: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetFlightModeCommand {
    pub ship_symbol: ShipSymbol,
    pub mode: FlightMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetShipQuery {
    pub ship_symbol: ShipSymbol,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ListShipsQuery {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchContractWorkflowCommand {
    pub ship_symbol: ShipSymbol,
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContractIterationResult {
    pub negotiated: bool,
    pub accepted: bool,
    pub fulfilled: bool,
    pub failed: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContractBatchOutcome {
    pub iterations: Vec<ContractIterationResult>,
}

impl ContractBatchOutcome {
    pub fn negotiated(&self) -> usize {
        self.iterations.iter().filter(|i| i.negotiated).count()
    }

    pub fn accepted(&self) -> usize {
        self.iterations.iter().filter(|i| i.accepted).count()
    }

    pub fn fulfilled(&self) -> usize {
        self.iterations.iter().filter(|i| i.fulfilled).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoutMarketsCommand {
    pub ship_symbols: Vec<ShipSymbol>,
    pub system_symbol: SystemSymbol,
    pub markets: Vec<WaypointSymbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScoutSpawnOutcome {
    pub container_ids: Vec<ContainerId>,
    pub reused: Vec<ContainerId>,
    pub created: Vec<ContainerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoutTourCommand {
    pub ship_symbol: ShipSymbol,
    pub markets: Vec<WaypointSymbol>,
    /// `None` keeps touring until the container is stopped.
    pub rounds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScoutTourOutcome {
    pub markets_scanned: u64,
}
