use crate::manager::DbModelManager;
use mockall::automock;
use std::fmt::Debug;
use std::sync::Arc;

pub mod assignment_bmc;
pub mod container_bmc;
pub mod contract_bmc;
pub mod graph_bmc;
pub mod log_bmc;
pub mod market_bmc;
pub mod player_bmc;
pub mod route_bmc;
pub mod ship_bmc;
pub mod waypoint_bmc;

pub use assignment_bmc::{AssignmentBmcTrait, DbAssignmentBmc, InMemoryAssignmentBmc, MockAssignmentBmcTrait};
pub use container_bmc::{ContainerBmcTrait, DbContainerBmc, InMemoryContainerBmc, MockContainerBmcTrait};
pub use contract_bmc::{ContractBmcTrait, DbContractBmc, InMemoryContractBmc, MockContractBmcTrait};
pub use graph_bmc::{DbGraphBmc, GraphBmcTrait, InMemoryGraphBmc, MockGraphBmcTrait};
pub use log_bmc::{DbLogBmc, InMemoryLogBmc, LogBmcTrait, MockLogBmcTrait, NewLogEntry, DEDUP_WINDOW_SECS};
pub use market_bmc::{DbMarketBmc, InMemoryMarketBmc, MarketBmcTrait, MockMarketBmcTrait};
pub use player_bmc::{DbPlayerBmc, InMemoryPlayerBmc, MockPlayerBmcTrait, PlayerBmcTrait};
pub use route_bmc::{DbRouteBmc, InMemoryRouteBmc, MockRouteBmcTrait, RouteBmcTrait};
pub use ship_bmc::{DbShipBmc, InMemoryShipBmc, MockShipBmcTrait, ShipBmcTrait};
pub use waypoint_bmc::{DbWaypointBmc, InMemoryWaypointBmc, MockWaypointBmcTrait, WaypointBmcTrait};

/// One handle to every repository. Handlers receive `Arc<dyn Bmc>` and pick
/// the repositories they need.
#[automock]
pub trait Bmc: Send + Sync + Debug {
    fn player_bmc(&self) -> Arc<dyn PlayerBmcTrait>;
    fn ship_bmc(&self) -> Arc<dyn ShipBmcTrait>;
    fn waypoint_bmc(&self) -> Arc<dyn WaypointBmcTrait>;
    fn graph_bmc(&self) -> Arc<dyn GraphBmcTrait>;
    fn container_bmc(&self) -> Arc<dyn ContainerBmcTrait>;
    fn log_bmc(&self) -> Arc<dyn LogBmcTrait>;
    fn assignment_bmc(&self) -> Arc<dyn AssignmentBmcTrait>;
    fn contract_bmc(&self) -> Arc<dyn ContractBmcTrait>;
    fn market_bmc(&self) -> Arc<dyn MarketBmcTrait>;
    fn route_bmc(&self) -> Arc<dyn RouteBmcTrait>;
}

#[derive(Debug, Clone)]
pub struct DbBmc {
    pub db_model_manager: DbModelManager,
    player_bmc: Arc<DbPlayerBmc>,
    ship_bmc: Arc<DbShipBmc>,
    waypoint_bmc: Arc<DbWaypointBmc>,
    graph_bmc: Arc<DbGraphBmc>,
    container_bmc: Arc<DbContainerBmc>,
    log_bmc: Arc<DbLogBmc>,
    assignment_bmc: Arc<DbAssignmentBmc>,
    contract_bmc: Arc<DbContractBmc>,
    market_bmc: Arc<DbMarketBmc>,
    route_bmc: Arc<DbRouteBmc>,
}

impl DbBmc {
    pub fn new(mm: DbModelManager) -> Self {
        Self {
            db_model_manager: mm.clone(),
            player_bmc: Arc::new(DbPlayerBmc { mm: mm.clone() }),
            ship_bmc: Arc::new(DbShipBmc { mm: mm.clone() }),
            waypoint_bmc: Arc::new(DbWaypointBmc { mm: mm.clone() }),
            graph_bmc: Arc::new(DbGraphBmc { mm: mm.clone() }),
            container_bmc: Arc::new(DbContainerBmc { mm: mm.clone() }),
            log_bmc: Arc::new(DbLogBmc { mm: mm.clone() }),
            assignment_bmc: Arc::new(DbAssignmentBmc { mm: mm.clone() }),
            contract_bmc: Arc::new(DbContractBmc { mm: mm.clone() }),
            market_bmc: Arc::new(DbMarketBmc { mm: mm.clone() }),
            route_bmc: Arc::new(DbRouteBmc { mm }),
        }
    }
}

impl Bmc for DbBmc {
    fn player_bmc(&self) -> Arc<dyn PlayerBmcTrait> {
        self.player_bmc.clone() as Arc<dyn PlayerBmcTrait>
    }

    fn ship_bmc(&self) -> Arc<dyn ShipBmcTrait> {
        self.ship_bmc.clone() as Arc<dyn ShipBmcTrait>
    }

    fn waypoint_bmc(&self) -> Arc<dyn WaypointBmcTrait> {
        self.waypoint_bmc.clone() as Arc<dyn WaypointBmcTrait>
    }

    fn graph_bmc(&self) -> Arc<dyn GraphBmcTrait> {
        self.graph_bmc.clone() as Arc<dyn GraphBmcTrait>
    }

    fn container_bmc(&self) -> Arc<dyn ContainerBmcTrait> {
        self.container_bmc.clone() as Arc<dyn ContainerBmcTrait>
    }

    fn log_bmc(&self) -> Arc<dyn LogBmcTrait> {
        self.log_bmc.clone() as Arc<dyn LogBmcTrait>
    }

    fn assignment_bmc(&self) -> Arc<dyn AssignmentBmcTrait> {
        self.assignment_bmc.clone() as Arc<dyn AssignmentBmcTrait>
    }

    fn contract_bmc(&self) -> Arc<dyn ContractBmcTrait> {
        self.contract_bmc.clone() as Arc<dyn ContractBmcTrait>
    }

    fn market_bmc(&self) -> Arc<dyn MarketBmcTrait> {
        self.market_bmc.clone() as Arc<dyn MarketBmcTrait>
    }

    fn route_bmc(&self) -> Arc<dyn RouteBmcTrait> {
        self.route_bmc.clone() as Arc<dyn RouteBmcTrait>
    }
}

/// Backing store for tests and offline development. The container repository
/// shares the assignment registry so the transactional claim semantics hold.
#[derive(Debug)]
pub struct InMemoryBmc {
    pub in_mem_player_bmc: Arc<InMemoryPlayerBmc>,
    pub in_mem_ship_bmc: Arc<InMemoryShipBmc>,
    pub in_mem_waypoint_bmc: Arc<InMemoryWaypointBmc>,
    pub in_mem_graph_bmc: Arc<InMemoryGraphBmc>,
    pub in_mem_container_bmc: Arc<InMemoryContainerBmc>,
    pub in_mem_log_bmc: Arc<InMemoryLogBmc>,
    pub in_mem_assignment_bmc: Arc<InMemoryAssignmentBmc>,
    pub in_mem_contract_bmc: Arc<InMemoryContractBmc>,
    pub in_mem_market_bmc: Arc<InMemoryMarketBmc>,
    pub in_mem_route_bmc: Arc<InMemoryRouteBmc>,
}

impl InMemoryBmc {
    pub fn new() -> Self {
        let assignments = Arc::new(InMemoryAssignmentBmc::new());
        Self {
            in_mem_player_bmc: Arc::new(InMemoryPlayerBmc::new()),
            in_mem_ship_bmc: Arc::new(InMemoryShipBmc::new()),
            in_mem_waypoint_bmc: Arc::new(InMemoryWaypointBmc::new()),
            in_mem_graph_bmc: Arc::new(InMemoryGraphBmc::new()),
            in_mem_container_bmc: Arc::new(InMemoryContainerBmc::new(Arc::clone(&assignments))),
            in_mem_log_bmc: Arc::new(InMemoryLogBmc::new()),
            in_mem_assignment_bmc: assignments,
            in_mem_contract_bmc: Arc::new(InMemoryContractBmc::new()),
            in_mem_market_bmc: Arc::new(InMemoryMarketBmc::new()),
            in_mem_route_bmc: Arc::new(InMemoryRouteBmc::new()),
        }
    }
}

impl Default for InMemoryBmc {
    fn default() -> Self {
        Self::new()
    }
}

impl Bmc for InMemoryBmc {
    fn player_bmc(&self) -> Arc<dyn PlayerBmcTrait> {
        Arc::clone(&self.in_mem_player_bmc) as Arc<dyn PlayerBmcTrait>
    }

    fn ship_bmc(&self) -> Arc<dyn ShipBmcTrait> {
        Arc::clone(&self.in_mem_ship_bmc) as Arc<dyn ShipBmcTrait>
    }

    fn waypoint_bmc(&self) -> Arc<dyn WaypointBmcTrait> {
        Arc::clone(&self.in_mem_waypoint_bmc) as Arc<dyn WaypointBmcTrait>
    }

    fn graph_bmc(&self) -> Arc<dyn GraphBmcTrait> {
        Arc::clone(&self.in_mem_graph_bmc) as Arc<dyn GraphBmcTrait>
    }

    fn container_bmc(&self) -> Arc<dyn ContainerBmcTrait> {
        Arc::clone(&self.in_mem_container_bmc) as Arc<dyn ContainerBmcTrait>
    }

    fn log_bmc(&self) -> Arc<dyn LogBmcTrait> {
        Arc::clone(&self.in_mem_log_bmc) as Arc<dyn LogBmcTrait>
    }

    fn assignment_bmc(&self) -> Arc<dyn AssignmentBmcTrait> {
        Arc::clone(&self.in_mem_assignment_bmc) as Arc<dyn AssignmentBmcTrait>
    }

    fn contract_bmc(&self) -> Arc<dyn ContractBmcTrait> {
        Arc::clone(&self.in_mem_contract_bmc) as Arc<dyn ContractBmcTrait>
    }

    fn market_bmc(&self) -> Arc<dyn MarketBmcTrait> {
        Arc::clone(&self.in_mem_market_bmc) as Arc<dyn MarketBmcTrait>
    }

    fn route_bmc(&self) -> Arc<dyn RouteBmcTrait> {
        Arc::clone(&self.in_mem_route_bmc) as Arc<dyn RouteBmcTrait>
    }
}
