pub mod contracts;
pub mod navigation;
pub mod scout;
pub mod ship_ops;

pub use contracts::ContractWorkflowHandler;
pub use navigation::NavigationHandler;
pub use scout::{ScoutFleetHandler, ScoutTourHandler};
pub use ship_ops::ShipOpsHandler;
