pub mod optimizer_proto;
pub mod planner;

pub use planner::{
    convert_optimizer_steps, GrpcOptimizer, MockOptimizerApi, OptimizerApi, RoutePlanner, ShipRouteSpec, OPTIMIZER_DEADLINE,
};
