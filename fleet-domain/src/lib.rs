pub mod assignment;
pub mod commands;
pub mod container;
pub mod contract;
pub mod error;
pub mod graph;
pub mod logs;
pub mod market;
pub mod model;
pub mod route;

pub use assignment::*;
pub use commands::*;
pub use container::*;
pub use contract::*;
pub use error::*;
pub use graph::*;
pub use logs::*;
pub use market::*;
pub use model::*;
pub use route::*;
