pub mod graph_provider;

pub use graph_provider::{GraphProvider, GRAPH_TTL_SECS};
