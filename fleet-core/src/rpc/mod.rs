pub mod server;
pub mod types;

pub use server::{router, serve_unix, AppState};
pub use types::{classify, RpcError, RpcFailure};
