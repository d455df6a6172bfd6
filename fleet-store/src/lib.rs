pub mod bmc;
pub mod error;
pub mod manager;
pub mod schema;

pub use bmc::*;
pub use error::{with_transient_retry, StoreError, StoreResult};
pub use manager::DbModelManager;

use fleet_domain::PlayerId;

/// Per-call context. Every repository call is scoped to one player; the few
/// daemon-wide operations (zombie sweep) say so explicitly in their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ctx {
    pub player_id: PlayerId,
}

impl Ctx {
    pub fn new(player_id: PlayerId) -> Self {
        Self { player_id }
    }
}
