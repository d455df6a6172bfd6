use crate::container::ContainerId;
use crate::model::ShipSymbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Released,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseReason {
    Completed,
    Failed,
    Stopped,
    DaemonRestart,
    ManualCleanup,
}

/// Exclusive ship→container lock. At most one `active` row may exist per
/// `(player, ship)`; the store's partial unique index linearizes claims.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ShipAssignment {
    pub ship_symbol: ShipSymbol,
    pub container_id: ContainerId,
    pub status: AssignmentStatus,
    pub claimed_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<ReleaseReason>,
}
