use crate::model::{ShipSymbol, SystemSymbol, WaypointSymbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use strum::{Display as StrumDisplay, EnumString};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn generate(container_type: ContainerType) -> ContainerId {
        ContainerId(format!("{}-{}", container_type, uuid::Uuid::new_v4()))
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContainerType {
    Navigate,
    ContractLoop,
    ScoutFleet,
    ScoutTour,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl ContainerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerStatus::Stopped | ContainerStatus::Failed)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    No,
    OnFailure,
    Always,
}

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;

/// Work order for a container. Each container receives its own deep copy at
/// creation; the runtime never hands the same instance to two containers.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_symbol: Option<ShipSymbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<WaypointSymbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_symbol: Option<SystemSymbol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markets: Vec<WaypointSymbol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ship_symbols: Vec<ShipSymbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Container {
    pub container_id: ContainerId,
    pub container_type: ContainerType,
    pub config: ContainerConfig,
    pub status: ContainerStatus,
    pub restart_policy: RestartPolicy,
    pub restart_count: u32,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!ContainerStatus::Starting.is_terminal());
        assert!(!ContainerStatus::Running.is_terminal());
        assert!(ContainerStatus::Stopped.is_terminal());
        assert!(ContainerStatus::Failed.is_terminal());
    }

    #[test]
    fn generated_ids_carry_the_container_type() {
        let id = ContainerId::generate(ContainerType::ScoutTour);
        assert!(id.0.starts_with("scout_tour-"));
    }

    #[test]
    fn config_clone_is_a_deep_copy() {
        let mut original = ContainerConfig {
            ship_symbol: Some(ShipSymbol("S-1".to_string())),
            markets: vec![WaypointSymbol("X1-T-M1".to_string())],
            ..Default::default()
        };
        let snapshot = original.clone();

        original.ship_symbol = Some(ShipSymbol("S-2".to_string()));
        original.markets.push(WaypointSymbol("X1-T-M2".to_string()));

        assert_eq!(snapshot.ship_symbol, Some(ShipSymbol("S-1".to_string())));
        assert_eq!(snapshot.markets.len(), 1);
    }
}
