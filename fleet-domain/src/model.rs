use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use strum::{Display as StrumDisplay, EnumString};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub struct PlayerId(pub i64);

impl Display for PlayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct AgentSymbol(pub String);

impl Display for AgentSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ShipSymbol(pub String);

impl Display for ShipSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct SystemSymbol(pub String);

impl Display for SystemSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct WaypointSymbol(pub String);

impl WaypointSymbol {
    /// Waypoint symbols embed their system: `X1-GY87-A1` belongs to `X1-GY87`.
    pub fn system_symbol(&self) -> SystemSymbol {
        let parts: Vec<&str> = self.0.splitn(3, '-').collect();
        if parts.len() >= 2 {
            SystemSymbol(format!("{}-{}", parts[0], parts[1]))
        } else {
            SystemSymbol(self.0.clone())
        }
    }
}

impl Display for WaypointSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct TradeGoodSymbol(pub String);

impl TradeGoodSymbol {
    pub fn fuel() -> TradeGoodSymbol {
        TradeGoodSymbol("FUEL".to_string())
    }
}

impl Display for TradeGoodSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ContractId(pub String);

impl Display for ContractId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response envelope used by the game API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data<T> {
    pub data: T,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub agent_symbol: AgentSymbol,
    pub token: String,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipNavStatus {
    Docked,
    InOrbit,
    InTransit,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    Cruise,
    Drift,
    Burn,
    Stealth,
}

impl FlightMode {
    pub fn fuel_cost(&self, distance: u32) -> u32 {
        match self {
            FlightMode::Drift => 1,
            FlightMode::Cruise => u32::max(1, distance),
            FlightMode::Stealth => u32::max(1, distance),
            FlightMode::Burn => 2 * u32::max(1, distance),
        }
    }

    pub fn travel_time_secs(&self, distance: u32, engine_speed: u32) -> u32 {
        let navigation_multiplier: f32 = match self {
            FlightMode::Drift => 250.,
            FlightMode::Stealth => 30.,
            FlightMode::Cruise => 25.,
            FlightMode::Burn => 12.5,
        };

        (f32::max(distance as f32, 1.0) * navigation_multiplier / engine_speed as f32 + 15.0).round() as u32
    }
}

pub fn distance_between(from_x: i64, from_y: i64, to_x: i64, to_y: i64) -> u32 {
    let dx = (to_x - from_x) as f64;
    let dy = (to_y - from_y) as f64;
    (dx * dx + dy * dy).sqrt().round() as u32
}

/// Snapshot of a ship as reported by the game API. The API is the source of
/// truth; this struct is only ever a cache of its last response.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Ship {
    pub symbol: ShipSymbol,
    pub frame_type: String,
    pub nav_status: ShipNavStatus,
    pub location_waypoint: WaypointSymbol,
    pub destination_waypoint: Option<WaypointSymbol>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub fuel_current: u32,
    pub fuel_capacity: u32,
    pub cargo_capacity: u32,
    pub cargo_items: BTreeMap<TradeGoodSymbol, u32>,
    pub engine_speed: u32,
    pub flight_mode: FlightMode,
}

impl Ship {
    pub fn fuel_ratio(&self) -> f64 {
        if self.fuel_capacity == 0 {
            1.0
        } else {
            self.fuel_current as f64 / self.fuel_capacity as f64
        }
    }

    pub fn cargo_units(&self) -> u32 {
        self.cargo_items.values().sum()
    }

    pub fn cargo_units_of(&self, good: &TradeGoodSymbol) -> u32 {
        self.cargo_items.get(good).copied().unwrap_or(0)
    }

    pub fn cargo_space_left(&self) -> u32 {
        self.cargo_capacity.saturating_sub(self.cargo_units())
    }

    pub fn foreign_cargo(&self, keep: &TradeGoodSymbol) -> Vec<(TradeGoodSymbol, u32)> {
        self.cargo_items
            .iter()
            .filter(|(good, units)| *good != keep && **units > 0)
            .map(|(good, units)| (good.clone(), *units))
            .collect()
    }

    pub fn system_symbol(&self) -> SystemSymbol {
        self.location_waypoint.system_symbol()
    }
}

pub const MARKETPLACE_TRAIT: &str = "MARKETPLACE";
pub const FUEL_STATION_TYPE: &str = "FUEL_STATION";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Waypoint {
    pub symbol: WaypointSymbol,
    pub system_symbol: SystemSymbol,
    pub waypoint_type: String,
    pub x: i64,
    pub y: i64,
    pub traits: Vec<String>,
    pub orbitals: Vec<WaypointSymbol>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl Waypoint {
    pub fn has_fuel(&self) -> bool {
        self.traits.iter().any(|t| t == MARKETPLACE_TRAIT) || self.waypoint_type == FUEL_STATION_TYPE
    }

    pub fn has_marketplace(&self) -> bool {
        self.traits.iter().any(|t| t == MARKETPLACE_TRAIT)
    }

    pub fn is_orbital_of(&self, other: &Waypoint) -> bool {
        self.orbitals.contains(&other.symbol) || other.orbitals.contains(&self.symbol)
    }

    pub fn distance_to(&self, other: &Waypoint) -> u32 {
        distance_between(self.x, self.y, other.x, other.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waypoint_symbol_derives_system() {
        assert_eq!(WaypointSymbol("X1-GY87-A1".to_string()).system_symbol(), SystemSymbol("X1-GY87".to_string()));
        assert_eq!(
            WaypointSymbol("X1-GY87-H48".to_string()).system_symbol(),
            SystemSymbol("X1-GY87".to_string())
        );
    }

    #[test]
    fn drift_always_costs_one_fuel() {
        assert_eq!(FlightMode::Drift.fuel_cost(0), 1);
        assert_eq!(FlightMode::Drift.fuel_cost(500), 1);
    }

    #[test]
    fn cruise_fuel_cost_equals_distance() {
        assert_eq!(FlightMode::Cruise.fuel_cost(80), 80);
        assert_eq!(FlightMode::Burn.fuel_cost(80), 160);
    }

    #[test]
    fn fuel_station_without_marketplace_still_has_fuel() {
        let wp = Waypoint {
            symbol: WaypointSymbol("X1-A-F1".to_string()),
            system_symbol: SystemSymbol("X1-A".to_string()),
            waypoint_type: FUEL_STATION_TYPE.to_string(),
            x: 0,
            y: 0,
            traits: vec![],
            orbitals: vec![],
            synced_at: None,
        };
        assert!(wp.has_fuel());
        assert!(!wp.has_marketplace());
    }
}
