use crate::model::{FlightMode, ShipSymbol, WaypointSymbol};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One executable step of a route. `Refuel` only appears in optimizer output;
/// route conversion folds refuel stops into `requires_refuel` on the
/// preceding `Navigate` segment (or `refuel_before_departure` for a leading
/// stop), so a converted `Route` carries `Navigate` segments exclusively.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Display)]
pub enum RouteStep {
    Navigate {
        from: WaypointSymbol,
        to: WaypointSymbol,
        flight_mode: FlightMode,
        fuel_cost: u32,
        travel_time_secs: u32,
        requires_refuel: bool,
    },
    Refuel {
        at: WaypointSymbol,
    },
}

impl RouteStep {
    pub fn destination(&self) -> &WaypointSymbol {
        match self {
            RouteStep::Navigate { to, .. } => to,
            RouteStep::Refuel { at } => at,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RouteStatus {
    Planned,
    InProgress,
    Completed,
    Failed,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Route {
    pub route_id: String,
    pub ship_symbol: ShipSymbol,
    pub start: WaypointSymbol,
    pub destination: WaypointSymbol,
    pub segments: Vec<RouteStep>,
    pub refuel_before_departure: bool,
    pub total_fuel_cost: u32,
    pub total_time_secs: u32,
    pub final_fuel: u32,
}

impl Route {
    pub fn route_id_for(ship_symbol: &ShipSymbol, total_time_secs: u32) -> String {
        format!("{}_{}", ship_symbol.0, total_time_secs)
    }

    /// A degenerate route for a ship already sitting at its destination.
    pub fn already_there(ship_symbol: ShipSymbol, at: WaypointSymbol, fuel: u32) -> Route {
        Route {
            route_id: Self::route_id_for(&ship_symbol, 0),
            ship_symbol,
            start: at.clone(),
            destination: at,
            segments: vec![],
            refuel_before_departure: false,
            total_fuel_cost: 0,
            total_time_secs: 0,
            final_fuel: fuel,
        }
    }

    /// Segments must chain: the first starts at `start`, every later segment
    /// starts where the previous one ended, the last ends at `destination`.
    pub fn is_connected(&self) -> bool {
        let mut at = self.start.clone();
        for segment in &self.segments {
            match segment {
                RouteStep::Navigate { from, to, .. } => {
                    if *from != at {
                        return false;
                    }
                    at = to.clone();
                }
                RouteStep::Refuel { at: refuel_at } => {
                    if *refuel_at != at {
                        return false;
                    }
                }
            }
        }
        at == self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn navigate(from: &str, to: &str, fuel_cost: u32) -> RouteStep {
        RouteStep::Navigate {
            from: WaypointSymbol(from.to_string()),
            to: WaypointSymbol(to.to_string()),
            flight_mode: FlightMode::Cruise,
            fuel_cost,
            travel_time_secs: 100,
            requires_refuel: false,
        }
    }

    #[test]
    fn connected_route_chains_segments() {
        let route = Route {
            route_id: "S_200".to_string(),
            ship_symbol: ShipSymbol("S".to_string()),
            start: WaypointSymbol("A".to_string()),
            destination: WaypointSymbol("C".to_string()),
            segments: vec![navigate("A", "B", 10), navigate("B", "C", 10)],
            refuel_before_departure: false,
            total_fuel_cost: 20,
            total_time_secs: 200,
            final_fuel: 80,
        };
        assert!(route.is_connected());
    }

    #[test]
    fn gap_between_segments_is_detected() {
        let route = Route {
            route_id: "S_200".to_string(),
            ship_symbol: ShipSymbol("S".to_string()),
            start: WaypointSymbol("A".to_string()),
            destination: WaypointSymbol("C".to_string()),
            segments: vec![navigate("A", "B", 10), navigate("X", "C", 10)],
            refuel_before_departure: false,
            total_fuel_cost: 20,
            total_time_secs: 200,
            final_fuel: 80,
        };
        assert!(!route.is_connected());
    }

    #[test]
    fn zero_segment_route_is_connected_only_in_place() {
        let route = Route::already_there(ShipSymbol("S".to_string()), WaypointSymbol("A".to_string()), 50);
        assert!(route.is_connected());
        assert_eq!(route.route_id, "S_0");
    }
}
