use crate::model::{distance_between, SystemSymbol, Waypoint, WaypointSymbol};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Normal,
    Orbital,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WaypointNode {
    pub symbol: WaypointSymbol,
    pub x: i64,
    pub y: i64,
    pub has_fuel: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: WaypointSymbol,
    pub to: WaypointSymbol,
    pub distance: u32,
    pub edge_type: EdgeType,
}

/// Immutable snapshot of one system's waypoints and pairwise distances.
/// Published behind an `Arc`; never mutated after construction.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SystemGraph {
    pub system_symbol: SystemSymbol,
    pub waypoints: HashMap<WaypointSymbol, WaypointNode>,
    pub edges: Vec<GraphEdge>,
    pub last_updated: DateTime<Utc>,
}

impl SystemGraph {
    /// Builds the graph from the waypoint cache: one node per waypoint and a
    /// bidirectional edge between every distinct pair. Orbital pairs get a
    /// zero-distance orbital edge.
    pub fn build(system_symbol: SystemSymbol, waypoints: &[Waypoint], now: DateTime<Utc>) -> SystemGraph {
        let nodes: HashMap<WaypointSymbol, WaypointNode> = waypoints
            .iter()
            .map(|wp| {
                (
                    wp.symbol.clone(),
                    WaypointNode {
                        symbol: wp.symbol.clone(),
                        x: wp.x,
                        y: wp.y,
                        has_fuel: wp.has_fuel(),
                    },
                )
            })
            .collect();

        let edges = waypoints
            .iter()
            .tuple_combinations()
            .map(|(a, b)| {
                if a.is_orbital_of(b) {
                    GraphEdge {
                        from: a.symbol.clone(),
                        to: b.symbol.clone(),
                        distance: 0,
                        edge_type: EdgeType::Orbital,
                    }
                } else {
                    GraphEdge {
                        from: a.symbol.clone(),
                        to: b.symbol.clone(),
                        distance: a.distance_to(b),
                        edge_type: EdgeType::Normal,
                    }
                }
            })
            .collect_vec();

        SystemGraph {
            system_symbol,
            waypoints: nodes,
            edges,
            last_updated: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn contains(&self, symbol: &WaypointSymbol) -> bool {
        self.waypoints.contains_key(symbol)
    }

    pub fn node(&self, symbol: &WaypointSymbol) -> Option<&WaypointNode> {
        self.waypoints.get(symbol)
    }

    pub fn fuel_station_count(&self) -> usize {
        self.waypoints.values().filter(|n| n.has_fuel).count()
    }

    pub fn distance(&self, from: &WaypointSymbol, to: &WaypointSymbol) -> Option<u32> {
        let a = self.node(from)?;
        let b = self.node(to)?;
        Some(distance_between(a.x, a.y, b.x, b.y))
    }

    /// Every edge endpoint must be a node key. A graph failing this check is
    /// a partial build and not fit to plan with.
    pub fn is_internally_consistent(&self) -> bool {
        self.edges
            .iter()
            .all(|e| self.waypoints.contains_key(&e.from) && self.waypoints.contains_key(&e.to))
    }
}
