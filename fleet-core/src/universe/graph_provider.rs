use crate::context::ExecCtx;
use crate::gateway::GameClientTrait;
use chrono::{Duration, Utc};
use fleet_domain::{Result, SystemGraph, SystemSymbol, Waypoint};
use fleet_store::{GraphBmcTrait, WaypointBmcTrait};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{event, Level};

/// Durable graphs older than this are rebuilt from the API.
pub const GRAPH_TTL_SECS: i64 = 2 * 60 * 60;

/// Three-tier graph resolution: process memory, durable cache, API build.
/// Published graphs are immutable `Arc`s; readers use them lock-free after
/// the single lookup.
#[derive(Debug)]
pub struct GraphProvider {
    memory: RwLock<HashMap<SystemSymbol, Arc<SystemGraph>>>,
    graphs: Arc<dyn GraphBmcTrait>,
    waypoints: Arc<dyn WaypointBmcTrait>,
    client: Arc<dyn GameClientTrait>,
}

impl GraphProvider {
    pub fn new(graphs: Arc<dyn GraphBmcTrait>, waypoints: Arc<dyn WaypointBmcTrait>, client: Arc<dyn GameClientTrait>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            graphs,
            waypoints,
            client,
        }
    }

    pub async fn get_graph(&self, ctx: &ExecCtx, system_symbol: &SystemSymbol, force_refresh: bool) -> Result<Arc<SystemGraph>> {
        if !force_refresh {
            if let Some(graph) = self.memory.read().await.get(system_symbol) {
                return Ok(Arc::clone(graph));
            }

            if let Some(stored) = self.graphs.load_graph(system_symbol).await? {
                if Utc::now() - stored.last_updated <= Duration::seconds(GRAPH_TTL_SECS) {
                    event!(Level::DEBUG, system = %system_symbol, "graph served from durable cache");
                    let merged = self.merge_fuel_flags(stored).await?;
                    return Ok(self.publish(merged).await);
                }
            }
        }

        let graph = self.build_from_api(ctx, system_symbol).await?;
        self.graphs.save_graph(&graph).await?;
        let merged = self.merge_fuel_flags(graph).await?;
        Ok(self.publish(merged).await)
    }

    pub async fn evict(&self, system_symbol: &SystemSymbol) {
        self.memory.write().await.remove(system_symbol);
    }

    /// Pages the waypoint endpoint and persists every waypoint before the
    /// graph itself; a graph without its waypoint rows is a partial state the
    /// rest of the system rejects.
    async fn build_from_api(&self, ctx: &ExecCtx, system_symbol: &SystemSymbol) -> Result<SystemGraph> {
        let now = Utc::now();
        let mut waypoints: Vec<Waypoint> = Vec::new();
        let mut page = 1;
        loop {
            ctx.check_cancelled()?;
            let response = self.client.list_waypoints_page(ctx, system_symbol, page).await?;
            let fetched = response.waypoints.len();
            waypoints.extend(response.waypoints);
            if waypoints.len() as u64 >= response.total || fetched == 0 {
                break;
            }
            page += 1;
        }

        event!(Level::INFO, system = %system_symbol, count = waypoints.len(), "built system graph from api");

        self.waypoints.upsert_waypoints(&waypoints, now).await?;
        Ok(SystemGraph::build(system_symbol.clone(), &waypoints, now))
    }

    /// A graph lacking `has_fuel` is not fit to plan with; the flag is always
    /// re-derived from the waypoint cache on load.
    async fn merge_fuel_flags(&self, mut graph: SystemGraph) -> Result<SystemGraph> {
        let cached = self.waypoints.get_system_waypoints(&graph.system_symbol).await?;
        for waypoint in cached {
            if let Some(node) = graph.waypoints.get_mut(&waypoint.symbol) {
                node.has_fuel = waypoint.has_fuel();
            }
        }
        Ok(graph)
    }

    async fn publish(&self, graph: SystemGraph) -> Arc<SystemGraph> {
        let shared = Arc::new(graph);
        self.memory
            .write()
            .await
            .insert(shared.system_symbol.clone(), Arc::clone(&shared));
        shared
    }
}
