use crate::context::ExecCtx;
use crate::mediator::Mediator;
use crate::rpc::types::*;
use crate::runtime::{ContainerRuntime, CreateContainerSpec};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_domain::{
    AgentSymbol, BatchContractWorkflowCommand, Container, ContainerId, ContainerLog, DockShipCommand, Error, GetShipQuery,
    ListShipsQuery, NavigateShipCommand, OrbitShipCommand, PlayerId, RefuelShipCommand, ScoutMarketsCommand, SetFlightModeCommand, Ship,
    ShipSymbol,
};
use fleet_store::{Bmc, Ctx};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

type RpcResult<T> = std::result::Result<T, RpcFailure>;

#[derive(Clone)]
pub struct AppState {
    pub mediator: Arc<Mediator>,
    pub runtime: Arc<ContainerRuntime>,
    pub bmc: Arc<dyn Bmc>,
}

impl AppState {
    /// Resolution order: a non-zero `player_id` wins even next to a
    /// mismatched agent symbol; otherwise the agent symbol is looked up.
    async fn resolve_player(&self, selector: &PlayerSelector) -> Result<PlayerId, Error> {
        if selector.player_id != 0 {
            return Ok(PlayerId(selector.player_id));
        }
        if selector.agent_symbol.is_empty() {
            return Err(Error::PlayerUnresolved);
        }
        let player = self
            .bmc
            .player_bmc()
            .get_by_agent_symbol(&AgentSymbol(selector.agent_symbol.clone()))
            .await?
            .ok_or(Error::PlayerUnresolved)?;
        Ok(player.id)
    }

    async fn exec_ctx(&self, selector: &PlayerSelector) -> Result<ExecCtx, Error> {
        Ok(ExecCtx::new(self.resolve_player(selector).await?))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/containers", post(create_container).get(list_containers))
        .route("/v1/containers/{id}", get(inspect_container).delete(remove_container))
        .route("/v1/containers/{id}/stop", post(stop_container))
        .route("/v1/containers/{id}/logs", get(container_logs))
        .route("/v1/ships", get(ship_list))
        .route("/v1/ships/{symbol}", get(ship_info))
        .route("/v1/ships/{symbol}/navigate", post(ship_navigate))
        .route("/v1/ships/{symbol}/dock", post(ship_dock))
        .route("/v1/ships/{symbol}/orbit", post(ship_orbit))
        .route("/v1/ships/{symbol}/refuel", post(ship_refuel))
        .route("/v1/ships/{symbol}/flight-mode", post(ship_flight_mode))
        .route("/v1/workflows/contract-batch", post(contract_batch))
        .route("/v1/workflows/scout-markets", post(scout_markets))
        .with_state(state)
}

/// Binds the control plane to a Unix-domain socket. A stale socket file from
/// a previous run is removed first.
pub async fn serve_unix(socket_path: &str, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    event!(Level::INFO, socket = socket_path, "rpc server accepting connections");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn create_container(State(state): State<AppState>, Json(request): Json<CreateContainerRequest>) -> RpcResult<Json<Container>> {
    let player_id = state.resolve_player(&request.player).await?;
    let container = state
        .runtime
        .create(player_id, CreateContainerSpec {
            container_id: request.container_id.map(ContainerId),
            container_type: request.container_type,
            config: request.config,
            restart_policy: request.restart_policy,
        })
        .await?;
    Ok(Json(container))
}

async fn list_containers(State(state): State<AppState>, Query(selector): Query<PlayerSelector>) -> RpcResult<Json<Vec<Container>>> {
    let player_id = state.resolve_player(&selector).await?;
    Ok(Json(state.runtime.list(player_id).await?))
}

async fn inspect_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(selector): Query<PlayerSelector>,
) -> RpcResult<Json<Container>> {
    let player_id = state.resolve_player(&selector).await?;
    Ok(Json(state.runtime.inspect(player_id, &ContainerId(id)).await?))
}

async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(selector): Query<PlayerSelector>,
) -> RpcResult<StatusCode> {
    let player_id = state.resolve_player(&selector).await?;
    state.runtime.stop(player_id, &ContainerId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(selector): Query<PlayerSelector>,
) -> RpcResult<StatusCode> {
    let player_id = state.resolve_player(&selector).await?;
    state.runtime.remove(player_id, &ContainerId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn container_logs(State(state): State<AppState>, Path(id): Path<String>, Query(query): Query<LogsQuery>) -> RpcResult<Response> {
    let player_id = state.resolve_player(&query.selector()).await?;
    let container_id = ContainerId(id);
    let store_ctx = Ctx::new(player_id);

    if !query.follow {
        let logs: Vec<ContainerLog> = state
            .bmc
            .log_bmc()
            .list_logs(&store_ctx, &container_id, query.limit, query.before_log_id)
            .await
            .map_err(Error::from)?;
        return Ok(Json(logs).into_response());
    }

    // follow mode: stream rows as newline-delimited json, polling for new
    // entries past the last seen log_id
    let log_bmc = state.bmc.log_bmc();
    let stream = futures::stream::unfold(query.before_log_id.unwrap_or(0), move |cursor| {
        let log_bmc = Arc::clone(&log_bmc);
        let container_id = container_id.clone();
        async move {
            let mut cursor = cursor;
            loop {
                match log_bmc.list_logs_after(&store_ctx, &container_id, cursor, 100).await {
                    Ok(rows) if !rows.is_empty() => {
                        cursor = rows.last().expect("non-empty").log_id;
                        let mut chunk = String::new();
                        for row in rows {
                            if let Ok(line) = serde_json::to_string(&row) {
                                chunk.push_str(&line);
                                chunk.push('\n');
                            }
                        }
                        return Some((Ok::<_, Infallible>(chunk), cursor));
                    }
                    Ok(_) => tokio::time::sleep(Duration::from_secs(1)).await,
                    Err(_) => return None,
                }
            }
        }
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::internal(format!("failed to build log stream response: {e}")))?;
    Ok(response)
}

async fn ship_list(State(state): State<AppState>, Query(selector): Query<PlayerSelector>) -> RpcResult<Json<Vec<Ship>>> {
    let ctx = state.exec_ctx(&selector).await?;
    Ok(Json(state.mediator.send(&ctx, ListShipsQuery {}).await?))
}

async fn ship_info(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(selector): Query<PlayerSelector>,
) -> RpcResult<Json<Ship>> {
    let ctx = state.exec_ctx(&selector).await?;
    let ship = state
        .mediator
        .send(&ctx, GetShipQuery {
            ship_symbol: ShipSymbol(symbol),
        })
        .await?;
    Ok(Json(ship))
}

async fn ship_navigate(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(request): Json<NavigateRequest>,
) -> RpcResult<Response> {
    let ctx = state.exec_ctx(&request.player).await?;
    let outcome = state
        .mediator
        .send(&ctx, NavigateShipCommand {
            ship_symbol: ShipSymbol(symbol),
            destination: request.destination,
        })
        .await?;
    Ok(Json(outcome).into_response())
}

async fn ship_dock(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(selector): Json<PlayerSelector>,
) -> RpcResult<Json<Ship>> {
    let ctx = state.exec_ctx(&selector).await?;
    Ok(Json(state.mediator.send(&ctx, DockShipCommand {
        ship_symbol: ShipSymbol(symbol),
    })
    .await?))
}

async fn ship_orbit(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(selector): Json<PlayerSelector>,
) -> RpcResult<Json<Ship>> {
    let ctx = state.exec_ctx(&selector).await?;
    Ok(Json(state.mediator.send(&ctx, OrbitShipCommand {
        ship_symbol: ShipSymbol(symbol),
    })
    .await?))
}

async fn ship_refuel(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(request): Json<RefuelRequest>,
) -> RpcResult<Json<Ship>> {
    let ctx = state.exec_ctx(&request.player).await?;
    Ok(Json(state.mediator.send(&ctx, RefuelShipCommand {
        ship_symbol: ShipSymbol(symbol),
        units: request.units,
    })
    .await?))
}

async fn ship_flight_mode(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(request): Json<FlightModeRequest>,
) -> RpcResult<Json<Ship>> {
    let ctx = state.exec_ctx(&request.player).await?;
    Ok(Json(state.mediator.send(&ctx, SetFlightModeCommand {
        ship_symbol: ShipSymbol(symbol),
        mode: request.mode,
    })
    .await?))
}

async fn contract_batch(State(state): State<AppState>, Json(request): Json<ContractBatchRequest>) -> RpcResult<Response> {
    let ctx = state.exec_ctx(&request.player).await?;
    let outcome = state
        .mediator
        .send(&ctx, BatchContractWorkflowCommand {
            ship_symbol: request.ship_symbol,
            iterations: request.iterations,
        })
        .await?;
    Ok(Json(outcome).into_response())
}

async fn scout_markets(State(state): State<AppState>, Json(request): Json<ScoutMarketsRequest>) -> RpcResult<Response> {
    let ctx = state.exec_ctx(&request.player).await?;
    let outcome = state
        .mediator
        .send(&ctx, ScoutMarketsCommand {
            ship_symbols: request.ship_symbols,
            system_symbol: request.system_symbol,
            markets: request.markets,
        })
        .await?;
    Ok(Json(outcome).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_domain::Player;
    use fleet_store::{InMemoryBmc, PlayerBmcTrait};
    use crate::logsink::{LogSink, DEFAULT_SINK_CAPACITY};
    use crate::mediator::MediatorHandle;

    fn state_with_players() -> (AppState, Arc<InMemoryBmc>) {
        let bmc = Arc::new(InMemoryBmc::new());
        let sink = LogSink::spawn(bmc.log_bmc(), DEFAULT_SINK_CAPACITY);
        let handle = MediatorHandle::new();
        let mediator = Arc::new(Mediator::new());
        handle.set(Arc::clone(&mediator));
        let runtime = ContainerRuntime::new(Arc::clone(&bmc) as Arc<dyn Bmc>, sink, handle);
        (
            AppState {
                mediator,
                runtime,
                bmc: Arc::clone(&bmc) as Arc<dyn Bmc>,
            },
            bmc,
        )
    }

    #[tokio::test]
    async fn player_resolution_prefers_the_numeric_id() {
        let (state, bmc) = state_with_players();
        bmc.player_bmc()
            .upsert(&Player {
                id: PlayerId(7),
                agent_symbol: AgentSymbol("SEVEN".to_string()),
                token: "t".to_string(),
                credits: 0,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        // id wins even when the agent symbol would resolve differently
        let resolved = state
            .resolve_player(&PlayerSelector {
                player_id: 3,
                agent_symbol: "SEVEN".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(resolved, PlayerId(3));

        let by_symbol = state
            .resolve_player(&PlayerSelector {
                player_id: 0,
                agent_symbol: "SEVEN".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(by_symbol, PlayerId(7));
    }

    #[tokio::test]
    async fn empty_selector_is_unresolved() {
        let (state, _) = state_with_players();
        let result = state.resolve_player(&PlayerSelector::default()).await;
        assert!(matches!(result, Err(Error::PlayerUnresolved)));

        let unknown = state
            .resolve_player(&PlayerSelector {
                player_id: 0,
                agent_symbol: "NOBODY".to_string(),
            })
            .await;
        assert!(matches!(unknown, Err(Error::PlayerUnresolved)));
    }
}
