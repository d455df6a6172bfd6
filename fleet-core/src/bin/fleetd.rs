use anyhow::Context;
use clap::Parser;
use fleet_core::configuration::DaemonConfig;
use fleet_core::gateway::{ApiGateway, ApiGatewayConfig, GameClient, GameClientTrait, HttpRequestExecutor, RequestExecutor};
use fleet_core::handlers::{ContractWorkflowHandler, NavigationHandler, ScoutFleetHandler, ScoutTourHandler, ShipOpsHandler};
use fleet_core::logsink::{LogSink, DEFAULT_SINK_CAPACITY};
use fleet_core::mediator::{Mediator, MediatorHandle};
use fleet_core::routing::{GrpcOptimizer, OptimizerApi, RoutePlanner};
use fleet_core::rpc::{serve_unix, AppState};
use fleet_core::runtime::ContainerRuntime;
use fleet_core::universe::GraphProvider;
use fleet_domain::{
    BatchContractWorkflowCommand, DockShipCommand, GetShipQuery, ListShipsQuery, NavigateShipCommand, OrbitShipCommand,
    RefuelShipCommand, ScoutMarketsCommand, ScoutTourCommand, SetFlightModeCommand,
};
use fleet_store::{Bmc, DbBmc, DbModelManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DaemonConfig::parse();
    event!(Level::INFO, socket = %config.socket_path, api = %config.api_url, "starting fleet daemon");

    let mm = DbModelManager::connect(config.database_url.as_deref(), &config.resolve_db_path())
        .await
        .context("connecting to the persistence backend")?;
    mm.init_schema().await.context("bootstrapping the database schema")?;
    let bmc: Arc<dyn Bmc> = Arc::new(DbBmc::new(mm));

    let mut gateway_config = ApiGatewayConfig::new(config.api_url.clone());
    gateway_config.max_queue_depth = config.max_queue_depth;
    let gateway = ApiGateway::spawn(
        gateway_config,
        Arc::new(HttpRequestExecutor::new()) as Arc<dyn RequestExecutor>,
        bmc.player_bmc(),
    );
    let client: Arc<dyn GameClientTrait> = Arc::new(GameClient::new(gateway));

    let sink = LogSink::spawn(bmc.log_bmc(), DEFAULT_SINK_CAPACITY);
    let graphs = Arc::new(GraphProvider::new(bmc.graph_bmc(), bmc.waypoint_bmc(), Arc::clone(&client)));

    let optimizer: Arc<dyn OptimizerApi> =
        Arc::new(GrpcOptimizer::connect_lazy(&config.optimizer_url).context("configuring the optimizer client")?);
    let planner = Arc::new(RoutePlanner::new(optimizer));

    let mediator_handle = MediatorHandle::new();
    let runtime = ContainerRuntime::new(Arc::clone(&bmc), Arc::clone(&sink), mediator_handle.clone());

    let ship_ops = Arc::new(ShipOpsHandler::new(Arc::clone(&client), Arc::clone(&bmc)));
    let navigation = Arc::new(
        NavigationHandler::new(Arc::clone(&client), Arc::clone(&graphs), Arc::clone(&planner), Arc::clone(&bmc))
            .with_market_scanning(!config.disable_market_scans),
    );
    let contracts = Arc::new(ContractWorkflowHandler::new(
        Arc::clone(&client),
        Arc::clone(&bmc),
        mediator_handle.clone(),
    ));
    let scout_fleet = Arc::new(ScoutFleetHandler::new(
        Arc::clone(&client),
        Arc::clone(&planner),
        Arc::clone(&graphs),
        Arc::clone(&bmc),
        Arc::clone(&runtime),
    ));
    let scout_tour = Arc::new(ScoutTourHandler::new(
        Arc::clone(&client),
        Arc::clone(&bmc),
        mediator_handle.clone(),
    ));

    let mut mediator = Mediator::new();
    mediator.register::<NavigateShipCommand>(navigation);
    mediator.register::<DockShipCommand>(Arc::clone(&ship_ops) as _);
    mediator.register::<OrbitShipCommand>(Arc::clone(&ship_ops) as _);
    mediator.register::<RefuelShipCommand>(Arc::clone(&ship_ops) as _);
    mediator.register::<SetFlightModeCommand>(Arc::clone(&ship_ops) as _);
    mediator.register::<GetShipQuery>(Arc::clone(&ship_ops) as _);
    mediator.register::<ListShipsQuery>(ship_ops as _);
    mediator.register::<BatchContractWorkflowCommand>(contracts);
    mediator.register::<ScoutMarketsCommand>(scout_fleet);
    mediator.register::<ScoutTourCommand>(scout_tour);
    let mediator = Arc::new(mediator);
    mediator_handle.set(Arc::clone(&mediator));

    // zombie recovery runs before the rpc server accepts any work
    let released = runtime.sweep_zombies().await.context("startup zombie sweep")?;
    event!(Level::INFO, released, "startup recovery complete");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).context("installing the SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => event!(Level::INFO, "interrupt received, shutting down"),
            _ = sigterm.recv() => event!(Level::INFO, "termination signal received, shutting down"),
        }
        signal_token.cancel();
    });

    let state = AppState {
        mediator,
        runtime,
        bmc,
    };
    serve_unix(&config.socket_path, state, shutdown).await?;

    sink.drain().await;
    event!(Level::INFO, "daemon stopped cleanly");
    Ok(())
}
