use crate::assignments::AssignmentRegistry;
use crate::context::ExecCtx;
use crate::logsink::LogSink;
use crate::mediator::{Mediator, MediatorHandle};
use chrono::Utc;
use fleet_domain::{
    BatchContractWorkflowCommand, Container, ContainerConfig, ContainerId, ContainerStatus, ContainerType, Error, NavigateShipCommand,
    PlayerId, ReleaseReason, RestartPolicy, Result, ScoutMarketsCommand, ScoutTourCommand, ShipSymbol, EXIT_CANCELLED, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use fleet_store::{Bmc, Ctx};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

pub const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CreateContainerSpec {
    pub container_id: Option<ContainerId>,
    pub container_type: ContainerType,
    pub config: ContainerConfig,
    pub restart_policy: RestartPolicy,
}

/// In-memory half of a container: the cancellable context plus the config
/// snapshot the root task runs against.
#[derive(Debug)]
pub struct ContainerHandle {
    pub container_id: ContainerId,
    pub player_id: PlayerId,
    pub container_type: ContainerType,
    pub config: ContainerConfig,
    pub restart_policy: RestartPolicy,
    started_at: chrono::DateTime<Utc>,
    status: StdMutex<ContainerStatus>,
    exit_code: StdMutex<Option<i32>>,
    restart_count: AtomicU32,
    cancel: CancellationToken,
    stopped_by_user: AtomicBool,
}

impl ContainerHandle {
    fn status(&self) -> ContainerStatus {
        *self.status.lock().expect("status mutex poisoned")
    }

    fn set_status(&self, status: ContainerStatus) {
        *self.status.lock().expect("status mutex poisoned") = status;
    }

    fn snapshot(&self) -> Container {
        Container {
            container_id: self.container_id.clone(),
            container_type: self.container_type,
            config: self.config.clone(),
            status: self.status(),
            restart_policy: self.restart_policy,
            restart_count: self.restart_count.load(Ordering::SeqCst),
            started_at: self.started_at,
            stopped_at: self.status().is_terminal().then(Utc::now),
            exit_code: *self.exit_code.lock().expect("exit code mutex poisoned"),
        }
    }

    /// The ship this container binds exclusively, if its type binds one.
    fn claimed_ship(&self) -> Option<&ShipSymbol> {
        match self.container_type {
            ContainerType::ScoutFleet => None,
            _ => self.config.ship_symbol.as_ref(),
        }
    }
}

/// Schedules containers as one root task each: create/stop/remove/inspect,
/// restart policy, and the guaranteed release of ship leases on every exit
/// path including panics.
#[derive(Debug)]
pub struct ContainerRuntime {
    containers: Mutex<HashMap<ContainerId, Arc<ContainerHandle>>>,
    bmc: Arc<dyn Bmc>,
    registry: AssignmentRegistry,
    sink: Arc<LogSink>,
    mediator: MediatorHandle,
    restart_backoff_base: Duration,
}

impl ContainerRuntime {
    pub fn new(bmc: Arc<dyn Bmc>, sink: Arc<LogSink>, mediator: MediatorHandle) -> Arc<Self> {
        Self::with_restart_backoff(bmc, sink, mediator, RESTART_BACKOFF_BASE)
    }

    pub fn with_restart_backoff(bmc: Arc<dyn Bmc>, sink: Arc<LogSink>, mediator: MediatorHandle, backoff_base: Duration) -> Arc<Self> {
        let registry = AssignmentRegistry::new(bmc.assignment_bmc());
        Arc::new(Self {
            containers: Mutex::new(HashMap::new()),
            bmc,
            registry,
            sink,
            mediator,
            restart_backoff_base: backoff_base,
        })
    }

    pub fn registry(&self) -> &AssignmentRegistry {
        &self.registry
    }

    /// Startup recovery: every active assignment left by a previous daemon
    /// process is a zombie. Runs before the RPC server accepts connections.
    pub async fn sweep_zombies(&self) -> Result<u64> {
        let released = self.registry.release_all_active(ReleaseReason::DaemonRestart).await?;
        let failed = self.bmc.container_bmc().fail_all_non_terminal(Utc::now(), EXIT_FAILURE).await?;
        if failed > 0 {
            event!(Level::INFO, failed, "marked stale containers from previous run as failed");
        }
        Ok(released)
    }

    pub async fn create(self: &Arc<Self>, player_id: PlayerId, spec: CreateContainerSpec) -> Result<Container> {
        validate_config(spec.container_type, &spec.config)?;

        let container_id = spec
            .container_id
            .unwrap_or_else(|| ContainerId::generate(spec.container_type));

        // config snapshot: this clone is the only copy the container ever sees
        let handle = Arc::new(ContainerHandle {
            container_id: container_id.clone(),
            player_id,
            container_type: spec.container_type,
            config: spec.config.clone(),
            restart_policy: spec.restart_policy,
            started_at: Utc::now(),
            status: StdMutex::new(ContainerStatus::Starting),
            exit_code: StdMutex::new(None),
            restart_count: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            stopped_by_user: AtomicBool::new(false),
        });

        {
            let mut containers = self.containers.lock().await;
            if containers.contains_key(&container_id) {
                return Err(Error::Conflict(format!("container {container_id} already exists")));
            }

            let container = handle.snapshot();
            self.bmc
                .container_bmc()
                .create_with_claim(&Ctx::new(player_id), &container, handle.claimed_ship())
                .await?;

            containers.insert(container_id.clone(), Arc::clone(&handle));
        }

        event!(Level::INFO, container = %container_id, r#type = %spec.container_type, "container created");

        let runtime = Arc::clone(self);
        let task_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            Self::supervise(runtime, task_handle).await;
        });

        Ok(handle.snapshot())
    }

    /// Immediate termination semantics: cancels, persists STOPPED, releases
    /// the ship lock, returns without awaiting the root task. Idempotent.
    pub async fn stop(&self, player_id: PlayerId, container_id: &ContainerId) -> Result<()> {
        let maybe_handle = self.containers.lock().await.get(container_id).cloned();

        match maybe_handle {
            Some(handle) if handle.player_id == player_id => {
                if handle.status().is_terminal() {
                    return Ok(());
                }
                handle.stopped_by_user.store(true, Ordering::SeqCst);
                handle.cancel.cancel();
                handle.set_status(ContainerStatus::Stopped);
                *handle.exit_code.lock().expect("exit code mutex poisoned") = Some(EXIT_CANCELLED);

                self.bmc
                    .container_bmc()
                    .update_status(&Ctx::new(player_id), container_id, ContainerStatus::Stopped, Some(Utc::now()), Some(EXIT_CANCELLED))
                    .await?;
                if let Some(ship) = handle.claimed_ship() {
                    self.registry
                        .release_owned(player_id, ship, container_id, ReleaseReason::Stopped)
                        .await?;
                }
                event!(Level::INFO, container = %container_id, "container stopped");
                Ok(())
            }
            _ => {
                // not in memory: a container from a previous daemon session
                let stored = self
                    .bmc
                    .container_bmc()
                    .get(&Ctx::new(player_id), container_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("container {container_id}")))?;
                if !stored.status.is_terminal() {
                    self.bmc
                        .container_bmc()
                        .update_status(&Ctx::new(player_id), container_id, ContainerStatus::Stopped, Some(Utc::now()), Some(EXIT_CANCELLED))
                        .await?;
                    if let Some(ship) = &stored.config.ship_symbol {
                        self.registry.release(player_id, ship, ReleaseReason::Stopped).await?;
                    }
                }
                Ok(())
            }
        }
    }

    pub async fn remove(&self, player_id: PlayerId, container_id: &ContainerId) -> Result<()> {
        let container = self.inspect(player_id, container_id).await?;
        if !container.status.is_terminal() {
            return Err(Error::InvalidState(format!(
                "container {container_id} is {}; stop it before removing",
                container.status
            )));
        }

        if let Some(ship) = &container.config.ship_symbol {
            self.registry.release(player_id, ship, ReleaseReason::ManualCleanup).await?;
        }
        self.bmc.container_bmc().delete(&Ctx::new(player_id), container_id).await?;
        self.containers.lock().await.remove(container_id);
        Ok(())
    }

    pub async fn list(&self, player_id: PlayerId) -> Result<Vec<Container>> {
        self.bmc.container_bmc().list(&Ctx::new(player_id)).await.map_err(Into::into)
    }

    /// In-memory containers are served live; stopped containers from prior
    /// daemon sessions fall back to persistence.
    pub async fn inspect(&self, player_id: PlayerId, container_id: &ContainerId) -> Result<Container> {
        if let Some(handle) = self.containers.lock().await.get(container_id) {
            if handle.player_id == player_id {
                return Ok(handle.snapshot());
            }
        }

        self.bmc
            .container_bmc()
            .get(&Ctx::new(player_id), container_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("container {container_id}")))
    }

    async fn supervise(runtime: Arc<Self>, handle: Arc<ContainerHandle>) {
        let ctx = ExecCtx::for_container(
            handle.player_id,
            handle.container_id.clone(),
            handle.cancel.clone(),
            Arc::clone(&runtime.sink),
        );
        let store_ctx = Ctx::new(handle.player_id);

        loop {
            if !handle.cancel.is_cancelled() {
                handle.set_status(ContainerStatus::Running);
                let _ = runtime
                    .bmc
                    .container_bmc()
                    .update_status(&store_ctx, &handle.container_id, ContainerStatus::Running, None, None)
                    .await;
            }

            let body = Self::run_body(&runtime, &ctx, &handle);
            let outcome = AssertUnwindSafe(body).catch_unwind().await;

            let user_stopped = handle.stopped_by_user.load(Ordering::SeqCst);
            let (status, exit_code, reason, error) = match outcome {
                Err(_) => (
                    ContainerStatus::Failed,
                    EXIT_FAILURE,
                    ReleaseReason::Failed,
                    Some(Error::internal("container task panicked")),
                ),
                Ok(Ok(())) => {
                    if user_stopped || handle.cancel.is_cancelled() {
                        (ContainerStatus::Stopped, EXIT_CANCELLED, ReleaseReason::Stopped, None)
                    } else {
                        (ContainerStatus::Stopped, EXIT_SUCCESS, ReleaseReason::Completed, None)
                    }
                }
                Ok(Err(Error::Cancelled)) => (ContainerStatus::Stopped, EXIT_CANCELLED, ReleaseReason::Stopped, None),
                Ok(Err(err)) => (ContainerStatus::Failed, EXIT_FAILURE, ReleaseReason::Failed, Some(err)),
            };

            if let Some(err) = &error {
                ctx.error(format!(
                    "container {} ({}) failed: {err}; config: {}",
                    handle.container_id,
                    handle.container_type,
                    serde_json::to_string(&handle.config).unwrap_or_default()
                ));
            }

            // guaranteed cleanup: the ship lease is released on every exit
            // path, whatever the cause
            if let Some(ship) = handle.claimed_ship() {
                if let Err(release_err) = runtime
                    .registry
                    .release_owned(handle.player_id, ship, &handle.container_id, reason)
                    .await
                {
                    event!(Level::ERROR, container = %handle.container_id, error = %release_err, "assignment release failed");
                }
            }

            handle.set_status(status);
            if !user_stopped {
                *handle.exit_code.lock().expect("exit code mutex poisoned") = Some(exit_code);
                let _ = runtime
                    .bmc
                    .container_bmc()
                    .update_status(&store_ctx, &handle.container_id, status, Some(Utc::now()), Some(exit_code))
                    .await;
            }

            if !Self::should_restart(&handle, status, user_stopped, &error) {
                break;
            }

            let restarts = handle.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = runtime
                .bmc
                .container_bmc()
                .set_restart_count(&store_ctx, &handle.container_id, restarts)
                .await;

            // back in STARTING for the whole backoff window so reads never
            // mistake a pending restart for a terminal container
            handle.set_status(ContainerStatus::Starting);
            let _ = runtime
                .bmc
                .container_bmc()
                .update_status(&store_ctx, &handle.container_id, ContainerStatus::Starting, None, None)
                .await;

            let backoff = restart_backoff(runtime.restart_backoff_base, restarts);
            ctx.warn(format!(
                "restarting container {} (attempt {restarts}) after {}s backoff",
                handle.container_id,
                backoff.as_secs()
            ));
            if ctx.sleep(backoff).await.is_err() {
                // stopped while backing off
                handle.set_status(ContainerStatus::Stopped);
                break;
            }

            // the lease was released at the terminal transition; a restart
            // must win it back or yield to whoever claimed the ship meanwhile
            if let Some(ship) = handle.claimed_ship() {
                if let Err(claim_err) = runtime.registry.claim(handle.player_id, ship, &handle.container_id).await {
                    ctx.error(format!(
                        "restart of container {} aborted, ship {ship} was claimed elsewhere: {claim_err}",
                        handle.container_id
                    ));
                    handle.set_status(ContainerStatus::Failed);
                    let _ = runtime
                        .bmc
                        .container_bmc()
                        .update_status(&store_ctx, &handle.container_id, ContainerStatus::Failed, Some(Utc::now()), Some(EXIT_FAILURE))
                        .await;
                    break;
                }
            }
        }
    }

    fn should_restart(handle: &ContainerHandle, status: ContainerStatus, user_stopped: bool, error: &Option<Error>) -> bool {
        if user_stopped || handle.cancel.is_cancelled() {
            return false;
        }
        let restartable_error = error.as_ref().map(Error::is_restartable).unwrap_or(true);
        match handle.restart_policy {
            RestartPolicy::No => false,
            RestartPolicy::OnFailure => status == ContainerStatus::Failed && restartable_error,
            RestartPolicy::Always => restartable_error,
        }
    }

    async fn run_body(runtime: &Arc<Self>, ctx: &ExecCtx, handle: &Arc<ContainerHandle>) -> Result<()> {
        let mediator: Arc<Mediator> = runtime.mediator.get()?;
        let config = &handle.config;

        match handle.container_type {
            ContainerType::Navigate => {
                let command = NavigateShipCommand {
                    ship_symbol: config.ship_symbol.clone().expect("validated at creation"),
                    destination: config.destination.clone().expect("validated at creation"),
                };
                mediator.send(ctx, command).await.map(|_| ())
            }
            ContainerType::ContractLoop => {
                let command = BatchContractWorkflowCommand {
                    ship_symbol: config.ship_symbol.clone().expect("validated at creation"),
                    iterations: config.iterations.unwrap_or(1),
                };
                mediator.send(ctx, command).await.map(|_| ())
            }
            ContainerType::ScoutFleet => {
                let command = ScoutMarketsCommand {
                    ship_symbols: config.ship_symbols.clone(),
                    system_symbol: config.system_symbol.clone().expect("validated at creation"),
                    markets: config.markets.clone(),
                };
                mediator.send(ctx, command).await.map(|_| ())
            }
            ContainerType::ScoutTour => {
                let command = ScoutTourCommand {
                    ship_symbol: config.ship_symbol.clone().expect("validated at creation"),
                    markets: config.markets.clone(),
                    rounds: config.iterations,
                };
                mediator.send(ctx, command).await.map(|_| ())
            }
        }
    }
}

fn restart_backoff(base: Duration, restarts: u32) -> Duration {
    let factor = 1u32 << (restarts - 1).min(16);
    (base * factor).min(RESTART_BACKOFF_CAP)
}

fn validate_config(container_type: ContainerType, config: &ContainerConfig) -> Result<()> {
    let missing = |field: &str| Error::InvalidArgument(format!("{container_type} container requires {field}"));

    match container_type {
        ContainerType::Navigate => {
            config.ship_symbol.as_ref().ok_or_else(|| missing("ship_symbol"))?;
            config.destination.as_ref().ok_or_else(|| missing("destination"))?;
        }
        ContainerType::ContractLoop => {
            config.ship_symbol.as_ref().ok_or_else(|| missing("ship_symbol"))?;
        }
        ContainerType::ScoutFleet => {
            if config.ship_symbols.is_empty() {
                return Err(missing("ship_symbols"));
            }
            config.system_symbol.as_ref().ok_or_else(|| missing("system_symbol"))?;
            if config.markets.is_empty() {
                return Err(missing("markets"));
            }
        }
        ContainerType::ScoutTour => {
            config.ship_symbol.as_ref().ok_or_else(|| missing("ship_symbol"))?;
            if config.markets.is_empty() {
                return Err(missing("markets"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logsink::DEFAULT_SINK_CAPACITY;
    use crate::mediator::Handler;
    use fleet_domain::{NavigationOutcome, NavigationStatus, Route, WaypointSymbol};
    use fleet_store::InMemoryBmc;
    use std::sync::atomic::AtomicU32;

    /// Navigation stand-in whose behavior is scripted per test.
    #[derive(Debug)]
    enum NavScript {
        SleepForever,
        FailWith(fn() -> Error),
        Panic,
        FailTimesThenSucceed(AtomicU32, u32),
    }

    struct ScriptedNavHandler {
        script: NavScript,
    }

    #[async_trait::async_trait]
    impl Handler<NavigateShipCommand> for ScriptedNavHandler {
        async fn handle(&self, ctx: &ExecCtx, request: NavigateShipCommand) -> fleet_domain::Result<NavigationOutcome> {
            match &self.script {
                NavScript::SleepForever => {
                    ctx.sleep(Duration::from_secs(3600)).await?;
                    unreachable!("test containers are stopped before the hour is up")
                }
                NavScript::FailWith(make_error) => Err(make_error()),
                NavScript::Panic => panic!("scripted panic"),
                NavScript::FailTimesThenSucceed(counter, failures) => {
                    if counter.fetch_add(1, Ordering::SeqCst) < *failures {
                        Err(Error::Upstream {
                            status: 502,
                            code: None,
                            message: "bad gateway".to_string(),
                        })
                    } else {
                        let ship = crate::test_support::orbiting_ship(&request.ship_symbol.0, "X1-T-B1", 100, 200);
                        Ok(NavigationOutcome {
                            status: NavigationStatus::Arrived,
                            route: Route::already_there(request.ship_symbol, WaypointSymbol("X1-T-B1".to_string()), 100),
                            ship,
                        })
                    }
                }
            }
        }
    }

    struct TestRig {
        bmc: Arc<InMemoryBmc>,
        runtime: Arc<ContainerRuntime>,
    }

    fn rig(script: NavScript) -> TestRig {
        let bmc = Arc::new(InMemoryBmc::new());
        let sink = LogSink::spawn(bmc.log_bmc(), DEFAULT_SINK_CAPACITY);

        let mediator_handle = MediatorHandle::new();
        let mut mediator = Mediator::new();
        mediator.register::<NavigateShipCommand>(Arc::new(ScriptedNavHandler { script }));
        mediator_handle.set(Arc::new(mediator));

        let runtime = ContainerRuntime::with_restart_backoff(
            Arc::clone(&bmc) as Arc<dyn Bmc>,
            sink,
            mediator_handle,
            Duration::from_millis(10),
        );
        TestRig { bmc, runtime }
    }

    fn navigate_spec(ship: &str, policy: RestartPolicy) -> CreateContainerSpec {
        CreateContainerSpec {
            container_id: None,
            container_type: ContainerType::Navigate,
            config: ContainerConfig {
                ship_symbol: Some(ShipSymbol(ship.to_string())),
                destination: Some(WaypointSymbol("X1-T-B1".to_string())),
                ..Default::default()
            },
            restart_policy: policy,
        }
    }

    async fn wait_for_terminal(runtime: &Arc<ContainerRuntime>, player: PlayerId, id: &ContainerId) -> Container {
        for _ in 0..200 {
            let container = runtime.inspect(player, id).await.unwrap();
            if container.status.is_terminal() {
                return container;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("container never reached a terminal status");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_synchronous_and_releases_the_ship() {
        let TestRig { bmc, runtime } = rig(NavScript::SleepForever);
        let player = PlayerId(1);

        let created = runtime.create(player, navigate_spec("S-1", RestartPolicy::No)).await.unwrap();
        assert_eq!(created.status, ContainerStatus::Starting);
        tokio::task::yield_now().await;

        // the ship is locked while the container runs
        let active = runtime.registry().get_active(player, &ShipSymbol("S-1".to_string())).await.unwrap();
        assert_eq!(active.unwrap().container_id, created.container_id);

        runtime.stop(player, &created.container_id).await.unwrap();

        // synchronously terminal in memory and persistence, lock released
        let inspected = runtime.inspect(player, &created.container_id).await.unwrap();
        assert_eq!(inspected.status, ContainerStatus::Stopped);
        assert_eq!(inspected.exit_code, Some(EXIT_CANCELLED));

        let stored = bmc
            .container_bmc()
            .get(&Ctx::new(player), &created.container_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ContainerStatus::Stopped);
        assert!(runtime.registry().get_active(player, &ShipSymbol("S-1".to_string())).await.unwrap().is_none());

        // second stop is a no-op
        runtime.stop(player, &created.container_id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failure_marks_failed_releases_and_logs() {
        let TestRig { bmc, runtime } = rig(NavScript::FailWith(|| Error::Upstream {
            status: 502,
            code: None,
            message: "bad gateway".to_string(),
        }));
        let player = PlayerId(1);

        let created = runtime.create(player, navigate_spec("S-1", RestartPolicy::No)).await.unwrap();
        let container = wait_for_terminal(&runtime, player, &created.container_id).await;

        assert_eq!(container.status, ContainerStatus::Failed);
        assert_eq!(container.exit_code, Some(EXIT_FAILURE));
        assert!(runtime.registry().get_active(player, &ShipSymbol("S-1".to_string())).await.unwrap().is_none());

        // the failure is queryable post-mortem through the log store
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        let logs = bmc
            .log_bmc()
            .list_logs(&Ctx::new(player), &created.container_id, 10, None)
            .await
            .unwrap();
        assert!(logs.iter().any(|log| log.message.contains("bad gateway")));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_still_releases_the_assignment() {
        let TestRig { runtime, .. } = rig(NavScript::Panic);
        let player = PlayerId(1);

        let created = runtime.create(player, navigate_spec("S-1", RestartPolicy::No)).await.unwrap();
        let container = wait_for_terminal(&runtime, player, &created.container_id).await;

        assert_eq!(container.status, ContainerStatus::Failed);
        assert!(runtime.registry().get_active(player, &ShipSymbol("S-1".to_string())).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn on_failure_policy_restarts_until_success() {
        let TestRig { runtime, .. } = rig(NavScript::FailTimesThenSucceed(AtomicU32::new(0), 2));
        let player = PlayerId(1);

        let created = runtime.create(player, navigate_spec("S-1", RestartPolicy::OnFailure)).await.unwrap();
        let container = wait_for_terminal(&runtime, player, &created.container_id).await;

        assert_eq!(container.status, ContainerStatus::Stopped);
        assert_eq!(container.exit_code, Some(EXIT_SUCCESS));
        assert_eq!(container.restart_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_argument_is_never_restarted() {
        let TestRig { runtime, .. } = rig(NavScript::FailWith(|| Error::InvalidArgument("missing destination".to_string())));
        let player = PlayerId(1);

        let created = runtime.create(player, navigate_spec("S-1", RestartPolicy::Always)).await.unwrap();
        let container = wait_for_terminal(&runtime, player, &created.container_id).await;

        assert_eq!(container.status, ContainerStatus::Failed);
        assert_eq!(container.restart_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ship_claim_is_rejected_and_rolls_back() {
        let TestRig { bmc, runtime } = rig(NavScript::SleepForever);
        let player = PlayerId(1);

        let first = runtime.create(player, navigate_spec("S-1", RestartPolicy::No)).await.unwrap();
        tokio::task::yield_now().await;

        let second = runtime.create(player, navigate_spec("S-1", RestartPolicy::No)).await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        // only the first container row exists
        let all = bmc.container_bmc().list(&Ctx::new(player)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].container_id, first.container_id);
    }

    #[tokio::test(start_paused = true)]
    async fn config_snapshots_are_isolated_between_containers() {
        let TestRig { runtime, .. } = rig(NavScript::SleepForever);
        let player = PlayerId(1);

        let mut spec = navigate_spec("S-1", RestartPolicy::No);
        spec.config.markets = vec![WaypointSymbol("X1-T-M1".to_string())];

        let mut ids = Vec::new();
        for ship in ["S-1", "S-2", "S-3"] {
            let mut this_spec = spec.clone();
            this_spec.config.ship_symbol = Some(ShipSymbol(ship.to_string()));
            ids.push(runtime.create(player, this_spec).await.unwrap().container_id);
        }

        // mutating the caller's config after creation changes nothing
        spec.config.destination = Some(WaypointSymbol("X1-T-Z9".to_string()));
        spec.config.markets.push(WaypointSymbol("X1-T-M2".to_string()));

        for (id, ship) in ids.iter().zip(["S-1", "S-2", "S-3"]) {
            let container = runtime.inspect(player, id).await.unwrap();
            assert_eq!(container.config.ship_symbol, Some(ShipSymbol(ship.to_string())));
            assert_eq!(container.config.destination, Some(WaypointSymbol("X1-T-B1".to_string())));
            assert_eq!(container.config.markets.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn daemon_restart_sweeps_zombies_and_frees_their_ships() {
        let TestRig { bmc, runtime } = rig(NavScript::SleepForever);
        let player = PlayerId(1);

        for ship in ["S-1", "S-2", "S-3"] {
            runtime.create(player, navigate_spec(ship, RestartPolicy::No)).await.unwrap();
        }
        tokio::task::yield_now().await;
        assert_eq!(runtime.registry().list_active(player).await.unwrap().len(), 3);

        // simulated crash: a fresh runtime over the same store, old tasks gone
        let sink = LogSink::spawn(bmc.log_bmc(), DEFAULT_SINK_CAPACITY);
        let fresh_handle = MediatorHandle::new();
        fresh_handle.set(Arc::new(Mediator::new()));
        let fresh = ContainerRuntime::new(Arc::clone(&bmc) as Arc<dyn Bmc>, sink, fresh_handle);

        let released = fresh.sweep_zombies().await.unwrap();
        assert_eq!(released, 3);
        assert!(fresh.registry().list_active(player).await.unwrap().is_empty());

        // the swept ships can be claimed again
        let recreated = fresh.create(player, navigate_spec("S-1", RestartPolicy::No)).await.unwrap();
        assert_eq!(recreated.status, ContainerStatus::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_requires_a_terminal_status() {
        let TestRig { runtime, .. } = rig(NavScript::SleepForever);
        let player = PlayerId(1);

        let created = runtime.create(player, navigate_spec("S-1", RestartPolicy::No)).await.unwrap();
        tokio::task::yield_now().await;

        let premature = runtime.remove(player, &created.container_id).await;
        assert!(matches!(premature, Err(Error::InvalidState(_))));

        runtime.stop(player, &created.container_id).await.unwrap();
        runtime.remove(player, &created.container_id).await.unwrap();

        let gone = runtime.inspect(player, &created.container_id).await;
        assert!(matches!(gone, Err(Error::NotFound(_))));
    }
}
