use crate::context::ExecCtx;
use fleet_domain::{
    BatchContractWorkflowCommand, ContractBatchOutcome, DockShipCommand, Error, GetShipQuery, ListShipsQuery, NavigateShipCommand,
    NavigationOutcome, OrbitShipCommand, RefuelShipCommand, Result, ScoutMarketsCommand, ScoutSpawnOutcome, ScoutTourCommand,
    ScoutTourOutcome, SetFlightModeCommand, Ship,
};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

/// A dispatchable request with a statically known response type.
pub trait Request: Send + Debug + 'static {
    type Response: Send + 'static;
    const NAME: &'static str;
}

#[async_trait::async_trait]
pub trait Handler<R: Request>: Send + Sync {
    async fn handle(&self, ctx: &ExecCtx, request: R) -> Result<R::Response>;
}

macro_rules! impl_request {
    ($request:ty => $response:ty) => {
        impl Request for $request {
            type Response = $response;
            const NAME: &'static str = stringify!($request);
        }
    };
}

impl_request!(NavigateShipCommand => NavigationOutcome);
impl_request!(DockShipCommand => Ship);
impl_request!(OrbitShipCommand => Ship);
impl_request!(RefuelShipCommand => Ship);
impl_request!(SetFlightModeCommand => Ship);
impl_request!(GetShipQuery => Ship);
impl_request!(ListShipsQuery => Vec<Ship>);
impl_request!(BatchContractWorkflowCommand => ContractBatchOutcome);
impl_request!(ScoutMarketsCommand => ScoutSpawnOutcome);
impl_request!(ScoutTourCommand => ScoutTourOutcome);

/// Typed command/query bus: a static registry from request type to handler,
/// O(1) dispatch, errors passed through untouched. A missing handler is a
/// wiring bug, not a user error.
#[derive(Default)]
pub struct Mediator {
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator").field("handlers", &self.handlers.len()).finish()
    }
}

impl Mediator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: Request>(&mut self, handler: Arc<dyn Handler<R>>) {
        self.handlers.insert(TypeId::of::<R>(), Box::new(handler));
    }

    pub async fn send<R: Request>(&self, ctx: &ExecCtx, request: R) -> Result<R::Response> {
        let handler = self
            .handlers
            .get(&TypeId::of::<R>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<dyn Handler<R>>>())
            .ok_or(Error::UnregisteredRequest(R::NAME))?;
        handler.handle(ctx, request).await
    }
}

/// Breaks the construction cycle between handlers that dispatch through the
/// mediator and the mediator that owns them. Set exactly once during wiring.
#[derive(Debug, Clone, Default)]
pub struct MediatorHandle {
    inner: Arc<OnceLock<Arc<Mediator>>>,
}

impl MediatorHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mediator: Arc<Mediator>) {
        if self.inner.set(mediator).is_err() {
            panic!("mediator handle initialized twice");
        }
    }

    pub fn get(&self) -> Result<Arc<Mediator>> {
        self.inner
            .get()
            .cloned()
            .ok_or_else(|| Error::internal("mediator used before wiring completed"))
    }
}
