use crate::model::{SystemSymbol, WaypointSymbol};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Typed error taxonomy shared by every handler. The mediator passes these
/// through untouched; the RPC layer maps them onto its code space.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("upstream api error (status {status}, code {code:?}): {message}")]
    Upstream {
        status: u16,
        code: Option<u32>,
        message: String,
    },

    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("backpressure: request queue full")]
    Backpressure,

    #[error("internal: {0}")]
    Internal(String),

    #[error("insufficient fuel: need {required}, have {available}")]
    InsufficientFuel { required: u32, available: u32 },

    #[error(
        "no route from {from} to {to}: {cached_waypoints} cached waypoints, {fuel_stations} fuel stations, \
         fuel ratio {fuel_ratio:.2}; waypoint data may be stale, try syncing waypoints for the system"
    )]
    NoRouteFound {
        from: WaypointSymbol,
        to: WaypointSymbol,
        cached_waypoints: usize,
        fuel_stations: usize,
        fuel_ratio: f64,
    },

    #[error("waypoint cache is empty for system {0}")]
    CacheEmpty(SystemSymbol),

    #[error("current location {0} is missing from the system graph")]
    LocationMissing(WaypointSymbol),

    #[error("destination {0} is missing from the system graph")]
    DestinationMissing(WaypointSymbol),

    #[error("ship still in transit, arrival expected at {arrival}")]
    InTransit { arrival: DateTime<Utc> },

    #[error("waypoint {0} referenced by the optimizer is not in the graph")]
    WaypointMissing(WaypointSymbol),

    #[error("player could not be resolved from the given id/agent symbol")]
    PlayerUnresolved,

    #[error("no handler registered for request type {0}")]
    UnregisteredRequest(&'static str),
}

impl Error {
    /// Restart policies must not retry user/configuration faults, and a
    /// user-initiated cancellation is never restarted.
    pub fn is_restartable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidArgument(_) | Error::NotFound(_) | Error::Cancelled | Error::UnregisteredRequest(_)
        )
    }

    pub fn internal(msg: impl Into<String>) -> Error {
        Error::Internal(msg.into())
    }
}
