use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleet_domain::{ContainerConfig, ContainerType, Error, FlightMode, RestartPolicy, ShipSymbol, SystemSymbol, WaypointSymbol};
use serde::{Deserialize, Serialize};

/// Every RPC identifies its player by numeric id, agent symbol, or both.
/// A non-zero id wins; an empty selector is an error.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlayerSelector {
    #[serde(default)]
    pub player_id: i64,
    #[serde(default)]
    pub agent_symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContainerRequest {
    #[serde(flatten)]
    pub player: PlayerSelector,
    #[serde(default)]
    pub container_id: Option<String>,
    pub container_type: ContainerType,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavigateRequest {
    #[serde(flatten)]
    pub player: PlayerSelector,
    pub destination: WaypointSymbol,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefuelRequest {
    #[serde(flatten)]
    pub player: PlayerSelector,
    #[serde(default)]
    pub units: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlightModeRequest {
    #[serde(flatten)]
    pub player: PlayerSelector,
    pub mode: FlightMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractBatchRequest {
    #[serde(flatten)]
    pub player: PlayerSelector,
    pub ship_symbol: ShipSymbol,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoutMarketsRequest {
    #[serde(flatten)]
    pub player: PlayerSelector,
    pub ship_symbols: Vec<ShipSymbol>,
    pub system_symbol: SystemSymbol,
    pub markets: Vec<WaypointSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub player_id: i64,
    #[serde(default)]
    pub agent_symbol: String,
    #[serde(default = "default_log_limit")]
    pub limit: u32,
    #[serde(default)]
    pub before_log_id: Option<i64>,
    #[serde(default)]
    pub follow: bool,
}

fn default_log_limit() -> u32 {
    100
}

impl LogsQuery {
    pub fn selector(&self) -> PlayerSelector {
        PlayerSelector {
            player_id: self.player_id,
            agent_symbol: self.agent_symbol.clone(),
        }
    }
}

/// Wire form of a failed RPC; `code` is the typed error space of the control
/// plane, `message` the human-readable cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

pub fn classify(error: &Error) -> (StatusCode, &'static str) {
    match error {
        Error::NotFound(_)
        | Error::CacheEmpty(_)
        | Error::LocationMissing(_)
        | Error::DestinationMissing(_)
        | Error::WaypointMissing(_)
        | Error::NoRouteFound { .. } => (StatusCode::NOT_FOUND, "NotFound"),
        Error::Conflict(_) | Error::InvalidState(_) | Error::InTransit { .. } => (StatusCode::CONFLICT, "Conflict"),
        Error::InvalidArgument(_) | Error::InsufficientFuel { .. } => (StatusCode::BAD_REQUEST, "InvalidArgument"),
        Error::PlayerUnresolved => (StatusCode::BAD_REQUEST, "PlayerUnresolved"),
        Error::Upstream { .. } | Error::RateLimited { .. } => (StatusCode::SERVICE_UNAVAILABLE, "Unavailable"),
        Error::Backpressure => (StatusCode::SERVICE_UNAVAILABLE, "Backpressure"),
        Error::Cancelled => (StatusCode::from_u16(499).expect("499 is a valid status code"), "Cancelled"),
        Error::Internal(_) | Error::UnregisteredRequest(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
    }
}

/// Adapter so handlers can `?` domain errors straight out of axum routes.
#[derive(Debug)]
pub struct RpcFailure(pub Error);

impl From<Error> for RpcFailure {
    fn from(error: Error) -> Self {
        RpcFailure(error)
    }
}

impl IntoResponse for RpcFailure {
    fn into_response(self) -> Response {
        let (status, code) = classify(&self.0);
        let body = RpcError {
            code: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_cover_the_rpc_code_space() {
        assert_eq!(classify(&Error::NotFound("x".to_string())).1, "NotFound");
        assert_eq!(classify(&Error::Backpressure).1, "Backpressure");
        assert_eq!(classify(&Error::PlayerUnresolved).1, "PlayerUnresolved");
        assert_eq!(classify(&Error::Cancelled).0.as_u16(), 499);
        assert_eq!(
            classify(&Error::Conflict("ship claimed".to_string())),
            (StatusCode::CONFLICT, "Conflict")
        );
    }
}
