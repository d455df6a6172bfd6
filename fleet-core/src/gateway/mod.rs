pub mod api_gateway;
pub mod api_models;
pub mod game_client;

pub use api_gateway::{
    ApiGateway, ApiGatewayConfig, HttpRequestExecutor, HttpResponseBody, PreparedRequest, RequestExecutor, API_ERROR_EXISTING_CONTRACT,
};
pub use game_client::{CargoTransaction, GameClient, GameClientTrait, MockGameClientTrait, NavigationUpdate, WaypointPage};
