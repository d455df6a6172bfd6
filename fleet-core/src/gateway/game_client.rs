use crate::context::ExecCtx;
use crate::gateway::api_gateway::{ApiGateway, HttpResponseBody};
use crate::gateway::api_models::*;
use chrono::{DateTime, Utc};
use fleet_domain::{
    Contract, ContractId, Error, FlightMode, MarketData, Result, Ship, ShipSymbol, SystemSymbol, TradeGoodSymbol, Waypoint,
    WaypointSymbol,
};
use mockall::automock;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::any::type_name;
use std::fmt::Debug;
use std::sync::Arc;

/// What `navigate_ship` reports back; the executor derives its wait from
/// `arrival_time` and re-syncs the full ship afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationUpdate {
    pub arrival_time: DateTime<Utc>,
    pub fuel_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CargoTransaction {
    pub units: u32,
    pub total_price: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaypointPage {
    pub waypoints: Vec<Waypoint>,
    pub page: u32,
    pub total: u64,
    pub limit: u32,
}

/// Typed surface over the game API. Every call is funneled through the
/// rate-limited gateway; handlers never see raw HTTP.
#[automock]
#[async_trait::async_trait]
pub trait GameClientTrait: Send + Sync + Debug {
    async fn get_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Ship>;

    async fn list_ships_page(&self, ctx: &ExecCtx, page: u32) -> Result<(Vec<Ship>, u64)>;

    async fn list_waypoints_page(&self, ctx: &ExecCtx, system_symbol: &SystemSymbol, page: u32) -> Result<WaypointPage>;

    async fn navigate_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, to: &WaypointSymbol) -> Result<NavigationUpdate>;

    async fn dock_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<()>;

    async fn orbit_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<()>;

    async fn refuel_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, units: Option<u32>) -> Result<()>;

    async fn set_flight_mode(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, mode: FlightMode) -> Result<()>;

    async fn get_market(&self, ctx: &ExecCtx, waypoint_symbol: &WaypointSymbol) -> Result<MarketData>;

    async fn purchase_cargo(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<CargoTransaction>;

    async fn sell_cargo(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<CargoTransaction>;

    async fn jettison_cargo(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<()>;

    async fn transfer_cargo(
        &self,
        ctx: &ExecCtx,
        from: &ShipSymbol,
        to: &ShipSymbol,
        good: &TradeGoodSymbol,
        units: u32,
    ) -> Result<()>;

    async fn negotiate_contract(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Contract>;

    async fn accept_contract(&self, ctx: &ExecCtx, contract_id: &ContractId) -> Result<Contract>;

    async fn deliver_contract(
        &self,
        ctx: &ExecCtx,
        contract_id: &ContractId,
        ship_symbol: &ShipSymbol,
        good: &TradeGoodSymbol,
        units: u32,
    ) -> Result<Contract>;

    async fn fulfill_contract(&self, ctx: &ExecCtx, contract_id: &ContractId) -> Result<Contract>;
}

#[derive(Debug, Clone)]
pub struct GameClient {
    gateway: Arc<ApiGateway>,
}

impl GameClient {
    pub fn new(gateway: Arc<ApiGateway>) -> Self {
        Self { gateway }
    }

    fn decode<T: DeserializeOwned>(resp: HttpResponseBody) -> Result<T> {
        serde_json::from_str(&resp.body).map_err(|e| {
            Error::internal(format!(
                "error decoding response for type {}: '{e}'. Response body was: '{}'",
                type_name::<T>(),
                resp.body
            ))
        })
    }

    async fn get<T: DeserializeOwned>(&self, ctx: &ExecCtx, path: String) -> Result<T> {
        Self::decode(self.gateway.call(ctx, Method::GET, path, None).await?)
    }

    async fn post<T: DeserializeOwned>(&self, ctx: &ExecCtx, path: String, body: Option<serde_json::Value>) -> Result<T> {
        Self::decode(self.gateway.call(ctx, Method::POST, path, body).await?)
    }
}

#[async_trait::async_trait]
impl GameClientTrait for GameClient {
    async fn get_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Ship> {
        let resp: GetShipResponse = self.get(ctx, format!("my/ships/{}", ship_symbol.0)).await?;
        Ok(resp.data.into_domain())
    }

    async fn list_ships_page(&self, ctx: &ExecCtx, page: u32) -> Result<(Vec<Ship>, u64)> {
        let resp: ListShipsResponse = self.get(ctx, format!("my/ships?page={page}&limit=20")).await?;
        let total = resp.meta.total;
        Ok((resp.data.into_iter().map(ShipDto::into_domain).collect(), total))
    }

    async fn list_waypoints_page(&self, ctx: &ExecCtx, system_symbol: &SystemSymbol, page: u32) -> Result<WaypointPage> {
        let resp: ListWaypointsResponse = self
            .get(ctx, format!("systems/{}/waypoints?page={page}&limit=20", system_symbol.0))
            .await?;
        Ok(WaypointPage {
            waypoints: resp.data.into_iter().map(WaypointDto::into_domain).collect(),
            page: resp.meta.page,
            total: resp.meta.total,
            limit: resp.meta.limit,
        })
    }

    async fn navigate_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, to: &WaypointSymbol) -> Result<NavigationUpdate> {
        let body = serde_json::to_value(NavigateShipRequest { waypoint_symbol: to.clone() }).expect("request serialization is infallible");
        let resp: NavigateShipResponse = self.post(ctx, format!("my/ships/{}/navigate", ship_symbol.0), Some(body)).await?;
        Ok(NavigationUpdate {
            arrival_time: resp.data.nav.route.arrival,
            fuel_remaining: resp.data.fuel.current,
        })
    }

    async fn dock_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<()> {
        let _: DockShipResponse = self.post(ctx, format!("my/ships/{}/dock", ship_symbol.0), None).await?;
        Ok(())
    }

    async fn orbit_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<()> {
        let _: OrbitShipResponse = self.post(ctx, format!("my/ships/{}/orbit", ship_symbol.0), None).await?;
        Ok(())
    }

    async fn refuel_ship(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, units: Option<u32>) -> Result<()> {
        let body = serde_json::to_value(RefuelShipRequest { units }).expect("request serialization is infallible");
        let _: RefuelShipResponse = self.post(ctx, format!("my/ships/{}/refuel", ship_symbol.0), Some(body)).await?;
        Ok(())
    }

    async fn set_flight_mode(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, mode: FlightMode) -> Result<()> {
        let body = serde_json::to_value(PatchShipNavRequest { flight_mode: mode }).expect("request serialization is infallible");
        let resp = self
            .gateway
            .call(ctx, Method::PATCH, format!("my/ships/{}/nav", ship_symbol.0), Some(body))
            .await?;
        let _: SetFlightModeResponse = Self::decode(resp)?;
        Ok(())
    }

    async fn get_market(&self, ctx: &ExecCtx, waypoint_symbol: &WaypointSymbol) -> Result<MarketData> {
        let resp: GetMarketResponse = self
            .get(
                ctx,
                format!("systems/{}/waypoints/{}/market", waypoint_symbol.system_symbol().0, waypoint_symbol.0),
            )
            .await?;
        Ok(resp.data.into_domain(Utc::now()))
    }

    async fn purchase_cargo(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<CargoTransaction> {
        let body = serde_json::to_value(TradeCargoRequest {
            symbol: good.clone(),
            units,
        })
        .expect("request serialization is infallible");
        let resp: TradeCargoResponse = self.post(ctx, format!("my/ships/{}/purchase", ship_symbol.0), Some(body)).await?;
        Ok(CargoTransaction {
            units: resp.data.transaction.units,
            total_price: resp.data.transaction.total_price,
        })
    }

    async fn sell_cargo(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<CargoTransaction> {
        let body = serde_json::to_value(TradeCargoRequest {
            symbol: good.clone(),
            units,
        })
        .expect("request serialization is infallible");
        let resp: TradeCargoResponse = self.post(ctx, format!("my/ships/{}/sell", ship_symbol.0), Some(body)).await?;
        Ok(CargoTransaction {
            units: resp.data.transaction.units,
            total_price: resp.data.transaction.total_price,
        })
    }

    async fn jettison_cargo(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<()> {
        let body = serde_json::to_value(TradeCargoRequest {
            symbol: good.clone(),
            units,
        })
        .expect("request serialization is infallible");
        let _: serde_json::Value = self.post(ctx, format!("my/ships/{}/jettison", ship_symbol.0), Some(body)).await?;
        Ok(())
    }

    async fn transfer_cargo(&self, ctx: &ExecCtx, from: &ShipSymbol, to: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<()> {
        let body = serde_json::to_value(TransferCargoRequest {
            trade_symbol: good.clone(),
            units,
            ship_symbol: to.clone(),
        })
        .expect("request serialization is infallible");
        let _: serde_json::Value = self.post(ctx, format!("my/ships/{}/transfer", from.0), Some(body)).await?;
        Ok(())
    }

    async fn negotiate_contract(&self, ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Contract> {
        let resp: NegotiateContractResponse = self
            .post(ctx, format!("my/ships/{}/negotiate/contract", ship_symbol.0), None)
            .await?;
        Ok(resp.data.contract.into_domain())
    }

    async fn accept_contract(&self, ctx: &ExecCtx, contract_id: &ContractId) -> Result<Contract> {
        let resp: AcceptContractResponse = self.post(ctx, format!("my/contracts/{}/accept", contract_id.0), None).await?;
        Ok(resp.data.contract.into_domain())
    }

    async fn deliver_contract(
        &self,
        ctx: &ExecCtx,
        contract_id: &ContractId,
        ship_symbol: &ShipSymbol,
        good: &TradeGoodSymbol,
        units: u32,
    ) -> Result<Contract> {
        let body = serde_json::to_value(DeliverContractRequest {
            ship_symbol: ship_symbol.clone(),
            trade_symbol: good.clone(),
            units,
        })
        .expect("request serialization is infallible");
        let resp: DeliverContractResponse = self.post(ctx, format!("my/contracts/{}/deliver", contract_id.0), Some(body)).await?;
        Ok(resp.data.contract.into_domain())
    }

    async fn fulfill_contract(&self, ctx: &ExecCtx, contract_id: &ContractId) -> Result<Contract> {
        let resp: FulfillContractResponse = self.post(ctx, format!("my/contracts/{}/fulfill", contract_id.0), None).await?;
        Ok(resp.data.contract.into_domain())
    }
}
