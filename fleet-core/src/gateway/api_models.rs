use chrono::{DateTime, Utc};
use fleet_domain::{
    Contract, ContractId, Data, Delivery, FlightMode, MarketData, MarketTradeGood, Ship, ShipNavStatus, ShipSymbol, SystemSymbol,
    TradeGoodSymbol, Waypoint, WaypointSymbol,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire DTOs for the game API, trimmed to the fields the daemon consumes.

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShipDto {
    pub symbol: ShipSymbol,
    pub nav: NavDto,
    pub fuel: FuelDto,
    pub cargo: CargoDto,
    pub engine: EngineDto,
    pub frame: FrameDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NavDto {
    pub system_symbol: SystemSymbol,
    pub waypoint_symbol: WaypointSymbol,
    pub status: ShipNavStatus,
    pub flight_mode: FlightMode,
    pub route: NavRouteDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NavRouteDto {
    pub destination: NavRouteWaypointDto,
    pub arrival: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NavRouteWaypointDto {
    pub symbol: WaypointSymbol,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FuelDto {
    pub current: u32,
    pub capacity: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CargoDto {
    pub capacity: u32,
    pub units: u32,
    pub inventory: Vec<CargoItemDto>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CargoItemDto {
    pub symbol: TradeGoodSymbol,
    pub units: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EngineDto {
    pub speed: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FrameDto {
    pub symbol: String,
}

impl ShipDto {
    pub fn into_domain(self) -> Ship {
        let in_transit = self.nav.status == ShipNavStatus::InTransit;
        let cargo_items: BTreeMap<TradeGoodSymbol, u32> = self.cargo.inventory.into_iter().map(|item| (item.symbol, item.units)).collect();

        Ship {
            symbol: self.symbol,
            frame_type: self.frame.symbol,
            nav_status: self.nav.status,
            location_waypoint: self.nav.waypoint_symbol,
            destination_waypoint: in_transit.then_some(self.nav.route.destination.symbol),
            arrival_time: in_transit.then_some(self.nav.route.arrival),
            fuel_current: self.fuel.current,
            fuel_capacity: self.fuel.capacity,
            cargo_capacity: self.cargo.capacity,
            cargo_items,
            engine_speed: self.engine.speed,
            flight_mode: self.nav.flight_mode,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WaypointDto {
    pub symbol: WaypointSymbol,
    pub system_symbol: SystemSymbol,
    pub r#type: String,
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub traits: Vec<TraitDto>,
    #[serde(default)]
    pub orbitals: Vec<OrbitalDto>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TraitDto {
    pub symbol: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrbitalDto {
    pub symbol: WaypointSymbol,
}

impl WaypointDto {
    pub fn into_domain(self) -> Waypoint {
        Waypoint {
            symbol: self.symbol,
            system_symbol: self.system_symbol,
            waypoint_type: self.r#type,
            x: self.x,
            y: self.y,
            traits: self.traits.into_iter().map(|t| t.symbol).collect(),
            orbitals: self.orbitals.into_iter().map(|o| o.symbol).collect(),
            synced_at: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub meta: PaginationMeta,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarketDto {
    pub symbol: WaypointSymbol,
    #[serde(default)]
    pub trade_goods: Option<Vec<MarketTradeGoodDto>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarketTradeGoodDto {
    pub symbol: TradeGoodSymbol,
    pub trade_volume: Option<u32>,
    pub supply: String,
    pub activity: Option<String>,
    pub purchase_price: i64,
    pub sell_price: i64,
}

impl MarketDto {
    pub fn into_domain(self, scanned_at: DateTime<Utc>) -> MarketData {
        MarketData {
            waypoint: self.symbol,
            trade_goods: self
                .trade_goods
                .unwrap_or_default()
                .into_iter()
                .map(|tg| MarketTradeGood {
                    symbol: tg.symbol,
                    purchase_price: tg.purchase_price,
                    sell_price: tg.sell_price,
                    supply: tg.supply,
                    activity: tg.activity,
                    trade_volume: tg.trade_volume,
                })
                .collect(),
            scanned_at,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContractDto {
    pub id: String,
    pub terms: ContractTermsDto,
    pub accepted: bool,
    pub fulfilled: bool,
    pub expiration: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContractTermsDto {
    pub payment: PaymentDto,
    #[serde(default)]
    pub deliver: Vec<DeliveryDto>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDto {
    pub on_accepted: i64,
    pub on_fulfilled: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryDto {
    pub trade_symbol: TradeGoodSymbol,
    pub destination_symbol: WaypointSymbol,
    pub units_required: u32,
    pub units_fulfilled: u32,
}

impl ContractDto {
    pub fn into_domain(self) -> Contract {
        Contract {
            contract_id: ContractId(self.id),
            accepted: self.accepted,
            fulfilled: self.fulfilled,
            deliveries: self
                .terms
                .deliver
                .into_iter()
                .map(|d| Delivery {
                    trade_symbol: d.trade_symbol,
                    destination: d.destination_symbol,
                    units_required: d.units_required,
                    units_fulfilled: d.units_fulfilled,
                })
                .collect(),
            payment_on_accept: self.terms.payment.on_accepted,
            payment_on_fulfill: self.terms.payment.on_fulfilled,
            expires_at: self.expiration,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResponseDto {
    pub nav: NavDto,
    pub fuel: FuelDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NavOnlyDto {
    pub nav: NavDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefuelResponseDto {
    pub fuel: FuelDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDto {
    pub units: u32,
    pub price_per_unit: i64,
    pub total_price: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TradeResponseDto {
    pub cargo: CargoDto,
    pub transaction: TransactionDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContractResponseDto {
    pub contract: ContractDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeliverResponseDto {
    pub contract: ContractDto,
    pub cargo: CargoDto,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NavigateShipRequest {
    pub waypoint_symbol: WaypointSymbol,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PatchShipNavRequest {
    pub flight_mode: FlightMode,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefuelShipRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TradeCargoRequest {
    pub symbol: TradeGoodSymbol,
    pub units: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransferCargoRequest {
    pub trade_symbol: TradeGoodSymbol,
    pub units: u32,
    pub ship_symbol: ShipSymbol,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeliverContractRequest {
    pub ship_symbol: ShipSymbol,
    pub trade_symbol: TradeGoodSymbol,
    pub units: u32,
}

/// Error envelope the game API wraps every failure in.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ApiErrorBody {
    pub code: Option<u32>,
    pub message: String,
}

pub type GetShipResponse = Data<ShipDto>;
pub type ListShipsResponse = PaginatedResponse<ShipDto>;
pub type ListWaypointsResponse = PaginatedResponse<WaypointDto>;
pub type GetMarketResponse = Data<MarketDto>;
pub type NavigateShipResponse = Data<NavigateResponseDto>;
pub type DockShipResponse = Data<NavOnlyDto>;
pub type OrbitShipResponse = Data<NavOnlyDto>;
pub type SetFlightModeResponse = Data<NavOnlyDto>;
pub type RefuelShipResponse = Data<RefuelResponseDto>;
pub type TradeCargoResponse = Data<TradeResponseDto>;
pub type NegotiateContractResponse = Data<ContractResponseDto>;
pub type AcceptContractResponse = Data<ContractResponseDto>;
pub type FulfillContractResponse = Data<ContractResponseDto>;
pub type DeliverContractResponse = Data<DeliverResponseDto>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ship_dto_maps_transit_fields_only_in_transit() {
        let raw = r#"{
            "symbol": "AGENT-1",
            "nav": {
                "systemSymbol": "X1-GY87",
                "waypointSymbol": "X1-GY87-A1",
                "status": "DOCKED",
                "flightMode": "CRUISE",
                "route": {
                    "destination": { "symbol": "X1-GY87-A1" },
                    "arrival": "2026-03-13T19:04:18.732Z"
                }
            },
            "fuel": { "current": 380, "capacity": 400 },
            "cargo": { "capacity": 40, "units": 3, "inventory": [{ "symbol": "IRON_ORE", "units": 3 }] },
            "engine": { "speed": 30 },
            "frame": { "symbol": "FRAME_FRIGATE" }
        }"#;

        let ship = serde_json::from_str::<ShipDto>(raw).unwrap().into_domain();
        assert_eq!(ship.nav_status, ShipNavStatus::Docked);
        assert!(ship.destination_waypoint.is_none());
        assert!(ship.arrival_time.is_none());
        assert_eq!(ship.cargo_units_of(&TradeGoodSymbol("IRON_ORE".to_string())), 3);
        assert_eq!(ship.engine_speed, 30);
    }

    #[test]
    fn error_envelope_decodes_code_and_message() {
        let raw = r#"{"error":{"code":4511,"message":"Agent already has a contract."}}"#;
        let envelope: ApiErrorEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.error.code, Some(4511));
    }
}
