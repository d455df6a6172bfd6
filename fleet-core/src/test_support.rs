//! Scripted in-memory stand-in for the game API. Mutates a tiny universe the
//! way the real API would and records every call in order, so tests can
//! assert the exact command sequences the executors issue.

use crate::context::ExecCtx;
use crate::gateway::{CargoTransaction, GameClientTrait, NavigationUpdate, WaypointPage};
use chrono::{Duration, Utc};
use fleet_domain::{
    Contract, ContractId, Delivery, Error, FlightMode, MarketData, MarketTradeGood, Result, Ship, ShipNavStatus, ShipSymbol,
    SystemSymbol, TradeGoodSymbol, Waypoint, WaypointSymbol,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

pub fn docked_ship(symbol: &str, at: &str, fuel: u32, fuel_capacity: u32) -> Ship {
    Ship {
        symbol: ShipSymbol(symbol.to_string()),
        frame_type: "FRAME_FRIGATE".to_string(),
        nav_status: ShipNavStatus::Docked,
        location_waypoint: WaypointSymbol(at.to_string()),
        destination_waypoint: None,
        arrival_time: None,
        fuel_current: fuel,
        fuel_capacity,
        cargo_capacity: 100,
        cargo_items: BTreeMap::new(),
        engine_speed: 30,
        flight_mode: FlightMode::Cruise,
    }
}

pub fn orbiting_ship(symbol: &str, at: &str, fuel: u32, fuel_capacity: u32) -> Ship {
    let mut ship = docked_ship(symbol, at, fuel, fuel_capacity);
    ship.nav_status = ShipNavStatus::InOrbit;
    ship
}

pub fn waypoint(symbol: &str, x: i64, y: i64, traits: Vec<&str>) -> Waypoint {
    Waypoint {
        symbol: WaypointSymbol(symbol.to_string()),
        system_symbol: WaypointSymbol(symbol.to_string()).system_symbol(),
        waypoint_type: "PLANET".to_string(),
        x,
        y,
        traits: traits.into_iter().map(String::from).collect(),
        orbitals: vec![],
        synced_at: None,
    }
}

pub fn fuel_market(at: &str) -> MarketData {
    MarketData {
        waypoint: WaypointSymbol(at.to_string()),
        trade_goods: vec![MarketTradeGood {
            symbol: TradeGoodSymbol::fuel(),
            purchase_price: 80,
            sell_price: 70,
            supply: "ABUNDANT".to_string(),
            activity: None,
            trade_volume: Some(100),
        }],
        scanned_at: Utc::now(),
    }
}

#[derive(Debug, Default)]
struct FakeState {
    ships: HashMap<ShipSymbol, Ship>,
    waypoints: HashMap<WaypointSymbol, Waypoint>,
    markets: HashMap<WaypointSymbol, MarketData>,
    contracts: HashMap<ContractId, Contract>,
    contract_template: Option<Vec<Delivery>>,
    next_contract: u32,
    calls: Vec<String>,
    injected_failures: Vec<(String, Error)>,
}

#[derive(Debug, Default)]
pub struct FakeGameApi {
    state: Mutex<FakeState>,
}

impl FakeGameApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ship(&self, ship: Ship) {
        self.state.lock().unwrap().ships.insert(ship.symbol.clone(), ship);
    }

    pub fn add_waypoints(&self, waypoints: Vec<Waypoint>) {
        let mut guard = self.state.lock().unwrap();
        for wp in waypoints {
            guard.waypoints.insert(wp.symbol.clone(), wp);
        }
    }

    pub fn add_market(&self, market: MarketData) {
        self.state.lock().unwrap().markets.insert(market.waypoint.clone(), market);
    }

    /// Deliveries handed out by the next negotiated contract.
    pub fn set_contract_template(&self, deliveries: Vec<Delivery>) {
        self.state.lock().unwrap().contract_template = Some(deliveries);
    }

    /// The next call whose recorded name starts with `prefix` fails once.
    pub fn inject_failure(&self, prefix: &str, error: Error) {
        self.state.lock().unwrap().injected_failures.push((prefix.to_string(), error));
    }

    pub fn ship(&self, symbol: &str) -> Ship {
        self.state.lock().unwrap().ships[&ShipSymbol(symbol.to_string())].clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }

    pub fn contract(&self, contract_id: &str) -> Contract {
        self.state.lock().unwrap().contracts[&ContractId(contract_id.to_string())].clone()
    }

    fn record(&self, call: String) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        guard.calls.push(call.clone());
        if let Some(position) = guard.injected_failures.iter().position(|(prefix, _)| call.starts_with(prefix.as_str())) {
            let (_, error) = guard.injected_failures.remove(position);
            return Err(error);
        }
        Ok(())
    }

    fn invalid_state(message: String) -> Error {
        Error::Upstream {
            status: 400,
            code: Some(4214),
            message,
        }
    }
}

#[async_trait::async_trait]
impl GameClientTrait for FakeGameApi {
    async fn get_ship(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Ship> {
        self.record(format!("get_ship {ship_symbol}"))?;
        self.state
            .lock()
            .unwrap()
            .ships
            .get(ship_symbol)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))
    }

    async fn list_ships_page(&self, _ctx: &ExecCtx, page: u32) -> Result<(Vec<Ship>, u64)> {
        self.record(format!("list_ships {page}"))?;
        let guard = self.state.lock().unwrap();
        let mut ships: Vec<Ship> = guard.ships.values().cloned().collect();
        ships.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let total = ships.len() as u64;
        Ok((if page == 1 { ships } else { vec![] }, total))
    }

    async fn list_waypoints_page(&self, _ctx: &ExecCtx, system_symbol: &SystemSymbol, page: u32) -> Result<WaypointPage> {
        self.record(format!("list_waypoints {system_symbol} {page}"))?;
        let guard = self.state.lock().unwrap();
        let mut waypoints: Vec<Waypoint> = guard
            .waypoints
            .values()
            .filter(|wp| wp.system_symbol == *system_symbol)
            .cloned()
            .collect();
        waypoints.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let total = waypoints.len() as u64;
        let page_items = waypoints
            .into_iter()
            .skip(((page - 1) * 20) as usize)
            .take(20)
            .collect();
        Ok(WaypointPage {
            waypoints: page_items,
            page,
            total,
            limit: 20,
        })
    }

    async fn navigate_ship(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol, to: &WaypointSymbol) -> Result<NavigationUpdate> {
        self.record(format!("navigate {ship_symbol} {to}"))?;
        let mut guard = self.state.lock().unwrap();
        let distance = {
            let ship = guard.ships.get(ship_symbol).ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
            if ship.nav_status != ShipNavStatus::InOrbit {
                return Err(Self::invalid_state(format!("ship {ship_symbol} must be in orbit to navigate")));
            }
            let from = guard
                .waypoints
                .get(&ship.location_waypoint)
                .ok_or_else(|| Error::NotFound(format!("waypoint {}", ship.location_waypoint)))?;
            let dest = guard
                .waypoints
                .get(to)
                .ok_or_else(|| Error::NotFound(format!("waypoint {to}")))?;
            from.distance_to(dest)
        };

        let ship = guard.ships.get_mut(ship_symbol).expect("presence checked above");
        let fuel_cost = ship.flight_mode.fuel_cost(distance);
        if fuel_cost > ship.fuel_current {
            return Err(Self::invalid_state(format!("insufficient fuel for {ship_symbol}: need {fuel_cost}")));
        }
        ship.fuel_current -= fuel_cost;
        ship.location_waypoint = to.clone();
        ship.nav_status = ShipNavStatus::InOrbit;

        Ok(NavigationUpdate {
            arrival_time: Utc::now() + Duration::milliseconds(10),
            fuel_remaining: ship.fuel_current,
        })
    }

    async fn dock_ship(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<()> {
        self.record(format!("dock {ship_symbol}"))?;
        let mut guard = self.state.lock().unwrap();
        let ship = guard
            .ships
            .get_mut(ship_symbol)
            .ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
        if ship.nav_status == ShipNavStatus::InTransit {
            return Err(Self::invalid_state(format!("cannot dock {ship_symbol} while in transit")));
        }
        ship.nav_status = ShipNavStatus::Docked;
        Ok(())
    }

    async fn orbit_ship(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<()> {
        self.record(format!("orbit {ship_symbol}"))?;
        let mut guard = self.state.lock().unwrap();
        let ship = guard
            .ships
            .get_mut(ship_symbol)
            .ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
        if ship.nav_status == ShipNavStatus::InTransit {
            return Err(Self::invalid_state(format!("cannot orbit {ship_symbol} while in transit")));
        }
        ship.nav_status = ShipNavStatus::InOrbit;
        Ok(())
    }

    async fn refuel_ship(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol, units: Option<u32>) -> Result<()> {
        self.record(format!("refuel {ship_symbol}"))?;
        let mut guard = self.state.lock().unwrap();
        let ship = guard
            .ships
            .get_mut(ship_symbol)
            .ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
        if ship.nav_status != ShipNavStatus::Docked {
            return Err(Self::invalid_state(format!("ship {ship_symbol} must be docked to refuel")));
        }
        ship.fuel_current = match units {
            Some(units) => (ship.fuel_current + units).min(ship.fuel_capacity),
            None => ship.fuel_capacity,
        };
        Ok(())
    }

    async fn set_flight_mode(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol, mode: FlightMode) -> Result<()> {
        self.record(format!("set_flight_mode {ship_symbol} {mode}"))?;
        let mut guard = self.state.lock().unwrap();
        let ship = guard
            .ships
            .get_mut(ship_symbol)
            .ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
        ship.flight_mode = mode;
        Ok(())
    }

    async fn get_market(&self, _ctx: &ExecCtx, waypoint_symbol: &WaypointSymbol) -> Result<MarketData> {
        self.record(format!("get_market {waypoint_symbol}"))?;
        self.state
            .lock()
            .unwrap()
            .markets
            .get(waypoint_symbol)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("market {waypoint_symbol}")))
    }

    async fn purchase_cargo(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<CargoTransaction> {
        self.record(format!("purchase {ship_symbol} {good} {units}"))?;
        let mut guard = self.state.lock().unwrap();

        let price_per_unit = {
            let ship = guard.ships.get(ship_symbol).ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
            if ship.nav_status != ShipNavStatus::Docked {
                return Err(Self::invalid_state(format!("ship {ship_symbol} must be docked to trade")));
            }
            let market = guard
                .markets
                .get(&ship.location_waypoint)
                .ok_or_else(|| Error::NotFound(format!("market {}", ship.location_waypoint)))?;
            let trade_good = market
                .trade_good(good)
                .ok_or_else(|| Error::NotFound(format!("good {good} at {}", market.waypoint)))?;
            if units > trade_good.effective_trade_volume() {
                return Err(Self::invalid_state(format!(
                    "purchase of {units} exceeds trade volume {}",
                    trade_good.effective_trade_volume()
                )));
            }
            if units == 0 {
                return Err(Self::invalid_state("cannot purchase zero units".to_string()));
            }
            trade_good.purchase_price
        };

        let ship = guard.ships.get_mut(ship_symbol).expect("presence checked above");
        if units > ship.cargo_space_left() {
            return Err(Self::invalid_state(format!("cargo hold of {ship_symbol} cannot fit {units} units")));
        }
        *ship.cargo_items.entry(good.clone()).or_insert(0) += units;

        Ok(CargoTransaction {
            units,
            total_price: price_per_unit * units as i64,
        })
    }

    async fn sell_cargo(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<CargoTransaction> {
        self.record(format!("sell {ship_symbol} {good} {units}"))?;
        let mut guard = self.state.lock().unwrap();
        let ship = guard
            .ships
            .get_mut(ship_symbol)
            .ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
        let held = ship.cargo_units_of(good);
        if held < units {
            return Err(Self::invalid_state(format!("ship {ship_symbol} holds only {held} {good}")));
        }
        *ship.cargo_items.get_mut(good).expect("held units checked above") -= units;
        Ok(CargoTransaction {
            units,
            total_price: 10 * units as i64,
        })
    }

    async fn jettison_cargo(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<()> {
        self.record(format!("jettison {ship_symbol} {good} {units}"))?;
        let mut guard = self.state.lock().unwrap();
        let ship = guard
            .ships
            .get_mut(ship_symbol)
            .ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
        let held = ship.cargo_units_of(good);
        let remaining = held.saturating_sub(units);
        if remaining == 0 {
            ship.cargo_items.remove(good);
        } else {
            ship.cargo_items.insert(good.clone(), remaining);
        }
        Ok(())
    }

    async fn transfer_cargo(&self, _ctx: &ExecCtx, from: &ShipSymbol, to: &ShipSymbol, good: &TradeGoodSymbol, units: u32) -> Result<()> {
        self.record(format!("transfer {from} {to} {good} {units}"))?;
        Ok(())
    }

    async fn negotiate_contract(&self, _ctx: &ExecCtx, ship_symbol: &ShipSymbol) -> Result<Contract> {
        self.record(format!("negotiate {ship_symbol}"))?;
        let mut guard = self.state.lock().unwrap();
        if guard.contracts.values().any(|c| !c.fulfilled) {
            return Err(Error::Upstream {
                status: 400,
                code: Some(crate::gateway::API_ERROR_EXISTING_CONTRACT),
                message: "Agent already has a contract.".to_string(),
            });
        }

        guard.next_contract += 1;
        let contract = Contract {
            contract_id: ContractId(format!("contract-{}", guard.next_contract)),
            accepted: false,
            fulfilled: false,
            deliveries: guard.contract_template.clone().unwrap_or_default(),
            payment_on_accept: 1_000,
            payment_on_fulfill: 10_000,
            expires_at: Utc::now() + Duration::days(7),
        };
        guard.contracts.insert(contract.contract_id.clone(), contract.clone());
        Ok(contract)
    }

    async fn accept_contract(&self, _ctx: &ExecCtx, contract_id: &ContractId) -> Result<Contract> {
        self.record(format!("accept {contract_id}"))?;
        let mut guard = self.state.lock().unwrap();
        let contract = guard
            .contracts
            .get_mut(contract_id)
            .ok_or_else(|| Error::NotFound(format!("contract {contract_id}")))?;
        contract.accepted = true;
        Ok(contract.clone())
    }

    async fn deliver_contract(
        &self,
        _ctx: &ExecCtx,
        contract_id: &ContractId,
        ship_symbol: &ShipSymbol,
        good: &TradeGoodSymbol,
        units: u32,
    ) -> Result<Contract> {
        self.record(format!("deliver {ship_symbol} {good} {units}"))?;
        let mut guard = self.state.lock().unwrap();

        let (location, held) = {
            let ship = guard.ships.get(ship_symbol).ok_or_else(|| Error::NotFound(format!("ship {ship_symbol}")))?;
            (ship.location_waypoint.clone(), ship.cargo_units_of(good))
        };
        if held < units {
            return Err(Self::invalid_state(format!("ship {ship_symbol} holds only {held} {good}")));
        }

        let delivered = {
            let contract = guard
                .contracts
                .get_mut(contract_id)
                .ok_or_else(|| Error::NotFound(format!("contract {contract_id}")))?;
            let delivery = contract
                .deliveries
                .iter_mut()
                .find(|d| d.trade_symbol == *good && d.destination == location)
                .ok_or_else(|| Self::invalid_state(format!("no open delivery for {good} at {location}")))?;
            let delivered = units.min(delivery.units_remaining());
            delivery.units_fulfilled += delivered;
            delivered
        };

        let ship = guard.ships.get_mut(ship_symbol).expect("presence checked above");
        let remaining = held - delivered;
        if remaining == 0 {
            ship.cargo_items.remove(good);
        } else {
            ship.cargo_items.insert(good.clone(), remaining);
        }

        Ok(guard.contracts[contract_id].clone())
    }

    async fn fulfill_contract(&self, _ctx: &ExecCtx, contract_id: &ContractId) -> Result<Contract> {
        self.record(format!("fulfill {contract_id}"))?;
        let mut guard = self.state.lock().unwrap();
        let contract = guard
            .contracts
            .get_mut(contract_id)
            .ok_or_else(|| Error::NotFound(format!("contract {contract_id}")))?;
        if !contract.all_deliveries_satisfied() {
            return Err(Self::invalid_state(format!("contract {contract_id} has open deliveries")));
        }
        contract.fulfilled = true;
        Ok(contract.clone())
    }
}
