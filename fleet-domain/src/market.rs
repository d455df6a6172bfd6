use crate::model::{TradeGoodSymbol, WaypointSymbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The game caps how many units a single transaction may move. Markets that
/// do not report a cap are treated as effectively unbounded.
pub const UNLIMITED_TRADE_VOLUME: u32 = 999_999;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MarketTradeGood {
    pub symbol: TradeGoodSymbol,
    pub purchase_price: i64,
    pub sell_price: i64,
    pub supply: String,
    pub activity: Option<String>,
    pub trade_volume: Option<u32>,
}

impl MarketTradeGood {
    pub fn effective_trade_volume(&self) -> u32 {
        self.trade_volume.unwrap_or(UNLIMITED_TRADE_VOLUME).max(1)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MarketData {
    pub waypoint: WaypointSymbol,
    pub trade_goods: Vec<MarketTradeGood>,
    pub scanned_at: DateTime<Utc>,
}

impl MarketData {
    pub fn trade_good(&self, symbol: &TradeGoodSymbol) -> Option<&MarketTradeGood> {
        self.trade_goods.iter().find(|tg| tg.symbol == *symbol)
    }

    pub fn sells(&self, symbol: &TradeGoodSymbol) -> bool {
        self.trade_good(symbol).is_some()
    }
}
