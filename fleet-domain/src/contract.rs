use crate::model::{ContractId, TradeGoodSymbol, WaypointSymbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub trade_symbol: TradeGoodSymbol,
    pub destination: WaypointSymbol,
    pub units_required: u32,
    pub units_fulfilled: u32,
}

impl Delivery {
    pub fn units_remaining(&self) -> u32 {
        self.units_required.saturating_sub(self.units_fulfilled)
    }

    pub fn is_satisfied(&self) -> bool {
        self.units_fulfilled >= self.units_required
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub contract_id: ContractId,
    pub accepted: bool,
    pub fulfilled: bool,
    pub deliveries: Vec<Delivery>,
    pub payment_on_accept: i64,
    pub payment_on_fulfill: i64,
    pub expires_at: DateTime<Utc>,
}

impl Contract {
    pub fn all_deliveries_satisfied(&self) -> bool {
        self.deliveries.iter().all(|d| d.is_satisfied())
    }

    pub fn open_deliveries(&self) -> Vec<&Delivery> {
        self.deliveries.iter().filter(|d| !d.is_satisfied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_deliveries_skips_satisfied_entries() {
        let contract = Contract {
            contract_id: ContractId("c-1".to_string()),
            accepted: true,
            fulfilled: false,
            deliveries: vec![
                Delivery {
                    trade_symbol: TradeGoodSymbol("IRON_ORE".to_string()),
                    destination: WaypointSymbol("X1-T-D1".to_string()),
                    units_required: 100,
                    units_fulfilled: 100,
                },
                Delivery {
                    trade_symbol: TradeGoodSymbol("COPPER_ORE".to_string()),
                    destination: WaypointSymbol("X1-T-D1".to_string()),
                    units_required: 50,
                    units_fulfilled: 20,
                },
            ],
            payment_on_accept: 1_000,
            payment_on_fulfill: 5_000,
            expires_at: Utc::now(),
        };

        assert!(!contract.all_deliveries_satisfied());
        let open = contract.open_deliveries();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].units_remaining(), 30);
    }
}
