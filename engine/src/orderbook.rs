use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("orderbook simulation failed: {0}")]
pub struct SimulationError(pub String);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Lend,
    Borrow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TakerSimulation {
    // token base units: quote is lent or received now, base is repaid at maturity
    pub filled_base_qty: u64,
    pub filled_quote_qty: u64,
    pub volume_weighted_average_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MakerSimulation {
    pub filled_base_qty: u64,
    pub filled_quote_qty: u64,
    pub filled_vwar: f64,
    pub posted_base_qty: u64,
    pub posted_quote_qty: u64,
    pub self_match: bool,
}

impl MakerSimulation {
    /// The immediately matched part, viewed as a taker fill.
    pub fn filled(&self) -> TakerSimulation {
        TakerSimulation {
            filled_base_qty: self.filled_base_qty,
            filled_quote_qty: self.filled_quote_qty,
            volume_weighted_average_rate: self.filled_vwar,
        }
    }
}

pub trait OrderbookSimulator {
    fn simulate_taker(
        &self,
        side: OrderSide,
        amount: u64,
        limit_price: Option<u64>,
    ) -> Result<TakerSimulation, SimulationError>;

    fn simulate_maker(
        &self,
        side: OrderSide,
        amount: u64,
        limit_price: u64,
        account_id: &str,
    ) -> Result<MakerSimulation, SimulationError>;
}
