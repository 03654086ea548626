// ─────────────────────────────────────────────────────────────────────────────
// models.rs — wire and domain types shared across the ledger, risk gate,
// quoter and exchange client.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

/// Which side of the binary contract an order/position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

/// What an order/fill does: buy or sell the named `Side`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// The exchange's own status vocabulary. `Resting` and `Open` are treated as
/// equivalent everywhere in this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Resting,
    Open,
    Canceled,
    Executed,
}

impl OrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Resting | OrderStatus::Open)
    }
}

/// Net direction of a position on the YES axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Yes,
    No,
    Flat,
}

/// Authoritative, immutable record of an executed trade as reported by the
/// exchange's fills endpoint. Effect on position depends only on `action`,
/// never on the exchange-reported `side` (taker fills can report the
/// counterparty's perspective).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub ticker: String,
    pub action: Action,
    pub side: Side,
    pub count: u32,
    pub yes_price: u8,
    pub created_time: i64,
}

/// Net position, average cost, and realized P&L for a single market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub net_contracts: i64,
    pub avg_entry_price: f64,
    pub realized_pnl_cents: i64,
    pub last_fill_id: Option<String>,
    pub last_updated: i64,
}

impl Position {
    pub fn flat(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            net_contracts: 0,
            avg_entry_price: 0.0,
            realized_pnl_cents: 0,
            last_fill_id: None,
            last_updated: 0,
        }
    }

    pub fn side(&self) -> PositionSide {
        if self.net_contracts > 0 {
            PositionSide::Yes
        } else if self.net_contracts < 0 {
            PositionSide::No
        } else {
            PositionSide::Flat
        }
    }

    /// Worst-case loss in cents if this position's market resolves against it.
    pub fn exposure_cents(&self) -> i64 {
        let price = self.avg_entry_price.round() as i64;
        match self.side() {
            PositionSide::Yes => self.net_contracts * price,
            PositionSide::No => self.net_contracts.abs() * (100 - price),
            PositionSide::Flat => 0,
        }
    }
}

/// Bid/ask order ids and prices this engine currently has resting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteState {
    pub bid_order_id: Option<String>,
    pub ask_order_id: Option<String>,
    pub bid_price: Option<u8>,
    pub ask_price: Option<u8>,
    pub last_midpoint: Option<f64>,
}

impl QuoteState {
    pub fn has_active_quotes(&self) -> bool {
        self.bid_order_id.is_some() && self.ask_order_id.is_some()
    }

    pub fn has_any_quotes(&self) -> bool {
        self.bid_order_id.is_some() || self.ask_order_id.is_some()
    }
}

/// Top-of-book snapshot for a single market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub best_bid: u8,
    pub best_ask: u8,
    pub status: String,
    pub volume: u64,
}

impl MarketSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn touches_positive(&self) -> bool {
        self.best_bid > 0 && self.best_ask > 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    pub available_cents: i64,
    pub portfolio_value_cents: i64,
}
