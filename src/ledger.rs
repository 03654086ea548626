// ─────────────────────────────────────────────────────────────────────────────
// ledger.rs — authoritative local projection of executed fills into net
// position, average cost and realized P&L. Mutated only by the Fill Poller.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

use crate::models::{Action, Fill, Position};

#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self { positions: HashMap::new() }
    }

    /// Creates a zero position lazily on first reference.
    pub fn get(&mut self, ticker: &str) -> Position {
        self.positions
            .entry(ticker.to_string())
            .or_insert_with(|| Position::flat(ticker))
            .clone()
    }

    pub fn all(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    /// Seeds a position fetched from the exchange at startup. Only used
    /// before the Fill Poller has applied anything for this ticker.
    pub fn seed(&mut self, position: Position) {
        self.positions.insert(position.ticker.clone(), position);
    }

    /// Applies the same `fill_id` twice without changing ledger state.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let pos = self
            .positions
            .entry(fill.ticker.clone())
            .or_insert_with(|| Position::flat(&fill.ticker));

        if pos.last_fill_id.as_deref() == Some(fill.fill_id.as_str()) {
            return;
        }

        let delta: i64 = match fill.action {
            Action::Buy => fill.count as i64,
            Action::Sell => -(fill.count as i64),
        };
        let old = pos.net_contracts;
        let new = old + delta;
        let price = fill.yes_price as f64;

        if old == 0 || signum(old) == signum(delta) {
            // Opening or adding: weighted mean of old cost and new fill cost.
            let old_notional = pos.avg_entry_price * old.unsigned_abs() as f64;
            let added_notional = price * fill.count as f64;
            pos.avg_entry_price = if new != 0 {
                (old_notional + added_notional) / new.unsigned_abs() as f64
            } else {
                0.0
            };
        } else {
            // Reducing or flipping.
            let closed = old.abs().min(delta.abs());
            let realized = if old > 0 {
                (price - pos.avg_entry_price) * closed as f64
            } else {
                (pos.avg_entry_price - price) * closed as f64
            };
            pos.realized_pnl_cents += realized.round() as i64;

            if new != 0 && signum(new) != signum(old) {
                // Flipped through zero: the remainder opens fresh at the fill price.
                pos.avg_entry_price = price;
            } else if new == 0 {
                pos.avg_entry_price = 0.0;
            }
        }

        pos.net_contracts = new;
        pos.last_fill_id = Some(fill.fill_id.clone());
        pos.last_updated = fill.created_time;
    }
}

fn signum(x: i64) -> i64 {
    if x > 0 {
        1
    } else if x < 0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn fill(id: &str, action: Action, count: u32, yes_price: u8) -> Fill {
        Fill {
            fill_id: id.to_string(),
            order_id: format!("order-{}", id),
            ticker: "TEST-TICKER".to_string(),
            action,
            side: Side::Yes,
            count,
            yes_price,
            created_time: 1000,
        }
    }

    #[test]
    fn fill_sign_is_independent_of_reported_side() {
        // S4: flat, sell 3 @ 60, reported side=no — delta is still -3.
        let mut ledger = PositionLedger::new();
        let mut f = fill("1", Action::Sell, 3, 60);
        f.side = Side::No;
        ledger.apply_fill(&f);
        let pos = ledger.get("TEST-TICKER");
        assert_eq!(pos.net_contracts, -3);
        assert_eq!(pos.avg_entry_price, 60.0);
    }

    #[test]
    fn realized_pnl_on_partial_close() {
        // S5: net=+5 avg=40, sell 3 @ 55 -> net=+2 avg=40 realized=+45.
        let mut ledger = PositionLedger::new();
        ledger.apply_fill(&fill("open", Action::Buy, 5, 40));
        ledger.apply_fill(&fill("close", Action::Sell, 3, 55));
        let pos = ledger.get("TEST-TICKER");
        assert_eq!(pos.net_contracts, 2);
        assert_eq!(pos.avg_entry_price, 40.0);
        assert_eq!(pos.realized_pnl_cents, 45);
    }

    #[test]
    fn flip_through_zero_reopens_at_fill_price() {
        let mut ledger = PositionLedger::new();
        ledger.apply_fill(&fill("open", Action::Buy, 2, 40));
        ledger.apply_fill(&fill("flip", Action::Sell, 5, 60));
        let pos = ledger.get("TEST-TICKER");
        assert_eq!(pos.net_contracts, -3);
        assert_eq!(pos.avg_entry_price, 60.0);
        assert_eq!(pos.realized_pnl_cents, 40); // (60-40)*2 closed
    }

    #[test]
    fn applying_same_fill_id_twice_is_a_no_op() {
        let mut ledger = PositionLedger::new();
        let f = fill("dup", Action::Buy, 4, 30);
        ledger.apply_fill(&f);
        let first = ledger.get("TEST-TICKER");
        ledger.apply_fill(&f);
        let second = ledger.get("TEST-TICKER");
        assert_eq!(first.net_contracts, second.net_contracts);
        assert_eq!(first.avg_entry_price, second.avg_entry_price);
        assert_eq!(first.realized_pnl_cents, second.realized_pnl_cents);
    }

    #[test]
    fn get_creates_zero_position_on_miss() {
        let mut ledger = PositionLedger::new();
        let pos = ledger.get("UNSEEN-TICKER");
        assert_eq!(pos.net_contracts, 0);
        assert_eq!(pos.avg_entry_price, 0.0);
    }
}
