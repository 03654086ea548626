// ─────────────────────────────────────────────────────────────────────────────
// risk.rs — pre-trade risk limits. Pure functions over a position snapshot
// and a candidate order; side-effect-free, consults only the ledger and
// configured limits. Does not enforce itself — callers must check first.
// ─────────────────────────────────────────────────────────────────────────────
use crate::config::EngineConfig;
use crate::models::{Position, Side};

pub struct RiskGate<'a> {
    config: &'a EngineConfig,
}

impl<'a> RiskGate<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Exposure in cents if this ticker's position were `net_contracts` at
    /// `price_cents` on the YES axis (§3 formula).
    fn exposure_cents(net_contracts: i64, price_cents: i64) -> i64 {
        if net_contracts > 0 {
            net_contracts * price_cents
        } else if net_contracts < 0 {
            net_contracts.abs() * (100 - price_cents)
        } else {
            0
        }
    }

    /// Decides whether a candidate order is allowed. Closing risk (strictly
    /// reducing `|net_contracts|`) is never blocked by position or exposure
    /// caps.
    pub fn can_add(
        &self,
        ticker: &str,
        side: Side,
        contracts: u32,
        price_cents: u8,
        positions: &[Position],
    ) -> (bool, String) {
        let cur = positions
            .iter()
            .find(|p| p.ticker == ticker)
            .map(|p| p.net_contracts)
            .unwrap_or(0);
        let delta = match side {
            Side::Yes => contracts as i64,
            Side::No => -(contracts as i64),
        };
        let new_pos = cur + delta;

        if cur != 0 && signum(cur) != signum(delta) && new_pos.abs() < cur.abs() {
            return (true, "risk-reducing".to_string());
        }

        if new_pos.abs() > self.config.max_position_size {
            return (
                false,
                format!(
                    "|{}| exceeds MAX_POSITION_SIZE {}",
                    new_pos, self.config.max_position_size
                ),
            );
        }

        let candidate_exposure = Self::exposure_cents(new_pos, price_cents as i64);
        let other_exposure: i64 = positions
            .iter()
            .filter(|p| p.ticker != ticker)
            .map(|p| p.exposure_cents())
            .sum();
        let total = candidate_exposure + other_exposure;
        if total > self.config.max_total_exposure_cents {
            return (
                false,
                format!(
                    "total exposure {} exceeds MAX_TOTAL_EXPOSURE {}",
                    total, self.config.max_total_exposure_cents
                ),
            );
        }

        (true, "ok".to_string())
    }

    /// Minimum of three caps: distance to the position boundary, remaining
    /// exposure budget, and remaining balance — whichever binds first.
    pub fn max_size(
        &self,
        ticker: &str,
        side: Side,
        price_cents: u8,
        positions: &[Position],
        available_balance_cents: i64,
    ) -> u32 {
        let cur = positions
            .iter()
            .find(|p| p.ticker == ticker)
            .map(|p| p.net_contracts)
            .unwrap_or(0);

        let position_cap = match side {
            Side::Yes => self.config.max_position_size - cur,
            Side::No => self.config.max_position_size + cur,
        }
        .max(0);

        let cost_per_contract = match side {
            Side::Yes => price_cents as i64,
            Side::No => 100 - price_cents as i64,
        }
        .max(1);

        let other_exposure: i64 = positions
            .iter()
            .filter(|p| p.ticker != ticker)
            .map(|p| p.exposure_cents())
            .sum();
        let remaining_exposure = (self.config.max_total_exposure_cents - other_exposure).max(0);
        let exposure_cap = remaining_exposure / cost_per_contract;

        let balance_cap = available_balance_cents.max(0) / cost_per_contract;

        position_cap.min(exposure_cap).min(balance_cap).max(0) as u32
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

    fn config(max_position_size: i64, max_total_exposure_cents: i64) -> EngineConfig {
        EngineConfig {
            max_position_size,
            max_total_exposure_cents,
            ..EngineConfig::default()
        }
    }

    fn position(ticker: &str, net: i64) -> Position {
        Position { net_contracts: net, ..Position::flat(ticker) }
    }

    #[test]
    fn risk_reducing_order_bypasses_position_cap() {
        // S6: MAX_POSITION_SIZE=2, net=-5, buy 2 yes @ 40 -> new=-3, allowed.
        let cfg = config(2, 1_000_000);
        let gate = RiskGate::new(&cfg);
        let positions = vec![position("TEST-TICKER", -5)];
        let (allowed, _) = gate.can_add("TEST-TICKER", Side::Yes, 2, 40, &positions);
        assert!(allowed);
    }

    #[test]
    fn order_that_grows_position_past_cap_is_blocked() {
        let cfg = config(2, 1_000_000);
        let gate = RiskGate::new(&cfg);
        let positions = vec![position("TEST-TICKER", 2)];
        let (allowed, _) = gate.can_add("TEST-TICKER", Side::Yes, 1, 50, &positions);
        assert!(!allowed);
    }

    #[test]
    fn total_exposure_cap_blocks_when_exceeded() {
        let cfg = config(1000, 100);
        let gate = RiskGate::new(&cfg);
        let positions: Vec<Position> = Vec::new();
        let (allowed, _) = gate.can_add("TEST-TICKER", Side::Yes, 10, 50, &positions);
        assert!(!allowed);
    }

    #[test]
    fn max_size_is_min_of_three_caps() {
        let cfg = config(5, 1000);
        let gate = RiskGate::new(&cfg);
        let positions = vec![position("TEST-TICKER", 0)];
        // position_cap=5, exposure_cap=1000/50=20, balance_cap=100/50=2 -> min=2
        let size = gate.max_size("TEST-TICKER", Side::Yes, 50, &positions, 100);
        assert_eq!(size, 2);
    }
}
