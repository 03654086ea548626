// ─────────────────────────────────────────────────────────────────────────────
// quoter.rs — stateful two-sided quoter: price calculation, requote
// decision, paired placement with one-sided cleanup, and fill-driven state
// invalidation. Grounded on the reference engine's exchange-facing order
// placement pattern, retargeted to a single two-leg quote per tick.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::exchange::ExchangeClient;
use crate::models::{Action, Fill, Position, QuoteState, Side};
use crate::risk::RiskGate;

pub struct Quoter {
    pub ticker: String,
    pub state: QuoteState,
    exchange: Arc<dyn ExchangeClient>,
}

impl Quoter {
    pub fn new(ticker: String, exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { ticker, state: QuoteState::default(), exchange }
    }

    // ── Pure calculation ────────────────────────────────────────────────

    /// `mid = (bb+ba)/2`, bid/ask symmetric around it minus skew, clamped to
    /// [1,99], with an anti-cross safety net if skew pushed bid >= ask.
    pub fn calculate_quotes(
        config: &EngineConfig,
        best_bid: u8,
        best_ask: u8,
        inventory_skew: i64,
    ) -> (u8, u8) {
        let mid = (best_bid as f64 + best_ask as f64) / 2.0;
        let half = config.spread_width as f64 / 2.0;

        let raw_bid = mid - half - inventory_skew as f64;
        let raw_ask = mid + half - inventory_skew as f64;

        let mut bid = raw_bid.round() as i64;
        let mut ask = raw_ask.round() as i64;

        bid = bid.clamp(1, 99);
        ask = ask.clamp(1, 99);

        if bid >= ask {
            bid = (mid.floor() as i64 - 1).clamp(1, 99);
            ask = (mid.floor() as i64 + 1).clamp(1, 99);
        }

        (bid as u8, ask as u8)
    }

    pub fn has_active_quotes(&self) -> bool {
        self.state.has_active_quotes()
    }

    /// The single requote decision function (§4.6).
    pub fn should_requote(
        &self,
        config: &EngineConfig,
        best_bid: u8,
        best_ask: u8,
        inventory_skew: i64,
    ) -> (bool, String) {
        if !self.state.has_active_quotes() {
            return (true, "no active quotes".to_string());
        }

        let (new_bid, new_ask) = Self::calculate_quotes(config, best_bid, best_ask, inventory_skew);
        if Some(new_bid) != self.state.bid_price || Some(new_ask) != self.state.ask_price {
            return (
                true,
                format!(
                    "quotes changed: {:?}/{:?} -> {}/{}",
                    self.state.bid_price, self.state.ask_price, new_bid, new_ask
                ),
            );
        }

        if let Some(bid_price) = self.state.bid_price {
            if bid_price > best_bid {
                return (true, format!("bid through market: {} > {}", bid_price, best_bid));
            }
        }
        if let Some(ask_price) = self.state.ask_price {
            if ask_price < best_ask {
                return (true, format!("ask through market: {} < {}", ask_price, best_ask));
            }
        }
        if let (Some(b), Some(a)) = (self.state.bid_price, self.state.ask_price) {
            if b >= a {
                return (true, "quotes crossed".to_string());
            }
        }

        (false, "quotes OK".to_string())
    }

    // ── Order execution ─────────────────────────────────────────────────

    /// Attempts both legs, risk-gating each independently, then applies the
    /// one-sided cleanup rule so a single surviving leg only stands when it
    /// reduces risk.
    pub async fn place_quotes(
        &mut self,
        config: &EngineConfig,
        best_bid: u8,
        best_ask: u8,
        inventory_skew: i64,
        positions: &[Position],
    ) {
        let (bid_price, ask_price) = Self::calculate_quotes(config, best_bid, best_ask, inventory_skew);
        let size = config.quote_size;
        log::info!("Placing: bid={}c, ask={}c, size={}", bid_price, ask_price, size);

        let gate = RiskGate::new(config);

        let (allow_bid, bid_reason) = gate.can_add(&self.ticker, Side::Yes, size, bid_price, positions);
        let mut bid_order_id = None;
        if !allow_bid {
            log::warn!("Bid blocked by limits: {}", bid_reason);
        } else {
            match self.exchange.place(&self.ticker, Action::Buy, Side::Yes, bid_price, size).await {
                Ok(id) => bid_order_id = Some(id),
                Err(e) => log::error!("Failed to place bid: {}", e),
            }
        }

        let (allow_ask, ask_reason) =
            gate.can_add(&self.ticker, Side::No, size, 100 - ask_price, positions);
        let mut ask_order_id = None;
        if !allow_ask {
            log::warn!("Ask blocked by limits: {}", ask_reason);
        } else {
            match self.exchange.place(&self.ticker, Action::Sell, Side::Yes, ask_price, size).await {
                Ok(id) => ask_order_id = Some(id),
                Err(e) => log::error!("Failed to place ask: {}", e),
            }
        }

        let net = positions
            .iter()
            .find(|p| p.ticker == self.ticker)
            .map(|p| p.net_contracts)
            .unwrap_or(0);

        if bid_order_id.is_some() && ask_order_id.is_none() {
            if net >= 0 {
                log::warn!("Partial placement - canceling lone bid to avoid one-sided exposure");
                if let Some(id) = &bid_order_id {
                    if let Err(e) = self.exchange.cancel(id).await {
                        log::error!("Failed to cancel lone bid: {}", e);
                    }
                }
                bid_order_id = None;
            } else {
                log::info!("Allowing lone bid to reduce short position ({})", net);
            }
        } else if ask_order_id.is_some() && bid_order_id.is_none() {
            if net <= 0 {
                log::warn!("Partial placement - canceling lone ask to avoid one-sided exposure");
                if let Some(id) = &ask_order_id {
                    if let Err(e) = self.exchange.cancel(id).await {
                        log::error!("Failed to cancel lone ask: {}", e);
                    }
                }
                ask_order_id = None;
            } else {
                log::info!("Allowing lone ask to reduce long position ({})", net);
            }
        }

        let midpoint = (best_bid as f64 + best_ask as f64) / 2.0;
        self.state = QuoteState {
            bid_price: bid_order_id.as_ref().map(|_| bid_price),
            ask_price: ask_order_id.as_ref().map(|_| ask_price),
            bid_order_id,
            ask_order_id,
            last_midpoint: Some(midpoint),
        };
    }

    /// Cancels all resting quotes. On cancel failure, state is preserved
    /// unless `force_clear` is set (shutdown, known-closed markets).
    pub async fn cancel_quotes(&mut self, force_clear: bool, reason: &str) -> usize {
        let mut order_ids = Vec::new();
        if let Some(id) = &self.state.bid_order_id {
            order_ids.push(id.clone());
        }
        if let Some(id) = &self.state.ask_order_id {
            order_ids.push(id.clone());
        }
        if order_ids.is_empty() {
            return 0;
        }

        log::info!(
            "Canceling: bid={:?}, ask={:?} | reason={}",
            self.state.bid_order_id, self.state.ask_order_id, reason
        );

        match self.exchange.cancel_batch(&order_ids).await {
            Ok(count) => {
                self.state = QuoteState::default();
                count
            }
            Err(e) => {
                log::error!("Error canceling quotes: {}", e);
                if force_clear {
                    log::warn!("Force clearing quote state despite cancel failure");
                    self.state = QuoteState::default();
                } else {
                    log::warn!("Quote state preserved - orders may still be resting");
                }
                0
            }
        }
    }

    pub async fn update_quotes(
        &mut self,
        config: &EngineConfig,
        best_bid: u8,
        best_ask: u8,
        inventory_skew: i64,
        positions: &[Position],
        reason: &str,
    ) {
        self.cancel_quotes(false, reason).await;
        self.place_quotes(config, best_bid, best_ask, inventory_skew, positions).await;
    }

    /// Clears the id/price of whichever leg the fill matches. Does not touch
    /// the other leg; the next control-loop tick observes the partial state
    /// and requotes.
    pub fn on_fill(&mut self, fill: &Fill) {
        if Some(fill.order_id.as_str()) == self.state.bid_order_id.as_deref() {
            log::info!("Quote filled: BID {}@{}c | order={}", fill.count, fill.yes_price, fill.order_id);
            self.state.bid_order_id = None;
            self.state.bid_price = None;
        } else if Some(fill.order_id.as_str()) == self.state.ask_order_id.as_deref() {
            log::info!("Quote filled: ASK {}@{}c | order={}", fill.count, fill.yes_price, fill.order_id);
            self.state.ask_order_id = None;
            self.state.ask_price = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig { spread_width: 6, ..EngineConfig::default() }
    }

    #[test]
    fn s1_symmetric_pricing() {
        let (bid, ask) = Quoter::calculate_quotes(&config(), 50, 52, 0);
        assert_eq!((bid, ask), (48, 54));
    }

    #[test]
    fn s2_clamped_pricing() {
        let (bid, ask) = Quoter::calculate_quotes(&config(), 45, 55, 0);
        assert_eq!((bid, ask), (47, 53));
    }

    #[test]
    fn s3_skewed_long() {
        let (bid, ask) = Quoter::calculate_quotes(&config(), 50, 52, 2);
        assert_eq!((bid, ask), (46, 52));
    }

    #[test]
    fn quotes_never_cross_across_narrow_markets() {
        for bb in 1u8..99 {
            for ba in (bb + 1)..=99 {
                for skew in -50i64..=50 {
                    let (bid, ask) = Quoter::calculate_quotes(&config(), bb, ba, skew);
                    assert!(bid >= 1 && ask <= 99, "bid={} ask={}", bid, ask);
                    assert!(bid < ask, "bid={} ask={} bb={} ba={} skew={}", bid, ask, bb, ba, skew);
                }
            }
        }
    }

    #[test]
    fn on_fill_nulls_only_the_matching_leg() {
        let exchange = Arc::new(crate::exchange::SimExchange::new("TEST-TICKER", 50, 52));
        let mut quoter = Quoter::new("TEST-TICKER".to_string(), exchange);
        quoter.state = QuoteState {
            bid_order_id: Some("bid-1".to_string()),
            ask_order_id: Some("ask-1".to_string()),
            bid_price: Some(48),
            ask_price: Some(54),
            last_midpoint: Some(51.0),
        };
        quoter.on_fill(&Fill {
            fill_id: "f1".to_string(),
            order_id: "bid-1".to_string(),
            ticker: "TEST-TICKER".to_string(),
            action: Action::Buy,
            side: Side::Yes,
            count: 10,
            yes_price: 48,
            created_time: 0,
        });
        assert!(quoter.state.bid_order_id.is_none());
        assert_eq!(quoter.state.ask_order_id.as_deref(), Some("ask-1"));
    }

    #[test]
    fn should_requote_after_matching_fill() {
        let exchange = Arc::new(crate::exchange::SimExchange::new("TEST-TICKER", 50, 52));
        let mut quoter = Quoter::new("TEST-TICKER".to_string(), exchange);
        quoter.state = QuoteState {
            bid_order_id: Some("bid-1".to_string()),
            ask_order_id: Some("ask-1".to_string()),
            bid_price: Some(48),
            ask_price: Some(54),
            last_midpoint: Some(51.0),
        };
        quoter.on_fill(&Fill {
            fill_id: "f1".to_string(),
            order_id: "bid-1".to_string(),
            ticker: "TEST-TICKER".to_string(),
            action: Action::Buy,
            side: Side::Yes,
            count: 10,
            yes_price: 48,
            created_time: 0,
        });
        let (requote, _) = quoter.should_requote(&config(), 50, 52, 0);
        assert!(requote);
    }

    #[test]
    fn s7_requote_on_midpoint_move() {
        let exchange = Arc::new(crate::exchange::SimExchange::new("TEST-TICKER", 50, 52));
        let mut quoter = Quoter::new("TEST-TICKER".to_string(), exchange);
        quoter.state = QuoteState {
            bid_order_id: Some("bid-1".to_string()),
            ask_order_id: Some("ask-1".to_string()),
            bid_price: Some(47),
            ask_price: Some(53),
            last_midpoint: Some(50.0),
        };
        let (requote, _) = quoter.should_requote(&config(), 45, 55, 0);
        assert!(requote);
    }
}
