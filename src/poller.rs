// ─────────────────────────────────────────────────────────────────────────────
// poller.rs — background cooperative task: fetch fills newer than a
// watermark, apply them to the ledger, dispatch them to subscribers in
// order, and reconcile the resting-orders endpoint against the Quoter's
// locally expected orders. Cancellation pattern grounded on the reference
// engine's `Arc<AtomicBool>` stall-panic flag in its ingestion module.
// ─────────────────────────────────────────────────────────────────────────────
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::exchange::{ExchangeClient, OrderError};
use crate::ledger::PositionLedger;
use crate::models::Fill;
use crate::quoter::Quoter;

/// Awaited in place inside `poll_once`, never detached — fill reactions
/// must run synchronously with respect to the poller's own control flow,
/// so this is a future the poller drives directly rather than a
/// fire-and-forget spawn.
pub type FillSubscriber = Arc<dyn Fn(Fill) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub fn new_cancel_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

const RECONCILE_MAX_ATTEMPTS: u32 = 3;
const RECONCILE_INITIAL_BACKOFF_SECS: f64 = 0.5;
const RECONCILE_BACKOFF_MULTIPLIER: f64 = 1.5;

pub struct FillPoller {
    exchange: Arc<dyn ExchangeClient>,
    ledger: Arc<Mutex<PositionLedger>>,
    quoter: Arc<Mutex<Quoter>>,
    ticker: String,
    subscribers: Vec<FillSubscriber>,
    last_fill_ts: i64,
    last_fill_id: Option<String>,
}

impl FillPoller {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        ledger: Arc<Mutex<PositionLedger>>,
        quoter: Arc<Mutex<Quoter>>,
        ticker: String,
    ) -> Self {
        Self {
            exchange,
            ledger,
            quoter,
            ticker,
            subscribers: Vec::new(),
            last_fill_ts: 0,
            last_fill_id: None,
        }
    }

    pub fn subscribe(&mut self, subscriber: FillSubscriber) {
        self.subscribers.push(subscriber);
    }

    /// Fetches up to 10 most-recent fills and sets the watermark without
    /// applying them — they predate process start and are already
    /// reflected in the positions fetched at startup.
    pub async fn bootstrap(&mut self) {
        match self.exchange.get_fills(0, 10).await {
            Ok(fills) => {
                if let Some(newest) = fills.first() {
                    self.last_fill_ts = newest.created_time;
                    self.last_fill_id = Some(newest.fill_id.clone());
                    log::info!(
                        "Fill poller bootstrapped at watermark ts={} id={}",
                        newest.created_time, newest.fill_id
                    );
                }
            }
            Err(e) => log::error!("Fill poller bootstrap failed: {}", e),
        }
    }

    /// Runs until `cancel` is set, sleeping `interval_secs` between polls.
    /// Must exit promptly on cancellation without processing further fills.
    pub async fn run(&mut self, interval_secs: u64, limit: u32, cancel: Arc<AtomicBool>) {
        while !cancel.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once(limit).await {
                log::error!("Fill poll failed: {}", e);
            }
            if let Err(e) = self.reconcile_resting_orders().await {
                log::warn!("Resting-order reconciliation: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(interval_secs)) => {}
                _ = wait_for_cancel(&cancel) => { break; }
            }
        }
    }

    async fn poll_once(&mut self, limit: u32) -> Result<(), OrderError> {
        let fills = self.exchange.get_fills(self.last_fill_ts, limit).await?;

        let mut new_fills = Vec::new();
        for f in &fills {
            if Some(f.fill_id.as_str()) == self.last_fill_id.as_deref() {
                break;
            }
            new_fills.push(f.clone());
        }

        if new_fills.is_empty() {
            return Ok(());
        }

        // Apply and dispatch newest-first, one fill at a time, awaiting
        // each subscriber in place before moving to the next fill.
        for f in &new_fills {
            self.ledger.lock().await.apply_fill(f);
            for sub in &self.subscribers {
                sub(f.clone()).await;
            }
        }

        if let Some(newest) = new_fills.first() {
            self.last_fill_ts = newest.created_time;
            self.last_fill_id = Some(newest.fill_id.clone());
        }

        Ok(())
    }

    /// Tolerates eventual consistency of the orders endpoint: if the
    /// Quoter's local state expects resting orders but the exchange
    /// reports none, retries with exponential-ish backoff before
    /// surfacing an `EventualConsistency` error.
    async fn reconcile_resting_orders(&self) -> Result<(), OrderError> {
        let expects_orders = self.quoter.lock().await.state.has_any_quotes();
        if !expects_orders {
            return Ok(());
        }

        let mut backoff_secs = RECONCILE_INITIAL_BACKOFF_SECS;
        for attempt in 1..=RECONCILE_MAX_ATTEMPTS {
            let resting = self.exchange.get_resting_orders(&self.ticker).await?;
            if !resting.is_empty() {
                return Ok(());
            }
            if attempt == RECONCILE_MAX_ATTEMPTS {
                return Err(OrderError::EventualConsistency(format!(
                    "orders endpoint empty after {} attempts while quote state expects resting orders",
                    attempt
                )));
            }
            tokio::time::sleep(std::time::Duration::from_secs_f64(backoff_secs)).await;
            backoff_secs *= RECONCILE_BACKOFF_MULTIPLIER;
        }
        Ok(())
    }
}

async fn wait_for_cancel(cancel: &Arc<AtomicBool>) {
    while !cancel.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimExchange;
    use crate::models::{Action, QuoteState, Side};
    use std::sync::atomic::AtomicUsize;

    fn poller_with_quoter(
        sim: Arc<SimExchange>,
        ledger: Arc<Mutex<PositionLedger>>,
    ) -> (FillPoller, Arc<Mutex<Quoter>>) {
        let quoter = Arc::new(Mutex::new(Quoter::new("TEST-TICKER".to_string(), sim.clone())));
        let poller = FillPoller::new(sim, ledger, quoter.clone(), "TEST-TICKER".to_string());
        (poller, quoter)
    }

    #[tokio::test]
    async fn poll_applies_new_fills_and_advances_watermark() {
        let sim = Arc::new(SimExchange::new("TEST-TICKER", 50, 52));
        let ledger = Arc::new(Mutex::new(PositionLedger::new()));
        let (mut poller, _quoter) = poller_with_quoter(sim.clone(), ledger.clone());

        sim.place("TEST-TICKER", Action::Buy, Side::Yes, 48, 10).await.unwrap();
        sim.step_market(-5); // crosses the bid, fabricates a fill

        poller.poll_once(50).await.unwrap();
        let pos = ledger.lock().await.get("TEST-TICKER");
        assert_eq!(pos.net_contracts, 10);

        // Polling again with no new fills must not double-apply.
        poller.poll_once(50).await.unwrap();
        let pos_again = ledger.lock().await.get("TEST-TICKER");
        assert_eq!(pos_again.net_contracts, 10);
    }

    #[tokio::test]
    async fn subscribers_are_dispatched_once_per_new_fill() {
        let sim = Arc::new(SimExchange::new("TEST-TICKER", 50, 52));
        let ledger = Arc::new(Mutex::new(PositionLedger::new()));
        let (mut poller, _quoter) = poller_with_quoter(sim.clone(), ledger.clone());

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        poller.subscribe(Arc::new(move |_f: Fill| {
            let count_clone = count_clone.clone();
            Box::pin(async move {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
        }));

        sim.place("TEST-TICKER", Action::Buy, Side::Yes, 48, 10).await.unwrap();
        sim.step_market(-5);
        poller.poll_once(50).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        poller.poll_once(50).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscriber_mutation_is_visible_before_poll_once_returns() {
        // The subscriber callback is awaited inline by poll_once, so by the
        // time poll_once returns, a subscriber that mutates shared state
        // (here, the Quoter via on_fill) has already done so — no detached
        // task, no race with the caller's next read.
        let sim = Arc::new(SimExchange::new("TEST-TICKER", 50, 52));
        let ledger = Arc::new(Mutex::new(PositionLedger::new()));
        let (mut poller, quoter) = poller_with_quoter(sim.clone(), ledger.clone());

        let order_id = sim.place("TEST-TICKER", Action::Buy, Side::Yes, 48, 10).await.unwrap();
        {
            let mut q = quoter.lock().await;
            q.state = QuoteState {
                bid_order_id: Some(order_id),
                ask_order_id: None,
                bid_price: Some(48),
                ask_price: None,
                last_midpoint: None,
            };
        }

        {
            let quoter = quoter.clone();
            poller.subscribe(Arc::new(move |fill: Fill| {
                let quoter = quoter.clone();
                Box::pin(async move {
                    quoter.lock().await.on_fill(&fill);
                })
            }));
        }

        sim.step_market(-5);
        poller.poll_once(50).await.unwrap();

        assert!(quoter.lock().await.state.bid_order_id.is_none());
    }

    #[tokio::test]
    async fn reconciliation_is_a_no_op_when_no_quotes_are_expected() {
        let sim = Arc::new(SimExchange::new("TEST-TICKER", 50, 52));
        let ledger = Arc::new(Mutex::new(PositionLedger::new()));
        let (poller, _quoter) = poller_with_quoter(sim, ledger);
        poller.reconcile_resting_orders().await.unwrap();
    }

    #[tokio::test]
    async fn reconciliation_passes_when_resting_orders_are_present() {
        let sim = Arc::new(SimExchange::new("TEST-TICKER", 50, 52));
        let ledger = Arc::new(Mutex::new(PositionLedger::new()));
        let (poller, quoter) = poller_with_quoter(sim.clone(), ledger);

        let order_id = sim.place("TEST-TICKER", Action::Buy, Side::Yes, 10, 1).await.unwrap();
        {
            let mut q = quoter.lock().await;
            q.state.bid_order_id = Some(order_id);
        }

        poller.reconcile_resting_orders().await.unwrap();
    }
}
