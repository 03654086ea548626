// ─────────────────────────────────────────────────────────────────────────────
// control_loop.rs — the single cooperative task that periodically polls the
// market, asks the Quoter to act, and coordinates graceful shutdown. Grounded
// on the reference engine's main.rs tick/spawn structure, simplified from its
// N-background-task layout down to the two-task model this spec requires.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::exchange::ExchangeClient;
use crate::ledger::PositionLedger;
use crate::logbuf::LogBuffer;
use crate::publisher::{EngineStatus, StatusPublisher};
use crate::quoter::Quoter;

/// How many recent log lines ride along in each status snapshot.
const STATUS_LOG_LINES: usize = 20;

pub struct ControlLoop {
    config: EngineConfig,
    exchange: Arc<dyn ExchangeClient>,
    ledger: Arc<Mutex<PositionLedger>>,
    quoter: Arc<Mutex<Quoter>>,
    publisher: StatusPublisher,
    log_buffer: LogBuffer,
}

impl ControlLoop {
    pub fn new(
        config: EngineConfig,
        exchange: Arc<dyn ExchangeClient>,
        ledger: Arc<Mutex<PositionLedger>>,
        quoter: Arc<Mutex<Quoter>>,
        publisher: StatusPublisher,
        log_buffer: LogBuffer,
    ) -> Self {
        Self { config, exchange, ledger, quoter, publisher, log_buffer }
    }

    /// Runs ticks until `MAX_RUNTIME` expires (if set) or `nonstop` callers
    /// never return. Always performs the shutdown cancel-all, on normal
    /// completion or any per-tick error.
    pub async fn run(&self) {
        let start = Instant::now();
        let mut iteration: u64 = 0;

        loop {
            iteration += 1;
            let error = self.tick(iteration, start).await.err();

            let balance = self.exchange.get_balance().await.unwrap_or(crate::models::Balance {
                available_cents: 0,
                portfolio_value_cents: 0,
            });
            let position = {
                let mut ledger = self.ledger.lock().await;
                ledger.get(&self.config.market_ticker)
            };
            let quote_state = self.quoter.lock().await.state.clone();
            let market = self
                .exchange
                .get_market(&self.config.market_ticker)
                .await
                .unwrap_or(crate::models::MarketSnapshot {
                    ticker: self.config.market_ticker.clone(),
                    best_bid: 0,
                    best_ask: 0,
                    status: "unknown".to_string(),
                    volume: 0,
                });

            self.publisher.publish(EngineStatus {
                balance,
                position,
                quote_state,
                market,
                recent_log: self.log_buffer.recent(STATUS_LOG_LINES),
                error: error.map(|e| e.to_string()),
                iteration,
                elapsed_secs: start.elapsed().as_secs(),
            });

            if let Some(max_runtime) = self.config.max_runtime_secs {
                if start.elapsed().as_secs() >= max_runtime {
                    log::info!("MAX_RUNTIME reached, shutting down");
                    break;
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(self.config.loop_interval_secs)).await;
        }

        self.shutdown().await;
    }

    async fn tick(&self, _iteration: u64, _start: Instant) -> Result<(), crate::exchange::OrderError> {
        let market = self.exchange.get_market(&self.config.market_ticker).await?;

        let net = {
            let mut ledger = self.ledger.lock().await;
            ledger.get(&self.config.market_ticker).net_contracts
        };
        let skew = net * self.config.inventory_skew_per_contract;

        let mut quoter = self.quoter.lock().await;

        if market.is_active() && market.touches_positive() {
            let (should, reason) =
                quoter.should_requote(&self.config, market.best_bid, market.best_ask, skew);
            if should {
                let positions = self.ledger.lock().await.all();
                quoter
                    .update_quotes(
                        &self.config,
                        market.best_bid,
                        market.best_ask,
                        skew,
                        &positions,
                        &reason,
                    )
                    .await;
            }
        } else if quoter.has_active_quotes() || quoter.state.has_any_quotes() {
            quoter.cancel_quotes(false, "market inactive").await;
        }

        Ok(())
    }

    async fn shutdown(&self) {
        let mut quoter = self.quoter.lock().await;
        quoter.cancel_quotes(true, "shutdown").await;
        let position = self.ledger.lock().await.get(&self.config.market_ticker);
        let balance = self.exchange.get_balance().await.ok();
        log::info!(
            "Shutdown complete. Final position: net={} avg={:.1} realized={}c. Balance: {:?}",
            position.net_contracts, position.avg_entry_price, position.realized_pnl_cents, balance
        );
    }
}
