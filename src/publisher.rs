// ─────────────────────────────────────────────────────────────────────────────
// publisher.rs — non-blocking status snapshot hand-off from the Control Loop
// to whatever consumes it (demo-mode periodic print today; a real dashboard
// could subscribe to the same channel). Uses the same `tokio::sync::watch`
// primitive the reference engine uses to fan its per-asset config out to
// worker loops, repurposed here to fan status out instead of config in.
// ─────────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::models::{Balance, MarketSnapshot, Position, QuoteState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub balance: Balance,
    pub position: Position,
    pub quote_state: QuoteState,
    pub market: MarketSnapshot,
    pub recent_log: Vec<String>,
    pub error: Option<String>,
    pub iteration: u64,
    pub elapsed_secs: u64,
}

pub struct StatusPublisher {
    sender: watch::Sender<Option<EngineStatus>>,
}

impl StatusPublisher {
    pub fn new() -> (Self, watch::Receiver<Option<EngineStatus>>) {
        let (sender, receiver) = watch::channel(None);
        (Self { sender }, receiver)
    }

    /// Never blocks the Control Loop — `watch::Sender::send` just replaces
    /// the latest value; a slow consumer only ever sees the newest one.
    pub fn publish(&self, status: EngineStatus) {
        let _ = self.sender.send(Some(status));
    }
}

/// Periodically prints the latest status — the demo harness's stand-in for
/// a terminal dashboard.
pub async fn run_demo_printer(mut receiver: watch::Receiver<Option<EngineStatus>>) {
    loop {
        if receiver.changed().await.is_err() {
            return;
        }
        if let Some(status) = receiver.borrow().clone() {
            match &status.error {
                Some(err) => log::warn!("[STATUS] error: {}", err),
                None => log::info!(
                    "[STATUS] iter={} net={} avg={:.1} bid={:?} ask={:?} bal={}c",
                    status.iteration,
                    status.position.net_contracts,
                    status.position.avg_entry_price,
                    status.quote_state.bid_price,
                    status.quote_state.ask_price,
                    status.balance.available_cents,
                ),
            }
        }
    }
}
