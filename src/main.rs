// ─────────────────────────────────────────────────────────────────────────────
// kalshi-mm-engine: single-market two-sided quoting engine.
//
// Two cooperative tasks share the position ledger and quote state:
//   - the Control Loop, which polls the market and drives the Quoter
//   - the Fill Poller, which watermark-polls fills and applies them to the
//     ledger, notifying the Quoter so a filled leg gets requoted next tick
//
// Runs in `--demo <bid> <ask> [--nonstop]` mode against an in-memory
// simulated exchange, or in live mode against Kalshi with RSA-PSS
// request signing.
// ─────────────────────────────────────────────────────────────────────────────
mod config;
mod exchange;
mod ledger;
mod logbuf;
mod control_loop;
mod models;
mod poller;
mod publisher;
mod quoter;
mod risk;
mod signing;

use std::sync::Arc;

use tokio::sync::Mutex;

use config::EngineConfig;
use control_loop::ControlLoop;
use exchange::{ExchangeClient, LiveExchange, SimExchange};
use ledger::PositionLedger;
use poller::FillPoller;
use publisher::StatusPublisher;
use quoter::Quoter;

struct DemoArgs {
    best_bid: u8,
    best_ask: u8,
    nonstop: bool,
}

fn parse_demo_args(args: &[String]) -> Option<DemoArgs> {
    if args.first().map(String::as_str) != Some("--demo") {
        return None;
    }
    let best_bid: u8 = args.get(1)?.parse().ok()?;
    let best_ask: u8 = args.get(2)?.parse().ok()?;
    let nonstop = args.iter().any(|a| a == "--nonstop");
    Some(DemoArgs { best_bid, best_ask, nonstop })
}

#[tokio::main]
async fn main() {
    let log_buffer = logbuf::init();
    log::info!("kalshi-mm-engine starting");

    let args: Vec<String> = std::env::args().skip(1).collect();

    if let Some(demo) = parse_demo_args(&args) {
        run_demo(demo, log_buffer).await;
        return;
    }

    let config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let exchange: Arc<dyn ExchangeClient> =
        match LiveExchange::new(config.api_base_url.clone(), config.key_id.clone(), &config.private_key_pem) {
            Ok(ex) => Arc::new(ex),
            Err(e) => {
                log::error!("Failed to build exchange client: {}", e);
                std::process::exit(1);
            }
        };

    run_engine(config, exchange, false, log_buffer).await;
}

async fn run_demo(demo: DemoArgs, log_buffer: logbuf::LogBuffer) {
    log::info!(
        "Demo mode: bid={}c ask={}c nonstop={}",
        demo.best_bid, demo.best_ask, demo.nonstop
    );
    let mut config = EngineConfig { market_ticker: "DEMO-TICKER".to_string(), ..EngineConfig::default() };
    if !demo.nonstop {
        config.max_runtime_secs = Some(30);
    }

    let sim = Arc::new(SimExchange::new(&config.market_ticker, demo.best_bid, demo.best_ask));

    {
        let sim = sim.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                let delta = if rand::random::<bool>() { 1 } else { -1 };
                sim.step_market(delta);
            }
        });
    }

    run_engine(config, sim, true, log_buffer).await;
}

async fn run_engine(
    config: EngineConfig,
    exchange: Arc<dyn ExchangeClient>,
    print_status: bool,
    log_buffer: logbuf::LogBuffer,
) {
    let ledger = Arc::new(Mutex::new(PositionLedger::new()));

    match exchange.get_positions().await {
        Ok(positions) => {
            let mut ledger = ledger.lock().await;
            for p in positions {
                log::info!("Seeding position {}: net={}", p.ticker, p.net_contracts);
                ledger.seed(p);
            }
        }
        Err(e) => log::warn!("Could not seed positions at startup: {}", e),
    }

    let quoter = Arc::new(Mutex::new(Quoter::new(config.market_ticker.clone(), exchange.clone())));

    let (publisher, receiver) = StatusPublisher::new();
    if print_status {
        tokio::spawn(publisher::run_demo_printer(receiver));
    }

    let mut fill_poller =
        FillPoller::new(exchange.clone(), ledger.clone(), quoter.clone(), config.market_ticker.clone());
    fill_poller.bootstrap().await;
    {
        let quoter = quoter.clone();
        fill_poller.subscribe(Arc::new(move |fill| {
            let quoter = quoter.clone();
            Box::pin(async move {
                quoter.lock().await.on_fill(&fill);
            })
        }));
    }

    let cancel = poller::new_cancel_flag();
    let poll_interval = config.fill_poll_interval_secs;
    let poll_limit = config.fill_poll_limit;
    let poller_cancel = cancel.clone();
    let poller_task = tokio::spawn(async move {
        fill_poller.run(poll_interval, poll_limit, poller_cancel).await;
    });

    let control_loop = ControlLoop::new(config, exchange, ledger, quoter, publisher, log_buffer);
    control_loop.run().await;

    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = poller_task.await;
}
