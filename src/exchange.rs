// ─────────────────────────────────────────────────────────────────────────────
// exchange.rs — signed HTTP transport to the exchange, plus a simulated
// exchange for demo mode. No local order book is kept; the exchange is the
// source of truth. Risk is not enforced here — that is the Quoter's job.
// ─────────────────────────────────────────────────────────────────────────────
use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::{Action, Balance, Fill, MarketSnapshot, OrderStatus, Position, Side};
use crate::signing::KalshiSigner;

#[derive(Debug, Clone)]
pub enum OrderError {
    Authentication(String),
    Transport(String),
    Validation(String),
    LimitExceeded(String),
    EventualConsistency(String),
}

impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderError::Authentication(s) => write!(f, "Authentication error: {}", s),
            OrderError::Transport(s) => write!(f, "Transport error: {}", s),
            OrderError::Validation(s) => write!(f, "Validation error: {}", s),
            OrderError::LimitExceeded(s) => write!(f, "Limit exceeded: {}", s),
            OrderError::EventualConsistency(s) => write!(f, "Eventual consistency: {}", s),
        }
    }
}

impl std::error::Error for OrderError {}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub ticker: String,
    pub side: Side,
    pub action: Action,
    pub price: u8,
    pub count: u32,
    pub status: OrderStatus,
}

/// Narrow contract the Quoter and Fill Poller see. No risk enforcement and
/// no local order book — every call is a thin wrapper over a signed request.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_balance(&self) -> Result<Balance, OrderError>;
    async fn get_positions(&self) -> Result<Vec<Position>, OrderError>;
    async fn get_market(&self, ticker: &str) -> Result<MarketSnapshot, OrderError>;
    async fn get_fills(&self, min_ts: i64, limit: u32) -> Result<Vec<Fill>, OrderError>;
    async fn get_resting_orders(&self, ticker: &str) -> Result<Vec<OpenOrder>, OrderError>;

    async fn place(
        &self,
        ticker: &str,
        action: Action,
        side: Side,
        price_cents: u8,
        count: u32,
    ) -> Result<String, OrderError>;

    /// Idempotent from the caller's view: canceling an already-gone order
    /// surfaces as an error but leaves state equivalent to success.
    async fn cancel(&self, order_id: &str) -> Result<(), OrderError>;

    /// Fans out in groups of at most 20 (exchange batch limit). A batch that
    /// is larger than that is a caller bug, not a retryable condition.
    async fn cancel_batch(&self, order_ids: &[String]) -> Result<usize, OrderError> {
        if order_ids.is_empty() {
            return Ok(0);
        }
        let mut cancelled = 0;
        for chunk in order_ids.chunks(20) {
            cancelled += self.cancel_batch_one(chunk).await?;
        }
        Ok(cancelled)
    }

    async fn cancel_batch_one(&self, order_ids: &[String]) -> Result<usize, OrderError>;
}

// ─── Live Exchange ──────────────────────────────────────────────────────────

pub struct LiveExchange {
    base_url: String,
    signer: KalshiSigner,
    client: reqwest::Client,
}

impl LiveExchange {
    pub fn new(base_url: String, key_id: String, private_key_pem: &str) -> Result<Self, OrderError> {
        let signer = KalshiSigner::from_pem(key_id, private_key_pem)
            .map_err(|e| OrderError::Authentication(e.to_string()))?;
        Ok(Self {
            base_url,
            signer,
            client: reqwest::Client::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The signature message must carry the full request path including the
    /// `/trade-api/v2` prefix, even though callers pass only the suffix.
    fn signed_path(path: &str) -> String {
        format!("{}{}", crate::signing::API_PREFIX, path)
    }

    async fn signed_get(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, OrderError> {
        let headers = self.signer.headers("GET", &Self::signed_path(path))?;
        let mut req = self.client.get(self.url(path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if !query.is_empty() {
            req = req.query(query);
        }
        send(req).await
    }

    async fn signed_post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, OrderError> {
        let headers = self.signer.headers("POST", &Self::signed_path(path))?;
        let mut req = self.client.post(self.url(path)).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        send(req).await
    }

    async fn signed_delete(&self, path: &str, body: Option<serde_json::Value>) -> Result<serde_json::Value, OrderError> {
        let headers = self.signer.headers("DELETE", &Self::signed_path(path))?;
        let mut req = self.client.delete(self.url(path));
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        send(req).await
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<serde_json::Value, OrderError> {
    let resp = req.send().await.map_err(|e| OrderError::Transport(e.to_string()))?;
    let status = resp.status();
    let text = resp.text().await.map_err(|e| OrderError::Transport(e.to_string()))?;
    if status.as_u16() == 429 {
        return Err(OrderError::Transport("rate limited (429)".to_string()));
    }
    if !status.is_success() {
        return Err(OrderError::Transport(format!("HTTP {}: {}", status, text)));
    }
    serde_json::from_str(&text).map_err(|e| OrderError::Transport(format!("bad JSON: {}", e)))
}

#[async_trait]
impl ExchangeClient for LiveExchange {
    async fn get_balance(&self) -> Result<Balance, OrderError> {
        let data = self.signed_get("/portfolio/balance", &[]).await?;
        Ok(Balance {
            available_cents: data["balance"].as_i64().unwrap_or(0),
            portfolio_value_cents: data["portfolio_value"].as_i64().unwrap_or(0),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, OrderError> {
        let data = self.signed_get("/portfolio/positions", &[]).await?;
        let mut positions = Vec::new();
        if let Some(arr) = data["market_positions"].as_array() {
            for p in arr {
                let ticker = p["ticker"].as_str().unwrap_or("").to_string();
                let net = p["position"].as_i64().unwrap_or(0);
                positions.push(Position {
                    ticker,
                    net_contracts: net,
                    avg_entry_price: p["market_exposure"].as_f64().unwrap_or(0.0)
                        / (net.unsigned_abs().max(1) as f64),
                    realized_pnl_cents: p["realized_pnl"].as_i64().unwrap_or(0),
                    last_fill_id: None,
                    last_updated: chrono::Utc::now().timestamp(),
                });
            }
        }
        Ok(positions)
    }

    async fn get_market(&self, ticker: &str) -> Result<MarketSnapshot, OrderError> {
        let path = format!("/markets/{}", ticker);
        let data = self.signed_get(&path, &[]).await?;
        let market = &data["market"];
        Ok(MarketSnapshot {
            ticker: ticker.to_string(),
            best_bid: market["yes_bid"].as_u64().unwrap_or(0) as u8,
            best_ask: market["yes_ask"].as_u64().unwrap_or(0) as u8,
            status: market["status"].as_str().unwrap_or("unknown").to_string(),
            volume: market["volume"].as_u64().unwrap_or(0),
        })
    }

    async fn get_fills(&self, min_ts: i64, limit: u32) -> Result<Vec<Fill>, OrderError> {
        let query = [
            ("min_ts", min_ts.to_string()),
            ("limit", limit.to_string()),
        ];
        let data = self.signed_get("/portfolio/fills", &query).await?;
        let mut fills = Vec::new();
        if let Some(arr) = data["fills"].as_array() {
            for f in arr {
                fills.push(parse_fill(f)?);
            }
        }
        Ok(fills)
    }

    async fn get_resting_orders(&self, ticker: &str) -> Result<Vec<OpenOrder>, OrderError> {
        let query = [("ticker", ticker.to_string()), ("status", "resting".to_string())];
        let data = self.signed_get("/portfolio/orders", &query).await?;
        let mut orders = Vec::new();
        if let Some(arr) = data["orders"].as_array() {
            for o in arr {
                orders.push(OpenOrder {
                    order_id: o["order_id"].as_str().unwrap_or("").to_string(),
                    ticker: o["ticker"].as_str().unwrap_or("").to_string(),
                    side: if o["side"].as_str() == Some("no") { Side::No } else { Side::Yes },
                    action: if o["action"].as_str() == Some("sell") { Action::Sell } else { Action::Buy },
                    price: o["yes_price"].as_u64().unwrap_or(0) as u8,
                    count: o["remaining_count"].as_u64().unwrap_or(0) as u32,
                    status: OrderStatus::Resting,
                });
            }
        }
        Ok(orders)
    }

    async fn place(
        &self,
        ticker: &str,
        action: Action,
        side: Side,
        price_cents: u8,
        count: u32,
    ) -> Result<String, OrderError> {
        if count == 0 {
            return Err(OrderError::Validation("count must be > 0".to_string()));
        }
        if price_cents < 1 || price_cents > 99 {
            return Err(OrderError::Validation(format!("price {} out of [1,99]", price_cents)));
        }
        let action_str = match action { Action::Buy => "buy", Action::Sell => "sell" };
        let price_field = match side {
            Side::Yes => "yes_price",
            Side::No => "no_price",
        };
        let body = serde_json::json!({
            "ticker": ticker,
            "action": action_str,
            "side": match side { Side::Yes => "yes", Side::No => "no" },
            "count": count,
            "type": "limit",
            price_field: price_cents,
            "client_order_id": uuid::Uuid::new_v4().to_string(),
        });
        let data = self.signed_post("/portfolio/orders", body).await?;
        data["order"]["order_id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| OrderError::Transport("response missing order_id".to_string()))
    }

    async fn cancel(&self, order_id: &str) -> Result<(), OrderError> {
        let path = format!("/portfolio/orders/{}", order_id);
        self.signed_delete(&path, None).await?;
        Ok(())
    }

    async fn cancel_batch_one(&self, order_ids: &[String]) -> Result<usize, OrderError> {
        if order_ids.len() > 20 {
            return Err(OrderError::LimitExceeded(format!(
                "batch of {} exceeds 20-order limit",
                order_ids.len()
            )));
        }
        let body = serde_json::json!({ "ids": order_ids });
        let data = self.signed_delete("/portfolio/orders/batched", Some(body)).await?;
        Ok(data["orders"].as_array().map(|a| a.len()).unwrap_or(order_ids.len()))
    }
}

fn parse_fill(f: &serde_json::Value) -> Result<Fill, OrderError> {
    let action = match f["action"].as_str() {
        Some("buy") => Action::Buy,
        Some("sell") => Action::Sell,
        other => return Err(OrderError::Transport(format!("unknown fill action: {:?}", other))),
    };
    let side = match f["side"].as_str() {
        Some("no") => Side::No,
        _ => Side::Yes,
    };
    Ok(Fill {
        fill_id: f["fill_id"].as_str().unwrap_or("").to_string(),
        order_id: f["order_id"].as_str().unwrap_or("").to_string(),
        ticker: f["ticker"].as_str().unwrap_or("").to_string(),
        action,
        side,
        count: f["count"].as_u64().unwrap_or(0) as u32,
        yes_price: f["yes_price"].as_u64().unwrap_or(0) as u8,
        created_time: f["created_time"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0),
    })
}

// ─── Simulated Exchange (demo mode) ─────────────────────────────────────────

/// In-memory exchange for `--demo` mode. Orders rest until the simulated
/// market crosses them, at which point they fabricate a fill — enough to
/// exercise the Fill Poller and Quoter's `on_fill` path without live
/// credentials.
pub struct SimExchange {
    inner: std::sync::Mutex<SimState>,
}

struct SimState {
    market: MarketSnapshot,
    balance: Balance,
    orders: HashMap<String, OpenOrder>,
    fills: Vec<Fill>,
    next_id: u64,
}

impl SimExchange {
    pub fn new(ticker: &str, best_bid: u8, best_ask: u8) -> Self {
        Self {
            inner: std::sync::Mutex::new(SimState {
                market: MarketSnapshot {
                    ticker: ticker.to_string(),
                    best_bid,
                    best_ask,
                    status: "active".to_string(),
                    volume: 0,
                },
                balance: Balance { available_cents: 10_000_00, portfolio_value_cents: 10_000_00 },
                orders: HashMap::new(),
                fills: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Walks the simulated midpoint by `delta_cents`, clamped to [1, 99],
    /// and fills any resting order the new touch has crossed.
    pub fn step_market(&self, delta_cents: i64) {
        let mut state = self.inner.lock().unwrap();
        let bid = (state.market.best_bid as i64 + delta_cents).clamp(1, 99) as u8;
        let ask = (state.market.best_ask as i64 + delta_cents).clamp(1, 99) as u8;
        if bid < ask {
            state.market.best_bid = bid;
            state.market.best_ask = ask;
        }

        let mut filled_ids = Vec::new();
        for order in state.orders.values() {
            let crossed = match order.action {
                Action::Buy => order.price >= state.market.best_ask,
                Action::Sell => order.price <= state.market.best_bid,
            };
            if crossed {
                filled_ids.push(order.order_id.clone());
            }
        }
        for oid in filled_ids {
            if let Some(order) = state.orders.remove(&oid) {
                let next_id = state.next_id;
                state.next_id += 1;
                state.fills.push(Fill {
                    fill_id: format!("sim-fill-{}", next_id),
                    order_id: order.order_id,
                    ticker: order.ticker,
                    action: order.action,
                    side: order.side,
                    count: order.count,
                    yes_price: order.price,
                    created_time: chrono::Utc::now().timestamp(),
                });
            }
        }
    }
}

#[async_trait]
impl ExchangeClient for SimExchange {
    async fn get_balance(&self) -> Result<Balance, OrderError> {
        Ok(self.inner.lock().unwrap().balance)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, OrderError> {
        Ok(Vec::new())
    }

    async fn get_market(&self, _ticker: &str) -> Result<MarketSnapshot, OrderError> {
        Ok(self.inner.lock().unwrap().market.clone())
    }

    async fn get_fills(&self, min_ts: i64, limit: u32) -> Result<Vec<Fill>, OrderError> {
        let state = self.inner.lock().unwrap();
        let mut fills: Vec<Fill> = state
            .fills
            .iter()
            .filter(|f| f.created_time >= min_ts)
            .cloned()
            .collect();
        fills.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        fills.truncate(limit as usize);
        Ok(fills)
    }

    async fn get_resting_orders(&self, ticker: &str) -> Result<Vec<OpenOrder>, OrderError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.ticker == ticker)
            .cloned()
            .collect())
    }

    async fn place(
        &self,
        ticker: &str,
        action: Action,
        side: Side,
        price_cents: u8,
        count: u32,
    ) -> Result<String, OrderError> {
        if price_cents < 1 || price_cents > 99 {
            return Err(OrderError::Validation(format!("price {} out of [1,99]", price_cents)));
        }
        let mut state = self.inner.lock().unwrap();
        let id = format!("sim-order-{}", state.next_id);
        state.next_id += 1;
        state.orders.insert(
            id.clone(),
            OpenOrder {
                order_id: id.clone(),
                ticker: ticker.to_string(),
                side,
                action,
                price: price_cents,
                count,
                status: OrderStatus::Resting,
            },
        );
        Ok(id)
    }

    async fn cancel(&self, order_id: &str) -> Result<(), OrderError> {
        let mut state = self.inner.lock().unwrap();
        state
            .orders
            .remove(order_id)
            .map(|_| ())
            .ok_or_else(|| OrderError::Transport(format!("no such order: {}", order_id)))
    }

    async fn cancel_batch_one(&self, order_ids: &[String]) -> Result<usize, OrderError> {
        let mut state = self.inner.lock().unwrap();
        let mut cancelled = 0;
        for id in order_ids {
            if state.orders.remove(id).is_some() {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sim_exchange_fills_on_cross() {
        let sim = SimExchange::new("TEST-TICKER", 50, 52);
        let order_id = sim.place("TEST-TICKER", Action::Buy, Side::Yes, 48, 10).await.unwrap();
        assert!(sim.get_resting_orders("TEST-TICKER").await.unwrap().iter().any(|o| o.order_id == order_id));

        // Walk the market down so best_ask crosses our bid.
        sim.step_market(-5);
        let fills = sim.get_fills(0, 10).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id, order_id);
        assert!(sim.get_resting_orders("TEST-TICKER").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_batch_splits_into_groups_of_twenty() {
        let sim = SimExchange::new("TEST-TICKER", 50, 52);
        let mut ids = Vec::new();
        for _ in 0..45 {
            ids.push(sim.place("TEST-TICKER", Action::Buy, Side::Yes, 10, 1).await.unwrap());
        }
        let cancelled = sim.cancel_batch(&ids).await.unwrap();
        assert_eq!(cancelled, 45);
    }
}
