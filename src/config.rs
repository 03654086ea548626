// ─────────────────────────────────────────────────────────────────────────────
// config.rs — single immutable configuration value assembled once at startup
// and threaded through every constructor. No process-wide singleton.
// ─────────────────────────────────────────────────────────────────────────────
use crate::exchange::OrderError;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub market_ticker: String,
    pub api_base_url: String,
    pub key_id: String,
    pub private_key_pem: String,

    pub spread_width: i64,
    pub quote_size: u32,
    pub requote_threshold: i64,
    pub inventory_skew_per_contract: i64,
    pub max_position_size: i64,
    pub max_total_exposure_cents: i64,
    pub loop_interval_secs: u64,
    pub fill_poll_interval_secs: u64,
    pub fill_poll_limit: u32,
    pub max_runtime_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            market_ticker: String::new(),
            api_base_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),
            key_id: String::new(),
            private_key_pem: String::new(),

            spread_width: 6,
            quote_size: 10,
            requote_threshold: 1,
            inventory_skew_per_contract: 1,
            max_position_size: 50,
            max_total_exposure_cents: 500_000,
            loop_interval_secs: 2,
            fill_poll_interval_secs: 5,
            fill_poll_limit: 50,
            max_runtime_secs: None,
        }
    }
}

impl EngineConfig {
    /// Reads a .env file (if present) and the process environment, falling
    /// back to `Default` for every numeric tunable. The two credentials are
    /// mandatory — their absence is an `Authentication` error, fatal at
    /// startup.
    pub fn from_env() -> Result<Self, OrderError> {
        dotenvy::dotenv().ok();

        let key_id = std::env::var("KALSHI_KEY_ID")
            .map_err(|_| OrderError::Authentication("KALSHI_KEY_ID not set".to_string()))?;
        let private_key_pem = std::env::var("KALSHI_PRIVATE_KEY_PEM")
            .map_err(|_| OrderError::Authentication("KALSHI_PRIVATE_KEY_PEM not set".to_string()))?;
        let market_ticker = std::env::var("MARKET_TICKER")
            .map_err(|_| OrderError::Authentication("MARKET_TICKER not set".to_string()))?;

        let defaults = EngineConfig::default();
        let api_base_url = std::env::var("KALSHI_API_BASE_URL").unwrap_or(defaults.api_base_url);

        Ok(Self {
            market_ticker,
            api_base_url,
            key_id,
            private_key_pem,
            spread_width: env_or(defaults.spread_width, "SPREAD_WIDTH"),
            quote_size: env_or(defaults.quote_size, "QUOTE_SIZE"),
            requote_threshold: env_or(defaults.requote_threshold, "REQUOTE_THRESHOLD"),
            inventory_skew_per_contract: env_or(
                defaults.inventory_skew_per_contract,
                "INVENTORY_SKEW_PER_CONTRACT",
            ),
            max_position_size: env_or(defaults.max_position_size, "MAX_POSITION_SIZE"),
            max_total_exposure_cents: env_or(
                defaults.max_total_exposure_cents,
                "MAX_TOTAL_EXPOSURE_CENTS",
            ),
            loop_interval_secs: env_or(defaults.loop_interval_secs, "LOOP_INTERVAL"),
            fill_poll_interval_secs: env_or(defaults.fill_poll_interval_secs, "FILL_POLL_INTERVAL"),
            fill_poll_limit: env_or(defaults.fill_poll_limit, "FILL_POLL_LIMIT"),
            max_runtime_secs: std::env::var("MAX_RUNTIME").ok().and_then(|v| v.parse().ok()),
        })
    }
}

fn env_or<T: std::str::FromStr>(default: T, var: &str) -> T {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_scenario_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.spread_width, 6);
    }
}
