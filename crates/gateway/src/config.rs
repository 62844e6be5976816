#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Gateway settings; `from_env` reads `DEX_BASE_URL`, `DEX_MAX_IN_FLIGHT`, `DEX_HTTP_TIMEOUT_SECS`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Global cap on concurrent transport requests.
    pub max_in_flight: usize,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let base_url = std::env::var("DEX_BASE_URL").ok().filter(|s| !s.is_empty()).unwrap_or(d.base_url);
        let max_in_flight = std::env::var("DEX_MAX_IN_FLIGHT").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.max_in_flight);
        let timeout_secs = std::env::var("DEX_HTTP_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(d.timeout_secs);
        Self { base_url, max_in_flight: max_in_flight.max(1), timeout_secs }
    }
}
