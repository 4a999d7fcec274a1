use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub instruments: InstrumentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub authorize_url: String,
    pub credentials_path: String,
    /// Client identifier echoed in the subscription control message.
    pub guid: String,
    pub max_connect_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentsConfig {
    pub index_key: String,
    pub future_key: String,
    pub basket_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "database/trendflow_live.db".to_string(),
            },
            feed: FeedConfig {
                authorize_url: "https://api.upstox.com/v3/feed/market-data-feed/authorize"
                    .to_string(),
                credentials_path: "config/credentials.json".to_string(),
                guid: "trendflow-live".to_string(),
                max_connect_attempts: 5,
                initial_backoff_secs: 1,
                max_backoff_secs: 60,
                read_timeout_secs: 10,
            },
            instruments: InstrumentsConfig {
                index_key: "NSE_INDEX|Nifty 50".to_string(),
                future_key: "NSE_FO|53001".to_string(),
                basket_path: "config/basket.csv".to_string(),
            },
        }
    }
}
