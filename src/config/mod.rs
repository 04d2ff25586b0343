use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// HTTP/API path configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_process_path")]
    pub process_path: String,

    #[serde(default = "default_token_header")]
    pub token_header: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_token_timeout_secs")]
    pub token_timeout_secs: u64,

    /// How long a scraped token is trusted before it is fetched again.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    #[serde(default)]
    pub request_delay_ms: u64,

    #[serde(default)]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Browser fallback configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// DevTools websocket of an already running browser, e.g. `ws://127.0.0.1:9222/devtools/browser/<id>`.
    #[serde(default)]
    pub websocket_url: Option<String>,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_scan_settle_ms")]
    pub scan_settle_ms: u64,

    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    #[serde(default = "default_table_timeout_ms")]
    pub table_timeout_ms: u64,

    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

/// Gainers/losers report configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_reference_csv")]
    pub reference_csv: PathBuf,

    /// Symbols the upstream lists under the index but the official CSV may lack.
    #[serde(default = "default_extra_symbols")]
    pub extra_symbols: Vec<String>,

    #[serde(default = "default_symbol_column")]
    pub symbol_column: String,

    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default = "default_segment")]
    pub segment: String,

    #[serde(default = "default_gainers_url")]
    pub gainers_url: String,

    #[serde(default = "default_losers_url")]
    pub losers_url: String,

    #[serde(default = "default_gainers_condition")]
    pub gainers_condition: String,

    #[serde(default = "default_losers_condition")]
    pub losers_condition: String,

    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://chartink.com".to_string()
}
fn default_process_path() -> String {
    "/screener/process".to_string()
}
fn default_token_header() -> String {
    "x-csrf-token".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_token_timeout_secs() -> u64 {
    10
}
fn default_token_ttl_secs() -> u64 {
    300
}
fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ",
        "AppleWebKit/537.36 (KHTML, like Gecko) ",
        "Chrome/120.0.0.0 Safari/537.36"
    )
    .to_string()
}
fn default_true() -> bool {
    true
}
fn default_settle_ms() -> u64 {
    3000
}
fn default_scan_settle_ms() -> u64 {
    5000
}
fn default_step_timeout_ms() -> u64 {
    5000
}
fn default_table_timeout_ms() -> u64 {
    10_000
}
fn default_poll_ms() -> u64 {
    250
}
fn default_reference_csv() -> PathBuf {
    PathBuf::from("ind_nifty100list.csv")
}
fn default_extra_symbols() -> Vec<String> {
    vec!["ICICIPRULI".to_string()]
}
fn default_symbol_column() -> String {
    "nsecode".to_string()
}
fn default_output() -> PathBuf {
    PathBuf::from("nifty100_gainers_losers.csv")
}
fn default_segment() -> String {
    "nifty100".to_string()
}
fn default_gainers_url() -> String {
    "https://chartink.com/screener/copy-open-high-5911".to_string()
}
fn default_losers_url() -> String {
    "https://chartink.com/screener/copy-open-low-103152".to_string()
}
fn default_gainers_condition() -> String {
    "latest open = latest high".to_string()
}
fn default_losers_condition() -> String {
    "latest open = latest low".to_string()
}
fn default_top_n() -> usize {
    10
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            process_path: default_process_path(),
            token_header: default_token_header(),
            timeout_secs: default_timeout_secs(),
            token_timeout_secs: default_token_timeout_secs(),
            token_ttl_secs: default_token_ttl_secs(),
            request_delay_ms: 0,
            jitter_ms: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            websocket_url: None,
            settle_ms: default_settle_ms(),
            scan_settle_ms: default_scan_settle_ms(),
            step_timeout_ms: default_step_timeout_ms(),
            table_timeout_ms: default_table_timeout_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            reference_csv: default_reference_csv(),
            extra_symbols: default_extra_symbols(),
            symbol_column: default_symbol_column(),
            output: default_output(),
            segment: default_segment(),
            gainers_url: default_gainers_url(),
            losers_url: default_losers_url(),
            gainers_condition: default_gainers_condition(),
            losers_condition: default_losers_condition(),
            top_n: default_top_n(),
        }
    }
}

impl ScraperConfig {
    /// Full URL of the scan endpoint.
    pub fn process_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.process_path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("SCREENER").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|e| {
            tracing::warn!("Invalid configuration ({}), using defaults", e);
            AppConfig::default()
        });
        Ok(app_cfg)
    }
}
