//! Configuration management with serde serialization/deserialization
//!
//! This module holds the server configuration, the persistence backend choice
//! and the Chrome launch settings used for every pooled browser.

use crate::CaptchaError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the solver server
///
/// Built from defaults, optionally overlaid by a JSON file and finally by
/// command-line flags (see [`crate::load_config`]).
///
/// # Examples
///
/// ```rust
/// use hcaptcha_pool::Config;
///
/// let config = Config {
///     pool_size: 4,
///     api_key: "secret".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.port, 5050);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of browsers kept in the worker pool (default: 1)
    ///
    /// Caps how many challenges are solved at the same time. Extra submissions
    /// wait for a free browser.
    pub pool_size: usize,

    /// Run Chrome without a visible window (default: false)
    pub headless: bool,

    /// Custom User-Agent passed to every browser (default: Chrome default)
    ///
    /// Required in headless mode, where the stock agent advertises itself as
    /// `HeadlessChrome`.
    pub user_agent: Option<String>,

    /// Enable debug logging (default: false)
    pub debug: bool,

    /// Honour the `proxy` query parameter on submissions (default: false)
    pub proxy_support: bool,

    /// Bind address for the HTTP API (default: 0.0.0.0)
    pub host: String,

    /// Bind port for the HTTP API (default: 5050)
    pub port: u16,

    /// Credential handed to the external challenge agent
    pub api_key: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Location of the durable result store (default: hcaptcha_results.json)
    pub results_path: PathBuf,

    /// Durable store layout (default: snapshot)
    pub store_kind: StoreKind,

    /// Upper bound on one solve attempt, navigation included (default: 180 seconds)
    pub solve_timeout: Duration,

    /// How often the solver polls the page for an issued token (default: 500ms)
    pub token_poll_interval: Duration,

    /// External agent bundle injected into the challenge page (default: none)
    pub agent_script: Option<PathBuf>,

    /// Install the Prometheus recorder and serve `/metrics` (default: true)
    pub metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 1,
            headless: false,
            user_agent: None,
            debug: false,
            proxy_support: false,
            host: "0.0.0.0".to_string(),
            port: 5050,
            api_key: String::new(),
            chrome_path: None,
            results_path: PathBuf::from("hcaptcha_results.json"),
            store_kind: StoreKind::Snapshot,
            solve_timeout: Duration::from_secs(180),
            token_poll_interval: Duration::from_millis(500),
            agent_script: None,
            metrics: true,
        }
    }
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Durable storage layout for solve outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// One JSON document rewritten on every terminal outcome
    Snapshot,
    /// Append-only JSON lines, compacted on startup
    Journal,
}

/// Reject configurations the server cannot start with.
pub fn validate_config(config: &Config) -> Result<(), CaptchaError> {
    if config.pool_size == 0 {
        return Err(CaptchaError::Configuration(
            "Pool size must be greater than 0".to_string(),
        ));
    }

    if config.solve_timeout.is_zero() {
        return Err(CaptchaError::Configuration(
            "Solve timeout must be greater than 0".to_string(),
        ));
    }

    if config.token_poll_interval.is_zero() {
        return Err(CaptchaError::Configuration(
            "Token poll interval must be greater than 0".to_string(),
        ));
    }

    if config.api_key.trim().is_empty() {
        return Err(CaptchaError::Configuration(
            "An API key for the challenge agent is required".to_string(),
        ));
    }

    if config.headless && config.user_agent.is_none() {
        return Err(CaptchaError::Configuration(
            "It is recommended to specify a User-Agent when using headless mode".to_string(),
        ));
    }

    Ok(())
}

/// Generate Chrome command-line arguments for one pooled browser
///
/// Each slot gets its own user data and temp directories so concurrent
/// instances never trip over Chrome's process singleton.
///
/// # Examples
///
/// ```rust
/// use hcaptcha_pool::{Config, get_chrome_args};
///
/// let config = Config {
///     user_agent: Some("Mozilla/5.0".to_string()),
///     ..Default::default()
/// };
/// let args = get_chrome_args(&config, 0);
/// assert!(args.contains(&"--user-agent=Mozilla/5.0".to_string()));
/// ```
pub fn get_chrome_args(config: &Config, slot: usize) -> Vec<String> {
    let unique_id = format!("{}-{}", std::process::id(), slot);

    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        "--disable-features=ProcessSingleton".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--user-data-dir=/tmp/hcaptcha-pool-{unique_id}"),
        format!("--temp-dir=/tmp/hcaptcha-pool-temp-{unique_id}"),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    config: &Config,
    slot: usize,
) -> Result<chromiumoxide::browser::BrowserConfig, CaptchaError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(1280, 900)
        .args(get_chrome_args(config, slot));

    if !config.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(CaptchaError::Configuration)
}
