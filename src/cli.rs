use crate::{validate_config, CaptchaError, Config, StoreKind};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "hcaptcha-pool")]
#[command(about = "hCaptcha solving API backed by a pool of Chrome browsers")]
#[command(version)]
pub struct Cli {
    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Run the browsers in headless mode")]
    pub headless: bool,

    #[arg(long, help = "Custom User-Agent string for the browsers")]
    pub useragent: Option<String>,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,

    #[arg(long, help = "Number of browsers in the pool")]
    pub thread: Option<usize>,

    #[arg(long, help = "Honour the proxy parameter on submissions")]
    pub proxy: bool,

    #[arg(long, help = "Bind address for the API")]
    pub host: Option<String>,

    #[arg(long, help = "Bind port for the API")]
    pub port: Option<u16>,

    #[arg(
        long = "api-key",
        alias = "api_key",
        env = "HCAPTCHA_API_KEY",
        hide_env_values = true,
        help = "Credential for the challenge agent"
    )]
    pub api_key: Option<String>,

    #[arg(long, help = "Result store location")]
    pub results: Option<PathBuf>,

    #[arg(long, value_enum, help = "Result store layout")]
    pub store: Option<StoreKind>,

    #[arg(long, help = "Solve timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Agent script injected into challenge pages")]
    pub agent_script: Option<PathBuf>,

    #[arg(long, help = "Disable the /metrics endpoint")]
    pub no_metrics: bool,
}

impl Cli {
    /// Overlay the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        if self.headless {
            config.headless = true;
        }
        if let Some(user_agent) = &self.useragent {
            config.user_agent = Some(user_agent.clone());
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(thread) = self.thread {
            config.pool_size = thread;
        }
        if self.proxy {
            config.proxy_support = true;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(results) = &self.results {
            config.results_path = results.clone();
        }
        if let Some(store) = self.store {
            config.store_kind = store;
        }
        if let Some(timeout) = self.timeout {
            config.solve_timeout = Duration::from_secs(timeout);
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Some(agent_script) = &self.agent_script {
            config.agent_script = Some(agent_script.clone());
        }
        if self.no_metrics {
            config.metrics = false;
        }
    }
}

/// Defaults, then the config file if one was given, then command-line flags.
pub async fn load_config(args: &Cli) -> Result<Config, CaptchaError> {
    let mut config = match &args.config {
        Some(path) => {
            let content = fs::read_to_string(path).await?;
            serde_json::from_str(&content)?
        }
        None => Config::default(),
    };

    args.apply(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn log_config(config: &Config) {
    info!("Configuration loaded successfully");
    info!("Pool size: {}", config.pool_size);
    info!("Headless: {}", config.headless);
    info!("Proxy support: {}", config.proxy_support);
    info!("Solve timeout: {:?}", config.solve_timeout);
    info!("Result store: {} ({:?})", config.results_path.display(), config.store_kind);
}

pub fn setup_logging(debug: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()?;

    Ok(())
}
