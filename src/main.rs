use anyhow::Context;
use clap::Parser;
use hcaptcha_pool::{
    install_prometheus, load_config, log_config, open_store, router, serve, setup_logging,
    AppState, BrowserSession, ChromeFactory, ChromeSolver, Cli, Dispatcher, ResourcePool,
    ResultStore, SessionFactory, Solver,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let config = load_config(&args).await.context("Invalid configuration")?;

    setup_logging(config.debug).map_err(anyhow::Error::msg)?;

    info!("Starting hcaptcha-pool v{}", env!("CARGO_PKG_VERSION"));
    log_config(&config);

    let metrics = if config.metrics {
        match install_prometheus() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    // The result store and every browser must be ready before traffic is accepted.
    let store = ResultStore::load(open_store(&config)).await;

    let solver: Arc<dyn Solver<BrowserSession>> = Arc::new(
        ChromeSolver::from_config(&config)
            .await
            .context("Failed to set up solver")?,
    );

    let factory = Arc::new(ChromeFactory::new(config.clone()));
    let pool = {
        let factory = factory.clone();
        ResourcePool::initialize_named("chrome", config.pool_size, move |slot| {
            let factory = factory.clone();
            async move { factory.create(slot).await }
        })
        .await
        .context("Failed to initialize browser pool")?
    };

    let dispatcher = Arc::new(Dispatcher::new(pool, factory, solver, store, &config));
    let app = router(AppState::new(dispatcher.clone(), metrics));

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;

    let served = serve(listener, app, shutdown_signal()).await;

    info!("Shutting down...");
    dispatcher.shutdown(SHUTDOWN_GRACE).await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("hcaptcha-pool stopped");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
