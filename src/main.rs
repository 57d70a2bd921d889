use anyhow::Context;
use clap::Parser;
use regime_switcher::adapters::PostgresStore;
use regime_switcher::cli::commands;
use regime_switcher::cli::output::{print_error, OutputMode};
use regime_switcher::cli::{Cli, Commands};
use regime_switcher::config::AppConfig;
use regime_switcher::domain::InstrumentPair;
use regime_switcher::exchange::build_gateways;
use regime_switcher::services::{HealthServer, HealthState, Metrics};
use regime_switcher::strategy::{
    DecisionLoop, EngineConfig, ExecutorConfig, MarkovSwitchingEstimator, OrderExecutor,
    PositionReconciler, PostgresRecorder, RefitConfig, RefitScheduler, RegimeStateStore,
};
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::from_json_flag(cli.json);

    let mut config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir))?;
    if let Some(dry_run) = cli.dry_run {
        config.dry_run.enabled = dry_run;
    }
    if let Err(errors) = config.validate() {
        for e in &errors {
            print_error(&format!("config: {}", e));
        }
        anyhow::bail!("invalid configuration ({} problems)", errors.len());
    }
    let dry_run = config.dry_run.enabled;

    match cli.command() {
        Commands::Run => {
            let _log_guard = init_logging(&config.logging);
            run_engine(config).await?;
        }
        Commands::Account => {
            init_logging_simple();
            let gateways = build_gateways(&config, dry_run)?;
            commands::show_account(&gateways.alpaca, mode).await?;
        }
        Commands::CancelOrders { symbol } => {
            init_logging_simple();
            let gateways = build_gateways(&config, dry_run)?;
            commands::cancel_orders(&gateways.alpaca, symbol.as_deref(), mode).await?;
        }
        Commands::Fit => {
            init_logging_simple();
            let gateways = build_gateways(&config, dry_run)?;
            commands::fit_once(&config, &gateways, mode).await?;
        }
        Commands::Samples { limit } => {
            init_logging_simple();
            commands::show_samples(&config, limit, mode).await?;
        }
    }

    Ok(())
}

async fn run_engine(config: AppConfig) -> anyhow::Result<()> {
    let dry_run = config.dry_run.enabled;
    info!(
        "Starting regime switcher: model {} -> target {} / hedge {} (threshold {}, dry_run={})",
        config.strategy.model_symbol,
        config.strategy.target_symbol,
        config.strategy.hedge_symbol.as_deref().unwrap_or("none"),
        config.strategy.entry_threshold,
        dry_run
    );

    let gateways = build_gateways(&config, dry_run)?;
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(RegimeStateStore::new());

    let refit = Arc::new(RefitScheduler::new(
        Arc::clone(&gateways.market_data),
        Arc::new(MarkovSwitchingEstimator::from_config(&config.model)),
        Arc::clone(&store),
        Arc::clone(&metrics),
        RefitConfig::from_app(&config)?,
    ));

    let pair = InstrumentPair::new(
        config.strategy.target_symbol.clone(),
        config.strategy.hedge_symbol.clone(),
    );
    let executor = OrderExecutor::new(
        Arc::clone(&gateways.broker),
        Arc::clone(&metrics),
        ExecutorConfig::from(&config.strategy),
    );
    let mut decision = DecisionLoop::new(
        Arc::clone(&store),
        PositionReconciler::new(Arc::clone(&gateways.broker), pair),
        executor,
        Arc::clone(&metrics),
        EngineConfig::from_app(&config),
    );

    if config.database.enabled {
        match connect_store(&config).await {
            Ok(pg) => {
                decision = decision.with_recorder(Arc::new(PostgresRecorder::new(
                    pg,
                    config.strategy.target_symbol.clone(),
                )));
            }
            Err(e) => warn!("Probability recording disabled: {:#}", e),
        }
    }
    let decision = Arc::new(decision);

    // Startup fit so the first poll has a snapshot
    if let Err(e) = refit.refit_now().await {
        warn!("Startup refit failed ({}); decision loop idles until the next scheduled refit", e);
    }

    let health_handle = config.health_port.map(|port| {
        let state = Arc::new(
            HealthState::new(
                Arc::clone(&store),
                decision.status_handle(),
                Arc::clone(&metrics),
                dry_run,
            )
            .with_cycle_staleness(cycle_staleness_secs(&config)),
        );
        let server = HealthServer::new(state, port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Health server error: {}", e);
            }
        })
    });

    let status_handle = {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            let mut status_interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                status_interval.tick().await;
                metrics.log_status();
            }
        })
    };

    let refit_task = {
        let refit = Arc::clone(&refit);
        tokio::spawn(async move { refit.run().await })
    };
    let decision_task = {
        let decision = Arc::clone(&decision);
        tokio::spawn(async move { decision.run().await })
    };

    info!("Engine is running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = shutdown_signal() => info!("Shutting down..."),
        r = refit_task => error!("Refit scheduler exited unexpectedly: {:?}", r),
        r = decision_task => error!("Decision loop exited unexpectedly: {:?}", r),
    }

    if let Some(handle) = health_handle {
        handle.abort();
    }
    status_handle.abort();
    metrics.log_status();
    info!("Shutdown complete");
    Ok(())
}

/// A healthy cycle finishes within a few polls plus a handful of bounded calls
fn cycle_staleness_secs(config: &AppConfig) -> i64 {
    let ms = config.schedule.poll_interval_ms * 6 + config.schedule.call_timeout_ms * 8;
    (ms / 1000).max(30) as i64
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<PostgresStore> {
    let store = PostgresStore::new(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    Ok(store)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
