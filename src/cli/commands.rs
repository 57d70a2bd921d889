//! Operator commands: account inspection, order cleanup, one-off fits and
//! probability history.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::Tabled;

use super::output::{print_heading, print_item, print_items, print_kv, print_success, print_warn, OutputMode};
use crate::adapters::{AlpacaClient, PostgresStore, StoredSample};
use crate::config::AppConfig;
use crate::domain::{AccountSnapshot, BrokerPosition, InstrumentPair, OpenOrder};
use crate::exchange::Gateways;
use crate::services::Metrics;
use crate::strategy::{MarkovSwitchingEstimator, RefitConfig, RefitOutcome, RefitScheduler, RegimeStateStore};

#[derive(Debug, Serialize, Tabled)]
struct AccountRow {
    mode: &'static str,
    cash: Decimal,
    buying_power: Decimal,
    equity: String,
}

impl AccountRow {
    fn new(account: &AccountSnapshot, dry_run: bool) -> Self {
        Self {
            mode: if dry_run { "dry-run" } else { "live" },
            cash: account.cash,
            buying_power: account.buying_power,
            equity: account.equity.map(|e| e.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct PositionRow {
    symbol: String,
    quantity: Decimal,
    avg_entry_price: Decimal,
}

impl From<&BrokerPosition> for PositionRow {
    fn from(p: &BrokerPosition) -> Self {
        Self {
            symbol: p.symbol.clone(),
            quantity: p.quantity,
            avg_entry_price: p.avg_entry_price,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct OrderRow {
    order_id: String,
    symbol: String,
    side: String,
    quantity: String,
    client_order_id: String,
}

impl From<&OpenOrder> for OrderRow {
    fn from(o: &OpenOrder) -> Self {
        Self {
            order_id: o.order_id.clone(),
            symbol: o.symbol.clone(),
            side: o.side.to_string(),
            quantity: o.quantity.map(|q| q.to_string()).unwrap_or_default(),
            client_order_id: o.client_order_id.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ProbabilityRow {
    as_of: DateTime<Utc>,
    probability: String,
}

#[derive(Debug, Serialize, Tabled)]
struct SampleRow {
    id: i64,
    target: String,
    as_of: DateTime<Utc>,
    probability: String,
    threshold: f64,
    recorded_at: DateTime<Utc>,
}

impl From<&StoredSample> for SampleRow {
    fn from(s: &StoredSample) -> Self {
        Self {
            id: s.id,
            target: s.target_symbol.clone(),
            as_of: s.sample.as_of,
            probability: format!("{:.6}", s.sample.probability),
            threshold: s.sample.entry_threshold,
            recorded_at: s.recorded_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct AccountReport {
    dry_run: bool,
    account: AccountSnapshot,
    positions: Vec<BrokerPosition>,
    open_orders: Vec<OpenOrder>,
}

/// Show balances, positions and resting orders
pub async fn show_account(client: &AlpacaClient, mode: OutputMode) -> anyhow::Result<()> {
    let account = client.get_account().await.context("fetching account")?;
    let positions = client.get_positions().await.context("fetching positions")?;
    let open_orders = client
        .list_open_orders(None)
        .await
        .context("fetching open orders")?;

    match mode {
        OutputMode::Json => {
            let report = AccountReport {
                dry_run: client.is_dry_run(),
                account,
                positions,
                open_orders,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputMode::Table => {
            print_heading("Account", mode);
            print_item(&AccountRow::new(&account, client.is_dry_run()), mode)?;
            print_heading("Positions", mode);
            let rows: Vec<PositionRow> = positions.iter().map(PositionRow::from).collect();
            print_items(&rows, mode)?;
            print_heading("Open orders", mode);
            let rows: Vec<OrderRow> = open_orders.iter().map(OrderRow::from).collect();
            print_items(&rows, mode)?;
        }
    }
    Ok(())
}

/// Cancel every open order, or only those on `symbol`
pub async fn cancel_orders(
    client: &AlpacaClient,
    symbol: Option<&str>,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let cancelled = match symbol {
        None => client
            .cancel_all_orders()
            .await
            .context("cancelling all open orders")?,
        Some(symbol) => {
            let open = client
                .list_open_orders(Some(symbol))
                .await
                .with_context(|| format!("listing open orders for {}", symbol))?;
            let mut cancelled = 0;
            for order in &open {
                match client.cancel_order(&order.order_id).await {
                    Ok(()) => cancelled += 1,
                    Err(e) => print_warn(&format!("Could not cancel {}: {}", order.order_id, e)),
                }
            }
            cancelled
        }
    };

    match mode {
        OutputMode::Json => println!("{}", serde_json::json!({ "cancelled": cancelled })),
        OutputMode::Table if client.is_dry_run() => {
            print_warn(&format!("DRY RUN: {} open orders would be cancelled", cancelled))
        }
        OutputMode::Table => print_success(&format!("Cancelled {} open orders", cancelled)),
    }
    Ok(())
}

/// Run one refit without publishing or trading
pub async fn fit_once(config: &AppConfig, gateways: &Gateways, mode: OutputMode) -> anyhow::Result<()> {
    let scheduler = RefitScheduler::new(
        Arc::clone(&gateways.market_data),
        Arc::new(MarkovSwitchingEstimator::from_config(&config.model)),
        Arc::new(RegimeStateStore::new()),
        Arc::new(Metrics::new()),
        RefitConfig::from_app(config)?,
    );
    let outcome: RefitOutcome = scheduler.fit_snapshot().await.context("fitting regime model")?;

    let pair = InstrumentPair::new(
        config.strategy.target_symbol.clone(),
        config.strategy.hedge_symbol.clone(),
    );
    let desired = pair.desired(&outcome.snapshot);

    match mode {
        OutputMode::Json => {
            let body = serde_json::json!({ "fit": outcome, "desired": desired });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputMode::Table => {
            print_heading(
                &format!("Smoothed P(positive) for {}", config.strategy.model_symbol),
                mode,
            );
            let rows: Vec<ProbabilityRow> = outcome
                .recent
                .iter()
                .map(|(as_of, p)| ProbabilityRow {
                    as_of: *as_of,
                    probability: format!("{:.6}", p),
                })
                .collect();
            print_items(&rows, mode)?;
            println!();
            print_kv("Observations", &outcome.observations.to_string());
            print_kv(
                "EM iterations",
                &format!(
                    "{}{}",
                    outcome.iterations,
                    if outcome.converged { "" } else { " (not converged)" }
                ),
            );
            print_kv("Log-likelihood", &format!("{:.4}", outcome.log_likelihood));
            print_kv(
                "Snapshot",
                &format!(
                    "P(positive)={:.6} as of {} (threshold {})",
                    outcome.snapshot.probability_positive,
                    outcome.snapshot.as_of,
                    outcome.snapshot.entry_threshold
                ),
            );
            let symbol = pair.symbol_of(desired).unwrap_or("nothing");
            print_success(&format!("Desired position: {} ({})", desired, symbol));
        }
    }
    Ok(())
}

/// Show the most recent persisted probability samples
pub async fn show_samples(config: &AppConfig, limit: i64, mode: OutputMode) -> anyhow::Result<()> {
    if !config.database.enabled {
        print_warn("Database is disabled (database.enabled = false); no samples are recorded");
        return Ok(());
    }

    let store = PostgresStore::new(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to database")?;
    let samples = store
        .recent_probability_samples(limit)
        .await
        .context("querying probability samples")?;
    let rows: Vec<SampleRow> = samples.iter().map(SampleRow::from).collect();
    print_items(&rows, mode)
}
