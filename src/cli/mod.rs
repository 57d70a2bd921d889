//! regime-switcher CLI
//!
//! Commands:
//! - `regime-switcher run` - run the engine (default)
//! - `regime-switcher account` - balances, positions and open orders
//! - `regime-switcher cancel-orders` - cancel resting orders
//! - `regime-switcher fit` - one refit without trading
//! - `regime-switcher samples` - recorded probability history

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

/// Regime-driven risk-on/risk-off execution engine
#[derive(Parser, Debug)]
#[command(name = "regime-switcher")]
#[command(author, version, about = "Regime-driven risk-on/risk-off execution engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, default_value = "config", env = "SWITCHER_CONFIG_DIR")]
    pub config_dir: String,

    /// Override dry run mode: `--dry-run` = true, `--dry-run=false` = false
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    pub dry_run: Option<bool>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the refit scheduler and decision loop
    Run,

    /// Show account balances, positions and open orders
    Account,

    /// Cancel open orders
    CancelOrders {
        /// Only cancel orders on this symbol
        symbol: Option<String>,
    },

    /// Refit the regime model once and print the result
    Fit,

    /// Show recently recorded probability samples
    Samples {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}
