use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use nts::cli::{Cli, run};
use nts::config::NtsConfig;
use nts::sandbox::PathSandbox;
use nts::session::SessionRegistry;
use nts::telemetry;
use nts::txn::TxnLimits;

fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    let root: PathBuf = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let sandbox = PathSandbox::global();
    sandbox.set_root(root.clone());

    let config = NtsConfig::load(&root).map_err(|e| anyhow::anyhow!("{e}"))?;
    config.apply(&sandbox);
    SessionRegistry::global().set_limits(TxnLimits {
        journal_cap: config.limits.journal_cap,
        deep_search_max_files: config.limits.deep_search_max_files,
    });

    run(&cli.command, cli.format)
}
