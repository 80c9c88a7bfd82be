//! Loan ledger service binary

use loan_ledger::{Config, LifecycleEngine, LogNotifier};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::var("LOAN_LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::from_env()?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = %config.data_dir.display(),
        "Starting loan ledger"
    );

    let engine = LifecycleEngine::open(&config, Arc::new(LogNotifier))?;

    let stats = engine.store().stats()?;
    tracing::info!(
        loans = stats.total_loans,
        approvals = stats.total_approvals,
        investments = stats.total_investments,
        "Ledger opened successfully"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down loan ledger");
    engine.shutdown().await?;
    Ok(())
}
