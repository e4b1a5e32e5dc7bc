//! Manual payout run.
//!
//! Uses the full server configuration, since transfers need the Stripe key.

use flexhub_server::config::ServerConfig;
use flexhub_server::db;
use flexhub_server::state::AppState;

use super::CliError;

/// Process the weekly payout batch now and print the summary as JSON.
pub async fn run() -> Result<(), CliError> {
    let config = ServerConfig::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    let state = AppState::new(config, pool);

    tracing::info!("Running payout batch...");
    let summary = state.payouts().process_weekly_payouts().await?;

    tracing::info!(
        paid = summary.paid_count,
        failed = summary.failed_count,
        below_minimum = summary.below_minimum_count,
        total_paid_cents = %summary.total_paid_cents,
        "Payout batch complete"
    );

    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    #[allow(clippy::print_stdout)]
    {
        println!("{json}");
    }
    Ok(())
}
