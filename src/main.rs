mod config;
mod errors;
mod estimator;
mod feeds;
mod models;
mod report;

use crate::config::{AppConfig, Mode, OutputFormat};
use crate::errors::{EstimationError, EstimationResult};
use crate::estimator::types::ProbabilityEstimate;
use crate::estimator::Estimator;
use crate::feeds::deribit::DeribitClient;
use crate::report::EstimateReport;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout carries only the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let client = DeribitClient::new(
        &cfg.deribit_base_url,
        Duration::from_secs(cfg.http_timeout_secs),
    );
    let estimator = Estimator::new(cfg.pipeline);

    tracing::info!(
        coin = %cfg.query.coin,
        strike = cfg.query.strike,
        expiration = %cfg.query.expiration,
        mode = ?cfg.mode,
        discount_rate = estimator.config().discount_rate,
        strike_window = estimator.config().strike_window,
        "itm_oracle starting"
    );

    if cfg.poll_interval_secs == 0 {
        if let Err(e) = run_once(&cfg, &client, &estimator).await {
            tracing::error!(error = %e, "estimate failed");
            std::process::exit(1);
        }
        return;
    }

    run_polling(&cfg, &client, &estimator).await;
}

/// Fetch one snapshot, run the configured mode, print the report to stdout.
async fn run_once(
    cfg: &AppConfig,
    client: &DeribitClient,
    estimator: &Estimator,
) -> EstimationResult<()> {
    let snapshot = client.fetch_snapshot(&cfg.query.coin).await?;

    let output = match cfg.mode {
        Mode::Surface => render(cfg, &estimator.estimate(&cfg.query, &snapshot)?)?,
        Mode::Expiry => render(cfg, &estimator.estimate_expiry(&cfg.query, &snapshot)?)?,
        Mode::Ladder => {
            let ladder = estimator.ladder(&snapshot, cfg.query.expiration, &cfg.ladder())?;
            match cfg.output_format {
                OutputFormat::Text => report::render_ladder(&ladder),
                OutputFormat::Json => report::render_json(&ladder)?,
            }
        }
    };

    println!("{output}");
    Ok(())
}

fn render(cfg: &AppConfig, estimate: &ProbabilityEstimate) -> EstimationResult<String> {
    match cfg.output_format {
        OutputFormat::Text => Ok(report::render_estimate(estimate, cfg.curve_samples)),
        OutputFormat::Json => report::render_json(&EstimateReport::new(estimate, cfg.curve_samples)),
    }
}

/// Re-run the estimate every POLL_INTERVAL_SECS until Ctrl-C or the query
/// becomes unanswerable (e.g. the target expiration has passed).
async fn run_polling(cfg: &AppConfig, client: &DeribitClient, estimator: &Estimator) {
    tracing::info!(interval_secs = cfg.poll_interval_secs, "polling started");

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs));
    let mut consecutive_errors: u32 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, polling stopped");
                return;
            }
        }

        match run_once(cfg, client, estimator).await {
            Ok(()) => consecutive_errors = 0,
            Err(e) if e.is_transient() => {
                consecutive_errors += 1;
                tracing::warn!(
                    error = %e,
                    consecutive = consecutive_errors,
                    "market data fetch failed"
                );

                // Back off on repeated failures (cap at 30s)
                if consecutive_errors > 3 {
                    let backoff = std::cmp::min(consecutive_errors * 2, 30);
                    tokio::time::sleep(Duration::from_secs(backoff as u64)).await;
                }
            }
            Err(e @ (EstimationError::InvalidQuery(_) | EstimationError::Config(_))) => {
                tracing::error!(error = %e, "query can no longer be answered, polling stopped");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "no estimate this round");
            }
        }
    }
}
