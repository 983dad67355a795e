use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use uuid::Uuid;

use lendwatch_common::config::AppConfig;
use lendwatch_data::{CollateralOracle, DataServiceClient, DataSource, LendingPoolOracle};
use lendwatch_runner::pipeline::{Pipeline, PipelineSettings};
use lendwatch_runner::sink::{self, PgSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lendwatch_runner=info,lendwatch_engine=info,lendwatch_data=debug".into()
            }),
        )
        .json()
        .init();

    tracing::info!("LendWatch runner starting...");

    let config = AppConfig::from_env()?;

    let pool = sink::create_pool(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let source = DataServiceClient::new(
        config.data_api_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?;
    let provider = ProviderBuilder::new().connect_http(config.eth_rpc_url.parse()?);
    let pool_address = Address::from_str(&config.lending_pool_address)?;
    let oracle = LendingPoolOracle::new(provider, pool_address);

    let pipeline = Pipeline::new(source, oracle, PipelineSettings::from(&config));
    let sink = PgSink::new(pool);
    let run_id = Uuid::new_v4();

    tracing::info!(
        run_id = %run_id,
        start = %config.start_date,
        stop = %config.stop_date,
        data_api = %config.data_api_url,
        pool = %pool_address,
        workers = pipeline.settings().concurrency,
        "Processing day range"
    );

    tokio::select! {
        result = run(&config, &pipeline, &sink, run_id) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Runner exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping before the next day is written");
        }
    }

    tracing::info!("LendWatch runner stopped.");
    Ok(())
}

/// Process every configured day in order. A day whose shared inputs cannot
/// be fetched is skipped; a sink failure stops the run.
async fn run<S, O>(
    config: &AppConfig,
    pipeline: &Pipeline<S, O>,
    sink: &PgSink,
    run_id: Uuid,
) -> anyhow::Result<()>
where
    S: DataSource + 'static,
    O: CollateralOracle + 'static,
{
    let mut days_written = 0usize;
    let mut days_skipped = 0usize;

    for day in config.days() {
        let report = match pipeline.run_day(day).await {
            Ok(report) => report,
            Err(e) => {
                days_skipped += 1;
                tracing::error!(day = %day, error = %e, "Day skipped");
                continue;
            }
        };

        if sink.is_day_completed(day).await? {
            tracing::info!(day = %day, "Overwriting results of an earlier run");
        }
        sink.write_day(run_id, &report).await?;
        days_written += 1;
    }

    tracing::info!(
        run_id = %run_id,
        days_written,
        days_skipped,
        "Day range complete"
    );
    Ok(())
}
