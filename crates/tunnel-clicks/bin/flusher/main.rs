mod cli;

use crate::cli::CLI;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tunnel_clicks::{ClickBuffer, DrainScheduler, RedisClickCounter, SchedulerSettings};
use tunnel_storage::MySqlRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    tunnel_telemetry::init(config.log_format)?;

    info!(
        redis_url = %config.redis_url,
        key_prefix = %config.key_prefix,
        interval_secs = config.interval_secs,
        max_backoff_secs = config.max_backoff_secs,
        "starting click flusher"
    );

    let repository = MySqlRepository::connect(&config.mysql_dsn)
        .await
        .context("failed to connect to MySQL")?;
    if config.bootstrap_schema {
        repository
            .ensure_schema()
            .await
            .context("failed to bootstrap schema")?;
    }

    let client = redis::Client::open(config.redis_url.as_str()).context("invalid Redis url")?;
    let conn = client
        .get_multiplexed_async_connection()
        .await
        .context("failed to connect to Redis")?;
    let counter = RedisClickCounter::with_prefix(conn, config.key_prefix);

    let buffer = Arc::new(ClickBuffer::new(counter, repository));
    let settings = SchedulerSettings::builder()
        .interval(Duration::from_secs(config.interval_secs))
        .max_backoff(Duration::from_secs(config.max_backoff_secs))
        .build();

    let report = DrainScheduler::new(buffer, settings)
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!(
        persisted = report.total_persisted(),
        failed = report.total_failed(),
        "click flusher stopped"
    );
    Ok(())
}
