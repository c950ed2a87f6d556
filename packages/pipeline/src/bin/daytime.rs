// Daytime ingestion run: today's filings via the EDGAR full-text search API.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline::{Config, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "daytime", about = "Ingest EDGAR filings for a date window via full-text search")]
struct Args {
    /// Window start, YYYY-MM-DD (default: today in the reference offset)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Window end, YYYY-MM-DD (default: same as start)
    #[arg(long)]
    end: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let pipeline = Pipeline::from_config(&config, pool).await?;
    let start = args.start.unwrap_or_else(|| pipeline.today());
    let end = args.end.unwrap_or(start);
    tracing::info!(%start, %end, "starting daytime run");

    let summary = pipeline.run_daytime(start, end).await?;
    tracing::info!(
        created = summary.created,
        updated = summary.updated,
        transitioned = summary.transitioned,
        withdrawn = summary.withdrawn,
        "daytime run complete"
    );
    Ok(())
}
