// Nightly safety pass: reconcile the master daily index for one day.
// By default reconciles yesterday in the reference offset; override with
// --ds YYYYMMDD.

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgar::normalize::parse_compact_date;
use pipeline::{Config, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "nightly", about = "Reconcile the EDGAR master daily index for a given day")]
struct Args {
    /// Day to reconcile, YYYYMMDD (default: yesterday in the reference offset)
    #[arg(long)]
    ds: Option<String>,
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
    let day = match args.ds {
        Some(ds) => parse_compact_date(&ds).context("--ds must be a YYYYMMDD date")?,
        None => pipeline
            .today()
            .pred_opt()
            .context("date underflow computing yesterday")?,
    };
    tracing::info!(%day, "starting nightly reconcile");

    let summary = pipeline.run_nightly(day).await?;
    tracing::info!(
        created = summary.created,
        updated = summary.updated,
        transitioned = summary.transitioned,
        withdrawn = summary.withdrawn,
        deduped = summary.deduped,
        "nightly reconcile complete"
    );
    Ok(())
}
