//! Run orchestration: wires adapters, engine, and collaborators for the
//! two entry points.
//!
//! - Daytime: EFTS window fetch → ingest → estimated-date refresh →
//!   public snapshot export.
//! - Nightly: master daily index for one day → durable-backstop filter →
//!   ingest. The nightly pass exists to catch anything the search API
//!   missed during the day.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{FixedOffset, NaiveDate, Utc};
use edgar::{
    CanonicalFiling, Cik, DailyIndexClient, DailyIndexConfig, EftsClient, EftsConfig,
};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup::DailyCache;
use crate::engine::{Engine, EngineConfig, RunSummary};
use crate::services::{
    Analyzer, CloudflareKvExporter, EstimatedDateService, LogoDevService, LogoService,
    NoopAnalyzer, NoopExporter, NoopLogoService, OpenAiAnalyzer, SnapshotExporter,
};
use crate::storage::{postgres::PostgresStorage, Storage};

/// EFTS and filing-document requests get a longer budget than the small
/// JSON services; LLM calls longer still.
const EDGAR_TIMEOUT: Duration = Duration::from_secs(30);
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(120);

/// Drop filings whose accession number is already persisted for the date
/// window (the durable dedup backstop).
fn drop_already_recorded(
    filings: Vec<CanonicalFiling>,
    seen: &HashSet<String>,
) -> Vec<CanonicalFiling> {
    filings
        .into_iter()
        .filter(|filing| match &filing.accession_id {
            Some(accession) => !seen.contains(accession.as_str()),
            None => true,
        })
        .collect()
}

pub struct Pipeline {
    engine: Engine,
    storage: Arc<dyn Storage>,
    efts: EftsClient,
    daily_index: DailyIndexClient,
    exporter: Arc<dyn SnapshotExporter>,
    calendar: EstimatedDateService,
    offset: FixedOffset,
    dry_run: bool,
}

impl Pipeline {
    /// Wire the full pipeline from configuration. Collaborators without
    /// credentials degrade to no-ops; Redis degrades to a process-local
    /// cache.
    pub async fn from_config(config: &Config, pool: PgPool) -> Result<Self> {
        let storage: Arc<dyn Storage> = Arc::new(PostgresStorage::new(pool));

        let logo: Arc<dyn LogoService> = match &config.logo_dev_key {
            Some(key) => Arc::new(LogoDevService::new(
                key.clone(),
                config.logo_refresh_days,
                config.http_timeout,
                storage.clone(),
            )?),
            None => Arc::new(NoopLogoService),
        };

        let analyzer: Arc<dyn Analyzer> = match &config.openai_api_key {
            Some(key) => Arc::new(OpenAiAnalyzer::new(
                key.clone(),
                config.openai_model.clone(),
                &config.sec_user_agent,
                ANALYSIS_TIMEOUT,
                storage.clone(),
            )?),
            None => Arc::new(NoopAnalyzer),
        };

        let exporter: Arc<dyn SnapshotExporter> = match (
            &config.cf_account_id,
            &config.cf_api_token,
            &config.cf_kv_namespace_id,
        ) {
            (Some(account), Some(token), Some(namespace)) => Arc::new(CloudflareKvExporter::new(
                account.clone(),
                token.clone(),
                namespace.clone(),
                config.http_timeout,
                storage.clone(),
            )?),
            _ => Arc::new(NoopExporter),
        };

        let calendar = EstimatedDateService::new(config.http_timeout, storage.clone())?;

        let mut efts_config = EftsConfig::new(config.sec_user_agent.clone());
        efts_config.forms = config.forms.clone();
        efts_config.initial_forms = config.initial_forms.clone();
        efts_config.page_size = config.page_size;
        efts_config.page_delay = config.rate_limit;
        efts_config.timeout = EDGAR_TIMEOUT;
        efts_config.retry = config.retry_policy();
        efts_config.confirmation_phrase = config.confirmation_phrase.clone();
        let efts = EftsClient::new(efts_config)?;

        let mut index_config = DailyIndexConfig::new(config.sec_user_agent.clone());
        index_config.forms = config.forms.clone();
        index_config.initial_forms = config.initial_forms.clone();
        index_config.timeout = config.http_timeout;
        index_config.retry = config.retry_policy();
        index_config.confirmation_phrase = config.confirmation_phrase.clone();
        let daily_index = DailyIndexClient::new(index_config)?;

        let redis_url = config
            .redis_cache_enabled
            .then_some(config.redis_url.as_deref())
            .flatten();
        let cache = DailyCache::connect(redis_url, config.today_offset, !config.dry_run).await;

        let engine = Engine::new(
            storage.clone(),
            logo,
            analyzer,
            cache,
            EngineConfig {
                initial_forms: config.initial_forms.clone(),
                dry_run: config.dry_run,
            },
        );

        Ok(Self {
            engine,
            storage,
            efts,
            daily_index,
            exporter,
            calendar,
            offset: config.today_offset,
            dry_run: config.dry_run,
        })
    }

    /// Today in the reference offset.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    /// Daytime EFTS run over an inclusive date window.
    pub async fn run_daytime(&self, start: NaiveDate, end: NaiveDate) -> Result<RunSummary> {
        if self.dry_run {
            info!("DRY RUN: decisions will be logged, nothing will be written");
        }

        let mut snapshot = self.storage.get_tracked_snapshot().await?;
        info!(tracked = snapshot.len(), "loaded tracked snapshot");

        // Seed the fast tier from storage so a mid-day restart does not
        // reprocess records committed earlier today.
        let mut seed = HashSet::new();
        let mut day = start;
        loop {
            seed.extend(self.storage.get_accession_ids_for_date(day).await?);
            if day >= end {
                break;
            }
            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
        let seeded = self.engine.cache().bulk_seed(&seed).await;
        if seeded > 0 {
            info!(seeded, "seeded daily dedup cache from storage");
        }

        let known: HashSet<Cik> = snapshot.keys().cloned().collect();
        let filings = self.efts.fetch(start, end, &known).await;
        info!(count = filings.len(), "fetched filings from EFTS");

        let summary = self.engine.process_batch(filings, &mut snapshot).await;

        if self.dry_run {
            info!("dry-run: skipping estimated-date refresh and snapshot export");
            return Ok(summary);
        }

        match self.calendar.refresh().await {
            Ok(updated) => info!(updated, "estimated IPO dates refreshed"),
            Err(err) => warn!("estimated-date refresh failed: {err:#}"),
        }

        if let Err(err) = self.exporter.export().await {
            warn!("snapshot export failed: {err:#}");
        }

        Ok(summary)
    }

    /// Nightly reconcile of one day's master index.
    pub async fn run_nightly(&self, day: NaiveDate) -> Result<RunSummary> {
        if self.dry_run {
            info!("DRY RUN: decisions will be logged, nothing will be written");
        }

        let filings = self.daily_index.fetch_for_date(day).await?;
        info!(count = filings.len(), %day, "fetched filings from master daily index");

        // Durable backstop: skip anything already captured during the day,
        // even if the fast tier is cold or disabled.
        let seen = self.storage.get_accession_ids_for_date(day).await?;
        let before = filings.len();
        let filings = drop_already_recorded(filings, &seen);
        let dropped = before - filings.len();
        if dropped > 0 {
            info!(dropped, "skipping filings already captured during the day");
        }

        let mut snapshot = self.storage.get_tracked_snapshot().await?;
        Ok(self.engine.process_batch(filings, &mut snapshot).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgar::{AccessionId, FormKind, IpoConfirmation};

    fn filing(accession: Option<&str>) -> CanonicalFiling {
        CanonicalFiling {
            cik: Cik::parse("123"),
            company_name: Some("Example Corp".into()),
            ticker: None,
            form_kind: Some(FormKind::S1),
            filed_date: "2025-08-07".parse().ok(),
            document_url: None,
            accession_id: accession.map(AccessionId::new),
            confirmation: IpoConfirmation::Confirmed,
            primary_document: None,
        }
    }

    #[test]
    fn backstop_drops_recorded_accessions_only() {
        let seen = HashSet::from(["A1".to_string()]);
        let filings = vec![filing(Some("A1")), filing(Some("A2")), filing(None)];

        let kept = drop_already_recorded(filings, &seen);
        let accessions: Vec<Option<&str>> = kept
            .iter()
            .map(|f| f.accession_id.as_ref().map(|a| a.as_str()))
            .collect();
        assert_eq!(accessions, vec![Some("A2"), None]);
    }
}
