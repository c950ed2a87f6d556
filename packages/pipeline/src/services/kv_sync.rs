//! Public snapshot export to Cloudflare KV.
//!
//! Once per daytime run, after ingestion: read confirmed tracked filers,
//! keep those whose estimated IPO date is unknown or upcoming, sort by
//! (date known first, date ascending, market cap descending), cap the list,
//! and PUT it to a KV namespace the public site reads. Entirely decoupled
//! from per-record state transitions and failure-tolerant.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::storage::{Storage, TrackedEntity};

const EXPORT_LIMIT: usize = 100;
const KV_KEY: &str = "ipo_table";

lazy_static! {
    static ref ISO_DATE_RE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
}

/// Snapshot-export collaborator seam.
#[async_trait]
pub trait SnapshotExporter: Send + Sync {
    async fn export(&self) -> Result<()>;
}

fn is_specific_date(value: &str) -> bool {
    ISO_DATE_RE.is_match(value)
}

/// Public-visibility predicate: keep rows with no estimated date, a vague
/// one ("TBD", "Week of …"), or a concrete date that has not passed.
fn is_publishable(entity: &TrackedEntity, today: NaiveDate) -> bool {
    match entity.estimated_ipo_date.as_deref() {
        None => true,
        Some(estimated) if !is_specific_date(estimated) => true,
        Some(estimated) => estimated > today.to_string().as_str(),
    }
}

/// Filter, sort, and cap the export set. Concrete dates sort first
/// (ascending); within a date bucket bigger market caps come first.
pub fn select_publishable(mut rows: Vec<TrackedEntity>, today: NaiveDate) -> Vec<TrackedEntity> {
    rows.retain(|row| is_publishable(row, today));
    rows.sort_by(|a, b| {
        let a_date = a.estimated_ipo_date.as_deref().filter(|d| is_specific_date(d));
        let b_date = b.estimated_ipo_date.as_deref().filter(|d| is_specific_date(d));
        match (a_date, b_date) {
            (Some(da), Some(db)) => da
                .cmp(db)
                .then_with(|| b.market_cap.unwrap_or(0).cmp(&a.market_cap.unwrap_or(0))),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.market_cap.unwrap_or(0).cmp(&a.market_cap.unwrap_or(0)),
        }
    });
    rows.truncate(EXPORT_LIMIT);
    rows
}

/// Cloudflare KV-backed exporter.
pub struct CloudflareKvExporter {
    client: reqwest::Client,
    account_id: String,
    api_token: String,
    namespace_id: String,
    storage: Arc<dyn Storage>,
}

impl CloudflareKvExporter {
    pub fn new(
        account_id: String,
        api_token: String,
        namespace_id: String,
        timeout: Duration,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            account_id,
            api_token,
            namespace_id,
            storage,
        })
    }

    fn value_url(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/storage/kv/namespaces/{}/values/{}",
            self.account_id, self.namespace_id, KV_KEY
        )
    }
}

#[async_trait]
impl SnapshotExporter for CloudflareKvExporter {
    async fn export(&self) -> Result<()> {
        let rows = self.storage.list_confirmed_tracked().await?;
        let selected = select_publishable(rows, Utc::now().date_naive());
        let count = selected.len();

        let response = self
            .client
            .put(self.value_url())
            .bearer_auth(&self.api_token)
            .json(&selected)
            .send()
            .await
            .context("Failed to send KV upload")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("KV upload failed with {status}: {body}");
        }

        info!(count, "uploaded public IPO snapshot to KV");
        Ok(())
    }
}

/// No-op exporter for when Cloudflare credentials are not configured.
pub struct NoopExporter;

#[async_trait]
impl SnapshotExporter for NoopExporter {
    async fn export(&self) -> Result<()> {
        warn!("NoopExporter: snapshot export requested but Cloudflare KV not configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use edgar::{Cik, FormKind};

    fn entity(cik: &str, estimated: Option<&str>, market_cap: Option<i64>) -> TrackedEntity {
        TrackedEntity {
            cik: Cik::parse(cik).unwrap(),
            company_name: Some(format!("Company {cik}")),
            ticker: None,
            latest_filing_type: FormKind::S1,
            latest_filing_date: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            document_url: None,
            is_ipo: true,
            analyzed: false,
            accession_number: None,
            logo_url: None,
            updated_logo_date: None,
            shares_offered: None,
            share_price: None,
            exchange: None,
            market_cap,
            estimated_ipo_date: estimated.map(String::from),
            updated_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 7).unwrap()
    }

    #[test]
    fn past_dates_are_dropped_vague_and_missing_kept() {
        let rows = vec![
            entity("1", Some("2025-08-01"), None), // already priced
            entity("2", Some("2025-09-01"), None),
            entity("3", Some("TBD"), None),
            entity("4", None, None),
        ];
        let selected = select_publishable(rows, today());
        let ciks: Vec<&str> = selected.iter().map(|e| e.cik.as_str()).collect();
        assert!(!ciks.contains(&"1"));
        assert_eq!(ciks.len(), 3);
    }

    #[test]
    fn sorts_dates_first_then_market_cap() {
        let rows = vec![
            entity("1", None, Some(50)),
            entity("2", Some("2025-09-10"), Some(10)),
            entity("3", Some("2025-09-01"), Some(5)),
            entity("4", Some("2025-09-01"), Some(500)),
            entity("5", Some("Week of 9/15"), Some(999)),
        ];
        let selected = select_publishable(rows, today());
        let ciks: Vec<&str> = selected.iter().map(|e| e.cik.as_str()).collect();
        // concrete dates ascending, bigger cap first within a date,
        // vague/missing dates after (by cap)
        assert_eq!(ciks, vec!["4", "3", "2", "5", "1"]);
    }

    #[test]
    fn caps_the_export_size() {
        let rows: Vec<TrackedEntity> = (1..=150)
            .map(|i| entity(&i.to_string(), None, Some(i)))
            .collect();
        assert_eq!(select_publishable(rows, today()).len(), EXPORT_LIMIT);
    }
}
