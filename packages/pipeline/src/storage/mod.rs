//! Durable storage: the tracked-IPO table and the public-companies table.
//!
//! The engine talks to storage through the [`Storage`] trait so decision
//! logic is testable against an in-memory mock; [`postgres::PostgresStorage`]
//! is the production implementation. All operations are keyed by CIK or
//! accession number and are idempotent under retry.

pub mod postgres;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use edgar::{AccessionId, Cik, FormKind};
use serde::{Deserialize, Serialize};

/// One filer currently in IPO registration (row in `ipo`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub cik: Cik,
    pub company_name: Option<String>,
    pub ticker: Option<String>,
    pub latest_filing_type: FormKind,
    pub latest_filing_date: NaiveDate,
    pub document_url: Option<String>,
    /// IPO language confirmed in the filing document.
    pub is_ipo: bool,
    /// Set by the analysis collaborator once extraction succeeded; only
    /// ever transitions false → true.
    pub analyzed: bool,
    pub accession_number: Option<AccessionId>,
    pub logo_url: Option<String>,
    pub updated_logo_date: Option<NaiveDate>,
    pub shares_offered: Option<i64>,
    pub share_price: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<i64>,
    /// Free text: ISO date, "TBD", or "Week of …" from the calendar feed.
    pub estimated_ipo_date: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One filer that completed its IPO (row in `public_companies`). Never
/// mutated by the engine after the transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedEntity {
    pub cik: Cik,
    pub company_name: Option<String>,
    pub ticker: Option<String>,
    pub effective_date: NaiveDate,
    pub form_type: FormKind,
    pub document_url: Option<String>,
    pub accession_number: Option<AccessionId>,
    pub logo_url: Option<String>,
    pub updated_logo_date: Option<NaiveDate>,
}

/// Fields written by the analysis collaborator.
#[derive(Debug, Clone)]
pub struct AnalysisFields {
    pub is_ipo: bool,
    pub shares_offered: Option<i64>,
    pub share_price: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<i64>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Snapshot of all tracked filers, keyed by CIK. Refreshed once per run
    /// and then maintained locally by the engine.
    async fn get_tracked_snapshot(&self) -> Result<HashMap<Cik, TrackedEntity>>;

    async fn get_tracked_by_id(&self, cik: &Cik) -> Result<Option<TrackedEntity>>;

    /// Insert or overwrite the ingest-owned columns of a tracked filer.
    /// Collaborator-owned columns (logo, analysis, estimated date) are
    /// preserved, and `analyzed` can never revert to false.
    async fn upsert_tracked(&self, entity: &TrackedEntity) -> Result<()>;

    async fn delete_tracked(&self, cik: &Cik) -> Result<()>;

    async fn upsert_completed(&self, entity: &CompletedEntity) -> Result<()>;

    /// Atomic move from tracked to completed: delete + insert in one
    /// transaction so a crash can not leave the filer in both sets.
    async fn transition(&self, cik: &Cik, completed: &CompletedEntity) -> Result<()>;

    /// Accession numbers already persisted for a filing date, across both
    /// tables. Backstop dedup and fast-tier seeding.
    async fn get_accession_ids_for_date(&self, date: NaiveDate) -> Result<HashSet<String>>;

    async fn set_logo_fields(&self, cik: &Cik, logo_url: &str, date: NaiveDate) -> Result<()>;

    async fn set_analysis_fields(&self, cik: &Cik, fields: &AnalysisFields) -> Result<()>;

    async fn set_estimated_date(&self, cik: &Cik, estimated: &str) -> Result<()>;

    /// Look up a tracked filer by exact company name (estimated-date feed
    /// has no CIK). Returns the CIK and the current estimated date.
    async fn find_estimated_date_by_company(
        &self,
        company_name: &str,
    ) -> Result<Option<(Cik, Option<String>)>>;

    /// All tracked filers with confirmed IPO language, for the public
    /// snapshot export.
    async fn list_confirmed_tracked(&self) -> Result<Vec<TrackedEntity>>;
}
