//! Postgres implementation of [`Storage`].

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use edgar::{AccessionId, Cik, FormKind};
use sqlx::PgPool;

use super::{AnalysisFields, CompletedEntity, Storage, TrackedEntity};

const TRACKED_COLUMNS: &str = "cik, company_name, ticker, latest_filing_type, latest_filing_date, \
     mainlink, is_ipo, analyzed, accession_number, logo_url, updated_logo_date, \
     shares_offered, share_price, exchange, market_cap, estimated_ipo_date, updated_at";

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw `ipo` row; form type and CIK stay strings at the SQL boundary and
/// are validated on the way out.
#[derive(Debug, sqlx::FromRow)]
struct TrackedRow {
    cik: String,
    company_name: Option<String>,
    ticker: Option<String>,
    latest_filing_type: String,
    latest_filing_date: NaiveDate,
    mainlink: Option<String>,
    is_ipo: bool,
    analyzed: bool,
    accession_number: Option<String>,
    logo_url: Option<String>,
    updated_logo_date: Option<NaiveDate>,
    shares_offered: Option<i64>,
    share_price: Option<String>,
    exchange: Option<String>,
    market_cap: Option<i64>,
    estimated_ipo_date: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TrackedRow> for TrackedEntity {
    type Error = anyhow::Error;

    fn try_from(row: TrackedRow) -> Result<Self> {
        Ok(TrackedEntity {
            cik: Cik::parse(&row.cik).ok_or_else(|| anyhow!("invalid cik in ipo row: {}", row.cik))?,
            company_name: row.company_name,
            ticker: row.ticker,
            latest_filing_type: row
                .latest_filing_type
                .parse::<FormKind>()
                .with_context(|| format!("unknown form type in ipo row for cik {}", row.cik))?,
            latest_filing_date: row.latest_filing_date,
            document_url: row.mainlink,
            is_ipo: row.is_ipo,
            analyzed: row.analyzed,
            accession_number: row.accession_number.map(AccessionId::new),
            logo_url: row.logo_url,
            updated_logo_date: row.updated_logo_date,
            shares_offered: row.shares_offered,
            share_price: row.share_price,
            exchange: row.exchange,
            market_cap: row.market_cap,
            estimated_ipo_date: row.estimated_ipo_date,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn get_tracked_snapshot(&self) -> Result<HashMap<Cik, TrackedEntity>> {
        let rows: Vec<TrackedRow> =
            sqlx::query_as(&format!("SELECT {TRACKED_COLUMNS} FROM ipo"))
                .fetch_all(&self.pool)
                .await
                .context("Failed to load tracked snapshot")?;

        let mut snapshot = HashMap::with_capacity(rows.len());
        for row in rows {
            let entity = TrackedEntity::try_from(row)?;
            snapshot.insert(entity.cik.clone(), entity);
        }
        Ok(snapshot)
    }

    async fn get_tracked_by_id(&self, cik: &Cik) -> Result<Option<TrackedEntity>> {
        let row: Option<TrackedRow> =
            sqlx::query_as(&format!("SELECT {TRACKED_COLUMNS} FROM ipo WHERE cik = $1"))
                .bind(cik.as_str())
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load tracked filer")?;

        row.map(TrackedEntity::try_from).transpose()
    }

    async fn upsert_tracked(&self, entity: &TrackedEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ipo (cik, company_name, ticker, latest_filing_type, latest_filing_date,
                             mainlink, is_ipo, analyzed, accession_number, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (cik) DO UPDATE SET
                company_name = EXCLUDED.company_name,
                ticker = EXCLUDED.ticker,
                latest_filing_type = EXCLUDED.latest_filing_type,
                latest_filing_date = EXCLUDED.latest_filing_date,
                mainlink = EXCLUDED.mainlink,
                is_ipo = EXCLUDED.is_ipo,
                analyzed = ipo.analyzed OR EXCLUDED.analyzed,
                accession_number = EXCLUDED.accession_number,
                updated_at = NOW()
            "#,
        )
        .bind(entity.cik.as_str())
        .bind(&entity.company_name)
        .bind(&entity.ticker)
        .bind(entity.latest_filing_type.as_str())
        .bind(entity.latest_filing_date)
        .bind(&entity.document_url)
        .bind(entity.is_ipo)
        .bind(entity.analyzed)
        .bind(entity.accession_number.as_ref().map(|a| a.as_str()))
        .execute(&self.pool)
        .await
        .context("Failed to upsert tracked filer")?;
        Ok(())
    }

    async fn delete_tracked(&self, cik: &Cik) -> Result<()> {
        sqlx::query("DELETE FROM ipo WHERE cik = $1")
            .bind(cik.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to delete tracked filer")?;
        Ok(())
    }

    async fn upsert_completed(&self, entity: &CompletedEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO public_companies (cik, company_name, ticker, effective_date, form_type,
                                          document_url, accession_number, logo_url, updated_logo_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (cik) DO UPDATE SET
                company_name = EXCLUDED.company_name,
                ticker = EXCLUDED.ticker,
                effective_date = EXCLUDED.effective_date,
                form_type = EXCLUDED.form_type,
                document_url = EXCLUDED.document_url,
                accession_number = EXCLUDED.accession_number,
                logo_url = EXCLUDED.logo_url,
                updated_logo_date = EXCLUDED.updated_logo_date
            "#,
        )
        .bind(entity.cik.as_str())
        .bind(&entity.company_name)
        .bind(&entity.ticker)
        .bind(entity.effective_date)
        .bind(entity.form_type.as_str())
        .bind(&entity.document_url)
        .bind(entity.accession_number.as_ref().map(|a| a.as_str()))
        .bind(&entity.logo_url)
        .bind(entity.updated_logo_date)
        .execute(&self.pool)
        .await
        .context("Failed to upsert completed filer")?;
        Ok(())
    }

    async fn transition(&self, cik: &Cik, completed: &CompletedEntity) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM ipo WHERE cik = $1")
            .bind(cik.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to delete tracked filer during transition")?;

        sqlx::query(
            r#"
            INSERT INTO public_companies (cik, company_name, ticker, effective_date, form_type,
                                          document_url, accession_number, logo_url, updated_logo_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (cik) DO UPDATE SET
                company_name = EXCLUDED.company_name,
                ticker = EXCLUDED.ticker,
                effective_date = EXCLUDED.effective_date,
                form_type = EXCLUDED.form_type,
                document_url = EXCLUDED.document_url,
                accession_number = EXCLUDED.accession_number,
                logo_url = EXCLUDED.logo_url,
                updated_logo_date = EXCLUDED.updated_logo_date
            "#,
        )
        .bind(completed.cik.as_str())
        .bind(&completed.company_name)
        .bind(&completed.ticker)
        .bind(completed.effective_date)
        .bind(completed.form_type.as_str())
        .bind(&completed.document_url)
        .bind(completed.accession_number.as_ref().map(|a| a.as_str()))
        .bind(&completed.logo_url)
        .bind(completed.updated_logo_date)
        .execute(&mut *tx)
        .await
        .context("Failed to insert completed filer during transition")?;

        tx.commit().await.context("Failed to commit transition")?;
        Ok(())
    }

    async fn get_accession_ids_for_date(&self, date: NaiveDate) -> Result<HashSet<String>> {
        let accessions: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT accession_number FROM ipo
                WHERE latest_filing_date = $1 AND accession_number IS NOT NULL
            UNION
            SELECT accession_number FROM public_companies
                WHERE effective_date = $1 AND accession_number IS NOT NULL
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load accession numbers for date")?;

        Ok(accessions.into_iter().collect())
    }

    async fn set_logo_fields(&self, cik: &Cik, logo_url: &str, date: NaiveDate) -> Result<()> {
        sqlx::query("UPDATE ipo SET logo_url = $1, updated_logo_date = $2 WHERE cik = $3")
            .bind(logo_url)
            .bind(date)
            .bind(cik.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to update logo fields")?;
        Ok(())
    }

    async fn set_analysis_fields(&self, cik: &Cik, fields: &AnalysisFields) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ipo SET
                is_ipo = $1,
                shares_offered = $2,
                share_price = $3,
                exchange = $4,
                market_cap = $5,
                analyzed = TRUE
            WHERE cik = $6
            "#,
        )
        .bind(fields.is_ipo)
        .bind(fields.shares_offered)
        .bind(&fields.share_price)
        .bind(&fields.exchange)
        .bind(fields.market_cap)
        .bind(cik.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to update analysis fields")?;
        Ok(())
    }

    async fn set_estimated_date(&self, cik: &Cik, estimated: &str) -> Result<()> {
        sqlx::query("UPDATE ipo SET estimated_ipo_date = $1 WHERE cik = $2")
            .bind(estimated)
            .bind(cik.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to update estimated IPO date")?;
        Ok(())
    }

    async fn find_estimated_date_by_company(
        &self,
        company_name: &str,
    ) -> Result<Option<(Cik, Option<String>)>> {
        let row: Option<(String, Option<String>)> =
            sqlx::query_as("SELECT cik, estimated_ipo_date FROM ipo WHERE company_name = $1 LIMIT 1")
                .bind(company_name)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up filer by company name")?;

        match row {
            Some((raw_cik, estimated)) => {
                let cik = Cik::parse(&raw_cik)
                    .ok_or_else(|| anyhow!("invalid cik in ipo row: {raw_cik}"))?;
                Ok(Some((cik, estimated)))
            }
            None => Ok(None),
        }
    }

    async fn list_confirmed_tracked(&self) -> Result<Vec<TrackedEntity>> {
        let rows: Vec<TrackedRow> =
            sqlx::query_as(&format!("SELECT {TRACKED_COLUMNS} FROM ipo WHERE is_ipo = TRUE"))
                .fetch_all(&self.pool)
                .await
                .context("Failed to list confirmed tracked filers")?;

        rows.into_iter().map(TrackedEntity::try_from).collect()
    }
}
