//! EDGAR master daily index adapter.
//!
//! One delimited text file per trading day:
//! `https://www.sec.gov/Archives/edgar/daily-index/{YYYY}/QTR{q}/master.{YYYYMMDD}.idx`
//!
//! The file format drifts: a UTF-8 BOM may or may not be present, the
//! header spells the last column either "Filename" or "File Name", and a
//! dashed separator line follows it. A throttled request comes back as an
//! HTML page with status 200, which is treated as "no data" rather than an
//! error.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::confirm::{confirm_ipo_language, default_phrase};
use crate::error::{FetchError, Result};
use crate::normalize::{accession_from_filename, archive_path_url, parse_compact_date, quarter_for_month};
use crate::retry::{with_retries, RetryPolicy};
use crate::types::{sort_canonical, CanonicalFiling, Cik, FormKind, IpoConfirmation};

pub const DEFAULT_BASE_URL: &str = "https://www.sec.gov/Archives/edgar/daily-index";

#[derive(Debug, Clone)]
pub struct DailyIndexConfig {
    pub base_url: String,
    pub user_agent: String,
    pub forms: Vec<FormKind>,
    pub initial_forms: HashSet<FormKind>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Pattern tested against the cleaned document text of initial forms.
    pub confirmation_phrase: Regex,
}

impl DailyIndexConfig {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: user_agent.into(),
            forms: vec![
                FormKind::S1,
                FormKind::F1,
                FormKind::S1A,
                FormKind::F1A,
                FormKind::B424B1,
                FormKind::B424B4,
                FormKind::S1Mef,
                FormKind::F1Mef,
                FormKind::Rw,
            ],
            initial_forms: HashSet::from([FormKind::S1, FormKind::F1]),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            confirmation_phrase: default_phrase(),
        }
    }
}

/// One data row of the master index, before canonicalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub cik: String,
    pub company_name: String,
    pub form: FormKind,
    pub date_filed: String,
    pub filename: String,
}

/// Client for the master daily index.
pub struct DailyIndexClient {
    config: DailyIndexConfig,
    client: reqwest::Client,
}

impl DailyIndexClient {
    pub fn new(config: DailyIndexConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, "text/plain".parse().unwrap());

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self { config, client })
    }

    fn index_url(&self, day: NaiveDate) -> String {
        format!(
            "{}/{}/QTR{}/master.{}.idx",
            self.config.base_url,
            day.year(),
            quarter_for_month(day.month()),
            day.format("%Y%m%d"),
        )
    }

    /// Fetch and parse one day's master index, producing the same canonical
    /// record shape as the search adapter. A missing index (non-200) or a
    /// throttled HTML response yields an empty batch.
    pub async fn fetch_for_date(&self, day: NaiveDate) -> Result<Vec<CanonicalFiling>> {
        let url = self.index_url(day);
        info!(%url, "fetching master daily index");

        let response = with_retries(&self.config.retry, "daily-index", || async {
            Ok::<_, FetchError>(self.client.get(&url).send().await?)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            info!(%day, %status, "index not available");
            return Ok(Vec::new());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.text().await?;

        if !content_type.contains("text/plain") && body.trim_start().starts_with('<') {
            warn!(%day, "got HTML instead of text/plain (throttled or invalid User-Agent)");
            return Ok(Vec::new());
        }

        let rows = parse_master_index(&body, &self.config.forms);
        debug!(%day, rows = rows.len(), "parsed index rows in form allow-list");

        let mut filings = Vec::with_capacity(rows.len());
        for row in rows {
            filings.push(self.row_to_filing(row).await);
        }
        sort_canonical(&mut filings);
        Ok(filings)
    }

    /// Canonicalize one index row, confirming IPO language for initial
    /// forms (best-effort, never fatal).
    async fn row_to_filing(&self, row: IndexRow) -> CanonicalFiling {
        let document_url = archive_path_url(&row.filename);
        let accession = accession_from_filename(&row.filename);

        let confirmation = if self.config.initial_forms.contains(&row.form) {
            confirm_ipo_language(&self.client, &self.config.confirmation_phrase, &document_url)
                .await
        } else {
            IpoConfirmation::NotChecked
        };

        CanonicalFiling {
            cik: Cik::parse(&row.cik),
            company_name: (!row.company_name.is_empty()).then_some(row.company_name),
            // the master index carries no ticker
            ticker: None,
            form_kind: Some(row.form),
            filed_date: parse_compact_date(&row.date_filed)
                .or_else(|| row.date_filed.parse().ok()),
            document_url: Some(document_url),
            accession_id: accession,
            confirmation,
            primary_document: None,
        }
    }
}

/// Parse the master index body into rows filtered to the form allow-list.
///
/// Returns an empty vector when the header row cannot be located (unknown
/// format, error page).
pub fn parse_master_index(body: &str, forms: &[FormKind]) -> Vec<IndexRow> {
    let body = body.strip_prefix('\u{feff}').unwrap_or(body);
    let lines: Vec<&str> = body.lines().collect();

    let header_idx = lines.iter().position(|line| {
        let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        normalized.contains("cik|company name|form type|date filed|filename")
            || normalized.contains("cik|company name|form type|date filed|file name")
    });
    let Some(header_idx) = header_idx else {
        warn!("unexpected index format: header not found");
        return Vec::new();
    };

    let mut rows = Vec::new();
    for line in &lines[header_idx + 1..] {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.chars().all(|c| c == '-') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split('|').map(str::trim).collect();
        if parts.len() < 5 {
            continue;
        }

        let Ok(form) = parts[2].parse::<FormKind>() else {
            continue;
        };
        if !forms.contains(&form) {
            continue;
        }

        rows.push(IndexRow {
            cik: parts[0].to_string(),
            company_name: parts[1].to_string(),
            form,
            date_filed: parts[3].to_string(),
            filename: parts[4].to_string(),
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}Description:           Master Index of EDGAR Dissemination Feed by CIK\n\
Last Data Received:    August 7, 2025\n\
\n\
CIK|Company Name|Form Type|Date Filed|Filename\n\
--------------------------------------------------------------------------------\n\
320193|Apple Inc.|10-K|20250807|edgar/data/320193/0000320193-25-000066.txt\n\
1872195|Bullish|S-1|20250807|edgar/data/1872195/0001872195-25-000123.txt\n\
1872195|Bullish|RW|20250807|edgar/data/1872195/0001872195-25-000124.txt\n\
\n";

    fn all_forms() -> Vec<FormKind> {
        vec![
            FormKind::S1,
            FormKind::F1,
            FormKind::S1A,
            FormKind::F1A,
            FormKind::B424B1,
            FormKind::B424B4,
            FormKind::S1Mef,
            FormKind::F1Mef,
            FormKind::Rw,
        ]
    }

    #[test]
    fn parses_rows_and_filters_forms() {
        let rows = parse_master_index(SAMPLE, &all_forms());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].form, FormKind::S1);
        assert_eq!(rows[0].cik, "1872195");
        assert_eq!(rows[1].form, FormKind::Rw);
    }

    #[test]
    fn tolerates_file_name_header_spelling() {
        let body = "CIK|Company Name|Form Type|Date Filed|File Name\n\
----\n\
9|Tiny Co|S-1|20250807|edgar/data/9/0000000009-25-000001.txt\n";
        let rows = parse_master_index(body, &all_forms());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].company_name, "Tiny Co");
    }

    #[test]
    fn missing_header_means_no_data() {
        assert!(parse_master_index("<html><body>Throttled</body></html>", &all_forms()).is_empty());
        assert!(parse_master_index("", &all_forms()).is_empty());
    }

    #[test]
    fn short_rows_are_skipped() {
        let body = "CIK|Company Name|Form Type|Date Filed|Filename\n\
broken|row\n\
9|Tiny Co|S-1|20250807|edgar/data/9/0000000009-25-000001.txt\n";
        let rows = parse_master_index(body, &all_forms());
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn index_url_uses_year_and_quarter() {
        let client = DailyIndexClient::new(DailyIndexConfig::new("test@example.com")).unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        assert_eq!(
            client.index_url(day),
            "https://www.sec.gov/Archives/edgar/daily-index/2025/QTR3/master.20250807.idx"
        );
    }
}
