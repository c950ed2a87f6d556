//! EDGAR full-text search (EFTS) adapter.
//!
//! Pages through `https://efts.sec.gov/LATEST/search-index` once per
//! configured form kind. Page requests are retried with backoff; a form
//! kind whose retries are exhausted is abandoned while the other form kinds
//! still contribute, so a degraded upstream yields a partial batch instead
//! of an empty run.

use std::collections::HashSet;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::confirm::{confirm_ipo_language, default_phrase};
use crate::error::{FetchError, Result};
use crate::normalize::{archive_document_url, archive_path_url, extract_name_and_ticker, parse_iso_date_prefix};
use crate::retry::{with_retries, RetryPolicy};
use crate::types::{
    sort_canonical, AccessionId, CanonicalFiling, Cik, FormKind, IpoConfirmation,
};

pub const DEFAULT_BASE_URL: &str = "https://efts.sec.gov/LATEST/search-index";

/// Tunables for the EFTS client. The SEC requires a User-Agent with a
/// contact address on every request.
#[derive(Debug, Clone)]
pub struct EftsConfig {
    pub base_url: String,
    pub user_agent: String,
    pub forms: Vec<FormKind>,
    pub initial_forms: HashSet<FormKind>,
    pub page_size: usize,
    /// Polite delay between result pages.
    pub page_delay: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Pattern tested against the cleaned document text of initial forms.
    pub confirmation_phrase: Regex,
}

impl EftsConfig {
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
            page_size: 100,
            page_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            confirmation_phrase: default_phrase(),
        }
    }
}

/// EFTS search response envelope.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: SearchHits,
}

#[derive(Debug, Default, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source", default)]
    source: SearchSource,
}

#[derive(Debug, Default, Deserialize)]
struct SearchSource {
    #[serde(default)]
    ciks: Vec<String>,
    #[serde(default)]
    adsh: Option<String>,
    #[serde(default)]
    display_names: Vec<String>,
    #[serde(default)]
    file_date: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    primary_document: Option<String>,
}

/// Client for the EDGAR full-text search API.
pub struct EftsClient {
    config: EftsConfig,
    client: reqwest::Client,
}

impl EftsClient {
    pub fn new(config: EftsConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, "application/json".parse().unwrap());

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self { config, client })
    }

    /// Fetch filings for an inclusive date window, one query per configured
    /// form kind, sorted ascending by `(filed_date, accession)`.
    ///
    /// `known_ciks` are filers already tracked by the caller: their
    /// non-amendment initial filings are skipped outright, which avoids a
    /// redundant document fetch per filing (amendments still flow).
    pub async fn fetch(
        &self,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
        known_ciks: &HashSet<Cik>,
    ) -> Vec<CanonicalFiling> {
        info!(%start, %end, "fetching EFTS filings by form kind");
        let mut filings = Vec::new();

        for form in &self.config.forms {
            self.fetch_form(*form, start, end, known_ciks, &mut filings)
                .await;
        }

        sort_canonical(&mut filings);
        filings
    }

    /// Page through one form kind. Retry exhaustion abandons this form kind
    /// only.
    async fn fetch_form(
        &self,
        form: FormKind,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
        known_ciks: &HashSet<Cik>,
        out: &mut Vec<CanonicalFiling>,
    ) {
        let mut offset = 0usize;

        loop {
            let page = match self.fetch_page(form, start, end, offset).await {
                Ok(page) => page,
                Err(err) => {
                    error!(%form, offset, "abandoning form kind after retries: {err}");
                    return;
                }
            };

            let hits = page.hits.hits;
            if hits.is_empty() {
                debug!(%form, offset, "no more filings");
                return;
            }
            let page_len = hits.len();

            for hit in hits {
                if let Some(filing) = self.hit_to_filing(form, hit.source, known_ciks).await {
                    out.push(filing);
                }
            }

            if page_len < self.config.page_size {
                return;
            }
            offset += self.config.page_size;
            tokio::time::sleep(self.config.page_delay).await;
        }
    }

    async fn fetch_page(
        &self,
        form: FormKind,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
        offset: usize,
    ) -> Result<SearchResponse> {
        let label = format!("efts:{form}");
        with_retries(&self.config.retry, &label, || async {
            let response = self
                .client
                .get(&self.config.base_url)
                .query(&[
                    ("dateRange", "custom".to_string()),
                    ("startdt", start.to_string()),
                    ("enddt", end.to_string()),
                    ("forms", form.to_string()),
                    ("from", offset.to_string()),
                    ("size", self.config.page_size.to_string()),
                ])
                .send()
                .await?
                .error_for_status()?;

            let page = response.json::<SearchResponse>().await?;
            Ok::<_, FetchError>(page)
        })
        .await
    }

    /// Convert one search hit into a canonical filing, running the
    /// confirmation fetch for initial forms of not-yet-known filers.
    /// Returns `None` when the record is intentionally dropped.
    async fn hit_to_filing(
        &self,
        form: FormKind,
        source: SearchSource,
        known_ciks: &HashSet<Cik>,
    ) -> Option<CanonicalFiling> {
        let cik = source.ciks.first().and_then(|raw| Cik::parse(raw));
        let accession = source.adsh.map(AccessionId::new);
        let display_name = source.display_names.first().map(String::as_str).unwrap_or("");
        let (company_name, ticker) = extract_name_and_ticker(display_name);

        // Prefer the raw text URL built from (cik, accession); fall back to
        // the archive filename when either part is missing.
        let document_url = match (&cik, &accession) {
            (Some(cik), Some(acc)) => Some(archive_document_url(cik, acc)),
            _ => source.file_name.as_deref().map(archive_path_url),
        };

        let is_initial = self.config.initial_forms.contains(&form);

        if is_initial {
            if let Some(cik) = &cik {
                if known_ciks.contains(cik) {
                    debug!(
                        %form,
                        cik = %cik,
                        company = %company_name,
                        "already tracked; skipping record and document fetch"
                    );
                    return None;
                }
            }
        }

        let confirmation = match (is_initial, &document_url) {
            (true, Some(url)) => {
                let outcome =
                    confirm_ipo_language(&self.client, &self.config.confirmation_phrase, url).await;
                if outcome == IpoConfirmation::Unconfirmed {
                    debug!(%form, company = %company_name, "no IPO phrasing in document");
                }
                outcome
            }
            (true, None) => IpoConfirmation::FetchFailed,
            (false, _) => IpoConfirmation::NotChecked,
        };

        Some(CanonicalFiling {
            cik,
            company_name: (!company_name.is_empty()).then_some(company_name),
            ticker,
            form_kind: Some(form),
            filed_date: source.file_date.as_deref().and_then(parse_iso_date_prefix),
            document_url,
            accession_id: accession,
            confirmation,
            primary_document: source.primary_document,
        })
    }
}
