//! Logo materialization via logo.dev.
//!
//! Company names as filed ("Reddit, Inc.", "Acme Holdings III") rarely
//! match a brand search directly, so the name is cleaned of corporate
//! suffixes and series numerals before querying. Refresh is governed by a
//! missing-or-stale policy with a configured interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use edgar::Cik;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::storage::Storage;

const SEARCH_URL: &str = "https://api.logo.dev/search";

const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "corp", "corporation", "company", "co", "ltd", "limited", "llc", "plc",
    "holdco", "holding", "holdings", "mgmt", "management", "group", "trust", "partner", "partners",
    "capital", "capitals", "venture", "ventures", "acquisition", "acquisitions", "spac", "etf",
    "fund", "gmbh", "s.a.", "s.a", "n.v.", "n.v", "b.v.", "b.v", "a/s", "ab", "ag", "nv", "bv",
    "sarl", "spa", "pty", "oyj", "kk", "sas", "llp", "lp",
];

lazy_static! {
    static ref SUFFIX_RE: Regex = {
        let pattern = CORPORATE_SUFFIXES
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b({pattern})\b")).unwrap()
    };
    static ref ROMAN_RE: Regex = Regex::new(r"(?i)\b(i|ii|iii|iv|v|vi|vii|viii|ix|x)\b$").unwrap();
    static ref PUNCT_RE: Regex = Regex::new(r"[.,'()/]").unwrap();
    static ref DASH_RE: Regex = Regex::new(r"[-_]").unwrap();
    static ref WS_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Materialized logo fields as persisted on the tracked row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoFields {
    pub url: String,
    pub updated: NaiveDate,
}

/// Logo collaborator seam. Returns the current logo fields after applying
/// the refresh policy, or `None` when nothing could be materialized.
#[async_trait]
pub trait LogoService: Send + Sync {
    async fn ensure_logo(&self, cik: &Cik, company_name: &str) -> Result<Option<LogoFields>>;
}

/// Strip punctuation, corporate suffixes, and a trailing series numeral.
pub fn clean_company_name(name: &str) -> String {
    let s = name.to_lowercase().replace('&', " and ");
    let s = PUNCT_RE.replace_all(&s, " ");
    let s = DASH_RE.replace_all(&s, " ");
    let s = SUFFIX_RE.replace_all(&s, " ");
    let s = ROMAN_RE.replace_all(s.trim(), " ");
    WS_RE.replace_all(s.trim(), " ").to_string()
}

/// Search candidates in priority order, deduped: the raw name, the cleaned
/// name, and the first two cleaned words for long names.
fn search_candidates(original: &str, cleaned: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    if !original.trim().is_empty() {
        candidates.push(original.trim().to_string());
    }
    if !cleaned.trim().is_empty() {
        candidates.push(cleaned.trim().to_string());
    }
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    if parts.len() > 2 {
        candidates.push(parts[..2].join(" "));
    }

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

/// Missing or older than the refresh interval.
fn needs_refresh(
    logo_url: Option<&str>,
    updated: Option<NaiveDate>,
    today: NaiveDate,
    refresh_days: i64,
) -> bool {
    match (logo_url, updated) {
        (Some(_), Some(date)) => (today - date).num_days() >= refresh_days,
        _ => true,
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    domain: Option<String>,
}

/// logo.dev-backed implementation.
pub struct LogoDevService {
    client: reqwest::Client,
    api_key: String,
    refresh_days: i64,
    storage: Arc<dyn Storage>,
}

impl LogoDevService {
    pub fn new(
        api_key: String,
        refresh_days: i64,
        timeout: Duration,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            refresh_days,
            storage,
        })
    }

    /// First domain hit across the candidate queries; per-candidate errors
    /// are swallowed.
    async fn search_domain(&self, original: &str, cleaned: &str) -> Option<String> {
        for query in search_candidates(original, cleaned) {
            let response = self
                .client
                .get(SEARCH_URL)
                .bearer_auth(&self.api_key)
                .query(&[("q", query.as_str())])
                .send()
                .await
                .and_then(|r| r.error_for_status());

            let hits: Vec<SearchHit> = match response {
                Ok(response) => match response.json().await {
                    Ok(hits) => hits,
                    Err(err) => {
                        debug!(%query, "logo search decode failed: {err}");
                        continue;
                    }
                },
                Err(err) => {
                    debug!(%query, "logo search request failed: {err}");
                    continue;
                }
            };

            if let Some(domain) = hits.into_iter().find_map(|h| h.domain) {
                return Some(domain);
            }
        }
        None
    }

    fn image_url(&self, domain: &str) -> String {
        format!("https://img.logo.dev/{domain}?token={}", self.api_key)
    }
}

#[async_trait]
impl LogoService for LogoDevService {
    async fn ensure_logo(&self, cik: &Cik, company_name: &str) -> Result<Option<LogoFields>> {
        let row = self.storage.get_tracked_by_id(cik).await?;
        let (existing_url, existing_date) = row
            .map(|r| (r.logo_url, r.updated_logo_date))
            .unwrap_or((None, None));

        let existing = match (&existing_url, existing_date) {
            (Some(url), Some(date)) => Some(LogoFields {
                url: url.clone(),
                updated: date,
            }),
            _ => None,
        };

        let today = Utc::now().date_naive();
        if !needs_refresh(
            existing_url.as_deref(),
            existing_date,
            today,
            self.refresh_days,
        ) {
            return Ok(existing);
        }

        let cleaned = clean_company_name(company_name);
        let Some(domain) = self.search_domain(company_name, &cleaned).await else {
            debug!(%cik, company = %company_name, "no logo domain found");
            return Ok(existing);
        };

        let url = self.image_url(&domain);
        self.storage.set_logo_fields(cik, &url, today).await?;
        debug!(%cik, %domain, "logo refreshed");
        Ok(Some(LogoFields { url, updated: today }))
    }
}

/// No-op collaborator for when no logo.dev key is configured.
pub struct NoopLogoService;

#[async_trait]
impl LogoService for NoopLogoService {
    async fn ensure_logo(&self, _cik: &Cik, _company_name: &str) -> Result<Option<LogoFields>> {
        warn!("NoopLogoService: logo requested but LOGO_DEV_KEY not configured");
        Ok(None)
    }
}
