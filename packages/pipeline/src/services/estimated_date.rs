//! Estimated IPO date refresh from the Nasdaq IPO calendar.
//!
//! The calendar has company names but no CIKs, so rows only ever update
//! filers already tracked. Dates arrive as `mm/dd/yyyy`, "TBD", or
//! "Week of …"; concrete dates are normalized to ISO and vague text is kept
//! as-is. A concrete date is never downgraded back to vague text.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::storage::Storage;

const CALENDAR_URL: &str = "https://api.nasdaq.com/api/ipo/calendar";

lazy_static! {
    static ref US_DATE_RE: Regex = Regex::new(r"^\d{1,2}/\d{1,2}/\d{4}$").unwrap();
    static ref ISO_DATE_RE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    static ref WS_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// One upcoming listing from the calendar feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingIpo {
    pub company_name: String,
    pub estimated_ipo_date: Option<String>,
}

/// Convert `mm/dd/yyyy` to ISO; keep non-specific text ("TBD",
/// "Week of …") as-is.
pub fn normalize_date(raw: &str) -> Option<String> {
    let collapsed = WS_RE.replace_all(raw.trim(), " ").to_string();
    if collapsed.is_empty() {
        return None;
    }
    if US_DATE_RE.is_match(&collapsed) {
        if let Ok(date) = NaiveDate::parse_from_str(&collapsed, "%m/%d/%Y") {
            return Some(date.to_string());
        }
    }
    Some(collapsed)
}

fn is_specific_date(value: &str) -> bool {
    ISO_DATE_RE.is_match(value)
}

/// Update rule: fill an empty date with anything, upgrade vague → concrete,
/// change concrete → different concrete, never downgrade. Returns the
/// reason for an update, or `None` to keep the current value.
pub fn decide_update(current: Option<&str>, new: Option<&str>) -> Option<&'static str> {
    let new = new?;
    match current {
        None => Some("no current date"),
        Some(current) => {
            let cur_specific = is_specific_date(current);
            let new_specific = is_specific_date(new);
            if !cur_specific && new_specific {
                Some("upgrade vague date to concrete")
            } else if cur_specific && new_specific && new != current {
                Some("change concrete date")
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    #[serde(default)]
    data: Option<CalendarData>,
}

#[derive(Debug, Deserialize)]
struct CalendarData {
    #[serde(default)]
    upcoming: Option<CalendarUpcoming>,
}

#[derive(Debug, Deserialize)]
struct CalendarUpcoming {
    #[serde(rename = "upcomingTable", default)]
    upcoming_table: Option<CalendarTable>,
}

#[derive(Debug, Deserialize)]
struct CalendarTable {
    #[serde(default)]
    rows: Vec<CalendarRow>,
}

#[derive(Debug, Deserialize)]
struct CalendarRow {
    #[serde(rename = "companyName", default)]
    company_name: Option<String>,
    #[serde(rename = "expectedPriceDate", default)]
    expected_price_date: Option<String>,
}

pub struct EstimatedDateService {
    client: reqwest::Client,
    storage: Arc<dyn Storage>,
}

impl EstimatedDateService {
    pub fn new(timeout: Duration, storage: Arc<dyn Storage>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        // Nasdaq rejects unadorned clients
        headers.insert(
            reqwest::header::ACCEPT,
            "application/json, text/plain, */*".parse().unwrap(),
        );
        headers.insert(
            reqwest::header::REFERER,
            "https://www.nasdaq.com/market-activity/ipos".parse().unwrap(),
        );
        headers.insert(reqwest::header::ORIGIN, "https://www.nasdaq.com".parse().unwrap());

        let client = reqwest::Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            )
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, storage })
    }

    /// Fetch the current month's upcoming listings.
    pub async fn fetch_upcoming(&self) -> Result<Vec<UpcomingIpo>> {
        let month = Utc::now().format("%Y-%m").to_string();
        let response: CalendarResponse = self
            .client
            .get(CALENDAR_URL)
            .query(&[("date", month.as_str())])
            .send()
            .await
            .context("Failed to fetch Nasdaq IPO calendar")?
            .error_for_status()
            .context("Nasdaq IPO calendar request rejected")?
            .json()
            .await
            .context("Nasdaq IPO calendar did not return JSON")?;

        let rows = response
            .data
            .and_then(|d| d.upcoming)
            .and_then(|u| u.upcoming_table)
            .map(|t| t.rows)
            .unwrap_or_default();

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let company_name = row.company_name?.trim().to_string();
                if company_name.is_empty() {
                    return None;
                }
                Some(UpcomingIpo {
                    company_name,
                    estimated_ipo_date: row
                        .expected_price_date
                        .as_deref()
                        .and_then(normalize_date),
                })
            })
            .collect())
    }

    /// Apply the update rules against tracked filers. Unknown companies are
    /// skipped (tracking requires a CIK from the filing sources).
    pub async fn refresh(&self) -> Result<usize> {
        let upcoming = self.fetch_upcoming().await?;
        info!(count = upcoming.len(), "fetched upcoming IPOs from Nasdaq");

        let mut updated = 0;
        for item in upcoming {
            let Some((cik, current)) = self
                .storage
                .find_estimated_date_by_company(&item.company_name)
                .await?
            else {
                debug!(company = %item.company_name, "not tracked, skipping calendar row");
                continue;
            };

            match decide_update(current.as_deref(), item.estimated_ipo_date.as_deref()) {
                Some(reason) => {
                    let new_date = item.estimated_ipo_date.as_deref().unwrap_or_default();
                    info!(
                        %cik,
                        company = %item.company_name,
                        current = current.as_deref().unwrap_or("-"),
                        new = new_date,
                        reason,
                        "updating estimated IPO date"
                    );
                    self.storage.set_estimated_date(&cik, new_date).await?;
                    updated += 1;
                }
                None => {
                    debug!(
                        %cik,
                        company = %item.company_name,
                        "keeping current estimated IPO date"
                    );
                }
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_us_dates_to_iso() {
        assert_eq!(normalize_date("08/12/2025").as_deref(), Some("2025-08-12"));
        assert_eq!(normalize_date("1/2/2025").as_deref(), Some("2025-01-02"));
    }

    #[test]
    fn keeps_vague_text() {
        assert_eq!(normalize_date("TBD").as_deref(), Some("TBD"));
        assert_eq!(
            normalize_date("Week  of   8/12").as_deref(),
            Some("Week of 8/12")
        );
        assert_eq!(normalize_date("   "), None);
    }

    #[test]
    fn update_rules() {
        // fill empty with anything
        assert!(decide_update(None, Some("TBD")).is_some());
        assert!(decide_update(None, Some("2025-08-12")).is_some());
        // upgrade vague to concrete
        assert!(decide_update(Some("TBD"), Some("2025-08-12")).is_some());
        // change concrete to a different concrete
        assert!(decide_update(Some("2025-08-12"), Some("2025-08-19")).is_some());
        // never downgrade, never churn
        assert!(decide_update(Some("2025-08-12"), Some("TBD")).is_none());
        assert!(decide_update(Some("2025-08-12"), Some("2025-08-12")).is_none());
        assert!(decide_update(Some("TBD"), Some("Week of 8/12")).is_none());
        assert!(decide_update(Some("TBD"), None).is_none());
    }

    #[test]
    fn parses_calendar_response() {
        let raw = r#"{
            "data": {
                "upcoming": {
                    "upcomingTable": {
                        "rows": [
                            {"companyName": "Bullish", "expectedPriceDate": "08/12/2025"},
                            {"companyName": "  ", "expectedPriceDate": "08/13/2025"},
                            {"companyName": "Acme Corp", "expectedPriceDate": "TBD"}
                        ]
                    }
                }
            }
        }"#;
        let parsed: CalendarResponse = serde_json::from_str(raw).unwrap();
        let rows = parsed
            .data
            .and_then(|d| d.upcoming)
            .and_then(|u| u.upcoming_table)
            .map(|t| t.rows)
            .unwrap_or_default();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].company_name.as_deref(), Some("Bullish"));
    }
}
