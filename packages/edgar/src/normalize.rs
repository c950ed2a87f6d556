//! Pure normalization helpers shared by both adapters.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{AccessionId, Cik};

lazy_static! {
    // Trailing "(CIK 0001872195)" marker on EFTS display names
    static ref CIK_SUFFIX: Regex = Regex::new(r"\s+\(CIK\s*\d+\)\s*$").unwrap();
    // Trailing "(TICKER)" or "(TICK1, TICK2)" group
    static ref TICKER_SUFFIX: Regex = Regex::new(r"\s+\(([^)]+)\)\s*$").unwrap();
}

/// Split an EFTS display name into company name and first ticker.
///
/// `"Bullish  (BLSH)  (CIK 0001872195)"` → `("Bullish", Some("BLSH"))`.
pub fn extract_name_and_ticker(display_name: &str) -> (String, Option<String>) {
    let base = match CIK_SUFFIX.find(display_name) {
        Some(m) => &display_name[..m.start()],
        None => display_name,
    };
    if let Some(caps) = TICKER_SUFFIX.captures(base) {
        let whole = caps.get(0).unwrap();
        let first_ticker = caps[1]
            .split(',')
            .next()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let company = base[..whole.start()].trim().to_string();
        return (company, first_ticker);
    }
    (base.trim().to_string(), None)
}

/// Derive the accession number from an archive filename, e.g.
/// `edgar/data/0000320193/0000320193-24-000066.txt` → `0000320193-24-000066`.
pub fn accession_from_filename(filename: &str) -> Option<AccessionId> {
    let last = filename.rsplit('/').next()?;
    let stem = last.strip_suffix(".txt").unwrap_or(last);
    if stem.is_empty() {
        return None;
    }
    Some(AccessionId::new(stem))
}

/// Canonical archive URL for the raw filing text, built from CIK and
/// accession number.
pub fn archive_document_url(cik: &Cik, accession: &AccessionId) -> String {
    format!(
        "https://www.sec.gov/Archives/edgar/data/{}/{}/{}.txt",
        cik.as_str(),
        accession.compact(),
        accession
    )
}

/// Fallback archive URL from a raw filename field.
pub fn archive_path_url(filename: &str) -> String {
    format!("https://www.sec.gov/Archives/{filename}")
}

/// Parse a compact `YYYYMMDD` date.
pub fn parse_compact_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// Parse an ISO date, tolerating a trailing timestamp (`2025-08-07T00:00:00`).
pub fn parse_iso_date_prefix(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Calendar quarter (1–4) for a month.
pub fn quarter_for_month(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_name_ticker_and_cik_marker() {
        let (name, ticker) = extract_name_and_ticker("Bullish  (BLSH)  (CIK 0001872195)");
        assert_eq!(name, "Bullish");
        assert_eq!(ticker.as_deref(), Some("BLSH"));
    }

    #[test]
    fn splits_name_without_ticker() {
        let (name, ticker) = extract_name_and_ticker("Example Corp (CIK 123)");
        assert_eq!(name, "Example Corp");
        assert_eq!(ticker, None);

        let (name, ticker) = extract_name_and_ticker("Plain Name");
        assert_eq!(name, "Plain Name");
        assert_eq!(ticker, None);
    }

    #[test]
    fn takes_first_of_multiple_tickers() {
        let (name, ticker) = extract_name_and_ticker("Dual Corp  (AAA, BBB)  (CIK 9)");
        assert_eq!(name, "Dual Corp");
        assert_eq!(ticker.as_deref(), Some("AAA"));
    }

    #[test]
    fn accession_from_archive_filename() {
        let acc = accession_from_filename("edgar/data/0000320193/0000320193-24-000066.txt");
        assert_eq!(acc.unwrap().as_str(), "0000320193-24-000066");
        assert!(accession_from_filename("").is_none());
    }

    #[test]
    fn builds_archive_urls() {
        let cik = Cik::parse("320193").unwrap();
        let acc = AccessionId::new("0000320193-24-000066");
        assert_eq!(
            archive_document_url(&cik, &acc),
            "https://www.sec.gov/Archives/edgar/data/320193/000032019324000066/0000320193-24-000066.txt"
        );
        assert_eq!(
            archive_path_url("edgar/data/1/1-25-000001.txt"),
            "https://www.sec.gov/Archives/edgar/data/1/1-25-000001.txt"
        );
    }

    #[test]
    fn parses_dates() {
        assert_eq!(
            parse_compact_date("20250807"),
            NaiveDate::from_ymd_opt(2025, 8, 7)
        );
        assert_eq!(parse_compact_date("2025-08"), None);
        assert_eq!(
            parse_iso_date_prefix("2025-08-07T00:00:00-04:00"),
            NaiveDate::from_ymd_opt(2025, 8, 7)
        );
        assert_eq!(parse_iso_date_prefix("bad"), None);
    }

    #[test]
    fn quarters() {
        assert_eq!(quarter_for_month(1), 1);
        assert_eq!(quarter_for_month(3), 1);
        assert_eq!(quarter_for_month(4), 2);
        assert_eq!(quarter_for_month(12), 4);
    }
}
