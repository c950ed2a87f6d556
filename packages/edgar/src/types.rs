use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Central Index Key of a filer, normalized to a digit string with no
/// leading zeros. EDGAR pads CIKs to ten digits in some feeds and not in
/// others; normalizing here keeps storage and upstream keys aligned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cik(String);

impl Cik {
    /// Parse and normalize a raw CIK. Returns `None` for empty or
    /// non-numeric input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            // all zeros is not a real CIK
            return None;
        }
        Some(Self(stripped.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cik {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accession number of one filing event, e.g. `0000320193-24-000066`.
/// Globally unique per filing and never reused; this is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessionId(String);

impl AccessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The accession number with dashes removed, as used in archive paths.
    pub fn compact(&self) -> String {
        self.0.replace('-', "")
    }
}

impl fmt::Display for AccessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Form kinds this system tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormKind {
    #[serde(rename = "S-1")]
    S1,
    #[serde(rename = "F-1")]
    F1,
    #[serde(rename = "S-1/A")]
    S1A,
    #[serde(rename = "F-1/A")]
    F1A,
    #[serde(rename = "424B1")]
    B424B1,
    #[serde(rename = "424B4")]
    B424B4,
    #[serde(rename = "S-1MEF")]
    S1Mef,
    #[serde(rename = "F-1MEF")]
    F1Mef,
    #[serde(rename = "RW")]
    Rw,
}

impl FormKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormKind::S1 => "S-1",
            FormKind::F1 => "F-1",
            FormKind::S1A => "S-1/A",
            FormKind::F1A => "F-1/A",
            FormKind::B424B1 => "424B1",
            FormKind::B424B4 => "424B4",
            FormKind::S1Mef => "S-1MEF",
            FormKind::F1Mef => "F-1MEF",
            FormKind::Rw => "RW",
        }
    }

    /// Effective prospectus forms move a tracked filer to the completed set.
    pub fn is_prospectus(&self) -> bool {
        matches!(self, FormKind::B424B1 | FormKind::B424B4)
    }

    /// Registration withdrawal removes a tracked filer without completion.
    pub fn is_withdrawal(&self) -> bool {
        matches!(self, FormKind::Rw)
    }
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormKind {
    type Err = UnknownFormKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S-1" => Ok(FormKind::S1),
            "F-1" => Ok(FormKind::F1),
            "S-1/A" => Ok(FormKind::S1A),
            "F-1/A" => Ok(FormKind::F1A),
            "424B1" => Ok(FormKind::B424B1),
            "424B4" => Ok(FormKind::B424B4),
            "S-1MEF" => Ok(FormKind::S1Mef),
            "F-1MEF" => Ok(FormKind::F1Mef),
            "RW" => Ok(FormKind::Rw),
            other => Err(UnknownFormKind(other.to_string())),
        }
    }
}

/// Form type outside the tracked allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormKind(pub String);

impl fmt::Display for UnknownFormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown form kind: {}", self.0)
    }
}

impl std::error::Error for UnknownFormKind {}

/// Outcome of the IPO phrase confirmation fetch.
///
/// `FetchFailed` is treated like `Unconfirmed` by ingestion policy, but the
/// two stay distinguishable in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpoConfirmation {
    Confirmed,
    Unconfirmed,
    FetchFailed,
    /// No confirmation was attempted (non-initial forms).
    NotChecked,
}

impl IpoConfirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, IpoConfirmation::Confirmed)
    }
}

/// One observed filing event, normalized across adapters.
///
/// Identity fields stay optional so the ingestion engine, not the
/// adapters, owns the rejection of malformed records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFiling {
    pub cik: Option<Cik>,
    pub company_name: Option<String>,
    pub ticker: Option<String>,
    pub form_kind: Option<FormKind>,
    pub filed_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub accession_id: Option<AccessionId>,
    pub confirmation: IpoConfirmation,
    /// Primary document path passed through from EFTS, kept so a caller can
    /// build an HTML document URL when the archive text URL is unusable.
    pub primary_document: Option<String>,
}

/// Sort ascending by `(filed_date, accession_id)`, the order the ingestion
/// engine expects. Missing dates sort first, missing accessions last-resort
/// on the empty string.
pub fn sort_canonical(filings: &mut [CanonicalFiling]) {
    filings.sort_by(|a, b| {
        let ka = (
            a.filed_date.unwrap_or(NaiveDate::MIN),
            a.accession_id.as_ref().map(|x| x.as_str()).unwrap_or(""),
        );
        let kb = (
            b.filed_date.unwrap_or(NaiveDate::MIN),
            b.accession_id.as_ref().map(|x| x.as_str()).unwrap_or(""),
        );
        ka.cmp(&kb)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cik_strips_leading_zeros() {
        assert_eq!(Cik::parse("0001872195").unwrap().as_str(), "1872195");
        assert_eq!(Cik::parse("320193").unwrap().as_str(), "320193");
    }

    #[test]
    fn cik_rejects_garbage() {
        assert!(Cik::parse("").is_none());
        assert!(Cik::parse("  ").is_none());
        assert!(Cik::parse("12a34").is_none());
        assert!(Cik::parse("0000").is_none());
    }

    #[test]
    fn accession_compact_removes_dashes() {
        let acc = AccessionId::new("0000320193-24-000066");
        assert_eq!(acc.compact(), "000032019324000066");
    }

    #[test]
    fn form_kind_round_trips() {
        for raw in [
            "S-1", "F-1", "S-1/A", "F-1/A", "424B1", "424B4", "S-1MEF", "F-1MEF", "RW",
        ] {
            let kind: FormKind = raw.parse().unwrap();
            assert_eq!(kind.as_str(), raw);
        }
        assert!("10-K".parse::<FormKind>().is_err());
    }

    #[test]
    fn form_kind_classification() {
        assert!(FormKind::B424B1.is_prospectus());
        assert!(FormKind::B424B4.is_prospectus());
        assert!(!FormKind::S1.is_prospectus());
        assert!(FormKind::Rw.is_withdrawal());
        assert!(!FormKind::B424B4.is_withdrawal());
    }

    fn filing(date: Option<&str>, accession: Option<&str>) -> CanonicalFiling {
        CanonicalFiling {
            cik: Cik::parse("123"),
            company_name: Some("Example Corp".into()),
            ticker: None,
            form_kind: Some(FormKind::S1),
            filed_date: date.map(|d| d.parse().unwrap()),
            document_url: None,
            accession_id: accession.map(AccessionId::new),
            confirmation: IpoConfirmation::NotChecked,
            primary_document: None,
        }
    }

    #[test]
    fn sort_orders_by_date_then_accession() {
        let mut batch = vec![
            filing(Some("2025-01-11"), Some("B")),
            filing(Some("2025-01-10"), Some("Z")),
            filing(Some("2025-01-11"), Some("A")),
            filing(Some("2025-01-11"), None),
        ];
        sort_canonical(&mut batch);

        let keys: Vec<_> = batch
            .iter()
            .map(|f| {
                (
                    f.filed_date.unwrap().to_string(),
                    f.accession_id.as_ref().map(|a| a.as_str().to_string()),
                )
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2025-01-10".to_string(), Some("Z".to_string())),
                ("2025-01-11".to_string(), None),
                ("2025-01-11".to_string(), Some("A".to_string())),
                ("2025-01-11".to_string(), Some("B".to_string())),
            ]
        );
    }
}
