//! Best-effort IPO phrase confirmation.
//!
//! Initial registration forms (S-1, F-1) are filed for many reasons besides
//! an IPO. Before a filer is tracked, the filing document is fetched and the
//! first ~200 KB scanned for IPO language. The result is a typed
//! three-state outcome: fetch failures are policy-equivalent to "phrase not
//! found" but stay distinguishable in logs.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::html::clean_html;
use crate::types::IpoConfirmation;

/// Bytes of document body to scan; the cover page language appears well
/// within this window.
pub const CONFIRMATION_SCAN_BYTES: usize = 200_000;

lazy_static! {
    static ref IPO_PHRASE: Regex = Regex::new(r"(?i)\binitial public offering\b").unwrap();
}

/// The default confirmation pattern, case-insensitive with word boundaries.
pub fn default_phrase() -> Regex {
    IPO_PHRASE.clone()
}

/// Match the confirmation phrase against already-cleaned text.
pub fn text_confirms(pattern: &Regex, cleaned: &str) -> bool {
    pattern.is_match(cleaned)
}

/// Fetch the filing document and scan for the confirmation phrase.
///
/// Never fails the caller: transport errors, bad status, and undecodable
/// bodies all collapse to [`IpoConfirmation::FetchFailed`].
pub async fn confirm_ipo_language(
    client: &reqwest::Client,
    pattern: &Regex,
    url: &str,
) -> IpoConfirmation {
    let response = match client.get(url).send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => response,
        Err(err) => {
            debug!(%url, "confirmation fetch failed: {err}");
            return IpoConfirmation::FetchFailed;
        }
    };

    let mut buffer: Vec<u8> = Vec::with_capacity(8_192);
    let mut response = response;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                buffer.extend_from_slice(&chunk);
                if buffer.len() > CONFIRMATION_SCAN_BYTES {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(%url, "confirmation body read failed: {err}");
                return IpoConfirmation::FetchFailed;
            }
        }
    }

    let text = String::from_utf8_lossy(&buffer);
    if text_confirms(pattern, &clean_html(&text)) {
        IpoConfirmation::Confirmed
    } else {
        IpoConfirmation::Unconfirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_matches_case_insensitively() {
        let phrase = default_phrase();
        assert!(text_confirms(&phrase, "our Initial Public Offering of common stock"));
        assert!(text_confirms(&phrase, "INITIAL PUBLIC OFFERING"));
    }

    #[test]
    fn phrase_requires_word_boundaries() {
        let phrase = default_phrase();
        assert!(!text_confirms(&phrase, "noninitial public offerings"));
        assert!(!text_confirms(&phrase, "initial public offeringmageddon"));
        assert!(!text_confirms(&phrase, "secondary offering"));
    }

    #[test]
    fn phrase_found_after_html_cleaning() {
        let html = "<p>This prospectus relates to the <b>initial public offering</b> of shares.</p>";
        assert!(text_confirms(&default_phrase(), &clean_html(html)));
    }

    #[test]
    fn custom_pattern_is_honored() {
        let phrase = Regex::new(r"(?i)\bdirect listing\b").unwrap();
        assert!(text_confirms(&phrase, "a Direct Listing on the NYSE"));
        assert!(!text_confirms(&phrase, "an initial public offering"));
    }
}
