//! AI extraction of IPO metadata from filing text.
//!
//! Fetches the filing document, sends the opening text to the OpenAI
//! chat-completions API with a constrained extraction prompt, validates the
//! JSON verdict, and persists the result. The collaborator owns setting
//! `analyzed = true`; the engine only decides eligibility.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use edgar::html::clean_html;
use edgar::Cik;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::{AnalysisFields, Storage};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Words of cleaned filing text handed to the model; the cover and offering
/// summary land inside this window.
const SNIPPET_WORDS: usize = 1_000;

lazy_static! {
    // Placeholder patterns that appear in draft filings: [•], [__], XX, TBD,
    // bare dashes, empty strings.
    static ref PLACEHOLDER_RES: Vec<Regex> = vec![
        Regex::new(r"(?i)^\[.*\]$").unwrap(),
        Regex::new(r"(?i)^XX$").unwrap(),
        Regex::new(r"(?i)^TBD$").unwrap(),
        Regex::new(r"(?i)^N/A$").unwrap(),
        Regex::new(r"^[-–—]$").unwrap(),
        Regex::new(r"^\s*$").unwrap(),
    ];
}

/// Analysis collaborator seam.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, cik: &Cik, document_url: &str, company_name: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Raw model verdict before sanitization.
#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(rename = "IPO", default)]
    ipo: String,
    #[serde(rename = "Shares Offered", default)]
    shares_offered: Option<String>,
    #[serde(default)]
    share_price: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    market_cap: Option<String>,
}

/// True for known draft-filing placeholder values.
fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_RES.iter().any(|re| re.is_match(value.trim()))
}

/// Treat "unknown" and placeholders as absent.
fn null_if_unknown(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().eq_ignore_ascii_case("unknown") && !is_placeholder(v))
}

/// Parse a numeric field, tolerating commas and a dollar sign. Fractional
/// values are truncated.
fn parse_numeric(value: Option<String>) -> Option<i64> {
    let raw = null_if_unknown(value)?;
    let cleaned = raw.replace([',', '$'], "").trim().to_string();
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|f| f as i64))
}

/// Strip an optional markdown fence and deserialize the verdict.
fn parse_verdict(content: &str) -> Result<AnalysisFields> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let verdict: Verdict =
        serde_json::from_str(trimmed).context("model did not return valid JSON")?;

    Ok(AnalysisFields {
        is_ipo: verdict.ipo.trim().eq_ignore_ascii_case("yes"),
        shares_offered: parse_numeric(verdict.shares_offered),
        share_price: null_if_unknown(verdict.share_price),
        exchange: null_if_unknown(verdict.exchange),
        market_cap: parse_numeric(verdict.market_cap),
    })
}

fn build_prompt(snippet: &str, company_name: &str) -> String {
    format!(
        "You extract IPO metadata from SEC filing text.\n\n\
         INPUT:\n{snippet}\nCOMPANY: {company_name}\n\n\
         Reason privately, then OUTPUT JSON ONLY (no markdown, no notes).\n\n\
         \"IPO\" = \"yes\" only if the issuer registers NEW securities for cash proceeds AND \
         seeks a FIRST-TIME listing on a national exchange (SPAC unit IPOs included). \
         \"IPO\" = \"no\" for pure resales, Rule 415 shelves, de-SPAC combinations, exchange or \
         follow-on offerings, Rule 462(b)/MEF/RW filings, warrant- or rights-only sales, and \
         OTC-only listings.\n\n\
         Rules:\n\
         1) \"Shares Offered\": for unit deals multiply units by shares per unit (ignore \
         warrants/rights; a unit with no share means IPO=\"no\"); count ADS as ADS; ignore \
         over-allotment and selling-shareholder blocks. Digits only.\n\
         2) \"share_price\": price of the sold security, formatted \"<n>$\" or \"<n>$ - <n>$\".\n\
         3) \"exchange\": normalize to one of NASDAQ, Nasdaq Capital Market, Nasdaq Global \
         Market, Nasdaq Global Select Market, NYSE, NYSE American, NYSE Arca, Cboe.\n\
         4) \"market_cap\": post-IPO shares outstanding times price (midpoint of a range), \
         digits only.\n\
         Placeholders ([\u{2022}], [__], XX, TBD, N/A, dashes) and anything ambiguous become \
         \"unknown\".\n\n\
         OUTPUT JSON ONLY:\n\
         {{\n  \"IPO\": \"yes\" or \"no\",\n  \"Shares Offered\": \"...\",\n  \"share_price\": \"...\",\n  \"exchange\": \"...\",\n  \"market_cap\": \"...\"\n}}\n"
    )
}

/// OpenAI-backed analyzer.
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    storage: Arc<dyn Storage>,
}

impl OpenAiAnalyzer {
    pub fn new(
        api_key: String,
        model: String,
        sec_user_agent: &str,
        timeout: Duration,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(sec_user_agent.to_string())
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            model,
            storage,
        })
    }

    async fn fetch_snippet(&self, document_url: &str) -> Result<String> {
        let body = self
            .client
            .get(document_url)
            .send()
            .await
            .context("Failed to fetch filing document")?
            .error_for_status()
            .context("Filing document request rejected")?
            .text()
            .await
            .context("Failed to read filing document")?;

        let cleaned = clean_html(&body);
        Ok(cleaned
            .split_whitespace()
            .take(SNIPPET_WORDS)
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {status}: {body}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no choices"))
    }
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    async fn analyze(&self, cik: &Cik, document_url: &str, company_name: &str) -> Result<()> {
        let started = Utc::now();
        let snippet = self.fetch_snippet(document_url).await?;
        let content = self.chat(&build_prompt(&snippet, company_name)).await?;
        let fields = parse_verdict(&content)?;

        self.storage.set_analysis_fields(cik, &fields).await?;

        info!(
            %cik,
            is_ipo = fields.is_ipo,
            exchange = fields.exchange.as_deref().unwrap_or("unknown"),
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "filing analyzed"
        );
        Ok(())
    }
}

/// No-op collaborator for when no OpenAI key is configured.
pub struct NoopAnalyzer;

#[async_trait]
impl Analyzer for NoopAnalyzer {
    async fn analyze(&self, _cik: &Cik, _document_url: &str, _company_name: &str) -> Result<()> {
        warn!("NoopAnalyzer: analysis requested but OPENAI_API_KEY not configured");
        Ok(())
    }
}
