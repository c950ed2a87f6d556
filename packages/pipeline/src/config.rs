use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;
use dotenvy::dotenv;
use edgar::{FormKind, RetryPolicy};
use regex::Regex;
use std::env;

/// Application configuration loaded from environment variables.
///
/// Required settings are fatal at startup; optional service credentials
/// degrade the corresponding collaborator to a no-op.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// SEC requires a User-Agent with a contact email on every request.
    pub sec_user_agent: String,

    pub redis_url: Option<String>,
    pub redis_cache_enabled: bool,

    pub forms: Vec<FormKind>,
    pub initial_forms: HashSet<FormKind>,
    /// Case-insensitive pattern confirming IPO language in initial-form
    /// documents.
    pub confirmation_phrase: Regex,

    pub page_size: usize,
    /// Polite delay between search result pages, also the retry base delay.
    pub rate_limit: Duration,
    pub max_retries: u32,
    pub http_timeout: Duration,

    pub logo_dev_key: Option<String>,
    pub logo_refresh_days: i64,

    pub openai_api_key: Option<String>,
    pub openai_model: String,

    pub cf_account_id: Option<String>,
    pub cf_api_token: Option<String>,
    pub cf_kv_namespace_id: Option<String>,

    /// Fixed UTC offset defining the "today" boundary for the fast dedup
    /// tier and default run windows (US/Eastern standard time by default).
    pub today_offset: FixedOffset,

    /// Log every intended mutation but write nothing durable.
    pub dry_run: bool,
}

/// Parse common truthy values for env flags.
fn truthy(val: Option<String>) -> bool {
    matches!(
        val.unwrap_or_default().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid value, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables (and a `.env` file in
    /// development).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let sec_user_agent = env::var("SEC_USER_AGENT").context("SEC_USER_AGENT must be set")?;
        if !sec_user_agent.contains('@') {
            tracing::warn!("SEC_USER_AGENT should include a contact email (per SEC guidance)");
        }

        let offset_hours: i32 = env_parse("TODAY_UTC_OFFSET_HOURS", -5)?;
        let today_offset = FixedOffset::east_opt(offset_hours * 3600)
            .context("TODAY_UTC_OFFSET_HOURS out of range")?;

        let confirmation_phrase = match env::var("CONFIRMATION_PHRASE") {
            Ok(raw) => Regex::new(&format!("(?i){raw}"))
                .context("CONFIRMATION_PHRASE must be a valid pattern")?,
            Err(_) => edgar::confirm::default_phrase(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            sec_user_agent,
            redis_url: env::var("REDIS_URL").ok(),
            redis_cache_enabled: truthy(env::var("ENABLE_REDIS_CACHE").ok()),
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
            confirmation_phrase,
            page_size: env_parse("PAGE_SIZE", 100usize)?,
            rate_limit: Duration::from_secs_f64(env_parse("RATE_LIMIT", 0.5f64)?),
            max_retries: env_parse("MAX_RETRIES", 3u32)?,
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT", 10u64)?),
            logo_dev_key: env::var("LOGO_DEV_KEY").ok().filter(|k| !k.is_empty()),
            logo_refresh_days: env_parse("LOGO_REFRESH_DAYS", 182i64)?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            cf_account_id: env::var("CF_ACCOUNT_ID").ok().filter(|k| !k.is_empty()),
            cf_api_token: env::var("CF_API_TOKEN").ok().filter(|k| !k.is_empty()),
            cf_kv_namespace_id: env::var("CF_KV_NAMESPACE_ID").ok().filter(|k| !k.is_empty()),
            today_offset,
            dry_run: truthy(env::var("DRY_RUN").ok()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: self.rate_limit,
            max_delay: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_parses_common_flags() {
        for v in ["1", "true", "YES", " on ", "y"] {
            assert!(truthy(Some(v.to_string())), "{v} should be truthy");
        }
        for v in ["", "0", "false", "off", "nope"] {
            assert!(!truthy(Some(v.to_string())), "{v} should be falsy");
        }
        assert!(!truthy(None));
    }
}
