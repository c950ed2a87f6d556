//! Fast-tier deduplication: a day-scoped idempotency set.
//!
//! Two layers inside one type: a process-local set that guarantees in-run
//! idempotence unconditionally, and an optional Redis set shared across
//! processes (daytime run, nightly reconcile, mid-day restarts) that
//! expires at the next local midnight. Redis is fail-open everywhere: if
//! it is disabled or unreachable the engine keeps going and the durable
//! backstop still protects correctness, at the cost of reprocessing.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{FixedOffset, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

pub struct DailyCache {
    conn: Option<ConnectionManager>,
    seen: Mutex<HashSet<String>>,
    offset: FixedOffset,
    /// False in dry-run: the shared set must not learn about mutations that
    /// never happened.
    persist: bool,
}

impl DailyCache {
    /// Connect to Redis, failing open to a process-local-only cache.
    pub async fn connect(redis_url: Option<&str>, offset: FixedOffset, persist: bool) -> Self {
        let conn = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => match client.get_connection_manager().await {
                    Ok(conn) => {
                        info!("daily dedup cache connected to redis");
                        Some(conn)
                    }
                    Err(err) => {
                        warn!("redis unreachable, daily cache is process-local only: {err}");
                        None
                    }
                },
                Err(err) => {
                    warn!("invalid redis url, daily cache is process-local only: {err}");
                    None
                }
            },
            None => None,
        };

        Self {
            conn,
            seen: Mutex::new(HashSet::new()),
            offset,
            persist,
        }
    }

    /// Process-local-only cache (Redis disabled or tests).
    pub fn disabled(offset: FixedOffset) -> Self {
        Self {
            conn: None,
            seen: Mutex::new(HashSet::new()),
            offset,
            persist: false,
        }
    }

    fn day_key(&self) -> String {
        let today = Utc::now().with_timezone(&self.offset).format("%Y%m%d");
        format!("ipo:processed:{today}")
    }

    fn next_local_midnight_epoch(&self) -> i64 {
        let now_local = Utc::now().with_timezone(&self.offset);
        let tomorrow = now_local.date_naive() + chrono::Days::new(1);
        let Some(midnight) = tomorrow.and_hms_opt(0, 0, 0) else {
            return Utc::now().timestamp() + 86_400;
        };
        match midnight.and_local_timezone(self.offset).single() {
            Some(dt) => dt.timestamp(),
            None => Utc::now().timestamp() + 86_400,
        }
    }

    /// Has this dedup key already been processed today?
    pub async fn seen_today(&self, key: &str) -> bool {
        if self.seen.lock().unwrap().contains(key) {
            return true;
        }

        let Some(conn) = &self.conn else {
            return false;
        };
        let mut conn = conn.clone();
        let redis_key = self.day_key();
        match conn.sismember::<_, _, bool>(&redis_key, key).await {
            Ok(seen) => seen,
            Err(err) => {
                debug!("redis sismember failed (fail-open): {err}");
                false
            }
        }
    }

    /// Record a processed dedup key.
    pub async fn mark_processed(&self, key: &str) {
        self.seen.lock().unwrap().insert(key.to_string());

        if !self.persist {
            return;
        }
        let Some(conn) = &self.conn else {
            return;
        };
        let mut conn = conn.clone();
        let redis_key = self.day_key();
        if let Err(err) = conn.sadd::<_, _, i64>(&redis_key, key).await {
            debug!("redis sadd failed (fail-open): {err}");
            return;
        }
        self.ensure_ttl(&mut conn, &redis_key).await;
    }

    /// Pre-populate from durable storage at the start of a run so a mid-day
    /// restart does not reprocess records already committed.
    pub async fn bulk_seed(&self, keys: &HashSet<String>) -> usize {
        if keys.is_empty() {
            return 0;
        }

        let added = {
            let mut seen = self.seen.lock().unwrap();
            let before = seen.len();
            seen.extend(keys.iter().cloned());
            seen.len() - before
        };

        if self.persist {
            if let Some(conn) = &self.conn {
                let mut conn = conn.clone();
                let redis_key = self.day_key();
                let members: Vec<&str> = keys.iter().map(String::as_str).collect();
                match conn.sadd::<_, _, i64>(&redis_key, members).await {
                    Ok(_) => self.ensure_ttl(&mut conn, &redis_key).await,
                    Err(err) => debug!("redis bulk seed failed (fail-open): {err}"),
                }
            }
        }

        added
    }

    /// Set the expiry to the next local midnight if the key has none yet.
    async fn ensure_ttl(&self, conn: &mut ConnectionManager, redis_key: &str) {
        match conn.ttl::<_, i64>(redis_key).await {
            Ok(-1) => {
                let expires = self.next_local_midnight_epoch();
                if let Err(err) = conn.expire_at::<_, bool>(redis_key, expires).await {
                    debug!("redis expire_at failed (fail-open): {err}");
                }
            }
            Ok(_) => {}
            Err(err) => debug!("redis ttl failed (fail-open): {err}"),
        }
    }
}
