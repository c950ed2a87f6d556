//! Ingestion engine: applies canonical filings, one at a time and in
//! adapter order, to the per-filer lifecycle.
//!
//! Decision order per record:
//! 1. reject records missing CIK, form, or date
//! 2. skip records whose dedup key was already processed today
//! 3. skip non-initial forms for unknown filers
//! 4. skip initial forms without confirmed IPO language
//! 5. effective prospectus for a tracked filer → move to completed
//! 6. withdrawal for a tracked filer → delete
//! 7. otherwise upsert the tracked row (preserving the monotone
//!    `analyzed` flag), then
//! 8. fire failure-tolerant side effects (logo, analysis)
//!
//! The tracked snapshot is passed in explicitly, refreshed from storage
//! once per run, and mutated locally after each committed decision so later
//! records in the batch observe up-to-date state (last write wins). No
//! record's failure aborts the batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use edgar::{CanonicalFiling, Cik, FormKind, IpoConfirmation};
use tracing::{debug, error, info, warn};

use crate::dedup::DailyCache;
use crate::services::{Analyzer, LogoService};
use crate::storage::{CompletedEntity, Storage, TrackedEntity};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Form kinds that may create a new tracked filer.
    pub initial_forms: HashSet<FormKind>,
    /// Log every intended mutation but write nothing durable.
    pub dry_run: bool,
}

/// Per-batch decision counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub transitioned: usize,
    pub withdrawn: usize,
    pub skipped: usize,
    pub deduped: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.transitioned + self.withdrawn
    }
}

/// Dedup key for a filing: the accession number when the source supplied
/// one, else the deterministic composite `cik|form|date`.
pub fn dedup_key(filing: &CanonicalFiling) -> Option<String> {
    if let Some(accession) = &filing.accession_id {
        return Some(accession.as_str().to_string());
    }
    match (&filing.cik, filing.form_kind, filing.filed_date) {
        (Some(cik), Some(form), Some(date)) => Some(format!("{cik}|{form}|{date}")),
        _ => None,
    }
}

pub struct Engine {
    storage: Arc<dyn Storage>,
    logo: Arc<dyn LogoService>,
    analyzer: Arc<dyn Analyzer>,
    cache: DailyCache,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        storage: Arc<dyn Storage>,
        logo: Arc<dyn LogoService>,
        analyzer: Arc<dyn Analyzer>,
        cache: DailyCache,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            logo,
            analyzer,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &DailyCache {
        &self.cache
    }

    /// Apply a batch in order. Per-record isolation: a failing record is
    /// counted and logged, and processing continues.
    pub async fn process_batch(
        &self,
        filings: Vec<CanonicalFiling>,
        snapshot: &mut HashMap<Cik, TrackedEntity>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        if filings.is_empty() {
            info!("no filings to process");
            return summary;
        }

        for filing in filings {
            let cik = filing.cik.clone();
            if let Err(err) = self.process_one(filing, snapshot, &mut summary).await {
                summary.failed += 1;
                error!(cik = ?cik.as_ref().map(|c| c.as_str()), "record processing failed: {err:#}");
            }
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            transitioned = summary.transitioned,
            withdrawn = summary.withdrawn,
            skipped = summary.skipped,
            deduped = summary.deduped,
            rejected = summary.rejected,
            failed = summary.failed,
            "batch processed"
        );
        summary
    }

    async fn process_one(
        &self,
        filing: CanonicalFiling,
        snapshot: &mut HashMap<Cik, TrackedEntity>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let key = dedup_key(&filing);

        let (Some(cik), Some(form), Some(date)) =
            (filing.cik.clone(), filing.form_kind, filing.filed_date)
        else {
            warn!(
                accession = ?filing.accession_id.as_ref().map(|a| a.as_str()),
                company = ?filing.company_name,
                "rejecting filing with missing identity fields"
            );
            summary.rejected += 1;
            // mark so a malformed record is not retried forever
            self.mark(key.as_deref()).await;
            return Ok(());
        };

        if let Some(key) = &key {
            if self.cache.seen_today(key).await {
                debug!(%cik, %form, key, "already processed today, skipping");
                summary.deduped += 1;
                return Ok(());
            }
        }

        let existing = snapshot.get(&cik).cloned();
        let is_initial = self.config.initial_forms.contains(&form);

        // Non-initial events for unknown filers are not tracked.
        if existing.is_none() && !is_initial {
            debug!(%cik, %form, "unknown filer, ignoring non-initial form");
            summary.skipped += 1;
            return Ok(());
        }

        // Initial forms require confirmed IPO language.
        if is_initial && !filing.confirmation.is_confirmed() {
            match filing.confirmation {
                IpoConfirmation::FetchFailed => info!(
                    %cik, %form,
                    "confirmation fetch failed, treating as unconfirmed"
                ),
                _ => debug!(%cik, %form, "no IPO language confirmed, skipping"),
            }
            summary.skipped += 1;
            return Ok(());
        }

        if form.is_prospectus() {
            if let Some(tracked) = existing.as_ref() {
                return self
                    .complete(&cik, form, date, &filing, tracked, snapshot, summary, key.as_deref())
                    .await;
            }
        }

        if form.is_withdrawal() && existing.is_some() {
            info!(%cik, "registration withdrawn, removing tracked filer");
            if self.config.dry_run {
                info!(%cik, "dry-run: would delete tracked filer");
            } else {
                self.storage.delete_tracked(&cik).await?;
            }
            snapshot.remove(&cik);
            summary.withdrawn += 1;
            self.mark(key.as_deref()).await;
            return Ok(());
        }

        // New initial filing, or a subsequent qualifying filing for a
        // tracked filer: upsert the ingest-owned fields. Collaborator-owned
        // fields are carried over so the local snapshot stays coherent.
        let entity = TrackedEntity {
            cik: cik.clone(),
            company_name: filing
                .company_name
                .clone()
                .or_else(|| existing.as_ref().and_then(|e| e.company_name.clone())),
            ticker: filing
                .ticker
                .clone()
                .or_else(|| existing.as_ref().and_then(|e| e.ticker.clone())),
            latest_filing_type: form,
            latest_filing_date: date,
            document_url: filing.document_url.clone(),
            is_ipo: true,
            // only ever transitions false → true, and never here
            analyzed: existing.as_ref().map(|e| e.analyzed).unwrap_or(false),
            accession_number: filing.accession_id.clone(),
            logo_url: existing.as_ref().and_then(|e| e.logo_url.clone()),
            updated_logo_date: existing.as_ref().and_then(|e| e.updated_logo_date),
            shares_offered: existing.as_ref().and_then(|e| e.shares_offered),
            share_price: existing.as_ref().and_then(|e| e.share_price.clone()),
            exchange: existing.as_ref().and_then(|e| e.exchange.clone()),
            market_cap: existing.as_ref().and_then(|e| e.market_cap),
            estimated_ipo_date: existing.as_ref().and_then(|e| e.estimated_ipo_date.clone()),
            updated_at: Utc::now(),
        };

        info!(
            %cik,
            latest = %form,
            ticker = entity.ticker.as_deref().unwrap_or("-"),
            "upserting tracked filer"
        );
        if self.config.dry_run {
            info!(%cik, "dry-run: would upsert tracked filer");
        } else {
            self.storage.upsert_tracked(&entity).await?;
        }

        if existing.is_none() {
            summary.created += 1;
        } else {
            summary.updated += 1;
        }
        snapshot.insert(cik.clone(), entity.clone());
        self.mark(key.as_deref()).await;

        self.run_side_effects(&cik, &entity, is_initial, snapshot).await;
        Ok(())
    }

    /// Effective prospectus: move the filer to the completed set, carrying
    /// forward materialized logo fields (refreshed first when stale).
    /// Delete + insert run in one storage transaction.
    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        cik: &Cik,
        form: FormKind,
        effective_date: chrono::NaiveDate,
        filing: &CanonicalFiling,
        existing: &TrackedEntity,
        snapshot: &mut HashMap<Cik, TrackedEntity>,
        summary: &mut RunSummary,
        key: Option<&str>,
    ) -> Result<()> {
        info!(%cik, %form, "prospectus effective, moving filer to public companies");

        let company_name = filing
            .company_name
            .clone()
            .or_else(|| existing.company_name.clone());
        let mut logo_url = existing.logo_url.clone();
        let mut logo_date = existing.updated_logo_date;

        if !self.config.dry_run {
            let name = company_name.clone().unwrap_or_default();
            match self.logo.ensure_logo(cik, &name).await {
                Ok(Some(fields)) => {
                    logo_url = Some(fields.url);
                    logo_date = Some(fields.updated);
                }
                Ok(None) => {}
                Err(err) => warn!(%cik, "logo refresh before move failed: {err:#}"),
            }
        }

        let completed = CompletedEntity {
            cik: cik.clone(),
            company_name,
            ticker: filing.ticker.clone().or_else(|| existing.ticker.clone()),
            effective_date,
            form_type: form,
            document_url: filing.document_url.clone(),
            accession_number: filing.accession_id.clone(),
            logo_url,
            updated_logo_date: logo_date,
        };

        if self.config.dry_run {
            info!(%cik, "dry-run: would move tracked filer to public companies");
        } else {
            self.storage.transition(cik, &completed).await?;
        }

        snapshot.remove(cik);
        summary.transitioned += 1;
        self.mark(key).await;
        info!(
            %cik,
            ticker = completed.ticker.as_deref().unwrap_or("-"),
            %form,
            "moved to public companies"
        );
        Ok(())
    }

    /// Post-upsert side effects. A failure here is logged, never rolls back
    /// the upsert, and leaves state so a future run can retry.
    async fn run_side_effects(
        &self,
        cik: &Cik,
        entity: &TrackedEntity,
        is_initial: bool,
        snapshot: &mut HashMap<Cik, TrackedEntity>,
    ) {
        if self.config.dry_run {
            debug!(%cik, "dry-run: skipping side effects");
            return;
        }

        let name = entity.company_name.clone().unwrap_or_default();

        match self.logo.ensure_logo(cik, &name).await {
            Ok(Some(fields)) => {
                if let Some(entry) = snapshot.get_mut(cik) {
                    entry.logo_url = Some(fields.url);
                    entry.updated_logo_date = Some(fields.updated);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%cik, "logo update failed: {err:#}"),
        }

        if is_initial && !entity.analyzed {
            if let Some(document_url) = &entity.document_url {
                match self.analyzer.analyze(cik, document_url, &name).await {
                    Ok(()) => {
                        // the collaborator persisted analyzed = true
                        if let Some(entry) = snapshot.get_mut(cik) {
                            entry.analyzed = true;
                        }
                    }
                    Err(err) => {
                        warn!(%cik, "analysis failed, will retry on a future run: {err:#}")
                    }
                }
            }
        }
    }

    async fn mark(&self, key: Option<&str>) {
        if let Some(key) = key {
            self.cache.mark_processed(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{LogoFields, LogoService};
    use crate::storage::AnalysisFields;
    use async_trait::async_trait;
    use chrono::{FixedOffset, NaiveDate};
    use edgar::AccessionId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStorage {
        tracked: Mutex<HashMap<Cik, TrackedEntity>>,
        completed: Mutex<HashMap<Cik, CompletedEntity>>,
        mutations: Mutex<Vec<String>>,
    }

    impl MockStorage {
        fn tracked_entry(&self, cik: &str) -> Option<TrackedEntity> {
            self.tracked
                .lock()
                .unwrap()
                .get(&Cik::parse(cik).unwrap())
                .cloned()
        }

        fn completed_entry(&self, cik: &str) -> Option<CompletedEntity> {
            self.completed
                .lock()
                .unwrap()
                .get(&Cik::parse(cik).unwrap())
                .cloned()
        }

        fn mutation_count(&self) -> usize {
            self.mutations.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Storage for MockStorage {
        async fn get_tracked_snapshot(&self) -> Result<HashMap<Cik, TrackedEntity>> {
            Ok(self.tracked.lock().unwrap().clone())
        }

        async fn get_tracked_by_id(&self, cik: &Cik) -> Result<Option<TrackedEntity>> {
            Ok(self.tracked.lock().unwrap().get(cik).cloned())
        }

        async fn upsert_tracked(&self, entity: &TrackedEntity) -> Result<()> {
            let mut tracked = self.tracked.lock().unwrap();
            let mut entity = entity.clone();
            // mirror the SQL upsert: analyzed can never revert
            if let Some(existing) = tracked.get(&entity.cik) {
                entity.analyzed = entity.analyzed || existing.analyzed;
            }
            tracked.insert(entity.cik.clone(), entity);
            self.mutations.lock().unwrap().push("upsert_tracked".into());
            Ok(())
        }

        async fn delete_tracked(&self, cik: &Cik) -> Result<()> {
            self.tracked.lock().unwrap().remove(cik);
            self.mutations.lock().unwrap().push("delete_tracked".into());
            Ok(())
        }

        async fn upsert_completed(&self, entity: &CompletedEntity) -> Result<()> {
            self.completed
                .lock()
                .unwrap()
                .insert(entity.cik.clone(), entity.clone());
            self.mutations.lock().unwrap().push("upsert_completed".into());
            Ok(())
        }

        async fn transition(&self, cik: &Cik, completed: &CompletedEntity) -> Result<()> {
            self.tracked.lock().unwrap().remove(cik);
            self.completed
                .lock()
                .unwrap()
                .insert(completed.cik.clone(), completed.clone());
            self.mutations.lock().unwrap().push("transition".into());
            Ok(())
        }

        async fn get_accession_ids_for_date(
            &self,
            _date: NaiveDate,
        ) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }

        async fn set_logo_fields(
            &self,
            _cik: &Cik,
            _logo_url: &str,
            _date: NaiveDate,
        ) -> Result<()> {
            Ok(())
        }

        async fn set_analysis_fields(&self, cik: &Cik, fields: &AnalysisFields) -> Result<()> {
            if let Some(entity) = self.tracked.lock().unwrap().get_mut(cik) {
                entity.is_ipo = fields.is_ipo;
                entity.analyzed = true;
            }
            Ok(())
        }

        async fn set_estimated_date(&self, _cik: &Cik, _estimated: &str) -> Result<()> {
            Ok(())
        }

        async fn find_estimated_date_by_company(
            &self,
            _company_name: &str,
        ) -> Result<Option<(Cik, Option<String>)>> {
            Ok(None)
        }

        async fn list_confirmed_tracked(&self) -> Result<Vec<TrackedEntity>> {
            Ok(self.tracked.lock().unwrap().values().cloned().collect())
        }
    }

    struct MockLogo {
        fields: Option<LogoFields>,
        fail: bool,
    }

    #[async_trait]
    impl LogoService for MockLogo {
        async fn ensure_logo(&self, _cik: &Cik, _name: &str) -> Result<Option<LogoFields>> {
            if self.fail {
                anyhow::bail!("logo provider down");
            }
            Ok(self.fields.clone())
        }
    }

    /// Records calls and, like the real collaborator, persists the analysis
    /// result (which sets `analyzed = true`).
    #[derive(Default)]
    struct MockAnalyzer {
        calls: Mutex<Vec<Cik>>,
        storage: Option<Arc<MockStorage>>,
    }

    #[async_trait]
    impl Analyzer for MockAnalyzer {
        async fn analyze(&self, cik: &Cik, _url: &str, _name: &str) -> Result<()> {
            self.calls.lock().unwrap().push(cik.clone());
            if let Some(storage) = &self.storage {
                storage
                    .set_analysis_fields(
                        cik,
                        &AnalysisFields {
                            is_ipo: true,
                            shares_offered: None,
                            share_price: None,
                            exchange: None,
                            market_cap: None,
                        },
                    )
                    .await?;
            }
            Ok(())
        }
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(-5 * 3600).unwrap()
    }

    fn engine_with(
        storage: Arc<MockStorage>,
        logo: Arc<dyn LogoService>,
        analyzer: Arc<MockAnalyzer>,
        dry_run: bool,
    ) -> Engine {
        Engine::new(
            storage,
            logo,
            analyzer,
            DailyCache::disabled(offset()),
            EngineConfig {
                initial_forms: HashSet::from([FormKind::S1, FormKind::F1]),
                dry_run,
            },
        )
    }

    fn engine(storage: Arc<MockStorage>) -> Engine {
        engine_with(
            storage,
            Arc::new(MockLogo {
                fields: None,
                fail: false,
            }),
            Arc::new(MockAnalyzer::default()),
            false,
        )
    }

    fn filing(
        cik: Option<&str>,
        form: Option<FormKind>,
        date: Option<&str>,
        accession: Option<&str>,
        confirmation: IpoConfirmation,
    ) -> CanonicalFiling {
        CanonicalFiling {
            cik: cik.and_then(Cik::parse),
            company_name: Some("Example Corp".into()),
            ticker: Some("EXMP".into()),
            form_kind: form,
            filed_date: date.map(|d| d.parse().unwrap()),
            document_url: Some("https://www.sec.gov/Archives/edgar/data/123/doc.txt".into()),
            accession_id: accession.map(AccessionId::new),
            confirmation,
            primary_document: None,
        }
    }

    fn confirmed_s1(accession: &str) -> CanonicalFiling {
        filing(
            Some("123"),
            Some(FormKind::S1),
            Some("2025-01-10"),
            Some(accession),
            IpoConfirmation::Confirmed,
        )
    }

    #[tokio::test]
    async fn malformed_records_cause_no_mutation() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        let batch = vec![
            filing(None, Some(FormKind::S1), Some("2025-01-10"), Some("A1"), IpoConfirmation::Confirmed),
            filing(Some("123"), None, Some("2025-01-10"), Some("A2"), IpoConfirmation::Confirmed),
            filing(Some("123"), Some(FormKind::S1), None, Some("A3"), IpoConfirmation::Confirmed),
        ];
        let summary = engine.process_batch(batch, &mut snapshot).await;

        assert_eq!(summary.rejected, 3);
        assert_eq!(summary.mutations(), 0);
        assert_eq!(storage.mutation_count(), 0);
    }

    #[tokio::test]
    async fn replaying_the_same_accession_mutates_once() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        let summary = engine
            .process_batch(vec![confirmed_s1("A1"), confirmed_s1("A1")], &mut snapshot)
            .await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.deduped, 1);
        assert_eq!(storage.mutation_count(), 1);
    }

    #[tokio::test]
    async fn dedup_spans_batches_within_a_run() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        // the search adapter and the index adapter report the same filing
        engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;
        let second = engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;

        assert_eq!(second.deduped, 1);
        assert_eq!(storage.mutation_count(), 1);
    }

    #[tokio::test]
    async fn unconfirmed_initial_form_is_not_tracked() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        for confirmation in [IpoConfirmation::Unconfirmed, IpoConfirmation::FetchFailed] {
            let summary = engine
                .process_batch(
                    vec![filing(
                        Some("123"),
                        Some(FormKind::S1),
                        Some("2025-01-10"),
                        None,
                        confirmation,
                    )],
                    &mut snapshot,
                )
                .await;
            assert_eq!(summary.skipped, 1);
        }
        assert!(storage.tracked_entry("123").is_none());
        assert_eq!(storage.mutation_count(), 0);
    }

    #[tokio::test]
    async fn non_initial_form_for_unknown_filer_is_skipped() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        for form in [FormKind::S1A, FormKind::B424B4, FormKind::Rw, FormKind::S1Mef] {
            let summary = engine
                .process_batch(
                    vec![filing(
                        Some("123"),
                        Some(form),
                        Some("2025-01-10"),
                        None,
                        IpoConfirmation::NotChecked,
                    )],
                    &mut snapshot,
                )
                .await;
            assert_eq!(summary.skipped, 1, "{form} should be skipped");
        }
        assert_eq!(storage.mutation_count(), 0);
    }

    #[tokio::test]
    async fn confirmed_initial_filing_creates_tracked_filer() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        let summary = engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;

        assert_eq!(summary.created, 1);
        let entity = storage.tracked_entry("123").unwrap();
        assert_eq!(entity.latest_filing_type, FormKind::S1);
        assert_eq!(
            entity.latest_filing_date,
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
        );
        assert!(entity.is_ipo);
        assert!(!entity.analyzed);
        assert_eq!(entity.accession_number.as_ref().unwrap().as_str(), "A1");
        assert!(snapshot.contains_key(&Cik::parse("123").unwrap()));
    }

    #[tokio::test]
    async fn prospectus_moves_tracked_filer_to_completed() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;

        // materialized logo fields must survive the move
        {
            let mut tracked = storage.tracked.lock().unwrap();
            let entity = tracked.get_mut(&Cik::parse("123").unwrap()).unwrap();
            entity.logo_url = Some("https://img.example/123.webp".into());
            entity.updated_logo_date = NaiveDate::from_ymd_opt(2025, 1, 5);
        }
        snapshot = storage.get_tracked_snapshot().await.unwrap();

        let summary = engine
            .process_batch(
                vec![filing(
                    Some("123"),
                    Some(FormKind::B424B4),
                    Some("2025-03-01"),
                    Some("A2"),
                    IpoConfirmation::NotChecked,
                )],
                &mut snapshot,
            )
            .await;

        assert_eq!(summary.transitioned, 1);
        assert!(storage.tracked_entry("123").is_none());
        assert!(!snapshot.contains_key(&Cik::parse("123").unwrap()));

        let completed = storage.completed_entry("123").unwrap();
        assert_eq!(completed.form_type, FormKind::B424B4);
        assert_eq!(
            completed.effective_date,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
        assert_eq!(completed.accession_number.as_ref().unwrap().as_str(), "A2");
        assert_eq!(
            completed.logo_url.as_deref(),
            Some("https://img.example/123.webp")
        );
        assert_eq!(completed.updated_logo_date, NaiveDate::from_ymd_opt(2025, 1, 5));
    }

    #[tokio::test]
    async fn withdrawal_removes_without_completion() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;

        let summary = engine
            .process_batch(
                vec![filing(
                    Some("123"),
                    Some(FormKind::Rw),
                    Some("2025-02-01"),
                    Some("A3"),
                    IpoConfirmation::NotChecked,
                )],
                &mut snapshot,
            )
            .await;

        assert_eq!(summary.withdrawn, 1);
        assert!(storage.tracked_entry("123").is_none());
        assert!(storage.completed_entry("123").is_none());
    }

    #[tokio::test]
    async fn analyzed_flag_is_monotonic_across_upserts() {
        let storage = Arc::new(MockStorage::default());
        let analyzer = Arc::new(MockAnalyzer {
            calls: Mutex::new(Vec::new()),
            storage: Some(storage.clone()),
        });
        let engine = engine_with(
            storage.clone(),
            Arc::new(MockLogo {
                fields: None,
                fail: false,
            }),
            analyzer.clone(),
            false,
        );
        let mut snapshot = HashMap::new();

        // S-1 creates the filer; the analyzer runs and sets analyzed = true
        engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;
        assert!(storage.tracked_entry("123").unwrap().analyzed);

        // a later amendment must not reset the flag
        let amendment = filing(
            Some("123"),
            Some(FormKind::S1A),
            Some("2025-02-01"),
            Some("A2"),
            IpoConfirmation::NotChecked,
        );
        engine.process_batch(vec![amendment], &mut snapshot).await;
        assert!(storage.tracked_entry("123").unwrap().analyzed);

        // a fresh confirmed S-1 for an already-analyzed filer does not
        // re-invoke the analyzer
        engine
            .process_batch(vec![confirmed_s1("A4")], &mut snapshot)
            .await;
        assert!(storage.tracked_entry("123").unwrap().analyzed);
        assert_eq!(analyzer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn later_record_in_batch_sees_earlier_state() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        let amendment = filing(
            Some("123"),
            Some(FormKind::S1A),
            Some("2025-01-11"),
            Some("A2"),
            IpoConfirmation::NotChecked,
        );
        let summary = engine
            .process_batch(vec![confirmed_s1("A1"), amendment], &mut snapshot)
            .await;

        // the amendment found the filer created two lines earlier
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        let entity = storage.tracked_entry("123").unwrap();
        assert_eq!(entity.latest_filing_type, FormKind::S1A);
        assert_eq!(entity.accession_number.as_ref().unwrap().as_str(), "A2");
    }

    #[tokio::test]
    async fn logo_failure_does_not_roll_back_the_upsert() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine_with(
            storage.clone(),
            Arc::new(MockLogo {
                fields: None,
                fail: true,
            }),
            Arc::new(MockAnalyzer::default()),
            false,
        );
        let mut snapshot = HashMap::new();

        let summary = engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 0);
        assert!(storage.tracked_entry("123").is_some());
    }

    #[tokio::test]
    async fn successful_logo_refresh_lands_in_the_snapshot() {
        let storage = Arc::new(MockStorage::default());
        let fields = LogoFields {
            url: "https://img.logo.dev/example.com?token=t".into(),
            updated: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        };
        let engine = engine_with(
            storage.clone(),
            Arc::new(MockLogo {
                fields: Some(fields.clone()),
                fail: false,
            }),
            Arc::new(MockAnalyzer::default()),
            false,
        );
        let mut snapshot = HashMap::new();

        engine
            .process_batch(vec![confirmed_s1("A1")], &mut snapshot)
            .await;

        let entry = snapshot.get(&Cik::parse("123").unwrap()).unwrap();
        assert_eq!(entry.logo_url.as_deref(), Some(fields.url.as_str()));
        assert_eq!(entry.updated_logo_date, Some(fields.updated));
    }

    #[tokio::test]
    async fn dry_run_decides_but_never_mutates() {
        let storage = Arc::new(MockStorage::default());
        let analyzer = Arc::new(MockAnalyzer::default());
        let engine = engine_with(
            storage.clone(),
            Arc::new(MockLogo {
                fields: None,
                fail: false,
            }),
            analyzer.clone(),
            true,
        );
        let mut snapshot = HashMap::new();

        let amendment = filing(
            Some("123"),
            Some(FormKind::S1A),
            Some("2025-01-11"),
            Some("A2"),
            IpoConfirmation::NotChecked,
        );
        let summary = engine
            .process_batch(vec![confirmed_s1("A1"), amendment], &mut snapshot)
            .await;

        // decisions match live mode
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        // zero durable writes, zero side effects
        assert_eq!(storage.mutation_count(), 0);
        assert!(analyzer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_without_accession_dedupes_on_composite_key() {
        let storage = Arc::new(MockStorage::default());
        let engine = engine(storage.clone());
        let mut snapshot = HashMap::new();

        let a = filing(
            Some("123"),
            Some(FormKind::S1),
            Some("2025-01-10"),
            None,
            IpoConfirmation::Confirmed,
        );
        let summary = engine
            .process_batch(vec![a.clone(), a], &mut snapshot)
            .await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.deduped, 1);
        assert_eq!(storage.mutation_count(), 1);
    }
}
