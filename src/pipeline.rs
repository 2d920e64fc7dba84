//! Run orchestration: a bounded pool of workers over every
//! (source, keyword) pair, feeding extraction, categorization, enrichment,
//! persistence and contact discovery.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::categorizer::categorize;
use crate::config::Settings;
use crate::contacts::ContactFinder;
use crate::db::{Database, NewPosting, PersistOutcome, RunCounts};
use crate::enrich::CompanyEnricher;
use crate::error::RunError;
use crate::extractor::{extract, infer_job_type, parse_posted_at, RawCandidate};
use crate::fetcher::{FetchStatus, Fetcher, HttpTransport, RetryPolicy, Transport};
use crate::models::{Provenance, RunLog, RunParameters, RunStatus};
use crate::profile::ProfileProvider;
use crate::rate_limit::SourceGate;
use crate::registry::{SearchQuery, Source, SourceRegistry};

/// Title confidence at which the categorizer overrides the run's flag when
/// there is no description to go on.
const CONFIDENT_TITLE: f64 = 0.7;

/// Run-scoped cancellation carrying the reason. Clones share state.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<Option<String>>>,
    rx: watch::Receiver<Option<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx: Arc::new(tx), rx }
    }

    /// Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolves once the token is cancelled.
    #[cfg(test)]
    pub async fn cancelled(&self) -> String {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return "cancel token dropped".to_string();
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Async mutex per key, created on first use. Keys compare
/// case-insensitively.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.trim().to_lowercase()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Default)]
struct RunCounters {
    postings_found: AtomicI64,
    companies_found: AtomicI64,
    contacts_found: AtomicI64,
    units_total: AtomicI64,
    units_done: AtomicI64,
    units_blocked: AtomicI64,
    units_failed: AtomicI64,
}

impl RunCounters {
    fn snapshot(&self) -> RunCounts {
        RunCounts {
            postings_found: self.postings_found.load(Ordering::SeqCst),
            companies_found: self.companies_found.load(Ordering::SeqCst),
            contacts_found: self.contacts_found.load(Ordering::SeqCst),
            units_total: self.units_total.load(Ordering::SeqCst),
            units_done: self.units_done.load(Ordering::SeqCst),
            units_blocked: self.units_blocked.load(Ordering::SeqCst),
            units_failed: self.units_failed.load(Ordering::SeqCst),
        }
    }
}

/// One search: a keyword on a source.
#[derive(Debug, Clone)]
struct Unit {
    source: Source,
    keyword: String,
}

enum UnitOutcome {
    Done,
    Blocked,
    Failed,
}

/// Everything a worker needs, shared across the pool.
struct RunContext {
    run_id: i64,
    params: RunParameters,
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
    db: Arc<Mutex<Database>>,
    fetcher: Arc<Fetcher>,
    enricher: CompanyEnricher,
    contacts: Arc<ContactFinder>,
    company_locks: KeyedLocks,
    counters: RunCounters,
}

pub struct Orchestrator {
    db: Arc<Mutex<Database>>,
    registry: SourceRegistry,
    fetcher: Arc<Fetcher>,
    enricher: CompanyEnricher,
    contacts: Arc<ContactFinder>,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        db: Arc<Mutex<Database>>,
        registry: SourceRegistry,
        fetcher: Arc<Fetcher>,
        enricher: CompanyEnricher,
        contacts: ContactFinder,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            registry,
            fetcher,
            enricher,
            contacts: Arc::new(contacts),
            concurrency: concurrency.max(1),
        }
    }

    /// Wires the live HTTP stack from settings.
    pub fn from_settings(settings: &Settings, db: Arc<Mutex<Database>>) -> Result<Self, RunError> {
        let transport = Arc::new(HttpTransport::new(settings.fetch.timeout()));
        Self::with_transport(settings, db, transport)
    }

    pub fn with_transport(
        settings: &Settings,
        db: Arc<Mutex<Database>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RunError> {
        let registry = SourceRegistry::from_settings(settings)?;
        let profiles = Arc::new(ProfileProvider::new(
            settings.fetch.jitter(),
            settings.proxies.urls.clone(),
        ));
        let fetcher = Arc::new(Fetcher::new(
            transport,
            profiles,
            Arc::new(SourceGate::new()),
            RetryPolicy::from_settings(&settings.fetch),
        ));
        let contacts = ContactFinder::new(fetcher.clone(), settings.contacts.clone());
        Ok(Self::new(
            db,
            registry,
            fetcher,
            CompanyEnricher::new(),
            contacts,
            settings.run.concurrency,
        ))
    }

    /// Executes one run. Setup problems are returned as errors; anything
    /// that goes wrong inside a unit is logged and counted.
    pub async fn run(&self, params: RunParameters, cancel: CancelToken) -> Result<RunLog, RunError> {
        let keywords = validate(&params)?;

        let sources = {
            let db = self.db.lock().await;
            let mut registry = self.registry.clone();
            registry.sync(&db)?;
            registry.resolve(&params.source_filter)?
        };

        let parameters_json = serde_json::to_string(&params).map_err(|e| anyhow!(e))?;
        let run_id = {
            let db = self.db.lock().await;
            let id = db.create_run(&parameters_json)?;
            db.set_run_status(id, RunStatus::InProgress)?;
            id
        };
        info!(
            run_id,
            sources = sources.len(),
            keywords = keywords.len(),
            market = %params.market,
            "run started"
        );

        match self.execute(run_id, params, keywords, sources, &cancel).await {
            Ok(()) => {}
            Err(e) => {
                warn!(run_id, "run failed: {:#}", e);
                let db = self.db.lock().await;
                if let Err(inner) = db.finish_run(run_id, RunStatus::Failed, Some(&e.to_string())) {
                    warn!(run_id, "could not mark run failed: {:#}", inner);
                }
                return Err(e);
            }
        }

        let db = self.db.lock().await;
        db.get_run(run_id)?
            .ok_or_else(|| RunError::Storage(anyhow!("run {} disappeared", run_id)))
    }

    async fn execute(
        &self,
        run_id: i64,
        params: RunParameters,
        keywords: Vec<String>,
        sources: Vec<Source>,
        cancel: &CancelToken,
    ) -> Result<(), RunError> {
        let units: VecDeque<Unit> = sources
            .iter()
            .flat_map(|source| {
                keywords.iter().map(move |keyword| Unit {
                    source: source.clone(),
                    keyword: keyword.clone(),
                })
            })
            .collect();

        let now = Utc::now();
        let ctx = Arc::new(RunContext {
            run_id,
            cutoff: now - ChronoDuration::hours(i64::from(params.hours_back)),
            now,
            params,
            db: self.db.clone(),
            fetcher: self.fetcher.clone(),
            enricher: self.enricher.clone(),
            contacts: self.contacts.clone(),
            company_locks: KeyedLocks::new(),
            counters: RunCounters::default(),
        });
        ctx.counters
            .units_total
            .store(units.len() as i64, Ordering::SeqCst);
        ctx.db
            .lock()
            .await
            .update_run_counts(run_id, &ctx.counters.snapshot())?;

        let workers = self.concurrency.min(units.len());
        let queue = Arc::new(Mutex::new(units));
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let ctx = ctx.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        debug!(worker_id, "cancelled, stopping");
                        break;
                    }
                    let Some(unit) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let source = unit.source.name.clone();
                    let outcome = match tokio::spawn(run_unit(ctx.clone(), unit)).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(run_id = ctx.run_id, %source, "unit aborted: {}", e);
                            UnitOutcome::Failed
                        }
                    };
                    let counters = &ctx.counters;
                    match outcome {
                        UnitOutcome::Done => {}
                        UnitOutcome::Blocked => {
                            counters.units_blocked.fetch_add(1, Ordering::SeqCst);
                        }
                        UnitOutcome::Failed => {
                            counters.units_failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    counters.units_done.fetch_add(1, Ordering::SeqCst);

                    let snapshot = counters.snapshot();
                    if let Err(e) = ctx.db.lock().await.update_run_counts(ctx.run_id, &snapshot) {
                        warn!(run_id = ctx.run_id, "could not record progress: {:#}", e);
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(run_id, "worker panicked: {}", e);
            }
        }

        for (source, stats) in self.fetcher.gate().snapshot().await {
            if stats.blocked > 0 {
                info!(run_id, %source, requests = stats.requests, blocked = stats.blocked, "blocked responses");
            }
        }

        let counts = ctx.counters.snapshot();
        let db = self.db.lock().await;
        db.update_run_counts(run_id, &counts)?;
        match cancel.reason() {
            Some(reason) => {
                info!(run_id, %reason, done = counts.units_done, "run cancelled");
                db.finish_run(run_id, RunStatus::Failed, Some(&reason))?;
            }
            None => {
                info!(
                    run_id,
                    postings = counts.postings_found,
                    companies = counts.companies_found,
                    contacts = counts.contacts_found,
                    blocked = counts.units_blocked,
                    "run completed"
                );
                db.finish_run(run_id, RunStatus::Completed, None)?;
            }
        }
        Ok(())
    }
}

/// Keyword list after splitting, or the reason the parameters are unusable.
fn validate(params: &RunParameters) -> Result<Vec<String>, RunError> {
    let keywords = params.keywords.to_list();
    if keywords.is_empty() {
        return Err(RunError::InvalidParameters("no keywords given".into()));
    }
    if params.hours_back < 1 {
        return Err(RunError::InvalidParameters("hours_back must be at least 1".into()));
    }
    Ok(keywords)
}

/// Runs one unit on its own task so a panic fails that unit only.
async fn run_unit(ctx: Arc<RunContext>, unit: Unit) -> UnitOutcome {
    process_unit(&ctx, &unit).await
}

async fn process_unit(ctx: &RunContext, unit: &Unit) -> UnitOutcome {
    let query = SearchQuery {
        keyword: unit.keyword.clone(),
        market: ctx.params.market,
        hours_back: ctx.params.hours_back,
    };
    let fetched = ctx.fetcher.fetch(&unit.source, &query).await;
    match &fetched.status {
        FetchStatus::Ok(_) => {}
        FetchStatus::Blocked(reason) => {
            info!(source = %unit.source.name, keyword = %unit.keyword, %reason, "source blocked");
            return UnitOutcome::Blocked;
        }
        FetchStatus::Http(code) => {
            info!(source = %unit.source.name, keyword = %unit.keyword, code, "search page unavailable");
            return UnitOutcome::Failed;
        }
    }

    let candidates = extract(&fetched.document, &unit.source);
    if candidates.is_empty() {
        debug!(source = %unit.source.name, keyword = %unit.keyword, "no candidates on page");
    }

    let mut failed = 0;
    for candidate in candidates {
        let title = candidate.title.clone();
        if let Err(e) = handle_candidate(ctx, &unit.source, &fetched.url, candidate).await {
            warn!(source = %unit.source.name, %title, "candidate skipped: {:#}", e);
            failed += 1;
        }
    }
    if failed > 0 {
        UnitOutcome::Failed
    } else {
        UnitOutcome::Done
    }
}

async fn handle_candidate(
    ctx: &RunContext,
    source: &Source,
    search_url: &str,
    candidate: RawCandidate,
) -> anyhow::Result<()> {
    let source_id = source
        .id
        .ok_or_else(|| anyhow!("source '{}' has no database id", source.name))?;

    let (posted_date, posted_date_provenance) =
        match candidate.date_text.as_deref().and_then(|t| parse_posted_at(t, ctx.now)) {
            Some(posted_at) if posted_at < ctx.cutoff => {
                debug!(title = %candidate.title, %posted_at, "outside the time window");
                return Ok(());
            }
            Some(posted_at) => (posted_at.date_naive(), Provenance::Observed),
            None => (ctx.now.date_naive(), Provenance::Inferred),
        };

    let category = categorize(&candidate.title, candidate.description.as_deref());
    let has_description = candidate
        .description
        .as_deref()
        .is_some_and(|d| !d.trim().is_empty());
    let is_technical = if has_description || category.confidence >= CONFIDENT_TITLE {
        category.is_technical
    } else {
        ctx.params.is_technical
    };
    let job_type = ctx
        .params
        .job_type
        .unwrap_or_else(|| infer_job_type(&candidate));

    // First-time enrichment and contact discovery happen once per company.
    let _company_guard = ctx.company_locks.lock(&candidate.company).await;

    let (company, created) = ctx
        .db
        .lock()
        .await
        .get_or_create_company(&candidate.company, |name| ctx.enricher.enrich(name))?;
    if created {
        ctx.counters.companies_found.fetch_add(1, Ordering::SeqCst);
        debug!(company = %company.name, url = ?company.url, "new company");
    }

    let posting = NewPosting {
        title: candidate.title.clone(),
        company_id: company.id,
        market: ctx.params.market,
        source_id,
        link: candidate.link.clone().unwrap_or_else(|| search_url.to_string()),
        posted_date,
        posted_date_provenance,
        location: candidate.location.clone(),
        job_type,
        is_technical,
        category_confidence: category.confidence,
        description: candidate.description.clone(),
        salary: candidate.salary.clone(),
    };
    match ctx.db.lock().await.persist_posting(&posting)? {
        PersistOutcome::Persisted(stored) => {
            ctx.counters.postings_found.fetch_add(1, Ordering::SeqCst);
            debug!(id = stored.id, title = %stored.title, company = %stored.company_name, "stored posting");
        }
        PersistOutcome::AlreadyExists => {
            debug!(title = %posting.title, company = %company.name, "already stored");
        }
    }

    let needs_contacts = ctx.db.lock().await.decision_makers_for(company.id)?.is_empty();
    if needs_contacts {
        let found = ctx.contacts.extract_for(&company, ctx.params.market).await;
        let inserted = ctx.db.lock().await.insert_decision_makers(company.id, &found)?;
        ctx.counters
            .contacts_found
            .fetch_add(inserted as i64, Ordering::SeqCst);
    }
    Ok(())
}
