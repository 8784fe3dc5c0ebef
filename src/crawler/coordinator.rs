//! Crawler coordinator - main crawl orchestration logic
//!
//! One loop owns the session state, the delayed queue and the retry
//! controller. Fetches run as tasks in a bounded `JoinSet`; each task fetches,
//! classifies and parses, and hands its result back to the loop, which is the
//! only place state changes. Listing pages are walked one at a time; the next
//! page is queued when the current one completes.

use crate::config::{Config, CrawlMode};
use crate::crawler::classifier::Classifier;
use crate::crawler::fetcher::{FetchOutcome, Fetcher};
use crate::crawler::retry::{FailureClass, RetryController, RetryDecision};
use crate::crawler::scheduler::Scheduler;
use crate::enrich::{build_enricher, Enricher};
use crate::identity::IdentityPool;
use crate::proxy::{PoolStats, ProxyPool};
use crate::site::{build_site, ExtractError, ExtractedRecord, ListingPage, Site};
use crate::state::{CrawlSessionState, FetchAttempt, FetchTarget, SessionTotals, StopReason};
use crate::storage::{open_storage, BatchingSink, RecordSink, RunStatus, SqliteStorage};
use crate::SweepError;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// What a fetch task found
#[derive(Debug)]
enum TaskResult {
    Listing(ListingPage),
    Detail(Box<ExtractedRecord>),
    /// A genuine page with nothing to store
    Dropped(String),
    Failed(FailureClass, String),
}

#[derive(Debug)]
struct Completed {
    attempt: FetchAttempt,
    result: TaskResult,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub run_id: i64,
    pub website: String,
    pub mode: CrawlMode,
    pub stop_reason: StopReason,
    pub totals: SessionTotals,
    pub records_failed: u64,
    pub last_page: u32,
    pub seeded_ids: usize,
    pub proxies: PoolStats,
    pub elapsed: Duration,
}

impl SessionReport {
    /// Returns true if the session ended in a way the CLI treats as failure
    pub fn is_error(&self) -> bool {
        self.stop_reason.is_error()
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    site: Arc<dyn Site>,
    classifier: Arc<Classifier>,
    fetcher: Arc<Fetcher>,
    proxies: Arc<ProxyPool>,
    identities: Arc<IdentityPool>,
    retry: RetryController,
    scheduler: Scheduler,
    session: CrawlSessionState,
    sink: BatchingSink<SqliteStorage>,
    enricher: Box<dyn Enricher>,
    cancel: CancellationToken,
    /// New fetches wait until this instant after a think pause
    paused_until: Option<Instant>,
    /// Pool generation a dry-pool refresh was last attempted for
    dry_refresh_generation: Option<u64>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The validated crawler configuration
    /// * `config_hash` - Hash recorded with the run
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(SweepError)` - The database could not be opened or a component failed to build
    pub fn new(config: Config, config_hash: String) -> Result<Self, SweepError> {
        let storage = open_storage(Path::new(&config.output.database_path))?;
        let sink = BatchingSink::new(Arc::new(Mutex::new(storage)), config.output.batch_size);

        let site = build_site(config.crawler.site, config.crawler.base_url.as_deref())?;
        let classifier = Classifier::new(site.stub_markers())?;
        let identities = Arc::new(IdentityPool::new(
            &config.identity,
            site.referer_template().as_deref(),
        ));
        let proxies = Arc::new(ProxyPool::new(&config.proxy)?);
        let fetcher = Fetcher::new(
            identities.cookie_jar(),
            Duration::from_secs(config.crawler.request_timeout_secs),
        );
        let retry = RetryController::new(&config.retry, Arc::clone(&proxies), Arc::clone(&identities));
        let session = CrawlSessionState::new(&config.crawler);
        let enricher = build_enricher(&config.enrichment);

        Ok(Self {
            config: Arc::new(config),
            config_hash,
            site,
            classifier: Arc::new(classifier),
            fetcher: Arc::new(fetcher),
            proxies,
            identities,
            retry,
            scheduler: Scheduler::new(),
            session,
            sink,
            enricher,
            cancel: CancellationToken::new(),
            paused_until: None,
            dry_refresh_generation: None,
        })
    }

    /// Token that stops the session when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the session to completion
    ///
    /// # Returns
    ///
    /// * `Ok(SessionReport)` - The session ended; a stalled session is reported, not raised
    /// * `Err(SweepError)` - Startup storage access failed
    pub async fn run(mut self) -> Result<SessionReport, SweepError> {
        let started = Instant::now();
        let website = self.site.website();
        let mode = self.session.mode();

        let seeded_ids = if mode == CrawlMode::Incremental {
            let seen = self.sink.sink().lock().seen_ids(website)?;
            self.session.seed(seen)
        } else {
            0
        };
        let run_id = self
            .sink
            .sink()
            .lock()
            .create_run(&self.config_hash, website, mode.as_str())?;

        tracing::info!(
            run_id,
            site = self.site.name(),
            mode = %mode,
            seeded_ids,
            concurrency = self.config.crawler.concurrency,
            "Starting crawl session"
        );

        self.refresh_proxies().await;
        self.queue_listing(1, Duration::ZERO);

        let stop_reason = self.dispatch_loop().await;

        if let Err(e) = self.sink.flush() {
            tracing::error!(error = %e, "Failed to write final batch");
        }
        self.session.totals.records_saved = self.sink.saved();

        let status = match stop_reason {
            StopReason::Cancelled => RunStatus::Interrupted,
            StopReason::Stalled => RunStatus::Failed,
            _ => RunStatus::Completed,
        };
        if let Err(e) = self.sink.sink().lock().finish_run(
            run_id,
            status,
            Some(stop_reason.as_str()),
            self.sink.saved(),
        ) {
            tracing::error!(run_id, error = %e, "Failed to record run outcome");
        }

        let report = SessionReport {
            run_id,
            website: website.to_string(),
            mode,
            stop_reason,
            totals: self.session.totals,
            records_failed: self.sink.failed(),
            last_page: self.session.cursor(),
            seeded_ids,
            proxies: self.proxies.stats(),
            elapsed: started.elapsed(),
        };

        if report.is_error() {
            tracing::error!(
                run_id,
                stop = %stop_reason,
                saved = report.totals.records_saved,
                "Crawl session stalled"
            );
        } else {
            tracing::info!(
                run_id,
                stop = %stop_reason,
                pages = report.totals.pages_fetched,
                saved = report.totals.records_saved,
                "Crawl session finished"
            );
        }
        Ok(report)
    }

    async fn dispatch_loop(&mut self) -> StopReason {
        let concurrency = self.config.crawler.concurrency.max(1) as usize;
        let stall_timeout = Duration::from_secs(self.config.crawler.stall_timeout_secs);
        let mut tasks: JoinSet<Completed> = JoinSet::new();
        let mut pagination_stop: Option<StopReason> = None;
        let mut last_progress = Instant::now();

        loop {
            let now = Instant::now();
            let gate = self.dispatch_gate(now);
            while gate.is_none() && tasks.len() < concurrency {
                match self.scheduler.pop_ready(now) {
                    Some(attempt) => self.spawn_fetch(&mut tasks, attempt),
                    None => break,
                }
            }

            if tasks.is_empty() && self.scheduler.is_empty() {
                return pagination_stop.unwrap_or(StopReason::ListingExhausted);
            }

            let next_due = self
                .scheduler
                .next_due()
                .map(|due| gate.map_or(due, |until| due.max(until)));
            let can_dispatch = next_due.is_some() && tasks.len() < concurrency;
            let wake_at = next_due.unwrap_or(now);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::warn!(in_flight = tasks.len(), queued = self.scheduler.len(), "Crawl cancelled");
                    self.abandon(&mut tasks);
                    return StopReason::Cancelled;
                }
                _ = sleep_until(last_progress + stall_timeout) => {
                    tracing::error!(
                        idle_secs = stall_timeout.as_secs(),
                        in_flight = tasks.len(),
                        queued = self.scheduler.len(),
                        "No fetch succeeded within the stall timeout"
                    );
                    self.abandon(&mut tasks);
                    return StopReason::Stalled;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(completed) => {
                            if self.handle_completed(completed, &mut pagination_stop) {
                                last_progress = Instant::now();
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Fetch task failed"),
                    }

                    // Idle: nothing in flight and everything queued is backing off
                    let idle = tasks.is_empty()
                        && self.scheduler.next_due().is_some_and(|due| due > Instant::now());
                    if idle {
                        self.refresh_proxies().await;
                    } else {
                        self.refresh_if_dry().await;
                    }
                }
                _ = sleep_until(wake_at), if can_dispatch => {}
            }
        }
    }

    /// Instant dispatch resumes at, `None` when new fetches may start now
    fn dispatch_gate(&mut self, now: Instant) -> Option<Instant> {
        match self.paused_until {
            Some(until) if until > now => Some(until),
            _ => {
                self.paused_until = None;
                None
            }
        }
    }

    /// Holds back new fetches for `pause`; an existing longer pause wins
    fn pause_dispatch(&mut self, pause: Duration) {
        let until = Instant::now() + pause;
        self.paused_until = Some(self.paused_until.map_or(until, |current| current.max(until)));
    }

    /// Aborts in-flight work and drops everything queued
    ///
    /// Leased proxies are not returned; the next refresh resets leases.
    fn abandon(&mut self, tasks: &mut JoinSet<Completed>) {
        tasks.abort_all();
        let dropped = self.scheduler.drain();
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "Dropped queued attempts");
        }
    }

    fn spawn_fetch(&self, tasks: &mut JoinSet<Completed>, mut attempt: FetchAttempt) {
        attempt.proxy = self.proxies.acquire();
        tracing::debug!(
            url = %attempt.url,
            kind = attempt.kind().as_str(),
            try_no = attempt.count,
            proxy = ?attempt.proxy.as_ref().map(|p| p.to_string()),
            fingerprint = ?attempt.identity.fingerprint,
            "Dispatching fetch"
        );

        let fetcher = Arc::clone(&self.fetcher);
        let site = Arc::clone(&self.site);
        let classifier = Arc::clone(&self.classifier);
        tasks.spawn(async move {
            let headers = site.request_headers(attempt.kind());
            let outcome = fetcher
                .fetch(&attempt.url, &attempt.identity, attempt.proxy.as_ref(), headers)
                .await;
            let result = evaluate(site.as_ref(), &classifier, &attempt, outcome);
            Completed { attempt, result }
        });
    }

    /// Applies a task result to the session
    ///
    /// # Returns
    ///
    /// `true` if the fetch itself succeeded, which resets the stall clock
    fn handle_completed(
        &mut self,
        completed: Completed,
        pagination_stop: &mut Option<StopReason>,
    ) -> bool {
        let Completed {
            mut attempt,
            result,
        } = completed;

        if !matches!(result, TaskResult::Failed(..)) {
            if let Some(proxy) = attempt.proxy.take() {
                self.proxies.release(&proxy);
            }
        }

        match result {
            TaskResult::Listing(listing) => {
                let page = attempt.listing_page().unwrap_or_default();
                let verdict = self.session.record_page(page, &listing);
                tracing::info!(
                    page,
                    items = listing.items.len(),
                    new = verdict.new_items.len(),
                    empty_streak = self.session.consecutive_empty(),
                    "Listing page processed"
                );

                for item in verdict.new_items {
                    let identity = self.identities.draw(self.identities.exclude_mobile());
                    let url = item.url.clone();
                    self.scheduler
                        .push_now(FetchAttempt::new(url, FetchTarget::Detail(item), identity));
                }

                match verdict.stop {
                    Some(reason) => self.stop_pagination(reason, pagination_stop),
                    None => {
                        let pause = self.retry.on_success().unwrap_or(Duration::ZERO);
                        self.queue_listing(page + 1, pause);
                    }
                }
                true
            }
            TaskResult::Detail(mut record) => {
                if let Some(pause) = self.retry.on_success() {
                    tracing::trace!(pause_ms = pause.as_millis() as u64, "Think pause");
                    self.pause_dispatch(pause);
                }
                self.enricher.enrich(&mut record);
                let ad_id = record.ad_id().to_string();
                match self.sink.push(*record) {
                    Ok(written) if written > 0 => {
                        tracing::debug!(ad_id = %ad_id, written, "Records saved")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(ad_id = %ad_id, error = %e, "Failed to save record"),
                }
                self.session.totals.records_saved = self.sink.saved();
                true
            }
            TaskResult::Dropped(reason) => {
                self.session.totals.records_dropped += 1;
                tracing::info!(url = %attempt.url, reason = %reason, "Dropped unusable page");
                true
            }
            TaskResult::Failed(failure, detail) => {
                match self.retry.on_failure(&mut attempt, failure) {
                    RetryDecision::Retry {
                        delay,
                        rotate_fingerprint,
                    } => {
                        self.session.totals.retries += 1;
                        tracing::warn!(
                            url = %attempt.url,
                            failure = %failure,
                            detail = %detail,
                            next_try = attempt.count,
                            delay_ms = delay.as_millis() as u64,
                            rotate_fingerprint,
                            "Fetch failed, retrying"
                        );
                        self.scheduler.push_after(delay, attempt);
                    }
                    RetryDecision::GiveUp => self.give_up(attempt, failure, pagination_stop),
                }
                false
            }
        }
    }

    fn give_up(
        &mut self,
        attempt: FetchAttempt,
        failure: FailureClass,
        pagination_stop: &mut Option<StopReason>,
    ) {
        tracing::error!(
            url = %attempt.url,
            failure = %failure,
            tries = attempt.count,
            "Giving up on fetch"
        );
        match attempt.target {
            FetchTarget::Listing { page } => match self.session.skip_page(page) {
                Some(reason) => self.stop_pagination(reason, pagination_stop),
                None => self.queue_listing(page + 1, Duration::ZERO),
            },
            FetchTarget::Detail(_) => self.session.totals.details_abandoned += 1,
        }
    }

    fn stop_pagination(&mut self, reason: StopReason, pagination_stop: &mut Option<StopReason>) {
        tracing::info!(
            stop = %reason,
            last_page = self.session.cursor(),
            queued = self.scheduler.len(),
            "Pagination stopped, draining detail work"
        );
        pagination_stop.get_or_insert(reason);
    }

    fn queue_listing(&mut self, page: u32, delay: Duration) {
        let identity = self.identities.draw(self.identities.exclude_mobile());
        let attempt = FetchAttempt::new(
            self.site.listing_url(page),
            FetchTarget::Listing { page },
            identity,
        );
        self.scheduler.push_after(delay, attempt);
    }

    async fn refresh_proxies(&self) {
        if !self.proxies.is_enabled() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            total = self.proxies.refresh() => {
                self.fetcher.clear_clients();
                tracing::debug!(total, "Proxy clients reset");
            }
        }
    }

    /// Refreshes the pool when every entry is blacklisted
    ///
    /// At most one attempt per pool generation, so a failing source list is
    /// not hammered while the pool stays dry.
    ///
    /// # Returns
    ///
    /// `true` if a refresh was attempted
    async fn refresh_if_dry(&mut self) -> bool {
        if !self.proxies.is_dry() {
            return false;
        }
        let generation = self.proxies.stats().generation;
        if self.dry_refresh_generation == Some(generation) {
            return false;
        }
        self.dry_refresh_generation = Some(generation);
        tracing::warn!(generation, "Proxy pool ran dry, refreshing");
        self.refresh_proxies().await;
        true
    }
}

/// Classifies and parses a finished fetch
fn evaluate(
    site: &dyn Site,
    classifier: &Classifier,
    attempt: &FetchAttempt,
    outcome: FetchOutcome,
) -> TaskResult {
    let page = match outcome {
        FetchOutcome::Response(page) => page,
        FetchOutcome::Transport(message) => {
            return TaskResult::Failed(FailureClass::TransportFailure, message)
        }
    };

    let classification = classifier.classify(attempt.kind(), page.status, &page.body);
    if let Some(failure) = FailureClass::from_classification(classification) {
        return TaskResult::Failed(failure, format!("HTTP {}", page.status));
    }

    let success = (200..300).contains(&page.status);
    match &attempt.target {
        // A listing page past the end answers 404 on some sites
        FetchTarget::Listing { .. } if !success => TaskResult::Listing(ListingPage::default()),
        FetchTarget::Listing { page: number } => {
            match site.parse_listing(*number, &page.final_url, &page.body) {
                Ok(listing) => TaskResult::Listing(listing),
                Err(e) => TaskResult::Failed(FailureClass::SoftBlocked, e.to_string()),
            }
        }
        FetchTarget::Detail(_) if !success => {
            TaskResult::Dropped(format!("HTTP {}", page.status))
        }
        FetchTarget::Detail(item) => match site.parse_detail(item, &page.final_url, &page.body) {
            Ok(record) => TaskResult::Detail(Box::new(record)),
            Err(ExtractError::Unusable(reason)) => TaskResult::Dropped(reason),
            Err(e) => TaskResult::Dropped(e.to_string()),
        },
    }
}

/// Runs a complete crawl session
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash recorded with the run
pub async fn run_crawl(config: Config, config_hash: String) -> Result<SessionReport, SweepError> {
    let coordinator = Coordinator::new(config, config_hash)?;
    coordinator.run().await
}
