//! The crawl state machine, run by the primary process
//!
//! # Lifecycle of one queue item
//!
//! ```text
//! next() ─ invalid url ─────────────────────────────▶ consumed
//!    │ ─ not eligible ─────────────────────────────▶ not_spidering
//!    │ ─ fetched before (< 400) ──▶ spider ─────────▶ spidered
//!    ▼
//! robots_check ─ disallowed ───────────────────────▶ not_spidering (ROBOTS_TXT)
//!    ▼
//! head_request ─ bad content type ─────────────────▶ not_spidering (INVALID_CONTENT_TYPE)
//!    ▼   (errors fall through to GET)
//! get_request ─ error ─▶ retried on a later scan, 3rd error ▶ not_spidering (TOO_MANY_ERRORS)
//!    ▼
//! spider ─▶ found_urls ─▶ spidered
//! ```
//!
//! Every storage mutation goes through the write-back buffer, which is
//! flushed at the start of each `next()` call and once more at shutdown.

use super::messages::{CrawlTask, PrimaryMessage, WorkerMessage};
use super::progress::ProgressTracker;
use super::writeback::WriteBack;
use crate::config::Config;
use crate::dispatch::{Context, DispatchError, Next, Primary, WorkerId};
use crate::fetch::is_content_type_allowed;
use crate::queue::{DomainRules, Priority, PriorityRules, QueueScanner};
use crate::storage::{Session, Storage, StorageResult};
use crate::url::{hostname_of, is_http_scheme, is_root_path, url_looks_valid};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use url::Url;

/// GET failures for one URL before it is given up on
pub const MAX_REQUEST_ERRORS: u32 = 3;

type Ctx<'a> = Context<'a, WorkerMessage, PrimaryMessage>;

/// Why an item will not be spidered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: &'static str,
    pub message: String,
}

impl Rejection {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Decides whether a queued URL may be spidered
///
/// Checks run in a fixed order and the first failure wins. `priority` is the
/// URL's priority under the current rules, not the one it was queued with. A
/// domain's stored decision takes precedence over the configured domain rules.
pub fn check_eligibility<S: Storage>(
    storage: &S,
    rules: &DomainRules,
    url: &Url,
    priority: Priority,
) -> StorageResult<Option<Rejection>> {
    if !is_http_scheme(url) {
        return Ok(Some(Rejection::new(
            "BAD_PROTOCOL",
            format!("URL has bad protocol ({})", url.scheme()),
        )));
    }

    if priority == Priority::Ignore {
        return Ok(Some(Rejection::new("IGNORED", "URL is ignored")));
    }

    let Some(hostname) = hostname_of(url) else {
        return Ok(Some(Rejection::new("UNKNOWN_DOMAIN", "URL has no hostname")));
    };

    let policy = storage.domain_policy(&hostname)?;
    if !policy.known {
        return Ok(Some(Rejection::new(
            "UNKNOWN_DOMAIN",
            "URL is for an unknown domain",
        )));
    }

    let rejection = match policy.ok_to_spider {
        Some(true) => None,
        Some(false) => Some(Rejection::new(
            "NOT_OK_TO_SPIDER",
            format!("{} marked as not ok to spider", hostname),
        )),
        None => match rules.can_spider(&hostname) {
            Some(true) => None,
            Some(false) => Some(Rejection::new(
                "CONFIG_SAYS_NO",
                format!("Domain rules do not allow spidering {}", hostname),
            )),
            None => Some(Rejection::new(
                "NOT_OK_TO_SPIDER",
                format!(
                    "{} is not explicitly marked as ok to spider, and config did not say yes",
                    hostname
                ),
            )),
        },
    };

    Ok(rejection)
}

/// Primary-side crawl orchestration over a `Storage` backend
pub struct CrawlPrimary<S: Storage> {
    config: Config,
    domain_rules: DomainRules,
    priority_rules: PriorityRules,
    storage: S,
    session: Session,
    scanner: QueueScanner,
    writeback: WriteBack,
    /// Queue items currently with a worker
    in_flight: HashMap<i64, WorkerId>,
    /// GET failures per URL during this run
    error_counts: HashMap<String, u32>,
    progress: ProgressTracker,
}

impl<S: Storage> CrawlPrimary<S> {
    /// Starts a new session on `storage`
    pub fn new(config: Config, mut storage: S) -> crate::Result<Self> {
        let priority_rules = PriorityRules::compile(&config.priority)?;
        let session = storage.create_session()?;
        tracing::info!("Started session #{}", session.id);

        Ok(Self {
            domain_rules: DomainRules::new(&config.domains),
            priority_rules,
            config,
            storage,
            session,
            scanner: QueueScanner::new(),
            writeback: WriteBack::new(),
            in_flight: HashMap::new(),
            error_counts: HashMap::new(),
            progress: ProgressTracker::new(),
        })
    }

    /// Replaces the scanner, e.g. to use smaller batches
    pub fn with_scanner(mut self, scanner: QueueScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Number of GET failures seen for a URL in this run
    pub fn error_count(&self, url: &str) -> u32 {
        self.error_counts.get(url).copied().unwrap_or(0)
    }

    /// Number of queue items currently with a worker
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Writes buffered mutations; failures stay buffered for the next call
    pub fn flush(&mut self) -> StorageResult<()> {
        self.writeback.flush(&mut self.storage).map(|_| ())
    }

    /// Sends the next step for an item, preferably to the worker that
    /// reported the previous one
    fn dispatch(&mut self, message: WorkerMessage, ctx: &mut Ctx<'_>) {
        let Some(id) = message.task().map(|t| t.queue_item_id) else {
            return;
        };

        match ctx.send(message) {
            Some(worker) => {
                self.in_flight.insert(id, worker);
            }
            None => {
                tracing::warn!("No worker available for queue item #{}, leaving it for a later scan", id);
                self.in_flight.remove(&id);
            }
        }
    }

    fn consume(&mut self, task: &CrawlTask) {
        self.writeback.consume(task.queue_item_id);
        self.in_flight.remove(&task.queue_item_id);
    }

    fn ignore_domain_of(&mut self, url: &str) {
        let Some(hostname) = Url::parse(url).ok().as_ref().and_then(hostname_of) else {
            return;
        };
        tracing::info!("robots.txt disallows the root of {}, ignoring the domain", hostname);
        self.writeback.ignore_domain(&hostname);
        self.scanner.forget_host(&hostname);
    }

    fn log_progress(&mut self) {
        if self.progress.summary_due() {
            let status = match self.storage.queue_status() {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::debug!("Cannot read queue status: {}", e);
                    None
                }
            };
            self.progress.log_summary(status);
        }
    }
}

impl<S: Storage> Primary for CrawlPrimary<S> {
    type Outbound = WorkerMessage;
    type Inbound = PrimaryMessage;

    fn parse(&self, value: Value) -> Option<PrimaryMessage> {
        PrimaryMessage::parse(value)
    }

    fn initialize_worker(&mut self, worker: WorkerId, ctx: &mut Ctx<'_>) -> crate::Result<()> {
        let message = WorkerMessage::InitWorker {
            config: Box::new(self.config.clone()),
        };
        if ctx.send_to(worker, message) {
            Ok(())
        } else {
            Err(DispatchError::Undeliverable(worker).into())
        }
    }

    fn handle(&mut self, message: PrimaryMessage, ctx: &mut Ctx<'_>) -> crate::Result<()> {
        self.progress.update(&message);

        match message {
            PrimaryMessage::Start { task } => {
                self.dispatch(WorkerMessage::RobotsCheck { task }, ctx);
            }

            PrimaryMessage::AllowedByRobots { task } => {
                self.dispatch(WorkerMessage::HeadRequest { task }, ctx);
            }

            PrimaryMessage::DisallowedByRobots { task } => {
                if Url::parse(&task.url).map(|u| is_root_path(&u)).unwrap_or(false) {
                    self.ignore_domain_of(&task.url);
                }
                ctx.emit_local(PrimaryMessage::not_spidering(
                    task,
                    "ROBOTS_TXT",
                    "URL disallowed by robots.txt",
                ));
            }

            PrimaryMessage::MakingHeadRequest { .. }
            | PrimaryMessage::MakingGetRequest { .. }
            | PrimaryMessage::Spidering { .. } => {}

            PrimaryMessage::HeadRequestSuccess { task, request } => {
                let content_type = request.content_type.trim();
                if content_type.is_empty()
                    || is_content_type_allowed(content_type, &self.config.spider.allowed_content_types)
                {
                    self.dispatch(WorkerMessage::GetRequest { task }, ctx);
                } else {
                    let message = format!(
                        "HEAD returned content type '{}', which is not allowed",
                        content_type
                    );
                    ctx.emit_local(PrimaryMessage::not_spidering(task, "INVALID_CONTENT_TYPE", message));
                }
            }

            PrimaryMessage::HeadRequestError { task, error } => {
                tracing::debug!("HEAD {} failed ({}), trying GET", task.url, error.code);
                self.dispatch(WorkerMessage::GetRequest { task }, ctx);
            }

            PrimaryMessage::GetRequestSuccess { task, request } => {
                self.writeback.record_fetch(task.session_id, request.clone());
                self.dispatch(WorkerMessage::Spider { task, request }, ctx);
            }

            PrimaryMessage::GetRequestError { task, error } => {
                let count = self.error_counts.entry(task.url.clone()).or_insert(0);
                *count += 1;
                let count = *count;

                tracing::warn!(
                    "GET {} failed ({} of {}): {}: {}",
                    task.url,
                    count,
                    MAX_REQUEST_ERRORS,
                    error.code,
                    error.message
                );
                self.writeback
                    .record_fetch_error(task.session_id, &task.url, &error.code, &error.message);

                if count >= MAX_REQUEST_ERRORS {
                    let message = format!("Received too many errors for url '{}'", task.url);
                    ctx.emit_local(PrimaryMessage::not_spidering(task, "TOO_MANY_ERRORS", message));
                } else {
                    self.in_flight.remove(&task.queue_item_id);
                }
            }

            PrimaryMessage::FoundUrls { task, urls } => {
                let mut accepted = 0;
                for found in urls {
                    match Url::parse(&found.url) {
                        Ok(url) if url_looks_valid(&url) => {
                            self.writeback.enqueue(url, found.priority, false);
                            accepted += 1;
                        }
                        _ => tracing::debug!("Dropping found URL {}", found.url),
                    }
                }
                tracing::debug!("{} new URLs from {}", accepted, task.url);
            }

            PrimaryMessage::Spidered { task, signals } => {
                if let Some(hostname) = Url::parse(&task.url).ok().as_ref().and_then(hostname_of) {
                    self.writeback.save_signals(&hostname, signals);
                }
                self.consume(&task);
            }

            PrimaryMessage::NotSpidering { task, error } => {
                tracing::info!("Not spidering {}: {}: {}", task.url, error.code, error.message);
                self.error_counts.remove(&task.url);
                self.consume(&task);
            }
        }

        Ok(())
    }

    fn next(&mut self, worker: WorkerId, ctx: &mut Ctx<'_>) -> crate::Result<Next<WorkerMessage>> {
        if let Err(e) = self.flush() {
            tracing::warn!("Write-back failed, will retry: {}", e);
        }
        self.log_progress();

        let mut exclude: HashSet<i64> = self.in_flight.keys().copied().collect();
        exclude.extend(self.writeback.pending_consumes());

        let storage = &self.storage;
        let Some(item) = self
            .scanner
            .next_with(&exclude, |limit, exclude| storage.next_queue_batch(limit, exclude))?
        else {
            return Ok(Next::Stop);
        };

        let task = CrawlTask {
            queue_item_id: item.id,
            session_id: self.session.id,
            url: item.url.clone(),
        };

        let url = match Url::parse(&item.url) {
            Ok(url) if url_looks_valid(&url) => url,
            _ => {
                tracing::debug!("Consuming invalid URL #{}: {}", item.id, item.url);
                self.writeback.consume(item.id);
                return Ok(Next::Skip);
            }
        };

        let priority = self.priority_rules.priority_of(&url);
        if let Some(rejection) = check_eligibility(&self.storage, &self.domain_rules, &url, priority)? {
            ctx.emit_local(PrimaryMessage::not_spidering(task, rejection.code, rejection.message));
            return Ok(Next::Skip);
        }

        let message = match self.storage.most_recent_fetch(&item.url)? {
            Some(request) if request.status < 400 => {
                tracing::debug!("Reusing stored {} response for {}", request.status, item.url);
                WorkerMessage::Spider { task, request }
            }
            _ => WorkerMessage::RobotsCheck { task },
        };

        self.in_flight.insert(item.id, worker);
        Ok(Next::Work(message))
    }

    fn on_worker_exit(&mut self, worker: WorkerId) {
        let before = self.in_flight.len();
        self.in_flight.retain(|_, w| *w != worker);
        let lost = before - self.in_flight.len();
        if lost > 0 {
            tracing::warn!("Worker {} exited with {} items in flight; they stay queued", worker, lost);
        }
    }

    fn finish(&mut self) -> crate::Result<()> {
        self.flush()?;
        self.progress.log_summary(self.storage.queue_status().ok());
        tracing::info!("Session #{} finished", self.session.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::messages::{FoundUrl, RequestError};
    use crate::dispatch::TestHarness;
    use crate::fetch::FetchedRequest;
    use crate::storage::SqliteStorage;

    fn create_test_config() -> Config {
        parse_config(
            r#"
[spider]
database-file = ":memory:"

[user-agent]
crawler-name = "testbot"
crawler-version = "1.0"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"

[domains]
default = true
deny = ["*.denied.com"]
"#,
        )
        .unwrap()
    }

    fn create_test_primary(urls: &[(&str, Priority)]) -> CrawlPrimary<SqliteStorage> {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        for (url, priority) in urls {
            storage.enqueue(&Url::parse(url).unwrap(), *priority, false).unwrap();
        }
        CrawlPrimary::new(create_test_config(), storage).unwrap()
    }

    fn task(primary: &CrawlPrimary<SqliteStorage>, id: i64, url: &str) -> CrawlTask {
        CrawlTask {
            queue_item_id: id,
            session_id: primary.session().id,
            url: url.to_string(),
        }
    }

    fn fetched(url: &str, status: u16, content_type: &str) -> FetchedRequest {
        FetchedRequest {
            url: url.to_string(),
            status,
            content_type: content_type.to_string(),
            headers: vec![],
            body: Some("<html></html>".to_string()),
        }
    }

    /// Handles a message plus everything it emits locally; returns what was sent
    fn deliver(
        primary: &mut CrawlPrimary<SqliteStorage>,
        harness: &mut TestHarness,
        message: PrimaryMessage,
    ) -> Vec<Value> {
        let mut ctx = harness.context();
        primary.handle(message, &mut ctx).unwrap();
        while let Some(local) = ctx.take_local() {
            primary.handle(local, &mut ctx).unwrap();
        }
        drop(ctx);
        harness.sent()
    }

    /// Pulls once; returns the work and anything emitted locally
    fn pull(
        primary: &mut CrawlPrimary<SqliteStorage>,
        harness: &mut TestHarness,
    ) -> Next<WorkerMessage> {
        let mut ctx = harness.context();
        let next = primary.next(TestHarness::WORKER, &mut ctx).unwrap();
        while let Some(local) = ctx.take_local() {
            primary.handle(local, &mut ctx).unwrap();
        }
        next
    }

    #[test]
    fn test_eligibility_order() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let rules = DomainRules::new(&create_test_config().domains);
        let known = Url::parse("https://known.com/").unwrap();
        storage.enqueue(&known, Priority::Medium, false).unwrap();

        let check = |storage: &SqliteStorage, url: &str, priority| {
            check_eligibility(storage, &rules, &Url::parse(url).unwrap(), priority)
                .unwrap()
                .map(|r| r.code)
        };

        assert_eq!(check(&storage, "ftp://known.com/", Priority::Ignore), Some("BAD_PROTOCOL"));
        assert_eq!(check(&storage, "https://known.com/", Priority::Ignore), Some("IGNORED"));
        assert_eq!(check(&storage, "https://stranger.com/", Priority::High), Some("UNKNOWN_DOMAIN"));
        assert_eq!(check(&storage, "https://known.com/", Priority::Medium), None);

        storage.mark_domains_ok_to_spider(&["known.com".to_string()], false).unwrap();
        assert_eq!(check(&storage, "https://known.com/", Priority::Medium), Some("NOT_OK_TO_SPIDER"));
    }

    #[test]
    fn test_stored_decision_beats_domain_rules() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let rules = DomainRules::new(&create_test_config().domains);
        let url = Url::parse("https://www.denied.com/").unwrap();
        storage.enqueue(&url, Priority::Medium, false).unwrap();

        let code = check_eligibility(&storage, &rules, &url, Priority::Medium).unwrap().map(|r| r.code);
        assert_eq!(code, Some("CONFIG_SAYS_NO"));

        storage.mark_domains_ok_to_spider(&["www.denied.com".to_string()], true).unwrap();
        assert_eq!(check_eligibility(&storage, &rules, &url, Priority::Medium).unwrap(), None);
    }

    #[test]
    fn test_undecided_domain_is_not_ok() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let rules = DomainRules::default();
        let url = Url::parse("https://maybe.com/").unwrap();
        storage.enqueue(&url, Priority::Medium, false).unwrap();

        let rejection = check_eligibility(&storage, &rules, &url, Priority::Medium).unwrap().unwrap();
        assert_eq!(rejection.code, "NOT_OK_TO_SPIDER");
        assert!(rejection.message.contains("config did not say yes"));
    }

    #[test]
    fn test_next_sends_robots_check() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let mut harness = TestHarness::new();

        match pull(&mut primary, &mut harness) {
            Next::Work(WorkerMessage::RobotsCheck { task }) => assert_eq!(task.url, "https://a.com/"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(primary.in_flight(), 1);

        // The in-flight item is not handed out twice
        assert!(matches!(pull(&mut primary, &mut harness), Next::Stop));
    }

    #[test]
    fn test_next_reuses_stored_fetch() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let session = primary.session().id;
        primary
            .storage
            .record_fetch(session, &fetched("https://a.com/", 200, "text/html"))
            .unwrap();
        let mut harness = TestHarness::new();

        match pull(&mut primary, &mut harness) {
            Next::Work(WorkerMessage::Spider { request, .. }) => assert_eq!(request.status, 200),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_next_ignores_stored_failures() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let session = primary.session().id;
        primary
            .storage
            .record_fetch(session, &fetched("https://a.com/", 500, "text/html"))
            .unwrap();
        let mut harness = TestHarness::new();

        assert!(matches!(
            pull(&mut primary, &mut harness),
            Next::Work(WorkerMessage::RobotsCheck { .. })
        ));
    }

    #[test]
    fn test_ineligible_item_is_consumed() {
        let mut primary = create_test_primary(&[("https://www.denied.com/", Priority::High)]);
        let mut harness = TestHarness::new();

        assert!(matches!(pull(&mut primary, &mut harness), Next::Skip));
        assert!(matches!(pull(&mut primary, &mut harness), Next::Stop));
        assert_eq!(primary.storage().queue_status().unwrap().processed, 1);
        assert_eq!(
            primary.progress().state_of(1),
            Some(crate::state::CrawlItemState::NotSpidered)
        );
    }

    #[test]
    fn test_priority_rules_apply_at_dispatch() {
        // Queued at Medium before the ignore rule existed
        let config = parse_config(
            r#"
[spider]
database-file = ":memory:"

[user-agent]
crawler-name = "testbot"
crawler-version = "1.0"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"

[priority]
ignore = [{ path = "/private" }]

[domains]
default = true
"#,
        )
        .unwrap();
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .enqueue(&Url::parse("https://a.com/private").unwrap(), Priority::Medium, false)
            .unwrap();
        let mut primary = CrawlPrimary::new(config, storage).unwrap();
        let mut harness = TestHarness::new();

        let url = Url::parse("https://a.com/private").unwrap();
        let priority = primary.priority_rules.priority_of(&url);
        assert_eq!(priority, Priority::Ignore);
        let rejection =
            check_eligibility(primary.storage(), &primary.domain_rules, &url, priority).unwrap();
        assert_eq!(rejection.map(|r| r.code), Some("IGNORED"));

        assert!(matches!(pull(&mut primary, &mut harness), Next::Skip));
        assert!(harness.sent().is_empty());
        assert!(matches!(pull(&mut primary, &mut harness), Next::Stop));
        assert_eq!(primary.storage().queue_status().unwrap().processed, 1);
        assert_eq!(
            primary.progress().state_of(1),
            Some(crate::state::CrawlItemState::NotSpidered)
        );
    }

    #[test]
    fn test_robots_and_head_flow() {
        let mut primary = create_test_primary(&[]);
        let mut harness = TestHarness::new();
        let t = task(&primary, 1, "https://a.com/page");

        let sent = deliver(&mut primary, &mut harness, PrimaryMessage::AllowedByRobots { task: t.clone() });
        assert_eq!(sent[0]["type"], "head_request");

        let sent = deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::HeadRequestSuccess {
                task: t.clone(),
                request: fetched(&t.url, 200, "text/html; charset=utf-8"),
            },
        );
        assert_eq!(sent[0]["type"], "get_request");

        let sent = deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::HeadRequestError {
                task: t.clone(),
                error: RequestError::new("TIMED_OUT", "slow"),
            },
        );
        assert_eq!(sent[0]["type"], "get_request");

        let sent = deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::HeadRequestSuccess {
                task: t.clone(),
                request: fetched(&t.url, 200, ""),
            },
        );
        assert_eq!(sent[0]["type"], "get_request");
    }

    #[test]
    fn test_head_with_disallowed_content_type() {
        let mut primary = create_test_primary(&[("https://a.com/file", Priority::Medium)]);
        let mut harness = TestHarness::new();
        let t = task(&primary, 1, "https://a.com/file");

        let sent = deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::HeadRequestSuccess {
                task: t,
                request: fetched("https://a.com/file", 200, "application/pdf"),
            },
        );
        assert!(sent.is_empty());

        primary.flush().unwrap();
        assert_eq!(primary.storage().queue_status().unwrap().processed, 1);
    }

    #[test]
    fn test_get_errors_give_up_on_third() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let mut harness = TestHarness::new();
        let t = task(&primary, 1, "https://a.com/");
        let error = || RequestError::new("CONNECTION_FAILED", "refused");

        for expected in 1..MAX_REQUEST_ERRORS {
            deliver(
                &mut primary,
                &mut harness,
                PrimaryMessage::GetRequestError { task: t.clone(), error: error() },
            );
            assert_eq!(primary.error_count(&t.url), expected);
            primary.flush().unwrap();
            assert_eq!(primary.storage().queue_status().unwrap().processed, 0);
        }

        deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::GetRequestError { task: t.clone(), error: error() },
        );
        primary.flush().unwrap();

        // not_spidering resets the counter and consumes the item
        assert_eq!(primary.error_count(&t.url), 0);
        assert_eq!(primary.storage().queue_status().unwrap().processed, 1);
        assert!(matches!(pull(&mut primary, &mut harness), Next::Stop));
    }

    #[test]
    fn test_get_success_records_and_spiders() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let mut harness = TestHarness::new();
        let t = task(&primary, 1, "https://a.com/");

        let sent = deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::GetRequestSuccess {
                task: t.clone(),
                request: fetched(&t.url, 200, "text/html"),
            },
        );
        assert_eq!(sent[0]["type"], "spider");

        primary.flush().unwrap();
        let stored = primary.storage().most_recent_fetch(&t.url).unwrap().unwrap();
        assert_eq!(stored.status, 200);
    }

    #[test]
    fn test_found_urls_and_spidered() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let mut harness = TestHarness::new();
        let t = task(&primary, 1, "https://a.com/");

        deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::FoundUrls {
                task: t.clone(),
                urls: vec![
                    FoundUrl { url: "https://b.com/x".to_string(), priority: Priority::Medium },
                    FoundUrl { url: "https://localhost/".to_string(), priority: Priority::High },
                    FoundUrl { url: "https://b.com/x".to_string(), priority: Priority::Low },
                ],
            },
        );
        deliver(
            &mut primary,
            &mut harness,
            PrimaryMessage::Spidered { task: t.clone(), signals: vec!["nginx".to_string()] },
        );
        primary.flush().unwrap();

        let status = primary.storage().queue_status().unwrap();
        assert_eq!(status.processed, 1);
        assert_eq!(status.low, 1);
        assert_eq!(status.high, 0);
    }

    #[test]
    fn test_root_disallow_ignores_domain() {
        let mut primary = create_test_primary(&[
            ("https://a.com/", Priority::High),
            ("https://a.com/other", Priority::Medium),
            ("https://b.com/", Priority::Medium),
        ]);
        let mut harness = TestHarness::new();
        let t = task(&primary, 1, "https://a.com/");

        let sent = deliver(&mut primary, &mut harness, PrimaryMessage::DisallowedByRobots { task: t });
        assert!(sent.is_empty());
        primary.flush().unwrap();

        let status = primary.storage().queue_status().unwrap();
        assert_eq!(status.processed, 1);
        assert_eq!(status.ignore, 1);
        assert_eq!(status.medium, 1);
    }

    #[test]
    fn test_non_root_disallow_keeps_domain() {
        let mut primary = create_test_primary(&[
            ("https://a.com/private/x", Priority::High),
            ("https://a.com/other", Priority::Medium),
        ]);
        let mut harness = TestHarness::new();
        let t = task(&primary, 1, "https://a.com/private/x");

        deliver(&mut primary, &mut harness, PrimaryMessage::DisallowedByRobots { task: t });
        primary.flush().unwrap();

        let status = primary.storage().queue_status().unwrap();
        assert_eq!(status.ignore, 0);
        assert_eq!(status.medium, 1);
    }

    #[test]
    fn test_undeliverable_work_is_released() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let mut harness = TestHarness::new();
        assert!(matches!(pull(&mut primary, &mut harness), Next::Work(_)));
        assert_eq!(primary.in_flight(), 1);

        harness.close();
        let t = task(&primary, 1, "https://a.com/");
        deliver(&mut primary, &mut harness, PrimaryMessage::AllowedByRobots { task: t });
        assert_eq!(primary.in_flight(), 0);
    }

    #[test]
    fn test_worker_exit_releases_items() {
        let mut primary = create_test_primary(&[("https://a.com/", Priority::High)]);
        let mut harness = TestHarness::new();
        assert!(matches!(pull(&mut primary, &mut harness), Next::Work(_)));

        primary.on_worker_exit(TestHarness::WORKER);
        assert_eq!(primary.in_flight(), 0);
    }
}
