//! Worker-side crawl handlers
//!
//! A worker does the network and parsing work the primary asks for and
//! reports every outcome back as a message. Nothing here fails outward:
//! errors become `*_error` messages.

use super::messages::{CrawlTask, FoundUrl, PrimaryMessage, RequestError, WorkerMessage};
use super::parser::{find_urls, parse_document};
use crate::config::Config;
use crate::dispatch::{Outbox, Worker};
use crate::fetch::{is_content_type_allowed, FetchedRequest, HttpClient, HttpClientOptions};
use crate::queue::PriorityRules;
use crate::robots::RobotsChecker;
use crate::signals::SignalSet;
use crate::SpiderError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

/// Everything a worker builds from the configuration it is sent
struct WorkerState {
    max_in_flight: usize,
    priority_rules: PriorityRules,
    client: HttpClient,
    robots: RobotsChecker,
    signals: SignalSet,
}

impl WorkerState {
    fn build(config: Config) -> crate::Result<Self> {
        let allowed = config.spider.allowed_content_types.clone();
        let options = HttpClientOptions::from_config(&config)
            .with_content_filter(move |content_type| is_content_type_allowed(content_type, &allowed));

        Ok(Self {
            max_in_flight: config.spider.max_in_flight,
            priority_rules: PriorityRules::compile(&config.priority)?,
            client: HttpClient::new(&config.user_agent, options)?,
            robots: RobotsChecker::new(&config)?,
            signals: SignalSet::builtin(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Head,
    Get,
}

/// The crawl worker; configured by its first `init_worker` message
#[derive(Default)]
pub struct CrawlWorker {
    state: OnceCell<WorkerState>,
}

impl CrawlWorker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> crate::Result<&WorkerState> {
        self.state.get().ok_or(SpiderError::WorkerNotInitialized)
    }

    fn initialize(&self, config: Config) -> crate::Result<()> {
        if self.state.initialized() {
            tracing::warn!("Worker already initialized, ignoring new configuration");
            return Ok(());
        }

        let state = WorkerState::build(config)?;
        if self.state.set(state).is_err() {
            tracing::warn!("Worker already initialized, ignoring new configuration");
        }
        tracing::debug!("Worker initialized");
        Ok(())
    }

    async fn execute(
        &self,
        method: Method,
        task: CrawlTask,
        outbox: &Outbox<PrimaryMessage>,
    ) -> crate::Result<()> {
        let state = self.state()?;

        let result = match method {
            Method::Head => {
                outbox.send(PrimaryMessage::MakingHeadRequest { task: task.clone() });
                state.client.head(&task.url).await
            }
            Method::Get => {
                outbox.send(PrimaryMessage::MakingGetRequest { task: task.clone() });
                state.client.get(&task.url).await
            }
        };

        let message = match (method, result) {
            (Method::Head, Ok(request)) => PrimaryMessage::HeadRequestSuccess { task, request },
            (Method::Get, Ok(request)) => PrimaryMessage::GetRequestSuccess { task, request },
            (Method::Head, Err(e)) => PrimaryMessage::HeadRequestError {
                task,
                error: RequestError::from(&e),
            },
            (Method::Get, Err(e)) => PrimaryMessage::GetRequestError {
                task,
                error: RequestError::from(&e),
            },
        };
        outbox.send(message);
        Ok(())
    }

    async fn robots_check(&self, task: CrawlTask, outbox: &Outbox<PrimaryMessage>) -> crate::Result<()> {
        let state = self.state()?;

        let allowed = match Url::parse(&task.url) {
            Ok(url) => state.robots.can_request(&url).await,
            Err(e) => {
                tracing::warn!("Cannot check robots.txt for {}: {}", task.url, e);
                true
            }
        };

        outbox.send(if allowed {
            PrimaryMessage::AllowedByRobots { task }
        } else {
            PrimaryMessage::DisallowedByRobots { task }
        });
        Ok(())
    }

    fn spider(&self, task: CrawlTask, request: FetchedRequest, outbox: &Outbox<PrimaryMessage>) -> crate::Result<()> {
        let state = self.state()?;
        outbox.send(PrimaryMessage::Spidering { task: task.clone() });

        let (urls, signals) = examine(state, &request);
        if !urls.is_empty() {
            outbox.send(PrimaryMessage::FoundUrls {
                task: task.clone(),
                urls,
            });
        }

        outbox.send(PrimaryMessage::Spidered { task, signals });
        Ok(())
    }
}

/// Finds links and signals in a response
///
/// Kept synchronous: the parsed document is not `Send`.
fn examine(state: &WorkerState, request: &FetchedRequest) -> (Vec<FoundUrl>, Vec<String>) {
    let document = parse_document(request);

    let urls = find_urls(request, document.as_ref())
        .into_iter()
        .map(|url| FoundUrl {
            priority: state.priority_rules.priority_of(&url),
            url: url.into(),
        })
        .collect();

    let signals = match Url::parse(&request.url) {
        Ok(url) if request.status < 400 => state.signals.check(&url, request, document.as_ref()),
        _ => Vec::new(),
    };

    (urls, signals)
}

#[async_trait]
impl Worker for CrawlWorker {
    type Inbound = WorkerMessage;
    type Outbound = PrimaryMessage;

    fn parse(&self, value: Value) -> Option<WorkerMessage> {
        WorkerMessage::parse(value)
    }

    fn is_barrier(&self, message: &WorkerMessage) -> bool {
        matches!(message, WorkerMessage::InitWorker { .. })
    }

    fn is_busy(&self, in_flight: usize) -> bool {
        self.state
            .get()
            .map(|state| in_flight >= state.max_in_flight)
            .unwrap_or(false)
    }

    async fn handle(&self, message: WorkerMessage, outbox: Outbox<PrimaryMessage>) -> crate::Result<()> {
        match message {
            WorkerMessage::InitWorker { config } => self.initialize(*config),
            WorkerMessage::HeadRequest { task } => self.execute(Method::Head, task, &outbox).await,
            WorkerMessage::GetRequest { task } => self.execute(Method::Get, task, &outbox).await,
            WorkerMessage::RobotsCheck { task } => self.robots_check(task, &outbox).await,
            WorkerMessage::Spider { task, request } => self.spider(task, request, &outbox),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::dispatch::Envelope;
    use crate::queue::Priority;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config() -> Config {
        parse_config(
            r#"
[spider]
database-file = ":memory:"
max-in-flight = 2

[http.min-time-between-requests]
default = 0

[user-agent]
crawler-name = "testbot"
crawler-version = "1.0"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"

[priority]
ignore = [{ regex = '\.pdf$' }]
"#,
        )
        .unwrap()
    }

    async fn initialized_worker() -> CrawlWorker {
        let worker = CrawlWorker::new();
        let (outbox, _) = outbox();
        worker
            .handle(
                WorkerMessage::InitWorker {
                    config: Box::new(create_test_config()),
                },
                outbox,
            )
            .await
            .unwrap();
        worker
    }

    fn outbox() -> (Outbox<PrimaryMessage>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox::new(tx), rx)
    }

    fn received(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<PrimaryMessage> {
        let mut messages = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let Envelope::Message { body } = envelope {
                messages.extend(PrimaryMessage::parse(body));
            }
        }
        messages
    }

    fn task(url: String) -> CrawlTask {
        CrawlTask {
            queue_item_id: 1,
            session_id: 1,
            url,
        }
    }

    #[tokio::test]
    async fn test_uninitialized_worker_refuses_work() {
        let worker = CrawlWorker::new();
        let (outbox, mut rx) = outbox();
        let result = worker
            .handle(
                WorkerMessage::GetRequest {
                    task: task("https://example.com/".to_string()),
                },
                outbox,
            )
            .await;

        assert!(matches!(result, Err(SpiderError::WorkerNotInitialized)));
        assert!(received(&mut rx).is_empty());
        assert!(!worker.is_busy(1_000));
    }

    #[tokio::test]
    async fn test_busy_at_max_in_flight() {
        let worker = initialized_worker().await;
        assert!(!worker.is_busy(1));
        assert!(worker.is_busy(2));
        assert!(worker.is_barrier(&WorkerMessage::InitWorker {
            config: Box::new(create_test_config())
        }));
    }

    #[tokio::test]
    async fn test_get_request_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<p>hi</p>", "text/html"))
            .mount(&server)
            .await;

        let worker = initialized_worker().await;
        let (outbox, mut rx) = outbox();
        worker
            .handle(
                WorkerMessage::GetRequest {
                    task: task(format!("{}/page", server.uri())),
                },
                outbox,
            )
            .await
            .unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind(), "making_get_request");
        match &messages[1] {
            PrimaryMessage::GetRequestSuccess { request, .. } => {
                assert_eq!(request.status, 200);
                assert_eq!(request.body.as_deref(), Some("<p>hi</p>"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_request_with_disallowed_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("%PDF", "application/pdf"))
            .mount(&server)
            .await;

        let worker = initialized_worker().await;
        let (outbox, mut rx) = outbox();
        worker
            .handle(
                WorkerMessage::GetRequest {
                    task: task(format!("{}/doc", server.uri())),
                },
                outbox,
            )
            .await
            .unwrap();

        match received(&mut rx).pop() {
            Some(PrimaryMessage::GetRequestError { error, .. }) => {
                assert_eq!(error.code, "INVALID_CONTENT_TYPE")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_head_request_reports_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf"))
            .mount(&server)
            .await;

        let worker = initialized_worker().await;
        let (outbox, mut rx) = outbox();
        worker
            .handle(
                WorkerMessage::HeadRequest {
                    task: task(format!("{}/doc", server.uri())),
                },
                outbox,
            )
            .await
            .unwrap();

        let messages = received(&mut rx);
        assert_eq!(messages[0].kind(), "making_head_request");
        match &messages[1] {
            PrimaryMessage::HeadRequestSuccess { request, .. } => {
                assert_eq!(request.content_type, "application/pdf");
                assert!(request.body.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_robots_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("User-agent: *\nDisallow: /private/\n", "text/plain"),
            )
            .mount(&server)
            .await;

        let worker = initialized_worker().await;

        let (outbox, mut rx) = outbox();
        worker
            .handle(
                WorkerMessage::RobotsCheck {
                    task: task(format!("{}/private/x", server.uri())),
                },
                outbox.clone(),
            )
            .await
            .unwrap();
        worker
            .handle(
                WorkerMessage::RobotsCheck {
                    task: task(format!("{}/public", server.uri())),
                },
                outbox,
            )
            .await
            .unwrap();

        let kinds: Vec<_> = received(&mut rx).iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["disallowed_by_robots", "allowed_by_robots"]);
    }

    #[tokio::test]
    async fn test_spider_finds_urls_with_priorities() {
        let worker = initialized_worker().await;
        let (outbox, mut rx) = outbox();
        let request = FetchedRequest {
            url: "https://example.com/".to_string(),
            status: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            headers: vec![],
            body: Some(
                r#"<a href="https://one.com/">1</a><a href="/file.pdf">pdf</a><a href="https://one.com/">again</a>"#
                    .to_string(),
            ),
        };

        worker
            .handle(
                WorkerMessage::Spider {
                    task: task(request.url.clone()),
                    request,
                },
                outbox,
            )
            .await
            .unwrap();

        let messages = received(&mut rx);
        let kinds: Vec<_> = messages.iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["spidering", "found_urls", "spidered"]);

        match &messages[1] {
            PrimaryMessage::FoundUrls { urls, .. } => {
                assert_eq!(
                    urls,
                    &vec![
                        FoundUrl {
                            url: "https://one.com/".to_string(),
                            priority: Priority::Medium
                        },
                        FoundUrl {
                            url: "https://example.com/file.pdf".to_string(),
                            priority: Priority::Ignore
                        },
                    ]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spider_without_links_skips_found_urls() {
        let worker = initialized_worker().await;
        let (outbox, mut rx) = outbox();
        let request = FetchedRequest {
            url: "https://example.com/data".to_string(),
            status: 200,
            content_type: "application/json".to_string(),
            headers: vec![],
            body: Some("{}".to_string()),
        };

        worker
            .handle(
                WorkerMessage::Spider {
                    task: task(request.url.clone()),
                    request,
                },
                outbox,
            )
            .await
            .unwrap();

        let kinds: Vec<_> = received(&mut rx).iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, vec!["spidering", "spidered"]);
    }
}
