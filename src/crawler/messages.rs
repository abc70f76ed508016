//! Messages exchanged between the crawl primary and its workers
//!
//! Both directions are closed enums tagged by `type`. Unknown tags fail to
//! decode and are dropped by the dispatcher.

use crate::config::Config;
use crate::fetch::{FetchError, FetchedRequest};
use crate::queue::Priority;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlates every message about one queue item during one pass
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrawlTask {
    pub queue_item_id: i64,
    pub session_id: i64,
    pub url: String,
}

/// Why a request failed, as reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestError {
    pub code: String,
    pub message: String,
}

impl RequestError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&FetchError> for RequestError {
    fn from(e: &FetchError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// A link discovered by the spider step, with its computed priority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundUrl {
    pub url: String,
    pub priority: Priority,
}

/// Primary → worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    InitWorker { config: Box<Config> },
    HeadRequest { task: CrawlTask },
    GetRequest { task: CrawlTask },
    RobotsCheck { task: CrawlTask },
    Spider { task: CrawlTask, request: FetchedRequest },
}

impl WorkerMessage {
    pub fn parse(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn task(&self) -> Option<&CrawlTask> {
        match self {
            Self::InitWorker { .. } => None,
            Self::HeadRequest { task }
            | Self::GetRequest { task }
            | Self::RobotsCheck { task }
            | Self::Spider { task, .. } => Some(task),
        }
    }
}

/// Worker → primary (and primary → itself for local decisions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrimaryMessage {
    Start { task: CrawlTask },
    AllowedByRobots { task: CrawlTask },
    DisallowedByRobots { task: CrawlTask },
    MakingHeadRequest { task: CrawlTask },
    MakingGetRequest { task: CrawlTask },
    HeadRequestSuccess { task: CrawlTask, request: FetchedRequest },
    HeadRequestError { task: CrawlTask, error: RequestError },
    GetRequestSuccess { task: CrawlTask, request: FetchedRequest },
    GetRequestError { task: CrawlTask, error: RequestError },
    FoundUrls { task: CrawlTask, urls: Vec<FoundUrl> },
    Spidering { task: CrawlTask },
    Spidered { task: CrawlTask, signals: Vec<String> },
    NotSpidering { task: CrawlTask, error: RequestError },
}

impl PrimaryMessage {
    pub fn parse(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn task(&self) -> &CrawlTask {
        match self {
            Self::Start { task }
            | Self::AllowedByRobots { task }
            | Self::DisallowedByRobots { task }
            | Self::MakingHeadRequest { task }
            | Self::MakingGetRequest { task }
            | Self::HeadRequestSuccess { task, .. }
            | Self::HeadRequestError { task, .. }
            | Self::GetRequestSuccess { task, .. }
            | Self::GetRequestError { task, .. }
            | Self::FoundUrls { task, .. }
            | Self::Spidering { task }
            | Self::Spidered { task, .. }
            | Self::NotSpidering { task, .. } => task,
        }
    }

    /// The wire tag, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::AllowedByRobots { .. } => "allowed_by_robots",
            Self::DisallowedByRobots { .. } => "disallowed_by_robots",
            Self::MakingHeadRequest { .. } => "making_head_request",
            Self::MakingGetRequest { .. } => "making_get_request",
            Self::HeadRequestSuccess { .. } => "head_request_success",
            Self::HeadRequestError { .. } => "head_request_error",
            Self::GetRequestSuccess { .. } => "get_request_success",
            Self::GetRequestError { .. } => "get_request_error",
            Self::FoundUrls { .. } => "found_urls",
            Self::Spidering { .. } => "spidering",
            Self::Spidered { .. } => "spidered",
            Self::NotSpidering { .. } => "not_spidering",
        }
    }

    /// Shorthand for a `not_spidering` decision
    pub fn not_spidering(task: CrawlTask, code: &str, message: impl Into<String>) -> Self {
        Self::NotSpidering {
            task,
            error: RequestError::new(code, message),
        }
    }
}
