use serde::{Deserialize, Serialize};

/// Main configuration structure
///
/// The whole structure is shipped to every worker inside the `init_worker`
/// message, so it must round-trip through serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub spider: SpiderConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub domains: DomainsConfig,
}

/// Crawl pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-file")]
    pub database_file: String,

    /// Number of worker processes (defaults to the number of CPUs)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Handlers a single worker runs at once before it reports busy
    #[serde(rename = "max-in-flight", default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Content types (without parameters) that are worth a GET
    #[serde(
        rename = "allowed-content-types",
        default = "default_allowed_content_types"
    )]
    pub allowed_content_types: Vec<String>,
}

/// HTTP client configuration; all durations are milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "get-request-timeout", default = "default_get_timeout")]
    pub get_request_timeout: u64,

    #[serde(rename = "head-request-timeout", default = "default_head_timeout")]
    pub head_request_timeout: u64,

    #[serde(rename = "resolve-timeout", default = "default_resolve_timeout")]
    pub resolve_timeout: u64,

    #[serde(rename = "max-response-body-size", default = "default_max_body")]
    pub max_response_body_size: usize,

    /// DNS servers queried by the caching resolver
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,

    #[serde(rename = "min-time-between-requests", default)]
    pub min_time_between_requests: RequestIntervalConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            get_request_timeout: default_get_timeout(),
            head_request_timeout: default_head_timeout(),
            resolve_timeout: default_resolve_timeout(),
            max_response_body_size: default_max_body(),
            nameservers: default_nameservers(),
            min_time_between_requests: RequestIntervalConfig::default(),
        }
    }
}

/// Minimum spacing between outbound requests, optionally by hour of day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestIntervalConfig {
    /// Interval used outside every window (milliseconds)
    #[serde(default = "default_interval")]
    pub default: u64,

    #[serde(default)]
    pub windows: Vec<IntervalWindow>,
}

impl Default for RequestIntervalConfig {
    fn default() -> Self {
        Self {
            default: default_interval(),
            windows: Vec::new(),
        }
    }
}

/// An hour range (local time, both ends inclusive) with its own interval
///
/// A window whose start is after its end wraps past midnight, so
/// `start-hour = 20, end-hour = 4` covers 20:00 to 04:59.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalWindow {
    #[serde(rename = "start-hour")]
    pub start_hour: u32,

    #[serde(rename = "end-hour")]
    pub end_hour: u32,

    /// Interval inside this window (milliseconds)
    pub interval: u64,
}

/// User agent identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the robots.txt product token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    #[serde(rename = "contact-url")]
    pub contact_url: String,

    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// Format: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// URL priority rule lists, evaluated ignore > low > high > medium
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(default)]
    pub ignore: Vec<UrlRule>,
    #[serde(default)]
    pub low: Vec<UrlRule>,
    #[serde(default)]
    pub high: Vec<UrlRule>,
}

/// A single URL predicate
///
/// Written in TOML as a one-key inline table, e.g. `{ regex = '\.pdf$' }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlRule {
    /// Substring of the full URL
    Contains(String),
    /// Regular expression matched against the full URL
    Regex(String),
    /// Hostname wildcard pattern (`example.com` or `*.example.com`)
    Hostname(String),
    /// Exact path, e.g. `/`
    Path(String),
    /// More than this many non-empty path segments
    PathSegmentsOver(usize),
}

/// Domain-level spidering policy consulted for domains with no stored decision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainsConfig {
    /// Answer for hostnames matching neither list; absent means undecided
    #[serde(default)]
    pub default: Option<bool>,

    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_max_in_flight() -> usize {
    100
}

fn default_allowed_content_types() -> Vec<String> {
    vec!["text/html".to_string()]
}

fn default_get_timeout() -> u64 {
    5_000
}

fn default_head_timeout() -> u64 {
    1_000
}

fn default_resolve_timeout() -> u64 {
    2_500
}

fn default_max_body() -> usize {
    1024 * 1024
}

fn default_nameservers() -> Vec<String> {
    vec![
        "1.1.1.1".to_string(),
        "8.8.8.8".to_string(),
        "8.8.4.4".to_string(),
    ]
}

fn default_interval() -> u64 {
    1_000
}
