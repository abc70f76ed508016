//! HTTP fetch layer
//!
//! This module handles all outbound HTTP for the crawler, including:
//! - Building the `reqwest` client with the crawler's user agent
//! - Pacing requests so only one is released per interval
//! - DNS resolution through a cached, time-bounded resolver
//! - Bounding every call by a timeout and every body by a size limit
//! - Classifying failures into stable reason codes

mod client;
mod dns;
mod pacer;

pub use client::{HttpClient, HttpClientOptions};
pub use dns::{CachingResolver, DnsError};
pub use pacer::{Pacer, RequestInterval};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A single response header; names are lowercase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// A completed HTTP exchange
///
/// `body` is `None` for HEAD requests and for 301/302/303 redirects, whose
/// bodies are never read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedRequest {
    /// The URL as requested
    pub url: String,
    pub status: u16,
    /// Raw `Content-Type` header value, empty when absent
    pub content_type: String,
    pub headers: Vec<HttpHeader>,
    pub body: Option<String>,
}

impl FetchedRequest {
    /// Returns the first value of a header (case-insensitive name)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Returns true for the redirect statuses whose target is followed
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303)
    }
}

/// Errors that can occur while fetching a URL
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("Received invalid content-type header: '{0}'")]
    InvalidContentType(String),

    #[error("Response body exceeded maximum allowed size of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

impl FetchError {
    /// Stable reason code carried in crawl messages and stored with errors
    pub fn code(&self) -> &'static str {
        match self {
            Self::TimedOut(_) => "TIMED_OUT",
            Self::InvalidContentType(_) => "INVALID_CONTENT_TYPE",
            Self::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            Self::Dns(_) => "DNS_FAILED",
            Self::Connection(_) => "CONNECTION_FAILED",
            Self::Request(_) | Self::Build(_) => "REQUEST_FAILED",
            Self::InvalidUrl(_) => "INVALID_URL",
        }
    }

    /// Classifies a transport error from `reqwest`
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&e);
        while let Some(err) = source {
            if let Some(dns) = err.downcast_ref::<DnsError>() {
                return Self::Dns(dns.to_string());
            }
            source = err.source();
        }

        if e.is_timeout() {
            Self::Connection(format!("timed out: {}", e))
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else if e.is_builder() {
            Self::InvalidUrl(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Checks a `Content-Type` header value against an allow-list
///
/// Parameters after `;` are ignored and the comparison is case-insensitive,
/// so `text/HTML; charset=utf-8` matches `text/html`.
///
/// # Examples
///
/// ```
/// use spiderpool::fetch::is_content_type_allowed;
///
/// let allowed = vec!["text/html".to_string()];
/// assert!(is_content_type_allowed("text/html; charset=utf-8", &allowed));
/// assert!(!is_content_type_allowed("application/pdf", &allowed));
/// assert!(!is_content_type_allowed("", &allowed));
/// ```
pub fn is_content_type_allowed(content_type: &str, allowed: &[String]) -> bool {
    let normalized = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    allowed.iter().any(|c| c.to_lowercase() == normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parameters_ignored() {
        let allowed = vec!["text/html".to_string(), "Application/XHTML+XML".to_string()];
        assert!(is_content_type_allowed(" Text/Html ;charset=utf-8", &allowed));
        assert!(is_content_type_allowed("application/xhtml+xml", &allowed));
        assert!(!is_content_type_allowed("text/plain", &allowed));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(FetchError::TimedOut(Duration::from_millis(5)).code(), "TIMED_OUT");
        assert_eq!(
            FetchError::BodyTooLarge { limit: 10 }.code(),
            "BODY_TOO_LARGE"
        );
        assert_eq!(FetchError::Dns("x".into()).code(), "DNS_FAILED");
        assert_eq!(
            FetchError::TimedOut(Duration::from_millis(1500)).to_string(),
            "Request timed out after 1500ms"
        );
    }

    #[test]
    fn test_header_lookup() {
        let request = FetchedRequest {
            url: "https://example.com/".to_string(),
            status: 302,
            content_type: String::new(),
            headers: vec![HttpHeader {
                name: "location".to_string(),
                value: "/next".to_string(),
            }],
            body: None,
        };
        assert_eq!(request.header("Location"), Some("/next"));
        assert_eq!(request.header("server"), None);
        assert!(request.is_redirect());
    }
}
