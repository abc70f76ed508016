//! Content and platform signals
//!
//! A signal is a named observation about the software behind a page
//! (server, CDN, CMS). Checkers may look at the URL, the response headers or
//! the parsed document; any one match reports the signal.

mod builtin;

pub use builtin::builtin_checkers;

use crate::fetch::FetchedRequest;
use scraper::Html;
use url::Url;

/// One named signal and the ways it can be detected
pub trait SignalChecker: Send + Sync {
    fn name(&self) -> &'static str;

    fn url_matches(&self, _url: &Url) -> bool {
        false
    }

    fn request_matches(&self, _request: &FetchedRequest) -> bool {
        false
    }

    /// Only called for successful HTML responses
    fn dom_matches(&self, _url: &Url, _document: &Html) -> bool {
        false
    }
}

/// An ordered collection of signal checkers
pub struct SignalSet {
    checkers: Vec<Box<dyn SignalChecker>>,
}

impl SignalSet {
    pub fn new(checkers: Vec<Box<dyn SignalChecker>>) -> Self {
        Self { checkers }
    }

    /// The checkers shipped with the crawler
    pub fn builtin() -> Self {
        Self::new(builtin_checkers())
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Names of all signals matching this response, in checker order
    pub fn check(&self, url: &Url, request: &FetchedRequest, document: Option<&Html>) -> Vec<String> {
        self.checkers
            .iter()
            .filter(|checker| {
                checker.url_matches(url)
                    || checker.request_matches(request)
                    || document.map(|doc| checker.dom_matches(url, doc)).unwrap_or(false)
            })
            .map(|checker| checker.name().to_string())
            .collect()
    }
}

impl Default for SignalSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpHeader;

    struct AlwaysSignal;

    impl SignalChecker for AlwaysSignal {
        fn name(&self) -> &'static str {
            "always"
        }

        fn url_matches(&self, _url: &Url) -> bool {
            true
        }
    }

    #[test]
    fn test_custom_checker() {
        let set = SignalSet::new(vec![Box::new(AlwaysSignal)]);
        let url = Url::parse("https://example.com/").unwrap();
        let request = FetchedRequest {
            url: url.to_string(),
            status: 200,
            content_type: String::new(),
            headers: vec![],
            body: None,
        };
        assert_eq!(set.check(&url, &request, None), vec!["always".to_string()]);
    }

    #[test]
    fn test_builtin_header_signals() {
        let set = SignalSet::builtin();
        let url = Url::parse("https://example.com/index.php").unwrap();
        let request = FetchedRequest {
            url: url.to_string(),
            status: 200,
            content_type: "text/html".to_string(),
            headers: vec![
                HttpHeader {
                    name: "server".to_string(),
                    value: "nginx/1.25".to_string(),
                },
                HttpHeader {
                    name: "cf-ray".to_string(),
                    value: "abc".to_string(),
                },
            ],
            body: None,
        };

        let found = set.check(&url, &request, None);
        assert_eq!(found, vec!["cloudflare", "nginx", "php"]);
    }
}
