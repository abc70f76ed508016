use super::SignalChecker;
use crate::fetch::FetchedRequest;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// All built-in checkers, ordered by name
pub fn builtin_checkers() -> Vec<Box<dyn SignalChecker>> {
    let mut checkers: Vec<Box<dyn SignalChecker>> = vec![
        Box::new(HeaderSignal::new("apache", "server", Some(r"(?i)apache"))),
        Box::new(AspDotNet),
        Box::new(HeaderSignal::new("cloudflare", "cf-ray", None)),
        Box::new(Drupal),
        Box::new(HeaderSignal::new("nginx", "server", Some(r"(?i)nginx"))),
        Box::new(Php),
        Box::new(HeaderSignal::new("wix", "x-wix-request-id", None)),
        Box::new(WordPress),
    ];
    checkers.sort_by_key(|c| c.name());
    checkers
}

fn has_header(request: &FetchedRequest, name: &str) -> bool {
    request.headers.iter().any(|h| h.name == name)
}

fn any_path_segment(url: &Url, pattern: &str) -> bool {
    let Ok(re) = Regex::new(pattern) else {
        return false;
    };
    url.path().split('/').any(|segment| re.is_match(segment))
}

/// Attribute values of every element matching `css`
fn attr_values<'a>(document: &'a Html, css: &str, attrs: &'a [&'a str]) -> Vec<&'a str> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| attrs.iter().find_map(|a| el.value().attr(a)))
        .collect()
}

/// Matches on the presence (and optionally the value) of one header
struct HeaderSignal {
    name: &'static str,
    header: &'static str,
    value: Option<Regex>,
}

impl HeaderSignal {
    fn new(name: &'static str, header: &'static str, value: Option<&str>) -> Self {
        Self {
            name,
            header,
            value: value.and_then(|v| Regex::new(v).ok()),
        }
    }
}

impl SignalChecker for HeaderSignal {
    fn name(&self) -> &'static str {
        self.name
    }

    fn request_matches(&self, request: &FetchedRequest) -> bool {
        request.headers.iter().any(|h| {
            h.name == self.header
                && self
                    .value
                    .as_ref()
                    .map(|re| re.is_match(&h.value))
                    .unwrap_or(true)
        })
    }
}

struct AspDotNet;

impl SignalChecker for AspDotNet {
    fn name(&self) -> &'static str {
        "aspdotnet"
    }

    fn url_matches(&self, url: &Url) -> bool {
        any_path_segment(url, r"(?i)\.as[phm]x$")
    }

    fn request_matches(&self, request: &FetchedRequest) -> bool {
        has_header(request, "x-aspnet-version")
    }
}

struct Php;

impl SignalChecker for Php {
    fn name(&self) -> &'static str {
        "php"
    }

    fn url_matches(&self, url: &Url) -> bool {
        any_path_segment(url, r"(?i)\.php$")
    }
}

struct Drupal;

impl SignalChecker for Drupal {
    fn name(&self) -> &'static str {
        "drupal"
    }

    fn url_matches(&self, url: &Url) -> bool {
        url.path().contains("/sites/default/files/")
    }

    fn request_matches(&self, request: &FetchedRequest) -> bool {
        request.headers.iter().any(|h| {
            (h.name == "x-generator" && h.value == "Drupal 7 (http://drupal.org)")
                || h.name.starts_with("x-drupal-")
        })
    }

    // Two of three weaker markers are needed unless a drupal selector attribute is present
    fn dom_matches(&self, url: &Url, document: &Html) -> bool {
        if !attr_values(document, "[data-drupal-selector]", &["data-drupal-selector"]).is_empty() {
            return true;
        }

        let (Ok(drupal_js), Ok(sites_dir), Ok(node_class)) = (
            Regex::new(r"(?i)\bdrupal\b"),
            Regex::new(r"(?i)^/sites/[a-z0-9_-]+/modules/"),
            Regex::new(r"-node(-\d+)?$"),
        ) else {
            return false;
        };

        let found_js = attr_values(document, "script[src]", &["src"])
            .into_iter()
            .any(|src| drupal_js.is_match(src));

        let found_sites_dir = attr_values(document, "a[href],script[src]", &["href", "src"])
            .into_iter()
            .filter_map(|href| url.join(href).ok())
            .any(|resolved| sites_dir.is_match(resolved.path()));

        let found_node_classes = attr_values(document, "[class*=node]", &["class"])
            .into_iter()
            .any(|classes| classes.split_whitespace().any(|c| node_class.is_match(c)));

        [found_js, found_sites_dir, found_node_classes]
            .iter()
            .filter(|x| **x)
            .count()
            > 1
    }
}

struct WordPress;

impl SignalChecker for WordPress {
    fn name(&self) -> &'static str {
        "wordpress"
    }

    fn request_matches(&self, request: &FetchedRequest) -> bool {
        request.headers.iter().any(|h| match h.name.as_str() {
            "x-redirect-by" => h.value == "WordPress" || h.value == "Yoast SEO",
            "x-tec-api-root" => true,
            _ => false,
        })
    }

    fn dom_matches(&self, url: &Url, document: &Html) -> bool {
        let Ok(marker) = Regex::new(r"/wp-(content|json)/") else {
            return false;
        };

        attr_values(document, "link[href],script[src]", &["href", "src"])
            .into_iter()
            .filter_map(|src| url.join(src).ok())
            .any(|resolved| resolved.host_str() == url.host_str() && marker.is_match(resolved.path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpHeader;

    fn request_with(headers: &[(&str, &str)]) -> FetchedRequest {
        FetchedRequest {
            url: "https://example.com/".to_string(),
            status: 200,
            content_type: "text/html".to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| HttpHeader {
                    name: n.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            body: None,
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_builtin_names_sorted() {
        let names: Vec<_> = builtin_checkers().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec!["apache", "aspdotnet", "cloudflare", "drupal", "nginx", "php", "wix", "wordpress"]
        );
    }

    #[test]
    fn test_server_header_case_insensitive() {
        let apache = HeaderSignal::new("apache", "server", Some(r"(?i)apache"));
        assert!(apache.request_matches(&request_with(&[("server", "Apache/2.4.1 (Unix)")])));
        assert!(!apache.request_matches(&request_with(&[("server", "nginx")])));
    }

    #[test]
    fn test_aspdotnet_url() {
        assert!(AspDotNet.url_matches(&url("https://example.com/Default.ASPX")));
        assert!(AspDotNet.url_matches(&url("https://example.com/a/handler.ashx/b")));
        assert!(!AspDotNet.url_matches(&url("https://example.com/aspx/")));
    }

    #[test]
    fn test_php_url() {
        assert!(Php.url_matches(&url("https://example.com/index.php?x=1")));
        assert!(!Php.url_matches(&url("https://example.com/php/")));
    }

    #[test]
    fn test_wordpress_headers() {
        assert!(WordPress.request_matches(&request_with(&[("x-redirect-by", "WordPress")])));
        assert!(WordPress.request_matches(&request_with(&[("x-tec-api-root", "/")])));
        assert!(!WordPress.request_matches(&request_with(&[("x-redirect-by", "Other")])));
    }

    #[test]
    fn test_wordpress_dom_same_host_only() {
        let page = url("https://example.com/post");
        let local = Html::parse_document(
            r#"<html><head><link rel="stylesheet" href="/wp-content/themes/x.css"></head></html>"#,
        );
        let remote = Html::parse_document(
            r#"<html><head><script src="https://cdn.other.com/wp-content/x.js"></script></head></html>"#,
        );
        assert!(WordPress.dom_matches(&page, &local));
        assert!(!WordPress.dom_matches(&page, &remote));
    }

    #[test]
    fn test_drupal_dom_scoring() {
        let page = url("https://example.com/");
        let one_marker = Html::parse_document(r#"<script src="/misc/drupal.js"></script>"#);
        let two_markers = Html::parse_document(
            r#"<script src="/misc/drupal.js"></script><div class="article-node-12"></div>"#,
        );
        let selector = Html::parse_document(r#"<form data-drupal-selector="x"></form>"#);

        assert!(!Drupal.dom_matches(&page, &one_marker));
        assert!(Drupal.dom_matches(&page, &two_markers));
        assert!(Drupal.dom_matches(&page, &selector));
    }

    #[test]
    fn test_drupal_headers_and_url() {
        assert!(Drupal.request_matches(&request_with(&[("x-drupal-cache", "HIT")])));
        assert!(Drupal.url_matches(&url("https://example.com/sites/default/files/a.png")));
    }
}
