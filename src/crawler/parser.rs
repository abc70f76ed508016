//! Finding the URLs a fetched response leads to
//!
//! # Rules
//!
//! - 301/302/303 responses lead to their `location` header only
//! - `text/html` responses lead to every `<a href>` on the page
//! - everything else leads nowhere
//!
//! Links are resolved against the page URL and normalized. Two links that
//! differ only by case count once; the last one seen is kept.

use crate::fetch::FetchedRequest;
use crate::url::resolve_and_normalize;
use scraper::{Html, Selector};
use std::collections::HashMap;
use url::Url;

/// Returns true when a `Content-Type` value denotes HTML
pub fn is_html(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..9)
        .map(|prefix| prefix.eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}

/// Parses the body of an HTML response; `None` for anything else
///
/// Redirects are never parsed, even when they carry an HTML body.
pub fn parse_document(request: &FetchedRequest) -> Option<Html> {
    if request.is_redirect() || !is_html(&request.content_type) {
        return None;
    }
    request.body.as_deref().map(Html::parse_document)
}

/// URLs a response leads to
///
/// `document` is the parsed body from `parse_document`, if any.
pub fn find_urls(request: &FetchedRequest, document: Option<&Html>) -> Vec<Url> {
    let Ok(base) = Url::parse(&request.url) else {
        return Vec::new();
    };

    if request.is_redirect() {
        return request
            .header("location")
            .and_then(|location| resolve_and_normalize(location, &base))
            .into_iter()
            .collect();
    }

    document
        .map(|document| extract_links(document, &base))
        .unwrap_or_default()
}

/// Extracts all anchor links from a document, deduplicated by lowercase form
///
/// Order follows the first appearance of each link.
pub fn extract_links(document: &Html, base: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut order: Vec<String> = Vec::new();
    let mut unique: HashMap<String, Url> = HashMap::new();

    for element in document.select(&selector) {
        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| resolve_and_normalize(href, base))
        else {
            continue;
        };

        let key = url.as_str().to_lowercase();
        if !unique.contains_key(&key) {
            order.push(key.clone());
        }
        unique.insert(key, url);
    }

    order.into_iter().filter_map(|key| unique.remove(&key)).collect()
}
