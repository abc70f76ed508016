//! URL handling module
//!
//! This module provides the syntactic URL checks used before any network
//! call, link normalization, and hostname parsing for the domain registry.

mod domain;
mod normalize;

// Re-export main functions
pub use domain::{hostname_of, matches_wildcard, parse_domain_name};
pub use normalize::{normalize_url, resolve_and_normalize};

use url::Url;

/// Checks whether a URL is worth handing to the crawl pipeline at all
///
/// A URL looks valid when its scheme is `http` or `https` and its hostname
/// contains at least one dot. Nothing here touches the network.
///
/// # Arguments
///
/// * `url` - The URL to check
///
/// # Returns
///
/// * `true` - The URL may proceed to eligibility checks
/// * `false` - The URL should be dropped
///
/// # Examples
///
/// ```
/// use spiderpool::url::url_looks_valid;
/// use url::Url;
///
/// assert!(url_looks_valid(&Url::parse("https://example.com/").unwrap()));
/// assert!(!url_looks_valid(&Url::parse("https://localhost/").unwrap()));
/// assert!(!url_looks_valid(&Url::parse("ftp://example.com/").unwrap()));
/// ```
pub fn url_looks_valid(url: &Url) -> bool {
    if !is_http_scheme(url) {
        return false;
    }

    url.host_str().map(|h| h.contains('.')).unwrap_or(false)
}

/// Returns true for `http` and `https` URLs
pub fn is_http_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Returns true if the URL path is the site root (`/` or empty)
pub fn is_root_path(url: &Url) -> bool {
    matches!(url.path(), "" | "/")
}
