use crate::{UrlError, UrlResult};
use url::Url;

/// Returns the lowercase hostname of a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use spiderpool::url::hostname_of;
///
/// let url = Url::parse("https://Blog.Example.COM/path").unwrap();
/// assert_eq!(hostname_of(&url), Some("blog.example.com".to_string()));
/// ```
pub fn hostname_of(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Splits a hostname into its labels, validating each one
///
/// The domain registry stores hostnames hierarchically (`com` → `example` →
/// `www`), so every hostname that reaches storage must be a well-formed
/// domain name: at least two labels, each made only of `[a-z0-9-]` and
/// neither starting nor ending with a hyphen.
///
/// # Arguments
///
/// * `hostname` - The hostname to parse (case-insensitive)
///
/// # Returns
///
/// * `Ok(Vec<String>)` - Lowercase labels, left to right
/// * `Err(UrlError::InvalidDomain)` - The hostname is not a usable domain name
///
/// # Examples
///
/// ```
/// use spiderpool::url::parse_domain_name;
///
/// assert_eq!(parse_domain_name("www.Example.com").unwrap(), vec!["www", "example", "com"]);
/// assert!(parse_domain_name("localhost").is_err());
/// assert!(parse_domain_name("-bad-.com").is_err());
/// ```
pub fn parse_domain_name(hostname: &str) -> UrlResult<Vec<String>> {
    let hostname = hostname.trim().to_lowercase();
    let labels: Vec<String> = hostname.split('.').map(str::to_string).collect();

    if labels.len() < 2 {
        return Err(UrlError::InvalidDomain(hostname));
    }

    for label in &labels {
        let valid_chars = !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        if !valid_chars || label.starts_with('-') || label.ends_with('-') {
            return Err(UrlError::InvalidDomain(hostname));
        }
    }

    Ok(labels)
}

/// Checks if a hostname matches a wildcard pattern
///
/// `example.com` matches only itself. `*.example.com` matches the bare
/// domain and any depth of subdomain beneath it.
///
/// # Examples
///
/// ```
/// use spiderpool::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.gov", "data.gov"));
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(!matches_wildcard("*.example.com", "myexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, hostname: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            hostname == base
                || hostname
                    .strip_suffix(base)
                    .map(|rest| rest.ends_with('.'))
                    .unwrap_or(false)
        }
        None => hostname == pattern,
    }
}
