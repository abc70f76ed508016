use url::Url;

/// Normalizes a discovered link before it is enqueued
///
/// # Normalization Steps
///
/// 1. Upgrade `http` to `https`
/// 2. Empty path becomes `/`
/// 3. A path starting with several slashes is collapsed to a single one
/// 4. Remove the fragment
///
/// Query strings, host case and trailing slashes are left alone; two links
/// that differ only there are treated as different pages.
///
/// # Examples
///
/// ```
/// use spiderpool::url::normalize_url;
/// use url::Url;
///
/// let url = Url::parse("http://example.com//a/b#top").unwrap();
/// assert_eq!(normalize_url(url).as_str(), "https://example.com/a/b");
/// ```
pub fn normalize_url(mut url: Url) -> Url {
    if url.scheme() == "http" {
        // Both are special schemes, so the switch cannot fail
        let _ = url.set_scheme("https");
    }

    if url.path().is_empty() {
        url.set_path("/");
    } else if url.path().starts_with("//") {
        let collapsed = format!("/{}", url.path().trim_start_matches('/'));
        url.set_path(&collapsed);
    }

    url.set_fragment(None);
    url
}

/// Resolves an `href` against the page it was found on, then normalizes it
///
/// Returns `None` for empty hrefs, fragment-only anchors, pseudo-schemes
/// (`javascript:`, `mailto:`, `tel:`, `data:`) and anything that does not
/// resolve to an HTTP(S) URL.
pub fn resolve_and_normalize(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let resolved = base.join(href).ok()?;
    if !super::is_http_scheme(&resolved) {
        return None;
    }

    Some(normalize_url(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_upgrades_to_https() {
        assert_eq!(
            normalize_url(parse("http://example.com/page")).as_str(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_keeps_port_and_query() {
        assert_eq!(
            normalize_url(parse("https://example.com:8443/a?b=1&a=2")).as_str(),
            "https://example.com:8443/a?b=1&a=2"
        );
    }

    #[test]
    fn test_empty_path_becomes_root() {
        assert_eq!(
            normalize_url(parse("https://example.com")).as_str(),
            "https://example.com/"
        );
    }

    #[test]
    fn test_collapses_leading_slashes() {
        assert_eq!(
            normalize_url(parse("https://example.com///x//y")).as_str(),
            "https://example.com/x//y"
        );
    }

    #[test]
    fn test_drops_fragment() {
        assert_eq!(
            normalize_url(parse("https://example.com/a#section")).as_str(),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_resolve_relative() {
        let base = parse("https://example.com/dir/page");
        assert_eq!(
            resolve_and_normalize("other", &base).unwrap().as_str(),
            "https://example.com/dir/other"
        );
        assert_eq!(
            resolve_and_normalize("  /root#frag ", &base).unwrap().as_str(),
            "https://example.com/root"
        );
    }

    #[test]
    fn test_resolve_skips_pseudo_schemes() {
        let base = parse("https://example.com/");
        assert!(resolve_and_normalize("javascript:void(0)", &base).is_none());
        assert!(resolve_and_normalize("MAILTO:a@b.com", &base).is_none());
        assert!(resolve_and_normalize("tel:+123", &base).is_none());
        assert!(resolve_and_normalize("#top", &base).is_none());
        assert!(resolve_and_normalize("   ", &base).is_none());
        assert!(resolve_and_normalize("ftp://example.com/f", &base).is_none());
    }
}
