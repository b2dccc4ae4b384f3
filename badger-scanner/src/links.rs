use url::Url;

/// Dedup key for visited tracking: origin + path, no query or fragment.
pub fn normalize(url: &Url) -> String {
    format!("{}{}", url.origin().ascii_serialization(), url.path())
}

pub fn normalize_str(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| normalize(&u))
}

/// Resolves an href or src against the page it appeared on.
/// Non-web schemes and unparsable values yield `None`; the fragment is dropped.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
        || href.starts_with('#')
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Host key used for Host records and same-host checks. Includes a
/// non-default port, so two services on one machine stay distinct.
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
