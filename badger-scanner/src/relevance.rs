use crate::links::host_key;
use url::Url;

/// Whether a link is worth crawling. Same-host links always are; a jump to
/// another host needs a badge under the anchor that produced it.
pub fn is_likely_relevant(href: &str, page_url: &str, found_button_here: bool) -> bool {
    let (Ok(base), Ok(target)) = (Url::parse(page_url), Url::parse(href)) else {
        return false;
    };
    if !matches!(target.scheme(), "http" | "https") {
        return false;
    }
    if host_key(&target).is_some() && host_key(&target) == host_key(&base) {
        return true;
    }
    found_button_here
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_host_always_relevant() {
        assert!(is_likely_relevant("https://a.example/next", "https://a.example/page", false));
        assert!(is_likely_relevant("https://a.example/next", "https://a.example/page", true));
    }

    #[test]
    fn test_cross_host_needs_button() {
        assert!(!is_likely_relevant("https://b.example/x", "https://a.example/page", false));
        assert!(is_likely_relevant("https://b.example/x", "https://a.example/page", true));
    }

    #[test]
    fn test_port_makes_a_different_host() {
        assert!(!is_likely_relevant("http://a.example:8080/", "http://a.example/", false));
    }

    #[test]
    fn test_garbage_is_not_relevant() {
        assert!(!is_likely_relevant("not a url", "https://a.example/", true));
        assert!(!is_likely_relevant("ftp://a.example/f", "https://a.example/", true));
    }
}
