//! Registered-domain (eTLD+1) handling and URL normalization.
//!
//! The same-site rule for target pages compares registered domains, not
//! hostnames, so `shop.example.co.uk` and `www.example.co.uk` are one site.

use url::Url;

/// Multi-part public suffixes we care about in practice. A full public
/// suffix list is overkill for venue websites; unknown suffixes fall back to
/// the last two labels.
const MULTI_PART_TLDS: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.nz", "org.nz",
    "com.br", "com.mx", "com.tr", "co.jp", "co.kr", "com.sg",
];

/// Return the registered domain (eTLD+1) for a host, lowercased.
/// IP literals map to themselves.
pub fn registered_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() <= 2 {
        return host;
    }
    let last_two = parts[parts.len() - 2..].join(".");
    if MULTI_PART_TLDS.contains(&last_two.as_str()) && parts.len() >= 3 {
        return parts[parts.len() - 3..].join(".");
    }
    last_two
}

/// Registered domain of a URL, if it has a host.
pub fn url_registered_domain(url: &Url) -> Option<String> {
    url.host_str().map(registered_domain)
}

/// True if `candidate` shares the registered domain of `base` and uses
/// http(s).
pub fn same_site(base: &Url, candidate: &Url) -> bool {
    if !matches!(candidate.scheme(), "http" | "https") {
        return false;
    }
    match (url_registered_domain(base), url_registered_domain(candidate)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Drop tracking params and fragments; trim trailing slash on non-root
/// paths. Keeps meaningful query params intact.
pub fn normalize_url(url: &Url) -> Url {
    let mut clean = url.clone();
    clean.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        clean.set_query(Some(&query));
    }

    let path = clean.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        clean.set_path(path.trim_end_matches('/'));
    }
    clean
}

fn is_tracking_param(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.starts_with("utm_")
        || k.starts_with("mc_")
        || matches!(k.as_str(), "fbclid" | "gclid" | "msclkid" | "igshid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_domain_basic() {
        assert_eq!(registered_domain("www.example.com"), "example.com");
        assert_eq!(registered_domain("example.com"), "example.com");
        assert_eq!(registered_domain("a.b.example.com"), "example.com");
    }

    #[test]
    fn registered_domain_multi_part_tld() {
        assert_eq!(registered_domain("www.example.co.uk"), "example.co.uk");
        assert_eq!(registered_domain("shop.example.com.au"), "example.com.au");
    }

    #[test]
    fn registered_domain_ip_literal() {
        assert_eq!(registered_domain("192.168.1.10"), "192.168.1.10");
    }

    #[test]
    fn same_site_rules() {
        let base = Url::parse("https://www.venue.co.uk/").unwrap();
        let ok = Url::parse("https://venue.co.uk/menu").unwrap();
        let off = Url::parse("https://other.co.uk/menu").unwrap();
        let ftp = Url::parse("ftp://venue.co.uk/menu").unwrap();

        assert!(same_site(&base, &ok));
        assert!(!same_site(&base, &off));
        assert!(!same_site(&base, &ftp));
    }

    #[test]
    fn normalize_strips_tracking() {
        let url = Url::parse("https://v.example/menu/?utm_source=x&page=2#top").unwrap();
        let norm = normalize_url(&url);
        assert_eq!(norm.as_str(), "https://v.example/menu?page=2");
    }

    #[test]
    fn normalize_keeps_root_slash() {
        let url = Url::parse("https://v.example/?fbclid=abc").unwrap();
        assert_eq!(normalize_url(&url).as_str(), "https://v.example/");
    }
}
