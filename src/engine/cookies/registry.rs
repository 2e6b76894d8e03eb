//! Domain keying through the public suffix list.
//!
//! Cookies are partitioned by *domain key*: the registrable domain (eTLD+1) of the
//! cookie domain. Hosts without a registrable domain (IP literals, single-label hosts,
//! hosts under an unknown suffix) are their own key.

use std::net::{Ipv4Addr, Ipv6Addr};
use url::Url;

/// Returns the registrable domain of `host`, or `None` when the host has none.
pub fn registrable_domain(host: &str) -> Option<&str> {
    let host = host.strip_prefix('.').unwrap_or(host);
    if host.is_empty() || is_ip_literal(host) {
        return None;
    }

    let domain = psl::domain(host.as_bytes())?;
    if !domain.suffix().is_known() {
        return None;
    }

    std::str::from_utf8(domain.as_bytes()).ok()
}

/// Domain key for a cookie domain (with or without a leading dot).
pub fn get_key(domain: &str) -> String {
    let bare = domain.strip_prefix('.').unwrap_or(domain);
    registrable_domain(bare).unwrap_or(bare).to_string()
}

/// Domain key for the host of `url`. URLs without a host map to the empty key.
pub fn get_key_for_url(url: &Url) -> String {
    get_key(url.host_str().unwrap_or_default())
}

pub(crate) fn is_ip_literal(host: &str) -> bool {
    host.starts_with('[') || host.parse::<Ipv4Addr>().is_ok() || host.parse::<Ipv6Addr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_collapse_to_registrable_domain() {
        assert_eq!(get_key("www.example.com"), "example.com");
        assert_eq!(get_key(".example.com"), "example.com");
        assert_eq!(get_key("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(get_key("example.com"), "example.com");
    }

    #[test]
    fn hosts_without_registrable_domain_are_their_own_key() {
        assert_eq!(get_key("localhost"), "localhost");
        assert_eq!(get_key("127.0.0.1"), "127.0.0.1");
        assert_eq!(get_key("[::1]"), "[::1]");
        assert_eq!(get_key("com"), "com");
    }

    #[test]
    fn key_for_url() {
        let url = Url::parse("https://login.example.org/path").unwrap();
        assert_eq!(get_key_for_url(&url), "example.org");
    }

    #[test]
    fn registrable_domains() {
        assert_eq!(registrable_domain("com"), None);
        assert_eq!(registrable_domain("www.example.com"), Some("example.com"));
    }
}
