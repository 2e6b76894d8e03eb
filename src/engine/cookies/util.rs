//! Helpers for canonicalizing cookie attributes against the URL that set them.

use crate::engine::cookies::inclusion_status::ExclusionReasons;
use crate::engine::cookies::registry;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use url::{Host, Url};

/// Maximum combined size of a cookie name and value.
pub const MAX_COOKIE_NAME_VALUE_SIZE: usize = 4096;
/// Maximum size of a single attribute value (`Path`, `Domain`, ...).
pub const MAX_COOKIE_ATTRIBUTE_VALUE_SIZE: usize = 1024;

/// Cookie name prefixes that impose additional requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookiePrefix {
    None,
    Secure,
    Host,
}

pub fn is_secure_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "wss")
}

pub(crate) fn is_control_char(c: char) -> bool {
    (c < '\u{20}' && c != '\t') || c == '\u{7f}'
}

pub fn contains_control_character(s: &str) -> bool {
    s.chars().any(is_control_char)
}

/// Validates a name/value pair. Returns the reasons it is unacceptable, empty if fine.
pub fn validate_name_and_value(name: &str, value: &str) -> ExclusionReasons {
    let mut reasons = ExclusionReasons::empty();

    if name.is_empty() && value.is_empty() {
        reasons |= ExclusionReasons::NO_COOKIE_CONTENT;
    }
    if name.len() + value.len() > MAX_COOKIE_NAME_VALUE_SIZE {
        reasons |= ExclusionReasons::NAME_VALUE_PAIR_EXCEEDS_MAX_SIZE;
    }
    if name.chars().any(|c| is_control_char(c) || c == '=' || c == ';')
        || value.chars().any(|c| is_control_char(c) || c == ';')
    {
        reasons |= ExclusionReasons::DISALLOWED_CHARACTER;
    }

    reasons
}

/// Canonical cookie domain for a cookie set by `url` with the given `Domain`
/// attribute (empty when absent).
///
/// Returns the bare host for host cookies and `.domain` for domain cookies. Returns
/// `None` when the attribute is not acceptable for this URL.
pub fn get_cookie_domain_with_string(url: &Url, domain_string: &str) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    if domain_string.is_empty() {
        return Some(host);
    }

    let attr = domain_string.strip_prefix('.').unwrap_or(domain_string);
    if attr.is_empty() || attr.len() > MAX_COOKIE_ATTRIBUTE_VALUE_SIZE {
        return None;
    }

    let canon = match Host::parse(attr).ok()? {
        Host::Domain(domain) => domain,
        // IP literals can only ever name the host itself.
        ip => return (ip.to_string() == host).then_some(host),
    };

    if registry::is_ip_literal(&host) {
        return None;
    }

    match registry::registrable_domain(&host) {
        // Hosts on a public or unknown suffix may only set host cookies.
        None => return (canon == host).then_some(host),
        Some(registrable) if canon.len() < registrable.len() => return None,
        Some(_) => {}
    }

    let on_boundary = host.len() > canon.len()
        && host.ends_with(canon.as_str())
        && host.as_bytes()[host.len() - canon.len() - 1] == b'.';
    if host == canon || on_boundary {
        Some(format!(".{canon}"))
    } else {
        None
    }
}

/// RFC 6265 §5.1.4 default path: the URL path up to (not including) its last `/`.
pub fn get_default_path(url: &Url) -> String {
    let path = url.path();
    if !path.starts_with('/') {
        return "/".to_string();
    }
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Cookie path for a `Path` attribute (empty when absent).
pub fn canon_path_with_string(url: &Url, path_string: &str) -> String {
    if path_string.is_empty() || !path_string.starts_with('/') {
        return get_default_path(url);
    }
    path_string.to_string()
}

pub fn get_cookie_prefix(name: &str) -> CookiePrefix {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("__secure-") {
        CookiePrefix::Secure
    } else if lower.starts_with("__host-") {
        CookiePrefix::Host
    } else {
        CookiePrefix::None
    }
}

/// Checks the requirements a name prefix puts on the other attributes.
///
/// `domain_attr` and `path_attr` are the raw attributes as given, `None` when absent.
pub fn is_cookie_prefix_valid(
    prefix: CookiePrefix,
    url: &Url,
    secure: bool,
    domain_attr: Option<&str>,
    path_attr: Option<&str>,
) -> bool {
    match prefix {
        CookiePrefix::None => true,
        CookiePrefix::Secure => secure && is_secure_scheme(url),
        CookiePrefix::Host => {
            secure
                && is_secure_scheme(url)
                && domain_attr.map_or(true, str::is_empty)
                && path_attr == Some("/")
        }
    }
}

/// Parses an `Expires` attribute. Accepts the RFC 1123 form, the Netscape
/// `Wdy, DD-Mon-YYYY HH:MM:SS GMT` form, asctime and RFC 3339.
pub fn parse_cookie_expiration_time(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc2822) {
        return Some(dt);
    }

    let netscape = format_description!(
        "[weekday repr:short], [day]-[month repr:short]-[year] [hour]:[minute]:[second] GMT"
    );
    let asctime = format_description!(
        "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
    );
    for format in [netscape, asctime] {
        if let Ok(dt) = PrimitiveDateTime::parse(value, format) {
            return Some(dt.assume_utc());
        }
    }

    OffsetDateTime::parse(value, &Rfc3339).ok()
}
