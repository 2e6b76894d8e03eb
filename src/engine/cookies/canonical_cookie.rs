//! The canonical cookie value type.
//!
//! A [`CanonicalCookie`] is a cookie whose attributes have been validated and
//! canonicalized against the URL that set it:
//!
//! - `domain` is either a bare host (a *host cookie*, sent only to that exact host) or
//!   a dot-prefixed domain (a *domain cookie*, sent to the domain and its subdomains).
//! - `path` always starts with `/`.
//! - `creation` is unique within an engine and never after `last_access`.
//!
//! Only the last-access time changes after a cookie has been stored; every other
//! attribute is replaced by overwriting the cookie as a whole.
//!
//! ```rust,no_run
//! use gosub_cookies::cookies::{CanonicalCookie, CookieLineFields};
//! use time::OffsetDateTime;
//! use url::Url;
//!
//! let url = Url::parse("https://www.example.com/account/login").unwrap();
//! let fields = CookieLineFields {
//!     name: "session".into(),
//!     value: "abc123".into(),
//!     domain: Some("example.com".into()),
//!     secure: true,
//!     http_only: true,
//!     same_site: Some("Lax".into()),
//!     ..Default::default()
//! };
//!
//! let cookie = CanonicalCookie::create(&url, &fields, OffsetDateTime::now_utc(), None).unwrap();
//! assert_eq!(cookie.domain(), ".example.com");
//! assert_eq!(cookie.path(), "/account");
//! ```

use crate::engine::cookies::inclusion_status::{
    CookieAccessResult, CookieInclusionStatus, ExclusionReasons,
};
use crate::engine::cookies::options::{
    CookieAccessSemantics, CookieEffectiveSameSite, CookieOptions, CookiePriority, CookieSameSite,
    SameSiteContext,
};
use crate::engine::cookies::util;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::{Duration, OffsetDateTime};
use url::Url;

/// Expiry dates further away than this (from creation) are clamped.
pub const MAX_EXPIRY_DAYS: i64 = 400;

/// Identity of a cookie in the store: two cookies with the same signature are
/// *equivalent* and cannot coexist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CookieSignature {
    pub name: String,
    pub domain: String,
    pub path: String,
}

/// Attributes of a single `Set-Cookie` line, already split into fields.
///
/// Header tokenization lives outside this crate. Absent attributes are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieLineFields {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<String>,
    pub max_age: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
    pub priority: Option<String>,
}

/// Explicitly provided cookie attributes, for setting a cookie without a header.
///
/// An empty `domain` makes a host cookie. An empty `path` selects the default path
/// of the URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieDetails {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub creation: Option<OffsetDateTime>,
    pub expiry: Option<OffsetDateTime>,
    pub last_access: Option<OffsetDateTime>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: CookieSameSite,
    pub priority: CookiePriority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCookie {
    name: String,
    value: String,
    domain: String,
    path: String,
    #[serde(with = "time::serde::rfc3339::option")]
    creation: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    expiry: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    last_access: Option<OffsetDateTime>,
    secure: bool,
    http_only: bool,
    same_site: CookieSameSite,
    priority: CookiePriority,
}

impl CanonicalCookie {
    /// Builds a cookie from already canonical attributes. No validation takes place.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
        path: impl Into<String>,
        creation: Option<OffsetDateTime>,
        expiry: Option<OffsetDateTime>,
        last_access: Option<OffsetDateTime>,
        secure: bool,
        http_only: bool,
        same_site: CookieSameSite,
        priority: CookiePriority,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: path.into(),
            creation,
            expiry,
            last_access,
            secure,
            http_only,
            same_site,
            priority,
        }
    }

    /// Creates a cookie from a parsed `Set-Cookie` line received from `url`.
    ///
    /// On failure the returned status holds every reason the line was rejected.
    pub fn create(
        url: &Url,
        fields: &CookieLineFields,
        creation_time: OffsetDateTime,
        server_time: Option<OffsetDateTime>,
    ) -> Result<Self, CookieInclusionStatus> {
        let mut status = CookieInclusionStatus::new();

        if url.host_str().is_none() {
            status.add_exclusion_reason(ExclusionReasons::FAILURE_TO_STORE);
            return Err(status);
        }

        status.add_exclusion_reasons(util::validate_name_and_value(&fields.name, &fields.value));

        let domain_attr = fields.domain.as_deref().unwrap_or_default();
        let domain = util::get_cookie_domain_with_string(url, domain_attr);
        if domain.is_none() {
            status.add_exclusion_reason(ExclusionReasons::INVALID_DOMAIN);
        }

        let path_attr = fields.path.as_deref().unwrap_or_default();
        if path_attr.len() > util::MAX_COOKIE_ATTRIBUTE_VALUE_SIZE {
            status.add_exclusion_reason(ExclusionReasons::INVALID_PATH);
        }
        let path = util::canon_path_with_string(url, path_attr);

        let prefix = util::get_cookie_prefix(&fields.name);
        if !util::is_cookie_prefix_valid(
            prefix,
            url,
            fields.secure,
            fields.domain.as_deref(),
            fields.path.as_deref(),
        )
        {
            status.add_exclusion_reason(ExclusionReasons::INVALID_PREFIX);
        }

        let Some(domain) = domain.filter(|_| status.is_include()) else {
            return Err(status);
        };

        let expiry = Self::parse_expiry(fields, creation_time, server_time)
            .map(|expiry| Self::clamp_expiry(expiry, creation_time));

        Ok(Self {
            name: fields.name.clone(),
            value: fields.value.clone(),
            domain,
            path,
            creation: Some(creation_time),
            expiry,
            last_access: Some(creation_time),
            secure: fields.secure,
            http_only: fields.http_only,
            same_site: CookieSameSite::from_attribute(fields.same_site.as_deref()),
            priority: CookiePriority::from_attribute(fields.priority.as_deref()),
        })
    }

    /// Creates a cookie from explicitly provided attributes, validating each of them
    /// the way a `Set-Cookie` line from `url` would be validated.
    pub fn create_sanitized_cookie(
        url: &Url,
        details: &CookieDetails,
    ) -> Result<Self, CookieInclusionStatus> {
        let mut status = CookieInclusionStatus::new();

        if url.host_str().is_none() {
            status.add_exclusion_reason(ExclusionReasons::FAILURE_TO_STORE);
            return Err(status);
        }

        status.add_exclusion_reasons(util::validate_name_and_value(&details.name, &details.value));

        let domain = util::get_cookie_domain_with_string(url, &details.domain);
        if domain.is_none() {
            status.add_exclusion_reason(ExclusionReasons::INVALID_DOMAIN);
        }

        let path = if details.path.is_empty() {
            util::get_default_path(url)
        } else {
            if !details.path.starts_with('/')
                || details.path.len() > util::MAX_COOKIE_ATTRIBUTE_VALUE_SIZE
                || details.path.chars().any(|c| util::is_control_char(c) || c == ';')
            {
                status.add_exclusion_reason(ExclusionReasons::INVALID_PATH);
            }
            details.path.clone()
        };

        let domain_attr = (!details.domain.is_empty()).then_some(details.domain.as_str());
        let path_attr = (!details.path.is_empty()).then_some(details.path.as_str());
        let prefix = util::get_cookie_prefix(&details.name);
        if !util::is_cookie_prefix_valid(prefix, url, details.secure, domain_attr, path_attr) {
            status.add_exclusion_reason(ExclusionReasons::INVALID_PREFIX);
        }

        // A last-access time only makes sense relative to a creation time.
        match (details.creation, details.last_access) {
            (None, Some(_)) => status.add_exclusion_reason(ExclusionReasons::FAILURE_TO_STORE),
            (Some(creation), Some(access)) if access < creation => {
                status.add_exclusion_reason(ExclusionReasons::FAILURE_TO_STORE)
            }
            _ => {}
        }

        let Some(domain) = domain.filter(|_| status.is_include()) else {
            return Err(status);
        };

        let expiry = match (details.expiry, details.creation) {
            (Some(expiry), Some(creation)) => Some(Self::clamp_expiry(expiry, creation)),
            (expiry, _) => expiry,
        };

        Ok(Self {
            name: details.name.clone(),
            value: details.value.clone(),
            domain,
            path,
            creation: details.creation,
            expiry,
            last_access: details.last_access,
            secure: details.secure,
            http_only: details.http_only,
            same_site: details.same_site,
            priority: details.priority,
        })
    }

    fn parse_expiry(
        fields: &CookieLineFields,
        current: OffsetDateTime,
        server_time: Option<OffsetDateTime>,
    ) -> Option<OffsetDateTime> {
        // Max-Age wins over Expires.
        if let Some(max_age) = fields.max_age.as_deref() {
            if let Ok(seconds) = max_age.trim().parse::<i64>() {
                if seconds <= 0 {
                    return Some(OffsetDateTime::UNIX_EPOCH);
                }
                let seconds = seconds.min(MAX_EXPIRY_DAYS * 24 * 60 * 60);
                return Some(current + Duration::seconds(seconds));
            }
        }

        let expires = util::parse_cookie_expiration_time(fields.expires.as_deref()?)?;
        match server_time {
            // Correct for the difference between the server clock and ours.
            Some(server) => expires.checked_add(current - server),
            None => Some(expires),
        }
    }

    fn clamp_expiry(expiry: OffsetDateTime, creation: OffsetDateTime) -> OffsetDateTime {
        match creation.checked_add(Duration::days(MAX_EXPIRY_DAYS)) {
            Some(max) if expiry > max => max,
            _ => expiry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn creation_date(&self) -> Option<OffsetDateTime> {
        self.creation
    }

    pub fn expiry_date(&self) -> Option<OffsetDateTime> {
        self.expiry
    }

    pub fn last_access_date(&self) -> Option<OffsetDateTime> {
        self.last_access
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_http_only(&self) -> bool {
        self.http_only
    }

    pub fn same_site(&self) -> CookieSameSite {
        self.same_site
    }

    pub fn priority(&self) -> CookiePriority {
        self.priority
    }

    pub(crate) fn set_creation_date(&mut self, creation: OffsetDateTime) {
        self.creation = Some(creation);
    }

    pub(crate) fn set_last_access_date(&mut self, last_access: OffsetDateTime) {
        self.last_access = Some(last_access);
    }

    pub fn signature(&self) -> CookieSignature {
        CookieSignature {
            name: self.name.clone(),
            domain: self.domain.clone(),
            path: self.path.clone(),
        }
    }

    /// Session cookies have no expiry and are not persisted by default.
    pub fn is_persistent(&self) -> bool {
        self.expiry.is_some()
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_host_only(&self) -> bool {
        !self.domain.starts_with('.')
    }

    pub fn is_domain_cookie(&self) -> bool {
        self.domain.starts_with('.')
    }

    pub fn domain_without_dot(&self) -> &str {
        self.domain.strip_prefix('.').unwrap_or(&self.domain)
    }

    /// True when this cookie would be sent to `host`.
    pub fn is_domain_match(&self, host: &str) -> bool {
        if self.is_host_only() {
            return host == self.domain;
        }
        // `.example.com` matches `example.com` and `*.example.com`.
        host == self.domain_without_dot() || host.ends_with(&self.domain)
    }

    /// True when this cookie would be sent for a request to `request_path`.
    pub fn is_on_path(&self, request_path: &str) -> bool {
        if self.path == "/" {
            return true;
        }
        if !request_path.starts_with(&self.path) {
            return false;
        }
        self.path.len() == request_path.len()
            || self.path.ends_with('/')
            || request_path.as_bytes()[self.path.len()] == b'/'
    }

    pub fn is_equivalent(&self, other: &CanonicalCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    /// Looser equivalence used to stop insecure origins from shadowing Secure cookies:
    /// same name, domains that match in either direction, and `other` on our path.
    pub fn is_equivalent_for_secure_cookie_matching(&self, other: &CanonicalCookie) -> bool {
        self.name == other.name
            && (self.is_domain_match(other.domain_without_dot())
                || other.is_domain_match(self.domain_without_dot()))
            && self.is_on_path(&other.path)
    }

    /// Orders by (name, domain, path) only. Equivalent cookies compare equal.
    pub fn partial_compare(&self, other: &CanonicalCookie) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.domain.cmp(&other.domain))
            .then_with(|| self.path.cmp(&other.path))
    }

    /// Total order over every attribute, consistent with [`Self::partial_compare`].
    pub fn full_compare(&self, other: &CanonicalCookie) -> Ordering {
        self.partial_compare(other)
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.creation.cmp(&other.creation))
            .then_with(|| self.expiry.cmp(&other.expiry))
            .then_with(|| self.last_access.cmp(&other.last_access))
            .then_with(|| self.secure.cmp(&other.secure))
            .then_with(|| self.http_only.cmp(&other.http_only))
            .then_with(|| self.same_site.cmp(&other.same_site))
            .then_with(|| self.priority.cmp(&other.priority))
    }

    /// The same-site mode enforced for this cookie under `access_semantics`.
    pub fn effective_same_site(
        &self,
        access_semantics: CookieAccessSemantics,
    ) -> CookieEffectiveSameSite {
        match self.same_site {
            CookieSameSite::Strict => CookieEffectiveSameSite::Strict,
            CookieSameSite::Lax => CookieEffectiveSameSite::Lax,
            CookieSameSite::NoRestriction => CookieEffectiveSameSite::NoRestriction,
            CookieSameSite::Unspecified if access_semantics.is_legacy() => {
                CookieEffectiveSameSite::NoRestriction
            }
            CookieSameSite::Unspecified => CookieEffectiveSameSite::Lax,
        }
    }

    /// Decides whether this cookie is sent on a request to `url`. Expiry is not checked.
    pub fn include_for_request_url(
        &self,
        url: &Url,
        options: &CookieOptions,
        access_semantics: CookieAccessSemantics,
    ) -> CookieAccessResult {
        let mut status = CookieInclusionStatus::new();

        if options.exclude_httponly && self.http_only {
            status.add_exclusion_reason(ExclusionReasons::HTTP_ONLY);
        }
        if self.secure && !util::is_secure_scheme(url) {
            status.add_exclusion_reason(ExclusionReasons::SECURE_ONLY);
        }
        if !self.is_domain_match(url.host_str().unwrap_or_default()) {
            status.add_exclusion_reason(ExclusionReasons::DOMAIN_MISMATCH);
        }
        if !self.is_on_path(url.path()) {
            status.add_exclusion_reason(ExclusionReasons::NOT_ON_PATH);
        }

        let effective_same_site = self.effective_same_site(access_semantics);
        let context = options.same_site_context;
        match effective_same_site {
            CookieEffectiveSameSite::Strict if context < SameSiteContext::SameSiteStrict => {
                status.add_exclusion_reason(ExclusionReasons::SAMESITE_STRICT);
            }
            CookieEffectiveSameSite::Lax if context < SameSiteContext::SameSiteLax => {
                if self.same_site == CookieSameSite::Unspecified {
                    status.add_exclusion_reason(
                        ExclusionReasons::SAMESITE_UNSPECIFIED_TREATED_AS_LAX,
                    );
                } else {
                    status.add_exclusion_reason(ExclusionReasons::SAMESITE_LAX);
                }
            }
            _ => {}
        }

        if self.same_site == CookieSameSite::NoRestriction
            && !self.secure
            && !access_semantics.is_legacy()
        {
            status.add_exclusion_reason(ExclusionReasons::SAMESITE_NONE_INSECURE);
        }

        CookieAccessResult {
            status,
            effective_same_site,
            access_semantics,
        }
    }

    /// Structural sanity of a cookie that did not come through a factory (loaded from a
    /// store, handed over by a caller).
    pub fn is_canonical(&self) -> bool {
        if !util::validate_name_and_value(&self.name, &self.value).is_empty() {
            return false;
        }
        if self.domain.is_empty() || self.domain == "." || !self.path.starts_with('/') {
            return false;
        }
        if let (Some(creation), Some(access)) = (self.creation, self.last_access) {
            if access < creation {
                return false;
            }
        }
        match util::get_cookie_prefix(&self.name) {
            util::CookiePrefix::None => true,
            util::CookiePrefix::Secure => self.secure,
            util::CookiePrefix::Host => self.secure && self.is_host_only() && self.path == "/",
        }
    }
}

/// Send order for cookies on a request: longest path first, then earliest creation.
pub fn cookie_sorter(a: &CanonicalCookie, b: &CanonicalCookie) -> Ordering {
    b.path
        .len()
        .cmp(&a.path.len())
        .then_with(|| a.creation.cmp(&b.creation))
}

/// Renders `name=value; name2=value2`. A nameless cookie renders as its value alone.
pub fn build_cookie_line(cookies: &[CanonicalCookie]) -> String {
    cookies
        .iter()
        .map(|cookie| {
            if cookie.name.is_empty() {
                cookie.value.clone()
            } else {
                format!("{}={}", cookie.name, cookie.value)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
