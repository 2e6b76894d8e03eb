//! Cookie attribute enums and the per-request [`CookieOptions`].

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use time::OffsetDateTime;

/// Eviction priority of a cookie. Lower priorities are purged first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CookiePriority {
    Low,
    #[default]
    Medium,
    High,
}

impl CookiePriority {
    /// Parses a `Priority` attribute value. Unknown or missing values map to `Medium`.
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("low") => CookiePriority::Low,
            Some(v) if v.eq_ignore_ascii_case("high") => CookiePriority::High,
            _ => CookiePriority::Medium,
        }
    }
}

impl Display for CookiePriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CookiePriority::Low => write!(f, "Low"),
            CookiePriority::Medium => write!(f, "Medium"),
            CookiePriority::High => write!(f, "High"),
        }
    }
}

/// The `SameSite` attribute as it was set on the cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CookieSameSite {
    /// No (or an unrecognized) `SameSite` attribute.
    #[default]
    Unspecified,
    /// `SameSite=None`
    NoRestriction,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=Strict`
    Strict,
}

impl CookieSameSite {
    /// Parses a `SameSite` attribute value (case-insensitive).
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("strict") => CookieSameSite::Strict,
            Some(v) if v.eq_ignore_ascii_case("lax") => CookieSameSite::Lax,
            Some(v) if v.eq_ignore_ascii_case("none") => CookieSameSite::NoRestriction,
            _ => CookieSameSite::Unspecified,
        }
    }
}

/// The same-site mode actually enforced for a cookie, after applying the access semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieEffectiveSameSite {
    NoRestriction,
    Lax,
    Strict,
}

/// Whether legacy (pre-`SameSite`-by-default) rules apply to a cookie access.
///
/// `Unknown` gets the legacy rules: `SameSite`-by-default is not enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CookieAccessSemantics {
    #[default]
    Unknown,
    NonLegacy,
    Legacy,
}

impl CookieAccessSemantics {
    /// Whether the legacy rules apply. True for `Legacy` and `Unknown`.
    pub fn is_legacy(self) -> bool {
        !matches!(self, CookieAccessSemantics::NonLegacy)
    }
}

/// How "same-site" the request that wants to read or write cookies is.
///
/// Ordered from least to most trusted, so `context >= SameSiteLax` reads naturally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SameSiteContext {
    #[default]
    CrossSite,
    SameSiteLax,
    SameSiteStrict,
}

/// Options that control which cookies a request may see or modify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Exclude `HttpOnly` cookies (script access). Defaults to `true`.
    pub exclude_httponly: bool,
    /// Same-site context of the request.
    pub same_site_context: SameSiteContext,
    /// Bump the last-access time of returned cookies. Defaults to `true`.
    pub update_access_time: bool,
    /// Report excluded cookies together with the reasons they were excluded.
    pub return_excluded_cookies: bool,
    /// Server `Date` header, used to correct `Expires` for clock skew.
    pub server_time: Option<OffsetDateTime>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            exclude_httponly: true,
            same_site_context: SameSiteContext::CrossSite,
            update_access_time: true,
            return_excluded_cookies: false,
            server_time: None,
        }
    }
}

impl CookieOptions {
    /// Options that include every cookie that matches the URL: http-only cookies and a
    /// strict same-site context.
    pub fn all_inclusive() -> Self {
        Self {
            exclude_httponly: false,
            same_site_context: SameSiteContext::SameSiteStrict,
            ..Self::default()
        }
    }

    pub fn with_include_httponly(mut self) -> Self {
        self.exclude_httponly = false;
        self
    }

    pub fn with_same_site_context(mut self, context: SameSiteContext) -> Self {
        self.same_site_context = context;
        self
    }

    pub fn with_do_not_update_access_time(mut self) -> Self {
        self.update_access_time = false;
        self
    }

    pub fn with_return_excluded_cookies(mut self) -> Self {
        self.return_excluded_cookies = true;
        self
    }
}
