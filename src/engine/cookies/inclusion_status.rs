//! Inclusion status of a cookie for a get or set operation.
//!
//! A status with no exclusion reasons means the cookie was included (or stored).
//! Anything else carries one or more [`ExclusionReasons`] flags.

use crate::engine::cookies::options::{CookieAccessSemantics, CookieEffectiveSameSite};
use crate::engine::cookies::CanonicalCookie;
use bitflags::bitflags;
use std::fmt::{Display, Formatter};

bitflags! {
    /// Why a cookie was excluded from a request or rejected by a set.
    #[derive(Default)]
    pub struct ExclusionReasons: u32 {
        /// HttpOnly cookie requested by a caller that excludes HttpOnly.
        const HTTP_ONLY                           = 1 << 0;
        /// Secure cookie on an insecure URL, or set from an insecure source.
        const SECURE_ONLY                         = 1 << 1;
        const DOMAIN_MISMATCH                     = 1 << 2;
        const NOT_ON_PATH                         = 1 << 3;
        const SAMESITE_STRICT                     = 1 << 4;
        const SAMESITE_LAX                        = 1 << 5;
        const SAMESITE_UNSPECIFIED_TREATED_AS_LAX = 1 << 6;
        const SAMESITE_NONE_INSECURE              = 1 << 7;
        const NONCOOKIEABLE_SCHEME                = 1 << 8;
        /// Would overwrite or shadow a Secure cookie from an insecure source.
        const OVERWRITE_SECURE                    = 1 << 9;
        /// Would overwrite an HttpOnly cookie without permission.
        const OVERWRITE_HTTP_ONLY                 = 1 << 10;
        const INVALID_DOMAIN                      = 1 << 11;
        const INVALID_PREFIX                      = 1 << 12;
        const INVALID_PATH                        = 1 << 13;
        const DISALLOWED_CHARACTER                = 1 << 14;
        const NO_COOKIE_CONTENT                   = 1 << 15;
        const NAME_VALUE_PAIR_EXCEEDS_MAX_SIZE    = 1 << 16;
        const FAILURE_TO_STORE                    = 1 << 17;
    }
}

/// Outcome of an inclusion decision: either included, or the set of reasons it was not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CookieInclusionStatus {
    exclusion_reasons: ExclusionReasons,
}

impl CookieInclusionStatus {
    /// An "include" status.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reasons(reasons: ExclusionReasons) -> Self {
        Self { exclusion_reasons: reasons }
    }

    pub fn is_include(&self) -> bool {
        self.exclusion_reasons.is_empty()
    }

    pub fn has_exclusion_reason(&self, reason: ExclusionReasons) -> bool {
        self.exclusion_reasons.contains(reason)
    }

    /// True if `reason` is set and nothing else is.
    pub fn has_only_exclusion_reason(&self, reason: ExclusionReasons) -> bool {
        self.exclusion_reasons == reason
    }

    pub fn add_exclusion_reason(&mut self, reason: ExclusionReasons) {
        self.exclusion_reasons.insert(reason);
    }

    pub fn add_exclusion_reasons(&mut self, reasons: ExclusionReasons) {
        self.exclusion_reasons.insert(reasons);
    }

    pub fn remove_exclusion_reason(&mut self, reason: ExclusionReasons) {
        self.exclusion_reasons.remove(reason);
    }

    pub fn exclusion_reasons(&self) -> ExclusionReasons {
        self.exclusion_reasons
    }
}

impl Display for CookieInclusionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_include() {
            write!(f, "INCLUDE")
        } else {
            write!(f, "EXCLUDE({:?})", self.exclusion_reasons)
        }
    }
}

/// Result of checking a cookie against a request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieAccessResult {
    pub status: CookieInclusionStatus,
    pub effective_same_site: CookieEffectiveSameSite,
    pub access_semantics: CookieAccessSemantics,
}

/// A cookie together with the access decision that was made for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieWithAccessResult {
    pub cookie: CanonicalCookie,
    pub access_result: CookieAccessResult,
}

/// Result of a cookie list query: included cookies (in send order) and, when requested,
/// the excluded ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieListResult {
    pub included: Vec<CookieWithAccessResult>,
    pub excluded: Vec<CookieWithAccessResult>,
}

impl CookieListResult {
    /// The included cookies, without their access results.
    pub fn cookies(&self) -> Vec<CanonicalCookie> {
        self.included.iter().map(|c| c.cookie.clone()).collect()
    }
}
