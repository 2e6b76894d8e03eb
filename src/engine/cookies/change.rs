//! Cookie change notifications.

use crate::engine::cookies::options::CookieAccessSemantics;
use crate::engine::cookies::CanonicalCookie;
use std::sync::Arc;

/// Why a cookie changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieChangeCause {
    /// The cookie was added to the store.
    Inserted,
    /// Deleted on request of a caller.
    Explicit,
    /// Deleted for a reason that is not reported further.
    UnknownDeletion,
    /// Replaced by an equivalent cookie.
    Overwrite,
    /// Found expired and removed.
    Expired,
    /// Removed by garbage collection.
    Evicted,
    /// Replaced by an equivalent cookie that was itself already expired.
    ExpiredOverwrite,
}

impl CookieChangeCause {
    pub fn is_deletion(self) -> bool {
        self != CookieChangeCause::Inserted
    }
}

/// A single change to the cookie store, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieChangeInfo {
    /// Snapshot of the cookie at the time of the change.
    pub cookie: CanonicalCookie,
    pub access_semantics: CookieAccessSemantics,
    pub cause: CookieChangeCause,
}

/// Callback invoked for every matching change. Runs on the engine's sequence.
pub type CookieChangeCallback = Arc<dyn Fn(&CookieChangeInfo) + Send + Sync>;
