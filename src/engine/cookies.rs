//! Cookies: [`CanonicalCookie`], the in-memory [`CookieJar`], change notification and
//! persistent stores.

mod canonical_cookie;
mod change;
mod change_dispatcher;
mod cookie_jar;
mod inclusion_status;
mod options;
pub mod registry;
pub mod store;
pub mod util;

pub use canonical_cookie::build_cookie_line;
pub use canonical_cookie::cookie_sorter;
pub use canonical_cookie::CanonicalCookie;
pub use canonical_cookie::CookieDetails;
pub use canonical_cookie::CookieLineFields;
pub use canonical_cookie::CookieSignature;
pub use canonical_cookie::MAX_EXPIRY_DAYS;

pub use options::CookieAccessSemantics;
pub use options::CookieEffectiveSameSite;
pub use options::CookieOptions;
pub use options::CookiePriority;
pub use options::CookieSameSite;
pub use options::SameSiteContext;

pub use inclusion_status::CookieAccessResult;
pub use inclusion_status::CookieInclusionStatus;
pub use inclusion_status::CookieListResult;
pub use inclusion_status::CookieWithAccessResult;
pub use inclusion_status::ExclusionReasons;

pub use change::CookieChangeCallback;
pub use change::CookieChangeCause;
pub use change::CookieChangeInfo;
pub use change_dispatcher::CookieChangeDispatcher;
pub use change_dispatcher::CookieChangeSubscription;
pub use change_dispatcher::SubscriptionId;

pub use cookie_jar::CookieJar;

pub use store::BeforeFlushCallback;
pub use store::FlushCallback;
pub use store::LoadedCallback;
pub use store::PersistentCookieStore;
pub use store::PersistentCookieStoreHandle;
#[cfg(feature = "sqlite_cookie_store")]
pub use store::SqlitePersistentCookieStore;
