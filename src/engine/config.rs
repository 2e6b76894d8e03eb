use time::Duration;

/// A domain key may hold this many cookies before domain garbage collection starts.
pub const DOMAIN_MAX_COOKIES: usize = 180;
/// Domain garbage collection purges down to `DOMAIN_MAX_COOKIES - DOMAIN_PURGE_COOKIES`.
pub const DOMAIN_PURGE_COOKIES: usize = 30;
/// The whole store may hold this many cookies before global garbage collection starts.
pub const MAX_COOKIES: usize = 3300;
/// Global garbage collection purges down to `MAX_COOKIES - GLOBAL_PURGE_COOKIES`.
pub const GLOBAL_PURGE_COOKIES: usize = 300;
/// Cookies accessed within this many days are safe from global garbage collection.
pub const SAFE_FROM_GLOBAL_PURGE_DAYS: i64 = 30;
/// Minimum age of a last-access time before reads bump it again.
pub const LAST_ACCESS_UPDATE_THRESHOLD_SECONDS: i64 = 60;
/// URL schemes that can carry cookies unless configured otherwise.
pub const DEFAULT_COOKIEABLE_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

/// When the engine reads the whole persistent store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Load per domain key on first use; only whole-store operations load everything.
    #[default]
    FetchWhenNecessary,
    /// The first operation of any kind starts loading the whole store.
    AlwaysFetch,
}

/// Cookie engine configuration.
#[derive(Debug, Clone)]
pub struct CookieEngineConfig {
    /// Per domain key limit that triggers domain garbage collection
    pub domain_max_cookies: usize,
    /// How many cookies below the limit domain garbage collection purges to
    pub domain_purge_cookies: usize,
    /// Store-wide limit that triggers global garbage collection
    pub max_cookies: usize,
    /// How many cookies below the limit global garbage collection purges to
    pub global_purge_cookies: usize,
    /// Cookies accessed more recently than this are never globally purged
    pub safe_from_global_purge: Duration,
    /// Last-access times younger than this are not updated on read
    pub last_access_threshold: Duration,
    /// URL schemes for which cookies are read and written
    pub cookieable_schemes: Vec<String>,
    /// Also mirror session cookies to the persistent store
    pub persist_session_cookies: bool,
    pub fetch_strategy: FetchStrategy,
    /// Capacity of the command channel between handles and the engine
    pub channel_capacity: usize,
}

impl Default for CookieEngineConfig {
    fn default() -> Self {
        Self {
            domain_max_cookies: DOMAIN_MAX_COOKIES,
            domain_purge_cookies: DOMAIN_PURGE_COOKIES,
            max_cookies: MAX_COOKIES,
            global_purge_cookies: GLOBAL_PURGE_COOKIES,
            safe_from_global_purge: Duration::days(SAFE_FROM_GLOBAL_PURGE_DAYS),
            last_access_threshold: Duration::seconds(LAST_ACCESS_UPDATE_THRESHOLD_SECONDS),
            cookieable_schemes: DEFAULT_COOKIEABLE_SCHEMES.iter().map(|s| s.to_string()).collect(),
            persist_session_cookies: false,
            fetch_strategy: FetchStrategy::FetchWhenNecessary,
            channel_capacity: 128,
        }
    }
}
