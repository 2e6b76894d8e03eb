//! SQLite-backed persistent cookie store.
//!
//! `SqlitePersistentCookieStore` keeps every cookie of an engine in a single SQLite
//! database and implements [`PersistentCookieStore`].
//!
//! ## Design
//! - One **table** (`cookies`), one row per cookie, keyed by the creation time (which
//!   the engine keeps unique).
//! - Times are stored as nanoseconds since the Unix epoch; `0` means "not set".
//! - Mutations are queued in memory and committed in a single transaction on
//!   [`PersistentCookieStore::flush`], or as soon as [`COMMIT_AFTER_BATCH_SIZE`]
//!   operations are pending.
//! - Database access is via an `r2d2` pool for safe multi-threaded use.
//!
//! ## Failure handling
//! - Construction fails with an error when the database cannot be opened.
//! - Every later failure is logged and swallowed: a load that fails delivers an
//!   empty list, a commit that fails drops its batch.
//!
//! ## Session cookies
//! Session cookies only end up here when the engine persists them. They are removed
//! again when the store is dropped, unless
//! [`PersistentCookieStore::set_force_keep_session_state`] was called.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::rusqlite::{params, OpenFlags, Row};
use r2d2_sqlite::SqliteConnectionManager;
use time::OffsetDateTime;

use crate::engine::cookies::options::{CookiePriority, CookieSameSite};
use crate::engine::cookies::registry;
use crate::engine::cookies::store::{
    BeforeFlushCallback, FlushCallback, LoadedCallback, PersistentCookieStore,
};
use crate::engine::cookies::CanonicalCookie;

/// Pending operations are committed once this many have queued up.
pub const COMMIT_AFTER_BATCH_SIZE: usize = 512;

enum PendingOperation {
    Add(CanonicalCookie),
    UpdateAccessTime(CanonicalCookie),
    Delete(CanonicalCookie),
}

pub struct SqlitePersistentCookieStore {
    /// Connection pool for SQLite database (so it can run multithreaded)
    pool: Pool<SqliteConnectionManager>,
    pending: Mutex<Vec<PendingOperation>>,
    force_keep_session_state: AtomicBool,
    before_flush: Mutex<Option<BeforeFlushCallback>>,
}

impl std::fmt::Debug for SqlitePersistentCookieStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePersistentCookieStore").finish_non_exhaustive()
    }
}

impl SqlitePersistentCookieStore {
    /// Opens (or creates) a SQLite database at `path` and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )
            .with_init(|c| {
                c.busy_timeout(std::time::Duration::from_millis(500))?;
                c.pragma_update(None, "journal_mode", &"WAL")?;
                c.execute_batch(
                    "CREATE TABLE IF NOT EXISTS cookies (
                        creation_utc INTEGER NOT NULL PRIMARY KEY,
                        host_key TEXT NOT NULL,
                        name TEXT NOT NULL,
                        value TEXT NOT NULL,
                        path TEXT NOT NULL,
                        expires_utc INTEGER NOT NULL,
                        last_access_utc INTEGER NOT NULL,
                        is_secure INTEGER NOT NULL,
                        is_httponly INTEGER NOT NULL,
                        is_persistent INTEGER NOT NULL,
                        samesite INTEGER NOT NULL,
                        priority INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS cookies_host_key ON cookies(host_key);",
                )?;
                Ok(())
            });

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)?;

        Ok(Arc::new(Self {
            pool,
            pending: Mutex::new(Vec::new()),
            force_keep_session_state: AtomicBool::new(false),
            before_flush: Mutex::new(None),
        }))
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn load_all(&self) -> Result<Vec<CanonicalCookie>> {
        self.commit()?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, value, host_key, path, creation_utc, expires_utc, last_access_utc,
                    is_secure, is_httponly, samesite, priority
             FROM cookies",
        )?;
        let cookies = stmt.query_map([], cookie_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(cookies)
    }

    fn load_for_key(&self, key: &str) -> Result<Vec<CanonicalCookie>> {
        self.commit()?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, value, host_key, path, creation_utc, expires_utc, last_access_utc,
                    is_secure, is_httponly, samesite, priority
             FROM cookies WHERE host_key = ?1 OR host_key LIKE ?2",
        )?;
        let cookies = stmt
            .query_map(params![key, format!("%.{key}")], cookie_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // The LIKE also catches hosts under unknown suffixes that key on their own.
        Ok(cookies
            .into_iter()
            .filter(|cookie| registry::get_key(cookie.domain()) == key)
            .collect())
    }

    fn enqueue(&self, op: PendingOperation) {
        let batch_full = {
            let mut pending = match self.pending.lock() {
                Ok(pending) => pending,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.push(op);
            pending.len() >= COMMIT_AFTER_BATCH_SIZE
        };

        if batch_full {
            if let Err(e) = self.commit() {
                log::error!("failed to commit cookie batch: {e:#}");
            }
        }
    }

    /// Writes all pending operations in one transaction.
    fn commit(&self) -> Result<()> {
        let ops = {
            let mut pending = match self.pending.lock() {
                Ok(pending) => pending,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *pending)
        };

        if let Ok(before_flush) = self.before_flush.lock() {
            if let Some(callback) = before_flush.as_ref() {
                callback();
            }
        }

        if ops.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut add = tx.prepare(
                "INSERT OR REPLACE INTO cookies (creation_utc, host_key, name, value, path,
                    expires_utc, last_access_utc, is_secure, is_httponly, is_persistent,
                    samesite, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            let mut update =
                tx.prepare("UPDATE cookies SET last_access_utc = ?1 WHERE creation_utc = ?2")?;
            let mut delete = tx.prepare("DELETE FROM cookies WHERE creation_utc = ?1")?;

            for op in &ops {
                match op {
                    PendingOperation::Add(cookie) => {
                        add.execute(params![
                            to_db_time(cookie.creation_date()),
                            cookie.domain(),
                            cookie.name(),
                            cookie.value(),
                            cookie.path(),
                            to_db_time(cookie.expiry_date()),
                            to_db_time(cookie.last_access_date()),
                            cookie.is_secure() as i64,
                            cookie.is_http_only() as i64,
                            cookie.is_persistent() as i64,
                            same_site_to_db(cookie.same_site()),
                            priority_to_db(cookie.priority()),
                        ])?;
                    }
                    PendingOperation::UpdateAccessTime(cookie) => {
                        update.execute(params![
                            to_db_time(cookie.last_access_date()),
                            to_db_time(cookie.creation_date())
                        ])?;
                    }
                    PendingOperation::Delete(cookie) => {
                        delete.execute(params![to_db_time(cookie.creation_date())])?;
                    }
                }
            }
        }
        tx.commit()?;

        log::trace!("committed {} cookie operations", ops.len());
        Ok(())
    }

    fn delete_session_cookies(&self) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM cookies WHERE is_persistent = 0", [])?;
        log::debug!("removed {removed} session cookies from the cookie database");
        Ok(())
    }
}

impl PersistentCookieStore for SqlitePersistentCookieStore {
    fn load(&self, loaded: LoadedCallback) {
        match self.load_all() {
            Ok(cookies) => loaded(cookies),
            Err(e) => {
                log::error!("failed to load cookies: {e:#}");
                loaded(Vec::new());
            }
        }
    }

    fn load_cookies_for_key(&self, key: &str, loaded: LoadedCallback) {
        match self.load_for_key(key) {
            Ok(cookies) => loaded(cookies),
            Err(e) => {
                log::error!("failed to load cookies for {key}: {e:#}");
                loaded(Vec::new());
            }
        }
    }

    fn add_cookie(&self, cookie: &CanonicalCookie) {
        if cookie.creation_date().is_none() {
            log::warn!("not persisting cookie {} without creation time", cookie.name());
            return;
        }
        self.enqueue(PendingOperation::Add(cookie.clone()));
    }

    fn update_cookie_access_time(&self, cookie: &CanonicalCookie) {
        self.enqueue(PendingOperation::UpdateAccessTime(cookie.clone()));
    }

    fn delete_cookie(&self, cookie: &CanonicalCookie) {
        self.enqueue(PendingOperation::Delete(cookie.clone()));
    }

    fn set_force_keep_session_state(&self) {
        self.force_keep_session_state.store(true, Ordering::SeqCst);
    }

    fn set_before_flush_callback(&self, callback: Option<BeforeFlushCallback>) {
        match self.before_flush.lock() {
            Ok(mut before_flush) => *before_flush = callback,
            Err(poisoned) => *poisoned.into_inner() = callback,
        }
    }

    fn flush(&self, callback: Option<FlushCallback>) {
        if let Err(e) = self.commit() {
            log::error!("failed to flush cookies: {e:#}");
        }
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for SqlitePersistentCookieStore {
    fn drop(&mut self) {
        if let Err(e) = self.commit() {
            log::error!("failed to commit cookies on shutdown: {e:#}");
        }
        if !self.force_keep_session_state.load(Ordering::SeqCst) {
            if let Err(e) = self.delete_session_cookies() {
                log::error!("failed to remove session cookies: {e:#}");
            }
        }
    }
}

fn cookie_from_row(row: &Row<'_>) -> r2d2_sqlite::rusqlite::Result<CanonicalCookie> {
    Ok(CanonicalCookie::new(
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        from_db_time(row.get(4)?),
        from_db_time(row.get(5)?),
        from_db_time(row.get(6)?),
        row.get::<_, i64>(7)? != 0,
        row.get::<_, i64>(8)? != 0,
        same_site_from_db(row.get(9)?),
        priority_from_db(row.get(10)?),
    ))
}

fn to_db_time(time: Option<OffsetDateTime>) -> i64 {
    time.map_or(0, |t| i64::try_from(t.unix_timestamp_nanos()).unwrap_or(i64::MAX))
}

fn from_db_time(value: i64) -> Option<OffsetDateTime> {
    if value == 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value)).ok()
}

fn same_site_to_db(same_site: CookieSameSite) -> i64 {
    match same_site {
        CookieSameSite::Unspecified => -1,
        CookieSameSite::NoRestriction => 0,
        CookieSameSite::Lax => 1,
        CookieSameSite::Strict => 2,
    }
}

fn same_site_from_db(value: i64) -> CookieSameSite {
    match value {
        0 => CookieSameSite::NoRestriction,
        1 => CookieSameSite::Lax,
        2 => CookieSameSite::Strict,
        _ => CookieSameSite::Unspecified,
    }
}

fn priority_to_db(priority: CookiePriority) -> i64 {
    match priority {
        CookiePriority::Low => 0,
        CookiePriority::Medium => 1,
        CookiePriority::High => 2,
    }
}

fn priority_from_db(value: i64) -> CookiePriority {
    match value {
        0 => CookiePriority::Low,
        2 => CookiePriority::High,
        _ => CookiePriority::Medium,
    }
}
