//! Persistent cookie store infrastructure.
//!
//! A **persistent cookie store** is the durable backing of a [`CookieEngine`]. The
//! engine keeps the authoritative copy of every cookie in memory and mirrors
//! mutations to the store; the store only has to hand the cookies back on the next
//! start.
//!
//! - Loading is asynchronous and callback-based: the whole store at once
//!   ([`PersistentCookieStore::load`]) or a single domain key at a time
//!   ([`PersistentCookieStore::load_cookies_for_key`]).
//! - Mutations (`add_cookie`, `update_cookie_access_time`, `delete_cookie`) are
//!   fire-and-forget. Implementations are free to batch them.
//! - [`PersistentCookieStore::flush`] writes out everything pending and then calls back.
//!
//! Callbacks may be invoked from any thread (or inline). The engine wraps them so
//! that the resulting work always runs on its own sequence.
//!
//! The engine never distinguishes a failing store from an empty one: a store that
//! cannot read its data should log the failure and deliver an empty list.
//!
//! This module exports one implementation:
//! - [`SqlitePersistentCookieStore`]: SQLite-backed store (feature `sqlite_cookie_store`).
//!
//! ## Example
//! ```rust,no_run
//! # #[cfg(feature = "sqlite_cookie_store")]
//! # async fn run() -> anyhow::Result<()> {
//! use gosub_cookies::cookies::SqlitePersistentCookieStore;
//! use gosub_cookies::CookieEngine;
//!
//! let store = SqlitePersistentCookieStore::new("cookies.db")?;
//! let engine = CookieEngine::new(Some(store), None);
//! let (handle, join) = engine.start()?;
//!
//! let cookies = handle.get_all_cookies().await?;
//! println!("{} cookies on disk", cookies.len());
//!
//! handle.shutdown().await?;
//! join.await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`CookieEngine`]: crate::engine::CookieEngine

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "sqlite_cookie_store")]
mod sqlite;

use crate::engine::cookies::CanonicalCookie;
use std::sync::Arc;

/// SQLite-backed persistent cookie store.
#[cfg(feature = "sqlite_cookie_store")]
pub use sqlite::SqlitePersistentCookieStore;

/// Receives the cookies read by a load.
pub type LoadedCallback = Box<dyn FnOnce(Vec<CanonicalCookie>) + Send>;

/// Called once a flush has completed.
pub type FlushCallback = Box<dyn FnOnce() + Send>;

/// Called right before the store commits pending operations.
pub type BeforeFlushCallback = Box<dyn Fn() + Send + Sync>;

/// A handle to a persistent cookie store trait.
pub type PersistentCookieStoreHandle = Arc<dyn PersistentCookieStore>;

/// Durable backing for the cookie engine.
///
/// Implementations must be `Send + Sync` and internally synchronized; every method
/// takes `&self`.
pub trait PersistentCookieStore: Send + Sync {
    /// Reads every cookie in the store and passes them to `loaded`.
    ///
    /// `loaded` must be called exactly once, also when reading fails (with an empty
    /// list).
    fn load(&self, loaded: LoadedCallback);

    /// Reads the cookies whose domain maps to the domain key `key`.
    ///
    /// Stores without an efficient per-key lookup may deliver more than asked for;
    /// the engine tolerates cookies it has already seen.
    fn load_cookies_for_key(&self, key: &str, loaded: LoadedCallback);

    fn add_cookie(&self, cookie: &CanonicalCookie);

    fn update_cookie_access_time(&self, cookie: &CanonicalCookie);

    fn delete_cookie(&self, cookie: &CanonicalCookie);

    /// Keep session cookies on disk when the store shuts down.
    fn set_force_keep_session_state(&self);

    fn set_before_flush_callback(&self, callback: Option<BeforeFlushCallback>);

    /// Writes out all pending operations, then calls `callback` (if any).
    fn flush(&self, callback: Option<FlushCallback>);
}
