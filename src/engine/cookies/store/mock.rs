//! In-memory [`PersistentCookieStore`] test double.
//!
//! Records every call. Loads either complete immediately from a preset list of
//! cookies, or are held until the test completes them by hand, which makes it possible
//! to interleave load completions with engine operations.

use crate::engine::cookies::registry;
use crate::engine::cookies::store::{
    BeforeFlushCallback, FlushCallback, LoadedCallback, PersistentCookieStore,
};
use crate::engine::cookies::CanonicalCookie;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreCall {
    Load,
    LoadForKey(String),
    Add(CanonicalCookie),
    UpdateAccessTime(CanonicalCookie),
    Delete(CanonicalCookie),
    Flush,
}

#[derive(Default)]
pub(crate) struct MockPersistentCookieStore {
    /// When set, loads complete inline with (a per-key subset of) these cookies.
    preset: Option<Vec<CanonicalCookie>>,
    calls: Mutex<Vec<StoreCall>>,
    pending_load: Mutex<Option<LoadedCallback>>,
    pending_key_loads: Mutex<Vec<(String, LoadedCallback)>>,
    force_keep_session_state: AtomicBool,
    before_flush: Mutex<Option<BeforeFlushCallback>>,
}

impl MockPersistentCookieStore {
    /// A store whose loads wait for [`Self::complete_load`] / [`Self::complete_key_load`].
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store whose loads complete immediately with `cookies`.
    pub(crate) fn with_cookies(cookies: Vec<CanonicalCookie>) -> Arc<Self> {
        Arc::new(Self {
            preset: Some(cookies),
            ..Default::default()
        })
    }

    pub(crate) fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub(crate) fn added(&self) -> Vec<CanonicalCookie> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Add(cookie) => Some(cookie),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn deleted(&self) -> Vec<CanonicalCookie> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Delete(cookie) => Some(cookie),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn has_pending_load(&self) -> bool {
        self.pending_load.lock().unwrap().is_some()
    }

    pub(crate) fn pending_key_loads(&self) -> Vec<String> {
        self.pending_key_loads.lock().unwrap().iter().map(|(key, _)| key.clone()).collect()
    }

    pub(crate) fn force_keep_session_state(&self) -> bool {
        self.force_keep_session_state.load(Ordering::SeqCst)
    }

    /// Completes the held full load. Returns `false` when none was requested.
    pub(crate) fn complete_load(&self, cookies: Vec<CanonicalCookie>) -> bool {
        let loaded = self.pending_load.lock().unwrap().take();
        match loaded {
            Some(loaded) => {
                loaded(cookies);
                true
            }
            None => false,
        }
    }

    /// Completes the held load for `key`. Returns `false` when none was requested.
    pub(crate) fn complete_key_load(&self, key: &str, cookies: Vec<CanonicalCookie>) -> bool {
        let loaded = {
            let mut pending = self.pending_key_loads.lock().unwrap();
            let idx = pending.iter().position(|(k, _)| k == key);
            idx.map(|idx| pending.remove(idx).1)
        };
        match loaded {
            Some(loaded) => {
                loaded(cookies);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PersistentCookieStore for MockPersistentCookieStore {
    fn load(&self, loaded: LoadedCallback) {
        self.record(StoreCall::Load);
        match &self.preset {
            Some(cookies) => loaded(cookies.clone()),
            None => *self.pending_load.lock().unwrap() = Some(loaded),
        }
    }

    fn load_cookies_for_key(&self, key: &str, loaded: LoadedCallback) {
        self.record(StoreCall::LoadForKey(key.to_string()));
        match &self.preset {
            Some(cookies) => loaded(
                cookies
                    .iter()
                    .filter(|c| registry::get_key(c.domain()) == key)
                    .cloned()
                    .collect(),
            ),
            None => self.pending_key_loads.lock().unwrap().push((key.to_string(), loaded)),
        }
    }

    fn add_cookie(&self, cookie: &CanonicalCookie) {
        self.record(StoreCall::Add(cookie.clone()));
    }

    fn update_cookie_access_time(&self, cookie: &CanonicalCookie) {
        self.record(StoreCall::UpdateAccessTime(cookie.clone()));
    }

    fn delete_cookie(&self, cookie: &CanonicalCookie) {
        self.record(StoreCall::Delete(cookie.clone()));
    }

    fn set_force_keep_session_state(&self) {
        self.force_keep_session_state.store(true, Ordering::SeqCst);
    }

    fn set_before_flush_callback(&self, callback: Option<BeforeFlushCallback>) {
        *self.before_flush.lock().unwrap() = callback;
    }

    fn flush(&self, callback: Option<FlushCallback>) {
        self.record(StoreCall::Flush);
        if let Some(before_flush) = self.before_flush.lock().unwrap().as_ref() {
            before_flush();
        }
        if let Some(callback) = callback {
            callback();
        }
    }
}
