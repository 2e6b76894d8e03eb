//! In-memory cookie index.
//!
//! The [`CookieJar`] holds the authoritative copy of every cookie of an engine,
//! partitioned by domain key. Within a key, cookies are unique by their
//! [`CookieSignature`] (name, domain, path).
//!
//! The jar enforces nothing beyond that uniqueness: overwrite rules, expiry, garbage
//! collection and store mirroring are all done by the engine that owns it.
//!
//! ## Notes
//! - Keys are kept in a `BTreeMap` so whole-store listings are deterministic.
//! - This type is **not** internally synchronized. It lives on the engine's sequence.

use crate::engine::cookies::{CanonicalCookie, CookieSignature};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct CookieJar {
    entries: BTreeMap<String, HashMap<CookieSignature, CanonicalCookie>>,
    len: usize,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of cookies.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count_for_key(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, HashMap::len)
    }

    pub fn get(&self, key: &str, signature: &CookieSignature) -> Option<&CanonicalCookie> {
        self.entries.get(key)?.get(signature)
    }

    pub fn get_mut(
        &mut self,
        key: &str,
        signature: &CookieSignature,
    ) -> Option<&mut CanonicalCookie> {
        self.entries.get_mut(key)?.get_mut(signature)
    }

    /// Inserts `cookie` under `key`, returning the equivalent cookie it replaced.
    pub fn insert(&mut self, key: &str, cookie: CanonicalCookie) -> Option<CanonicalCookie> {
        let replaced = self
            .entries
            .entry(key.to_string())
            .or_default()
            .insert(cookie.signature(), cookie);
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    pub fn remove(&mut self, key: &str, signature: &CookieSignature) -> Option<CanonicalCookie> {
        let cookies = self.entries.get_mut(key)?;
        let removed = cookies.remove(signature)?;
        if cookies.is_empty() {
            self.entries.remove(key);
        }
        self.len -= 1;
        Some(removed)
    }

    pub fn cookies_for_key<'a>(
        &'a self,
        key: &str,
    ) -> impl Iterator<Item = &'a CanonicalCookie> + 'a {
        self.entries.get(key).into_iter().flat_map(HashMap::values)
    }

    pub fn signatures_for_key(&self, key: &str) -> Vec<CookieSignature> {
        self.cookies_for_key(key).map(CanonicalCookie::signature).collect()
    }

    /// Every cookie, with its domain key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CanonicalCookie)> {
        self.entries
            .iter()
            .flat_map(|(key, cookies)| cookies.values().map(move |cookie| (key.as_str(), cookie)))
    }

    /// `(key, signature)` of every cookie matching `predicate`.
    pub fn find_all(
        &self,
        mut predicate: impl FnMut(&CanonicalCookie) -> bool,
    ) -> Vec<(String, CookieSignature)> {
        self.iter()
            .filter(|(_, cookie)| predicate(cookie))
            .map(|(key, cookie)| (key.to_string(), cookie.signature()))
            .collect()
    }
}
