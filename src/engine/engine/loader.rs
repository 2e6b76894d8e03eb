//! Load gating.
//!
//! Until the persistent store has been read, operations cannot run against the
//! in-memory index. Operations on a single domain key wait for just that key to load.
//! Whole-store operations start a full load and wait for it; once one of those has
//! been queued, every later operation queues behind it so that completion order
//! matches call order.

use super::{CookieEngine, DeletionCause};
use crate::engine::config::FetchStrategy;
use crate::engine::cookies::{registry, util, CanonicalCookie};
use crate::engine::sequence::EngineTask;
use std::collections::{HashMap, HashSet, VecDeque};
use time::OffsetDateTime;

/// How far loading has progressed, for the whole store or for a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Uninitialized,
    Loading,
    Ready,
}

struct KeyQueue {
    /// Order in which the key load was requested.
    load_started: u64,
    tasks: VecDeque<EngineTask>,
}

#[derive(Default)]
pub(super) struct LoadState {
    initialized: bool,
    seen_global_task: bool,
    started_fetching_all_cookies: bool,
    finished_fetching_all_cookies: bool,
    global_queue: VecDeque<EngineTask>,
    key_queues: HashMap<String, KeyQueue>,
    keys_loaded: HashSet<String>,
    /// Creation times imported so far; a cookie delivered twice is only imported once.
    loaded_creation_times: HashSet<OffsetDateTime>,
    next_load_seq: u64,
}

impl LoadState {
    /// Whether any cookie operation has been issued.
    pub(super) fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl CookieEngine {
    pub fn load_state(&self) -> ReadyState {
        if self.store.is_none() || self.loader.finished_fetching_all_cookies {
            ReadyState::Ready
        } else if self.loader.started_fetching_all_cookies {
            ReadyState::Loading
        } else {
            ReadyState::Uninitialized
        }
    }

    pub fn load_state_for_key(&self, key: &str) -> ReadyState {
        if self.load_state() == ReadyState::Ready || self.loader.keys_loaded.contains(key) {
            ReadyState::Ready
        } else if self.loader.started_fetching_all_cookies
            || self.loader.key_queues.contains_key(key)
        {
            ReadyState::Loading
        } else {
            ReadyState::Uninitialized
        }
    }

    /// Runs `task` once the whole store is loaded.
    pub(super) fn do_cookie_callback(&mut self, task: EngineTask) {
        self.loader.initialized = true;
        self.fetch_all_cookies_if_necessary();
        self.loader.seen_global_task = true;

        if self.store.is_some() && !self.loader.finished_fetching_all_cookies {
            self.loader.global_queue.push_back(task);
            return;
        }

        task(self);
    }

    /// Runs `task` once the cookies for `key` are loaded.
    pub(super) fn do_cookie_callback_for_key(&mut self, key: String, task: EngineTask) {
        self.loader.initialized = true;
        if self.config.fetch_strategy == FetchStrategy::AlwaysFetch {
            self.fetch_all_cookies_if_necessary();
        }

        if self.store.is_some() && !self.loader.finished_fetching_all_cookies {
            if self.loader.seen_global_task {
                self.loader.global_queue.push_back(task);
                return;
            }

            if !self.loader.keys_loaded.contains(&key) {
                if !self.loader.key_queues.contains_key(&key) {
                    self.fetch_cookies_for_key(&key);
                }
                if let Some(queue) = self.loader.key_queues.get_mut(&key) {
                    queue.tasks.push_back(task);
                }
                return;
            }
        }

        task(self);
    }

    fn fetch_all_cookies_if_necessary(&mut self) {
        if self.loader.started_fetching_all_cookies {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };

        self.loader.started_fetching_all_cookies = true;
        log::debug!("loading all cookies from the persistent store");

        let runner = self.runner.clone();
        store.load(Box::new(move |cookies| {
            runner.post_engine_task(move |engine| engine.on_loaded(cookies));
        }));
    }

    fn fetch_cookies_for_key(&mut self, key: &str) {
        let load_started = self.loader.next_load_seq;
        self.loader.next_load_seq += 1;
        self.loader.key_queues.insert(
            key.to_string(),
            KeyQueue {
                load_started,
                tasks: VecDeque::new(),
            },
        );

        if let Some(store) = &self.store {
            log::debug!("loading cookies for {key}");
            let runner = self.runner.clone();
            let owned_key = key.to_string();
            store.load_cookies_for_key(
                key,
                Box::new(move |cookies| {
                    runner.post_engine_task(move |engine| engine.on_key_loaded(owned_key, cookies));
                }),
            );
        }
    }

    fn on_loaded(&mut self, cookies: Vec<CanonicalCookie>) {
        log::debug!("loaded {} cookies from the persistent store", cookies.len());
        self.store_loaded_cookies(cookies);
        self.invoke_queue();
    }

    fn on_key_loaded(&mut self, key: String, cookies: Vec<CanonicalCookie>) {
        if self.loader.finished_fetching_all_cookies {
            log::trace!("ignoring late load for {key}");
            return;
        }

        log::debug!("loaded {} cookies for {key}", cookies.len());
        self.store_loaded_cookies(cookies);

        if let Some(queue) = self.loader.key_queues.remove(&key) {
            for task in queue.tasks {
                task(self);
            }
        }
        self.loader.keys_loaded.insert(key);
    }

    /// Drains the global queue, then the key queues in the order their loads started.
    fn invoke_queue(&mut self) {
        while let Some(task) = self.loader.global_queue.pop_front() {
            task(self);
        }

        let mut pending: Vec<KeyQueue> =
            self.loader.key_queues.drain().map(|(_, queue)| queue).collect();
        pending.sort_by_key(|queue| queue.load_started);
        for queue in pending {
            for task in queue.tasks {
                task(self);
            }
        }

        self.loader.finished_fetching_all_cookies = true;
        self.loader.keys_loaded.clear();
        self.loader.loaded_creation_times.clear();
    }

    fn store_loaded_cookies(&mut self, cookies: Vec<CanonicalCookie>) {
        let mut with_control_chars = Vec::new();

        for cookie in cookies {
            let Some(creation) = cookie.creation_date() else {
                log::warn!("ignoring stored cookie {} without creation time", cookie.name());
                continue;
            };
            if !self.loader.loaded_creation_times.insert(creation) {
                continue;
            }

            if self.last_time_seen.map_or(true, |last| last < creation) {
                self.last_time_seen = Some(creation);
            }
            if util::contains_control_character(cookie.name())
                || util::contains_control_character(cookie.value())
            {
                let key = registry::get_key(cookie.domain());
                with_control_chars.push((key, cookie.signature(), creation));
            } else if !cookie.is_canonical() {
                log::warn!(
                    "ignoring malformed stored cookie {} for {}",
                    cookie.name(),
                    cookie.domain()
                );
                continue;
            }

            self.import_loaded_cookie(cookie);
        }

        for (key, signature, creation) in with_control_chars {
            let imported = self
                .jar
                .get(&key, &signature)
                .is_some_and(|cookie| cookie.creation_date() == Some(creation));
            if imported {
                log::warn!("evicting stored cookie {} with control characters", signature.name);
                self.internal_delete_cookie(&key, &signature, true, DeletionCause::ControlChar);
            }
        }
    }

    /// Of two equivalent stored cookies, only the most recently created one survives.
    ///
    /// A cookie already in memory with the same creation time is the same cookie (set
    /// after a per-key load, then handed back by the full load) and is left alone.
    fn import_loaded_cookie(&mut self, cookie: CanonicalCookie) {
        let key = registry::get_key(cookie.domain());
        let signature = cookie.signature();
        let existing_creation = self.jar.get(&key, &signature).map(CanonicalCookie::creation_date);

        match existing_creation {
            Some(existing) if existing == cookie.creation_date() => {
                log::trace!("stored cookie {} for {key} is already loaded", cookie.name());
            }
            Some(existing) if existing > cookie.creation_date() => {
                log::warn!("dropping older duplicate of stored cookie {} for {key}", cookie.name());
                if let Some(store) = &self.store {
                    store.delete_cookie(&cookie);
                }
            }
            Some(_) => {
                log::warn!(
                    "replacing older duplicate of stored cookie {} for {key}",
                    cookie.name()
                );
                self.internal_delete_cookie(
                    &key,
                    &signature,
                    true,
                    DeletionCause::DuplicateInBackingStore,
                );
                self.internal_insert_cookie(&key, cookie, false);
            }
            None => self.internal_insert_cookie(&key, cookie, false),
        }
    }
}
