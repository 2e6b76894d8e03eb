//! The cookie engine.
//!
//! [`CookieEngine`] owns the in-memory cookie index, the optional persistent store and
//! the change dispatcher. All of its state lives on one sequence: either the tokio
//! task spawned by [`CookieEngine::start`], or whoever calls [`CookieEngine::tick`].
//!
//! Every public operation is asynchronous in the callback sense. If the cookies it
//! needs are in memory it runs right away; otherwise it is queued and the matching
//! load is started. See the `loader` submodule for the queueing rules and `gc` for
//! eviction.

mod gc;
mod loader;

use crate::engine::config::CookieEngineConfig;
use crate::engine::cookies::{
    cookie_sorter, registry, util, CanonicalCookie, CookieAccessSemantics, CookieChangeCallback,
    CookieChangeCause, CookieChangeDispatcher, CookieChangeInfo, CookieChangeSubscription,
    CookieDetails, CookieInclusionStatus, CookieJar, CookieLineFields, CookieListResult,
    CookieOptions, CookieSignature, CookieWithAccessResult, ExclusionReasons, FlushCallback,
    PersistentCookieStoreHandle,
};
use crate::engine::errors::EngineError;
use crate::engine::events::CookieCommand;
use crate::engine::handle::CookieEngineHandle;
use crate::engine::sequence::{SequenceTask, SequencedTaskRunner};
use loader::LoadState;
use std::collections::HashSet;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

pub use loader::ReadyState;

/// Selects the cookies removed by [`CookieEngine::delete_all_matching_async`].
pub type CookiePredicate = Box<dyn Fn(&CanonicalCookie) -> bool + Send>;

/// Creation-time range `[start, end)`. A missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

impl TimeRange {
    pub fn new(start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Self {
        Self { start, end }
    }

    /// The range that contains every point in time.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, time: OffsetDateTime) -> bool {
        self.start.map_or(true, |start| time >= start) && self.end.map_or(true, |end| time < end)
    }
}

/// Why a cookie leaves the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeletionCause {
    Overwrite,
    ExpiredOverwrite,
    Expired,
    EvictedDomain,
    EvictedGlobal,
    ControlChar,
    DuplicateInBackingStore,
    Unknown,
    Single,
    Canonical,
    CreatedBetween,
    CreatedBetweenWithPredicate,
}

impl DeletionCause {
    /// Reported change cause. Duplicates found while loading are dropped silently.
    fn change_cause(self) -> Option<CookieChangeCause> {
        let cause = match self {
            DeletionCause::Overwrite => CookieChangeCause::Overwrite,
            DeletionCause::ExpiredOverwrite => CookieChangeCause::ExpiredOverwrite,
            DeletionCause::Expired => CookieChangeCause::Expired,
            DeletionCause::EvictedDomain
            | DeletionCause::EvictedGlobal
            | DeletionCause::ControlChar => CookieChangeCause::Evicted,
            DeletionCause::DuplicateInBackingStore => return None,
            DeletionCause::Unknown => CookieChangeCause::UnknownDeletion,
            DeletionCause::Single
            | DeletionCause::Canonical
            | DeletionCause::CreatedBetween
            | DeletionCause::CreatedBetweenWithPredicate => CookieChangeCause::Explicit,
        };
        Some(cause)
    }
}

pub struct CookieEngine {
    config: CookieEngineConfig,
    store: Option<PersistentCookieStoreHandle>,
    jar: CookieJar,
    change_dispatcher: CookieChangeDispatcher,
    loader: LoadState,
    runner: SequencedTaskRunner,
    task_rx: mpsc::UnboundedReceiver<SequenceTask>,
    /// Taken by [`CookieEngine::start`]; only handles keep the channel open after that.
    cmd_tx: Option<mpsc::Sender<CookieCommand>>,
    cmd_rx: mpsc::Receiver<CookieCommand>,
    /// Latest creation time handed out or loaded.
    last_time_seen: Option<OffsetDateTime>,
    /// Lower bound on the last-access time of every cookie in the index.
    earliest_access_time: Option<OffsetDateTime>,
}

impl std::fmt::Debug for CookieEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieEngine")
            .field("cookies", &self.jar.len())
            .field("load_state", &self.load_state())
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl CookieEngine {
    /// Creates a new engine. Without a store, all operations run immediately.
    pub fn new(
        store: Option<PersistentCookieStoreHandle>,
        config: Option<CookieEngineConfig>,
    ) -> Self {
        let config = config.unwrap_or_default();
        let (runner, task_rx) = SequencedTaskRunner::new();
        let (cmd_tx, cmd_rx) = mpsc::channel::<CookieCommand>(config.channel_capacity.max(1));

        Self {
            change_dispatcher: CookieChangeDispatcher::new(runner.clone()),
            config,
            store,
            jar: CookieJar::new(),
            loader: LoadState::default(),
            runner,
            task_rx,
            cmd_tx: Some(cmd_tx),
            cmd_rx,
            last_time_seen: None,
            earliest_access_time: None,
        }
    }

    pub fn config(&self) -> &CookieEngineConfig {
        &self.config
    }

    /// A handle that sends commands to this engine. Commands are processed by
    /// [`CookieEngine::tick`] or, after [`CookieEngine::start`], by the engine task.
    pub fn handle(&self) -> Result<CookieEngineHandle, EngineError> {
        self.cmd_tx
            .as_ref()
            .map(|tx| CookieEngineHandle::new(tx.clone()))
            .ok_or(EngineError::AlreadyRunning)
    }

    /// Starts the engine and returns the engine handle and join handle
    pub fn start(mut self) -> Result<(CookieEngineHandle, JoinHandle<()>), EngineError> {
        let cmd_tx = self.cmd_tx.take().ok_or(EngineError::AlreadyRunning)?;

        let engine_handle = CookieEngineHandle::new(cmd_tx);
        let join_handle = tokio::spawn(self.run());

        Ok((engine_handle, join_handle))
    }

    /// Runs the engine until it is shut down or every handle is gone.
    pub async fn run(mut self) {
        log::debug!("cookie engine started");

        loop {
            tokio::select! {
                biased;
                Some(task) = self.task_rx.recv() => task.run(&mut self),
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        log::debug!("cookie engine stopped with {} cookies in memory", self.jar.len());
    }

    /// Processes queued work until none is left. Returns the number of items processed.
    ///
    /// Internal tasks (load completions, deliveries) always go before new commands.
    pub fn tick(&mut self) -> usize {
        let mut processed = 0;
        loop {
            if let Ok(task) = self.task_rx.try_recv() {
                task.run(self);
                processed += 1;
                continue;
            }
            match self.cmd_rx.try_recv() {
                Ok(cmd) => {
                    self.handle_command(cmd);
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        processed
    }

    /// Returns `false` when the engine should stop.
    fn handle_command(&mut self, cmd: CookieCommand) -> bool {
        log::trace!("handling cookie command {cmd:?}");

        match cmd {
            CookieCommand::SetCanonicalCookie {
                cookie,
                source_url,
                options,
                reply,
            } => self.set_canonical_cookie_async(cookie, source_url, options, move |status| {
                let _ = reply.send(status);
            }),
            CookieCommand::SetCookieWithOptions {
                url,
                fields,
                options,
                reply,
            } => self.set_cookie_with_options_async(url, fields, options, move |status| {
                let _ = reply.send(status);
            }),
            CookieCommand::SetCookieWithDetails { url, details, reply } => {
                self.set_cookie_with_details_async(url, details, move |status| {
                    let _ = reply.send(status);
                })
            }
            CookieCommand::GetCookieListWithOptions { url, options, reply } => {
                self.get_cookie_list_with_options_async(url, options, move |list| {
                    let _ = reply.send(list);
                })
            }
            CookieCommand::GetAllCookies { reply } => self.get_all_cookies_async(move |cookies| {
                let _ = reply.send(cookies);
            }),
            CookieCommand::GetAllCookiesForUrl { url, reply } => {
                self.get_all_cookies_for_url_async(url, move |cookies| {
                    let _ = reply.send(cookies);
                })
            }
            CookieCommand::DeleteCookie { url, name, reply } => {
                self.delete_cookie_async(url, name, move |count| {
                    let _ = reply.send(count);
                })
            }
            CookieCommand::DeleteCanonicalCookie { cookie, reply } => {
                self.delete_canonical_cookie_async(cookie, move |count| {
                    let _ = reply.send(count);
                })
            }
            CookieCommand::DeleteAllCreatedInTimeRange { range, reply } => {
                self.delete_all_created_in_time_range_async(range, move |count| {
                    let _ = reply.send(count);
                })
            }
            CookieCommand::DeleteAllMatching { range, predicate, reply } => {
                self.delete_all_matching_async(range, predicate, move |count| {
                    let _ = reply.send(count);
                })
            }
            CookieCommand::DeleteSessionCookies { reply } => {
                self.delete_session_cookies_async(move |count| {
                    let _ = reply.send(count);
                })
            }
            CookieCommand::SetAllCookies { cookies, reply } => {
                self.set_all_cookies_async(cookies, move |status| {
                    let _ = reply.send(status);
                })
            }
            CookieCommand::FlushStore { reply } => self.flush_store_async(move || {
                let _ = reply.send(());
            }),
            CookieCommand::SetForceKeepSessionState => self.set_force_keep_session_state(),
            CookieCommand::SetPersistSessionCookies { persist, reply } => {
                let _ = reply.send(self.set_persist_session_cookies(persist));
            }
            CookieCommand::SetCookieableSchemes { schemes, reply } => {
                let _ = reply.send(self.set_cookieable_schemes(schemes));
            }
            CookieCommand::AddCallbackForCookie {
                url,
                name,
                callback,
                reply,
            } => {
                let _ = reply.send(self.add_callback_for_cookie(&url, &name, callback));
            }
            CookieCommand::AddCallbackForUrl { url, callback, reply } => {
                let _ = reply.send(self.add_callback_for_url(&url, callback));
            }
            CookieCommand::AddCallbackForAllChanges { callback, reply } => {
                let _ = reply.send(self.add_callback_for_all_changes(callback));
            }
            CookieCommand::Shutdown { reply } => {
                if let (Some(store), true) = (&self.store, self.loader.is_initialized()) {
                    store.flush(None);
                }
                let _ = reply.send(());
                return false;
            }
        }

        true
    }

    /// Stores `cookie` as if it was set by `source_url`.
    pub fn set_canonical_cookie_async<F>(
        &mut self,
        cookie: CanonicalCookie,
        source_url: Url,
        options: CookieOptions,
        callback: F,
    )
    where
        F: FnOnce(CookieInclusionStatus) + Send + 'static,
    {
        let key = registry::get_key(cookie.domain());
        self.do_cookie_callback_for_key(
            key,
            Box::new(move |engine| {
                let status = engine.set_canonical_cookie(cookie, &source_url, &options);
                callback(status);
            }),
        );
    }

    /// Creates a cookie from a parsed `Set-Cookie` line received from `url` and stores it.
    pub fn set_cookie_with_options_async<F>(
        &mut self,
        url: Url,
        fields: CookieLineFields,
        options: CookieOptions,
        callback: F,
    )
    where
        F: FnOnce(CookieInclusionStatus) + Send + 'static,
    {
        let key = registry::get_key_for_url(&url);
        self.do_cookie_callback_for_key(
            key,
            Box::new(move |engine| {
                let status = engine.set_cookie_with_options(&url, &fields, &options);
                callback(status);
            }),
        );
    }

    /// Stores a cookie built from explicitly provided attributes.
    pub fn set_cookie_with_details_async<F>(
        &mut self,
        url: Url,
        details: CookieDetails,
        callback: F,
    )
    where
        F: FnOnce(CookieInclusionStatus) + Send + 'static,
    {
        let key = registry::get_key_for_url(&url);
        self.do_cookie_callback_for_key(
            key,
            Box::new(move |engine| {
                let status = match CanonicalCookie::create_sanitized_cookie(&url, &details) {
                    Ok(cookie) => {
                        engine.set_canonical_cookie(cookie, &url, &CookieOptions::all_inclusive())
                    }
                    Err(status) => status,
                };
                callback(status);
            }),
        );
    }

    pub fn get_cookie_list_with_options_async<F>(
        &mut self,
        url: Url,
        options: CookieOptions,
        callback: F,
    )
    where
        F: FnOnce(CookieListResult) + Send + 'static,
    {
        let key = registry::get_key_for_url(&url);
        self.do_cookie_callback_for_key(
            key,
            Box::new(move |engine| {
                let list = engine.get_cookie_list_with_options(&url, &options);
                callback(list);
            }),
        );
    }

    /// Every cookie, in send order.
    pub fn get_all_cookies_async<F>(&mut self, callback: F)
    where
        F: FnOnce(Vec<CanonicalCookie>) + Send + 'static,
    {
        self.do_cookie_callback(Box::new(move |engine| {
            let cookies = engine.get_all_cookies();
            callback(cookies);
        }));
    }

    /// Every cookie that would be sent to `url`, HttpOnly and same-site cookies included.
    pub fn get_all_cookies_for_url_async<F>(&mut self, url: Url, callback: F)
    where
        F: FnOnce(Vec<CanonicalCookie>) + Send + 'static,
    {
        let key = registry::get_key_for_url(&url);
        self.do_cookie_callback_for_key(
            key,
            Box::new(move |engine| {
                let list = engine.get_cookie_list_with_options(
                    &url,
                    &CookieOptions::all_inclusive(),
                );
                callback(list.cookies());
            }),
        );
    }

    /// Deletes the cookies called `name` that would be sent to `url`.
    pub fn delete_cookie_async<F>(&mut self, url: Url, name: String, callback: F)
    where
        F: FnOnce(u32) + Send + 'static,
    {
        let key = registry::get_key_for_url(&url);
        self.do_cookie_callback_for_key(
            key,
            Box::new(move |engine| {
                let deleted = engine.delete_cookie(&url, &name);
                engine.flush_store(move || callback(deleted));
            }),
        );
    }

    /// Deletes the stored cookie equivalent to `cookie` with the same creation time.
    pub fn delete_canonical_cookie_async<F>(&mut self, cookie: CanonicalCookie, callback: F)
    where
        F: FnOnce(u32) + Send + 'static,
    {
        let key = registry::get_key(cookie.domain());
        self.do_cookie_callback_for_key(
            key,
            Box::new(move |engine| {
                let deleted = engine.delete_canonical_cookie(&cookie);
                engine.flush_store(move || callback(deleted));
            }),
        );
    }

    pub fn delete_all_created_in_time_range_async<F>(&mut self, range: TimeRange, callback: F)
    where
        F: FnOnce(u32) + Send + 'static,
    {
        self.do_cookie_callback(Box::new(move |engine| {
            let deleted = engine.delete_all_matching(
                &range,
                DeletionCause::CreatedBetween,
                |_| true,
            );
            engine.flush_store(move || callback(deleted));
        }));
    }

    pub fn delete_all_matching_async<F>(
        &mut self,
        range: TimeRange,
        predicate: CookiePredicate,
        callback: F,
    )
    where
        F: FnOnce(u32) + Send + 'static,
    {
        self.do_cookie_callback(Box::new(move |engine| {
            let cause = DeletionCause::CreatedBetweenWithPredicate;
            let deleted = engine.delete_all_matching(&range, cause, |cookie| predicate(cookie));
            engine.flush_store(move || callback(deleted));
        }));
    }

    pub fn delete_session_cookies_async<F>(&mut self, callback: F)
    where
        F: FnOnce(u32) + Send + 'static,
    {
        self.do_cookie_callback(Box::new(move |engine| {
            let deleted =
                engine.delete_all_matching(&TimeRange::all(), DeletionCause::Expired, |cookie| {
                    !cookie.is_persistent()
                });
            engine.flush_store(move || callback(deleted));
        }));
    }

    /// Replaces the whole store with `cookies`.
    pub fn set_all_cookies_async<F>(&mut self, cookies: Vec<CanonicalCookie>, callback: F)
    where
        F: FnOnce(CookieInclusionStatus) + Send + 'static,
    {
        self.do_cookie_callback(Box::new(move |engine| {
            let status = engine.set_all_cookies(cookies);
            callback(status);
        }));
    }

    /// Flushes the persistent store once every earlier operation has run.
    pub fn flush_store_async<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.do_cookie_callback(Box::new(move |engine| engine.flush_store(callback)));
    }

    pub fn set_force_keep_session_state(&mut self) {
        if let Some(store) = &self.store {
            store.set_force_keep_session_state();
        }
    }

    /// Only allowed before the first cookie operation. Returns whether it took effect.
    pub fn set_persist_session_cookies(&mut self, persist: bool) -> bool {
        if self.loader.is_initialized() {
            log::warn!("persist_session_cookies cannot change after the cookie store is in use");
            return false;
        }
        self.config.persist_session_cookies = persist;
        true
    }

    /// Only allowed before the first cookie operation. Returns whether it took effect.
    pub fn set_cookieable_schemes(&mut self, schemes: Vec<String>) -> bool {
        if self.loader.is_initialized() {
            log::warn!("cookieable schemes cannot change after the cookie store is in use");
            return false;
        }
        self.config.cookieable_schemes = schemes;
        true
    }

    pub fn add_callback_for_cookie(
        &mut self,
        url: &Url,
        name: &str,
        callback: CookieChangeCallback,
    ) -> CookieChangeSubscription {
        self.change_dispatcher.add_callback_for_cookie(url, name, callback)
    }

    pub fn add_callback_for_url(
        &mut self,
        url: &Url,
        callback: CookieChangeCallback,
    ) -> CookieChangeSubscription {
        self.change_dispatcher.add_callback_for_url(url, callback)
    }

    pub fn add_callback_for_all_changes(
        &mut self,
        callback: CookieChangeCallback,
    ) -> CookieChangeSubscription {
        self.change_dispatcher.add_callback_for_all_changes(callback)
    }

    fn has_cookieable_scheme(&self, url: &Url) -> bool {
        self.config.cookieable_schemes.iter().any(|scheme| scheme == url.scheme())
    }

    fn should_persist(&self, cookie: &CanonicalCookie) -> bool {
        cookie.is_persistent() || self.config.persist_session_cookies
    }

    /// A creation time strictly later than every one handed out or loaded before.
    fn current_time(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let next = match self.last_time_seen {
            Some(last) if now <= last => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_time_seen = Some(next);
        next
    }

    fn set_cookie_with_options(
        &mut self,
        url: &Url,
        fields: &CookieLineFields,
        options: &CookieOptions,
    ) -> CookieInclusionStatus {
        if !self.has_cookieable_scheme(url) {
            return CookieInclusionStatus::from_reasons(ExclusionReasons::NONCOOKIEABLE_SCHEME);
        }

        match CanonicalCookie::create(url, fields, OffsetDateTime::now_utc(), options.server_time) {
            Ok(cookie) => self.set_canonical_cookie(cookie, url, options),
            Err(status) => {
                log::debug!("rejected cookie {} from {url}: {status}", fields.name);
                status
            }
        }
    }

    fn set_canonical_cookie(
        &mut self,
        mut cookie: CanonicalCookie,
        source_url: &Url,
        options: &CookieOptions,
    ) -> CookieInclusionStatus {
        let mut status = CookieInclusionStatus::new();
        if !self.has_cookieable_scheme(source_url) {
            status.add_exclusion_reason(ExclusionReasons::NONCOOKIEABLE_SCHEME);
            return status;
        }

        let secure_source = util::is_secure_scheme(source_url);
        let modify_http_only = !options.exclude_httponly;
        if cookie.is_secure() && !secure_source {
            status.add_exclusion_reason(ExclusionReasons::SECURE_ONLY);
        }
        if cookie.is_http_only() && !modify_http_only {
            status.add_exclusion_reason(ExclusionReasons::HTTP_ONLY);
        }
        if !status.is_include() {
            log::debug!("rejected cookie {} from {source_url}: {status}", cookie.name());
            return status;
        }

        let key = registry::get_key(cookie.domain());

        // First pass only looks: a rejected set must leave the existing cookie alone.
        let mut equivalent: Option<(CookieSignature, bool, Option<OffsetDateTime>)> = None;
        for existing in self.jar.cookies_for_key(&key) {
            if existing.is_secure()
                && !secure_source
                && existing.is_equivalent_for_secure_cookie_matching(&cookie)
            {
                status.add_exclusion_reason(ExclusionReasons::OVERWRITE_SECURE);
            } else if existing.is_equivalent(&cookie) {
                if existing.is_http_only() && !modify_http_only {
                    status.add_exclusion_reason(ExclusionReasons::OVERWRITE_HTTP_ONLY);
                } else {
                    equivalent = Some((
                        existing.signature(),
                        existing.value() == cookie.value(),
                        existing.creation_date(),
                    ));
                }
            }
        }
        if !status.is_include() {
            log::debug!("cookie {} from {source_url} may not overwrite: {status}", cookie.name());
            return status;
        }

        let now = self.current_time();
        let already_expired = cookie.is_expired(now);
        let mut creation = now;

        if let Some((signature, same_value, existing_creation)) = equivalent {
            if same_value {
                creation = existing_creation.unwrap_or(now);
            }
            let cause = if already_expired {
                DeletionCause::ExpiredOverwrite
            } else {
                DeletionCause::Overwrite
            };
            self.internal_delete_cookie(&key, &signature, true, cause);
        }

        if already_expired {
            log::debug!("not storing already expired cookie {}", cookie.name());
        } else {
            cookie.set_creation_date(creation);
            cookie.set_last_access_date(now);
            self.internal_insert_cookie(&key, cookie, true);
        }

        self.garbage_collect(now, &key);
        status
    }

    fn get_cookie_list_with_options(
        &mut self,
        url: &Url,
        options: &CookieOptions,
    ) -> CookieListResult {
        let mut list = CookieListResult::default();
        if !self.has_cookieable_scheme(url) {
            return list;
        }

        let now = OffsetDateTime::now_utc();
        let key = registry::get_key_for_url(url);
        for signature in self.jar.signatures_for_key(&key) {
            let Some(cookie) = self.jar.get(&key, &signature) else {
                continue;
            };
            if cookie.is_expired(now) {
                self.internal_delete_cookie(&key, &signature, true, DeletionCause::Expired);
                continue;
            }

            let access_result = cookie.include_for_request_url(
                url,
                options,
                CookieAccessSemantics::Unknown,
            );
            if access_result.status.is_include() {
                if options.update_access_time {
                    self.internal_update_cookie_access_time(&key, &signature, now);
                }
                if let Some(cookie) = self.jar.get(&key, &signature) {
                    list.included.push(CookieWithAccessResult {
                        cookie: cookie.clone(),
                        access_result,
                    });
                }
            } else if options.return_excluded_cookies {
                list.excluded.push(CookieWithAccessResult {
                    cookie: cookie.clone(),
                    access_result,
                });
            }
        }

        list.included.sort_by(|a, b| cookie_sorter(&a.cookie, &b.cookie));
        list
    }

    fn get_all_cookies(&mut self) -> Vec<CanonicalCookie> {
        let now = OffsetDateTime::now_utc();
        for (key, signature) in self.jar.find_all(|cookie| cookie.is_expired(now)) {
            self.internal_delete_cookie(&key, &signature, true, DeletionCause::Expired);
        }

        let mut cookies: Vec<CanonicalCookie> =
            self.jar.iter().map(|(_, cookie)| cookie.clone()).collect();
        cookies.sort_by(cookie_sorter);
        cookies
    }

    fn delete_cookie(&mut self, url: &Url, name: &str) -> u32 {
        if !self.has_cookieable_scheme(url) {
            return 0;
        }

        let key = registry::get_key_for_url(url);
        let host = url.host_str().unwrap_or_default();
        let matching: Vec<CookieSignature> = self
            .jar
            .cookies_for_key(&key)
            .filter(|c| c.name() == name && c.is_domain_match(host) && c.is_on_path(url.path()))
            .map(CanonicalCookie::signature)
            .collect();

        let mut deleted = 0;
        for signature in matching {
            if self
                .internal_delete_cookie(&key, &signature, true, DeletionCause::Single)
                .is_some()
            {
                deleted += 1;
            }
        }
        deleted
    }

    fn delete_canonical_cookie(&mut self, cookie: &CanonicalCookie) -> u32 {
        let key = registry::get_key(cookie.domain());
        let signature = cookie.signature();
        let matches = self
            .jar
            .get(&key, &signature)
            .is_some_and(|existing| existing.creation_date() == cookie.creation_date());

        if matches
            && self
                .internal_delete_cookie(&key, &signature, true, DeletionCause::Canonical)
                .is_some()
        {
            1
        } else {
            0
        }
    }

    fn delete_all_matching(
        &mut self,
        range: &TimeRange,
        cause: DeletionCause,
        predicate: impl Fn(&CanonicalCookie) -> bool,
    ) -> u32 {
        let matching = self.jar.find_all(|cookie| {
            cookie.creation_date().map_or(true, |creation| range.contains(creation))
                && predicate(cookie)
        });

        let mut deleted = 0;
        for (key, signature) in matching {
            if self.internal_delete_cookie(&key, &signature, true, cause).is_some() {
                deleted += 1;
            }
        }
        deleted
    }

    fn set_all_cookies(&mut self, cookies: Vec<CanonicalCookie>) -> CookieInclusionStatus {
        for (key, signature) in self.jar.find_all(|_| true) {
            self.internal_delete_cookie(&key, &signature, true, DeletionCause::Unknown);
        }

        let now = OffsetDateTime::now_utc();
        let mut creation_times = HashSet::new();
        for mut cookie in cookies {
            if cookie.is_expired(now) {
                continue;
            }

            let creation = match cookie.creation_date() {
                Some(creation) if creation_times.insert(creation) => {
                    if self.last_time_seen.map_or(true, |last| last < creation) {
                        self.last_time_seen = Some(creation);
                    }
                    creation
                }
                _ => {
                    let fresh = self.current_time();
                    creation_times.insert(fresh);
                    fresh
                }
            };
            cookie.set_creation_date(creation);
            if cookie.last_access_date().map_or(true, |access| access < creation) {
                cookie.set_last_access_date(creation);
            }

            let key = registry::get_key(cookie.domain());
            let signature = cookie.signature();
            if self.jar.get(&key, &signature).is_some() {
                self.internal_delete_cookie(&key, &signature, true, DeletionCause::Overwrite);
            }
            self.internal_insert_cookie(&key, cookie, true);
            self.garbage_collect(now, &key);
        }

        CookieInclusionStatus::new()
    }

    /// Flushes the store (if any) and then posts `callback` to the sequence.
    fn flush_store<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let runner = self.runner.clone();
        let on_flushed: FlushCallback = Box::new(move || runner.post_task(callback));

        match &self.store {
            Some(store) if self.loader.is_initialized() => store.flush(Some(on_flushed)),
            _ => on_flushed(),
        }
    }

    fn internal_insert_cookie(&mut self, key: &str, cookie: CanonicalCookie, sync_to_store: bool) {
        if sync_to_store && self.should_persist(&cookie) {
            if let Some(store) = &self.store {
                store.add_cookie(&cookie);
            }
        }

        if let Some(last_access) = cookie.last_access_date() {
            self.earliest_access_time = Some(
                self.earliest_access_time.map_or(last_access, |t| t.min(last_access)),
            );
        }

        let change = CookieChangeInfo {
            cookie: cookie.clone(),
            access_semantics: CookieAccessSemantics::Unknown,
            cause: CookieChangeCause::Inserted,
        };
        if self.jar.insert(key, cookie).is_some() {
            log::error!("inserted cookie {} over an equivalent one", change.cookie.name());
        }
        self.change_dispatcher.dispatch(&change, true);
    }

    fn internal_delete_cookie(
        &mut self,
        key: &str,
        signature: &CookieSignature,
        sync_to_store: bool,
        cause: DeletionCause,
    ) -> Option<CanonicalCookie> {
        let cookie = self.jar.remove(key, signature)?;

        if sync_to_store && self.should_persist(&cookie) {
            if let Some(store) = &self.store {
                store.delete_cookie(&cookie);
            }
        }

        log::trace!("deleted cookie {} for {key} ({cause:?})", cookie.name());
        let Some(change_cause) = cause.change_cause() else {
            return Some(cookie);
        };
        let change = CookieChangeInfo {
            cookie,
            access_semantics: CookieAccessSemantics::Unknown,
            cause: change_cause,
        };
        self.change_dispatcher.dispatch(&change, true);
        Some(change.cookie)
    }

    fn internal_update_cookie_access_time(
        &mut self,
        key: &str,
        signature: &CookieSignature,
        now: OffsetDateTime,
    ) {
        let threshold = self.config.last_access_threshold;
        let persist_session_cookies = self.config.persist_session_cookies;
        let Some(cookie) = self.jar.get_mut(key, signature) else {
            return;
        };

        if cookie.last_access_date().is_some_and(|last| now - last < threshold) {
            return;
        }

        let access = cookie.creation_date().map_or(now, |creation| now.max(creation));
        cookie.set_last_access_date(access);
        if cookie.is_persistent() || persist_session_cookies {
            if let Some(store) = &self.store {
                store.update_cookie_access_time(cookie);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::CookieEngineConfig;
    use crate::engine::cookies::store::mock::{MockPersistentCookieStore, StoreCall};
    use crate::engine::cookies::{CookiePriority, CookieSameSite};
    use std::sync::{Arc, Mutex};

    pub(super) fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    pub(super) fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    pub(super) fn line(name: &str, value: &str) -> CookieLineFields {
        CookieLineFields {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub(super) fn persistent(name: &str, value: &str) -> CookieLineFields {
        CookieLineFields {
            max_age: Some("3600".into()),
            ..line(name, value)
        }
    }

    pub(super) fn engine_with(store: Option<Arc<MockPersistentCookieStore>>) -> CookieEngine {
        init_logger();
        CookieEngine::new(store.map(|s| s as PersistentCookieStoreHandle), None)
    }

    pub(super) fn sink<T: Send + 'static>(
        out: &Arc<Mutex<Vec<T>>>,
    ) -> impl FnOnce(T) + Send + 'static {
        let out = out.clone();
        move |value| out.lock().unwrap().push(value)
    }

    pub(super) fn stored(
        name: &str,
        value: &str,
        domain: &str,
        creation: OffsetDateTime,
        expiry: Option<OffsetDateTime>,
    ) -> CanonicalCookie {
        CanonicalCookie::new(
            name,
            value,
            domain,
            "/",
            Some(creation),
            expiry,
            Some(creation),
            false,
            false,
            CookieSameSite::Lax,
            CookiePriority::Medium,
        )
    }

    pub(super) fn set_line(
        engine: &mut CookieEngine,
        url: &str,
        fields: CookieLineFields,
    ) -> CookieInclusionStatus {
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.set_cookie_with_options_async(u(url), fields, CookieOptions::default(), sink(&out));
        engine.tick();
        let status = out.lock().unwrap().pop().unwrap();
        status
    }

    pub(super) fn all_cookies(engine: &mut CookieEngine) -> Vec<CanonicalCookie> {
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.get_all_cookies_async(sink(&out));
        engine.tick();
        let cookies = out.lock().unwrap().pop().unwrap();
        cookies
    }

    fn recorder() -> (CookieChangeCallback, Arc<Mutex<Vec<CookieChangeInfo>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let out = seen.clone();
        let callback: CookieChangeCallback = Arc::new(move |change: &CookieChangeInfo| {
            out.lock().unwrap().push(change.clone());
        });
        (callback, seen)
    }

    #[test]
    fn set_and_get_without_store() {
        let mut engine = engine_with(None);
        assert_eq!(engine.load_state(), ReadyState::Ready);

        let status = set_line(&mut engine, "http://www.example.com/", line("A", "B"));
        assert!(status.is_include());

        let out = Arc::new(Mutex::new(Vec::new()));
        engine.get_cookie_list_with_options_async(
            u("http://www.example.com/"),
            CookieOptions::default(),
            sink(&out),
        );
        engine.tick();
        let list = out.lock().unwrap().pop().unwrap();
        assert_eq!(list.cookies().len(), 1);
        assert_eq!(list.included[0].cookie.value(), "B");
    }

    #[test]
    fn url_operations_wait_for_their_key_in_order() {
        let store = MockPersistentCookieStore::new();
        let mut engine = engine_with(Some(store.clone()));
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        engine.set_cookie_with_options_async(
            u("http://www.example.com/"),
            line("A", "1"),
            CookieOptions::default(),
            move |s| {
                assert!(s.is_include());
                l.lock().unwrap().push("set".to_string());
            },
        );
        let l = log.clone();
        engine.get_cookie_list_with_options_async(
            u("http://www.example.com/"),
            CookieOptions::default(),
            move |list| {
                l.lock().unwrap().push(format!("get:{}", list.included.len()));
            },
        );

        assert_eq!(engine.load_state_for_key("example.com"), ReadyState::Loading);
        assert_eq!(engine.load_state_for_key("other.com"), ReadyState::Uninitialized);
        assert_eq!(store.pending_key_loads(), vec!["example.com".to_string()]);
        assert!(!store.has_pending_load());

        engine.tick();
        assert!(log.lock().unwrap().is_empty());

        assert!(store.complete_key_load("example.com", Vec::new()));
        engine.tick();
        assert_eq!(*log.lock().unwrap(), vec!["set".to_string(), "get:1".to_string()]);
        assert_eq!(engine.load_state_for_key("example.com"), ReadyState::Ready);
        assert_eq!(engine.load_state(), ReadyState::Uninitialized);
    }

    #[test]
    fn global_queue_runs_before_pending_key_queues() {
        let store = MockPersistentCookieStore::new();
        let mut engine = engine_with(Some(store.clone()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let t0 = OffsetDateTime::now_utc() - Duration::days(1);

        let l = log.clone();
        engine.set_cookie_with_options_async(
            u("http://a.com/"),
            line("a", "1"),
            CookieOptions::default(),
            move |_| l.lock().unwrap().push("set a".to_string()),
        );
        let l = log.clone();
        engine.get_all_cookies_async(move |cookies| {
            l.lock().unwrap().push(format!("all:{}", cookies.len()));
        });
        // Once a whole-store operation is queued, URL operations queue behind it.
        let l = log.clone();
        engine.set_cookie_with_options_async(
            u("http://b.com/"),
            line("b", "1"),
            CookieOptions::default(),
            move |_| l.lock().unwrap().push("set b".to_string()),
        );

        assert_eq!(store.pending_key_loads(), vec!["a.com".to_string()]);
        assert!(store.has_pending_load());

        store.complete_load(vec![stored("old", "x", "c.com", t0, None)]);
        engine.tick();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["all:1".to_string(), "set b".to_string(), "set a".to_string()]
        );
        assert_eq!(engine.load_state(), ReadyState::Ready);

        // A per-key load finishing after the full load changes nothing.
        store.complete_key_load("a.com", vec![stored("late", "x", "a.com", t0, None)]);
        engine.tick();
        assert_eq!(all_cookies(&mut engine).len(), 3);
    }

    #[test]
    fn duplicates_collapse_to_newest_on_load() {
        let t0 = OffsetDateTime::now_utc() - Duration::hours(2);
        let expiry = Some(t0 + Duration::days(10));
        let old = stored("A", "old", "a.com", t0, expiry);
        let new = stored("A", "new", "a.com", t0 + Duration::hours(1), expiry);
        let store = MockPersistentCookieStore::with_cookies(vec![new.clone(), old.clone()]);
        let mut engine = engine_with(Some(store.clone()));

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value(), "new");
        assert_eq!(store.deleted(), vec![old]);
    }

    #[test]
    fn newer_duplicate_replaces_loaded_cookie() {
        let t0 = OffsetDateTime::now_utc() - Duration::hours(2);
        let expiry = Some(t0 + Duration::days(10));
        let old = stored("A", "old", "a.com", t0, expiry);
        let new = stored("A", "new", "a.com", t0 + Duration::hours(1), expiry);
        let store = MockPersistentCookieStore::with_cookies(vec![old.clone(), new]);
        let mut engine = engine_with(Some(store.clone()));
        let (callback, seen) = recorder();
        let _sub = engine.add_callback_for_all_changes(callback);

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value(), "new");
        assert_eq!(store.deleted(), vec![old]);

        engine.tick();
        assert!(seen.lock().unwrap().iter().all(|c| !c.cause.is_deletion()));
    }

    #[test]
    fn redelivered_cookies_are_not_resurrected() {
        let store = MockPersistentCookieStore::new();
        let mut engine = engine_with(Some(store.clone()));
        let t0 = OffsetDateTime::now_utc() - Duration::hours(1);
        let x = stored("X", "1", "www.example.com", t0, Some(t0 + Duration::days(1)));
        let y = stored(
            "Y",
            "1",
            "www.example.com",
            t0 + Duration::seconds(1),
            Some(t0 + Duration::days(1)),
        );

        let deleted = Arc::new(Mutex::new(Vec::new()));
        engine.delete_canonical_cookie_async(x.clone(), sink(&deleted));
        store.complete_key_load("example.com", vec![x.clone(), y.clone()]);
        engine.tick();
        assert_eq!(*deleted.lock().unwrap(), vec![1]);

        let out = Arc::new(Mutex::new(Vec::new()));
        engine.get_all_cookies_async(sink(&out));
        store.complete_load(vec![x, y]);
        engine.tick();

        let cookies = out.lock().unwrap().pop().unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name(), "Y");
    }

    #[test]
    fn control_characters_are_evicted_on_load() {
        let t0 = OffsetDateTime::now_utc() - Duration::hours(1);
        let bad = stored("bad", "x\u{1}y", "a.com", t0, Some(t0 + Duration::days(1)));
        let good = stored(
            "good",
            "ok",
            "a.com",
            t0 + Duration::seconds(1),
            Some(t0 + Duration::days(1)),
        );
        let store = MockPersistentCookieStore::with_cookies(vec![bad.clone(), good]);
        let mut engine = engine_with(Some(store.clone()));
        let (callback, seen) = recorder();
        let _sub = engine.add_callback_for_all_changes(callback);

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name(), "good");
        assert_eq!(store.deleted(), vec![bad]);

        engine.tick();
        let evicted: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.cause == CookieChangeCause::Evicted)
            .map(|c| c.cookie.name().to_string())
            .collect();
        assert_eq!(evicted, vec!["bad".to_string()]);
    }

    #[test]
    fn insecure_origin_cannot_shadow_secure_cookie() {
        let mut engine = engine_with(None);
        let secure = CookieLineFields {
            secure: true,
            ..line("A", "1")
        };
        assert!(set_line(&mut engine, "https://www.example.com/", secure).is_include());

        let status = set_line(&mut engine, "http://www.example.com/", line("A", "2"));
        assert!(status.has_only_exclusion_reason(ExclusionReasons::OVERWRITE_SECURE));

        let domain = CookieLineFields {
            domain: Some("example.com".into()),
            ..line("A", "3")
        };
        let status = set_line(&mut engine, "http://www.example.com/", domain);
        assert!(status.has_exclusion_reason(ExclusionReasons::OVERWRITE_SECURE));

        let deeper = |value: &str| CookieLineFields {
            path: Some("/anything".into()),
            ..line("A", value)
        };
        let status = set_line(&mut engine, "http://www.example.com/", deeper("4"));
        assert!(status.has_only_exclusion_reason(ExclusionReasons::OVERWRITE_SECURE));

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value(), "1");
        assert!(cookies[0].is_secure());

        // A secure origin may set the same name on a deeper path next to it.
        assert!(set_line(&mut engine, "https://www.example.com/", deeper("5")).is_include());
        let mut cookies = all_cookies(&mut engine);
        cookies.sort_by(|a, b| a.path().cmp(b.path()));
        assert_eq!(cookies.len(), 2);
        assert_eq!((cookies[0].path(), cookies[0].value()), ("/", "1"));
        assert_eq!((cookies[1].path(), cookies[1].value()), ("/anything", "5"));

        let status = set_line(
            &mut engine,
            "http://www.example.com/",
            CookieLineFields {
                secure: true,
                ..line("B", "1")
            },
        );
        assert!(status.has_only_exclusion_reason(ExclusionReasons::SECURE_ONLY));
    }

    #[test]
    fn http_only_cookies_need_permission() {
        let mut engine = engine_with(None);
        let http_only = CookieLineFields {
            http_only: true,
            ..line("A", "1")
        };

        // Script-level options cannot create an HttpOnly cookie.
        let status = set_line(&mut engine, "http://a.com/", http_only.clone());
        assert!(status.has_only_exclusion_reason(ExclusionReasons::HTTP_ONLY));

        let out = Arc::new(Mutex::new(Vec::new()));
        engine.set_cookie_with_options_async(
            u("http://a.com/"),
            http_only,
            CookieOptions::all_inclusive(),
            sink(&out),
        );
        engine.tick();
        assert!(out.lock().unwrap().pop().unwrap().is_include());

        let status = set_line(&mut engine, "http://a.com/", line("A", "2"));
        assert!(status.has_only_exclusion_reason(ExclusionReasons::OVERWRITE_HTTP_ONLY));

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies[0].value(), "1");
        assert!(cookies[0].is_http_only());
    }

    #[test]
    fn resetting_same_value_keeps_creation_time() {
        let mut engine = engine_with(None);
        set_line(&mut engine, "http://a.com/", line("A", "1"));
        let first = all_cookies(&mut engine).remove(0);

        set_line(&mut engine, "http://a.com/", line("A", "1"));
        let second = all_cookies(&mut engine).remove(0);
        assert_eq!(first.creation_date(), second.creation_date());
        assert!(second.last_access_date() >= first.last_access_date());
    }

    #[test]
    fn changed_value_gets_newer_creation_time_and_events_in_order() {
        let mut engine = engine_with(None);
        let (callback, seen) = recorder();
        let _sub = engine.add_callback_for_url(&u("http://a.com/"), callback);

        set_line(&mut engine, "http://a.com/", line("A", "1"));
        let first = all_cookies(&mut engine).remove(0);
        set_line(&mut engine, "http://a.com/", line("A", "2"));
        let second = all_cookies(&mut engine).remove(0);
        assert!(second.creation_date() > first.creation_date());
        engine.tick();

        let causes: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.cause, c.cookie.value().to_string()))
            .collect();
        assert_eq!(
            causes,
            vec![
                (CookieChangeCause::Inserted, "1".to_string()),
                (CookieChangeCause::Overwrite, "1".to_string()),
                (CookieChangeCause::Inserted, "2".to_string()),
            ]
        );
    }

    #[test]
    fn expired_cookie_only_deletes() {
        let mut engine = engine_with(None);
        let (callback, seen) = recorder();
        let _sub = engine.add_callback_for_all_changes(callback);

        set_line(&mut engine, "http://a.com/", line("A", "1"));
        let status = set_line(
            &mut engine,
            "http://a.com/",
            CookieLineFields {
                max_age: Some("0".into()),
                ..line("A", "2")
            },
        );
        assert!(status.is_include());
        assert!(all_cookies(&mut engine).is_empty());

        engine.tick();
        let causes: Vec<_> = seen.lock().unwrap().iter().map(|c| c.cause).collect();
        assert_eq!(causes, vec![CookieChangeCause::Inserted, CookieChangeCause::ExpiredOverwrite]);
    }

    #[test]
    fn expired_cookies_are_removed_on_read() {
        let t0 = OffsetDateTime::now_utc() - Duration::days(2);
        let expired = stored("gone", "1", "a.com", t0, Some(t0 + Duration::days(1)));
        let live = stored(
            "live",
            "1",
            "a.com",
            t0 + Duration::seconds(1),
            Some(t0 + Duration::days(5)),
        );
        let store = MockPersistentCookieStore::with_cookies(vec![expired.clone(), live]);
        let mut engine = engine_with(Some(store.clone()));

        let out = Arc::new(Mutex::new(Vec::new()));
        engine.get_all_cookies_for_url_async(u("http://a.com/"), sink(&out));
        engine.tick();
        engine.tick();

        let cookies = out.lock().unwrap().pop().unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name(), "live");
        assert_eq!(store.deleted(), vec![expired]);
    }

    #[test]
    fn access_time_updates_are_throttled() {
        let now = OffsetDateTime::now_utc();
        let recent = stored(
            "recent",
            "1",
            "a.com",
            now - Duration::seconds(10),
            Some(now + Duration::days(1)),
        );
        let stale = stored(
            "stale",
            "1",
            "a.com",
            now - Duration::minutes(5),
            Some(now + Duration::days(1)),
        );
        let store = MockPersistentCookieStore::with_cookies(vec![recent, stale]);
        let mut engine = engine_with(Some(store.clone()));

        let out = Arc::new(Mutex::new(Vec::new()));
        engine.get_cookie_list_with_options_async(
            u("http://a.com/"),
            CookieOptions::all_inclusive(),
            sink(&out),
        );
        engine.tick();

        let updated: Vec<String> = store
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UpdateAccessTime(cookie) => Some(cookie.name().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(updated, vec!["stale".to_string()]);
    }

    #[test]
    fn only_persistent_cookies_reach_the_store() {
        let store = MockPersistentCookieStore::with_cookies(Vec::new());
        let mut engine = engine_with(Some(store.clone()));

        set_line(&mut engine, "http://a.com/", line("session", "1"));
        set_line(&mut engine, "http://a.com/", persistent("kept", "1"));
        let added: Vec<String> = store.added().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(added, vec!["kept".to_string()]);

        assert!(!engine.set_persist_session_cookies(true));
    }

    #[test]
    fn session_cookies_persist_when_enabled() {
        let store = MockPersistentCookieStore::with_cookies(Vec::new());
        let mut engine = engine_with(Some(store.clone()));
        assert!(engine.set_persist_session_cookies(true));

        set_line(&mut engine, "http://a.com/", line("session", "1"));
        assert_eq!(store.added().len(), 1);

        engine.set_force_keep_session_state();
        assert!(store.force_keep_session_state());
    }

    #[test]
    fn cookieable_schemes() {
        let mut engine = engine_with(None);
        assert!(engine.set_cookieable_schemes(vec!["https".to_string()]));

        let status = set_line(&mut engine, "http://a.com/", line("A", "1"));
        assert!(status.has_only_exclusion_reason(ExclusionReasons::NONCOOKIEABLE_SCHEME));
        assert!(set_line(&mut engine, "https://a.com/", line("A", "1")).is_include());

        assert!(!engine.set_cookieable_schemes(vec!["http".to_string()]));
    }

    #[test]
    fn deletions_report_after_flush() {
        let store = MockPersistentCookieStore::with_cookies(Vec::new());
        let mut engine = engine_with(Some(store.clone()));
        set_line(&mut engine, "http://a.com/", persistent("A", "1"));
        set_line(&mut engine, "http://b.com/", persistent("B", "1"));
        store.clear_calls();

        let out = Arc::new(Mutex::new(Vec::new()));
        engine.delete_all_created_in_time_range_async(TimeRange::all(), sink(&out));
        assert!(out.lock().unwrap().is_empty());
        engine.tick();

        assert_eq!(*out.lock().unwrap(), vec![2]);
        let calls = store.calls();
        assert_eq!(calls.last(), Some(&StoreCall::Flush));
        assert_eq!(store.deleted().len(), 2);
    }

    #[test]
    fn delete_by_name_predicate_and_session() {
        let mut engine = engine_with(None);
        set_line(&mut engine, "http://www.a.com/", line("A", "1"));
        set_line(&mut engine, "http://www.a.com/", persistent("B", "1"));
        set_line(&mut engine, "http://www.a.com/", persistent("C", "1"));
        set_line(&mut engine, "http://b.com/", persistent("A", "1"));

        let out = Arc::new(Mutex::new(Vec::new()));
        engine.delete_cookie_async(u("http://www.a.com/"), "A".to_string(), sink(&out));
        engine.tick();
        engine.delete_all_matching_async(
            TimeRange::all(),
            Box::new(|c| c.name() == "B"),
            sink(&out),
        );
        engine.tick();
        engine.delete_session_cookies_async(sink(&out));
        engine.tick();
        assert_eq!(*out.lock().unwrap(), vec![1, 1, 0]);

        let names: Vec<String> = all_cookies(&mut engine)
            .iter()
            .map(|c| format!("{}@{}", c.name(), c.domain()))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"C@www.a.com".to_string()));
        assert!(names.contains(&"A@b.com".to_string()));
    }

    #[test]
    fn delete_canonical_cookie_requires_same_creation() {
        let mut engine = engine_with(None);
        set_line(&mut engine, "http://a.com/", line("A", "1"));
        let cookie = all_cookies(&mut engine).remove(0);

        let other = stored("A", "1", "a.com", OffsetDateTime::UNIX_EPOCH, None);
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.delete_canonical_cookie_async(other, sink(&out));
        engine.tick();
        engine.delete_canonical_cookie_async(cookie, sink(&out));
        engine.tick();
        assert_eq!(*out.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn set_all_cookies_replaces_store() {
        let mut engine = engine_with(None);
        set_line(&mut engine, "http://a.com/", line("A", "1"));

        let t0 = OffsetDateTime::now_utc() - Duration::hours(1);
        let replacement = vec![
            stored("X", "1", "x.com", t0, None),
            stored("Y", "1", "y.com", t0, None),
            stored("Z", "1", "z.com", t0 - Duration::days(3), Some(t0 - Duration::days(1))),
        ];
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.set_all_cookies_async(replacement, sink(&out));
        engine.tick();
        assert!(out.lock().unwrap().pop().unwrap().is_include());

        let cookies = all_cookies(&mut engine);
        let names: Vec<&str> = cookies.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"X") && names.contains(&"Y"));
        // Shared creation times are made unique.
        assert_ne!(cookies[0].creation_date(), cookies[1].creation_date());
    }

    #[test]
    fn set_with_details() {
        let mut engine = engine_with(None);
        let details = CookieDetails {
            name: "A".into(),
            value: "1".into(),
            domain: ".example.com".into(),
            http_only: true,
            ..Default::default()
        };
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.set_cookie_with_details_async(u("https://www.example.com/x/y"), details, sink(&out));
        engine.tick();
        assert!(out.lock().unwrap().pop().unwrap().is_include());

        let cookie = all_cookies(&mut engine).remove(0);
        assert_eq!(cookie.domain(), ".example.com");
        assert_eq!(cookie.path(), "/x");
        assert!(cookie.is_http_only());
        assert!(cookie.creation_date().is_some());
    }

    #[test]
    fn subscription_sees_insert_until_dropped() {
        let mut engine = engine_with(None);
        let (callback, seen) = recorder();
        let sub = engine.add_callback_for_cookie(&u("http://www.example.com/"), "A", callback);

        set_line(&mut engine, "http://www.example.com/", line("A", "B"));
        set_line(&mut engine, "http://www.example.com/", line("Other", "B"));
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].cause, CookieChangeCause::Inserted);
            assert_eq!(seen[0].cookie.value(), "B");
        }

        drop(sub);
        set_line(&mut engine, "http://www.example.com/", line("A", "C"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn load_round_trip_preserves_cookies() {
        let store = MockPersistentCookieStore::with_cookies(Vec::new());
        let mut engine = engine_with(Some(store.clone()));
        set_line(&mut engine, "http://www.example.com/a/b", persistent("A", "1"));
        set_line(
            &mut engine,
            "https://example.org/",
            CookieLineFields {
                secure: true,
                same_site: Some("strict".into()),
                priority: Some("high".into()),
                ..persistent("B", "2")
            },
        );
        let before = all_cookies(&mut engine);

        let reloaded_store = MockPersistentCookieStore::with_cookies(store.added());
        let mut reloaded = engine_with(Some(reloaded_store));
        let after = all_cookies(&mut reloaded);

        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.full_compare(b), std::cmp::Ordering::Equal);
        }
    }

    #[test]
    fn dropped_engine_never_runs_queued_operations() {
        let store = MockPersistentCookieStore::new();
        let mut engine = engine_with(Some(store.clone()));
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.get_all_cookies_async(sink(&out));
        drop(engine);

        store.complete_load(Vec::new());
        assert!(out.lock().unwrap().is_empty());
    }

    #[test]
    fn custom_config_is_used() {
        let config = CookieEngineConfig {
            domain_max_cookies: 5,
            domain_purge_cookies: 2,
            ..Default::default()
        };
        let mut engine = CookieEngine::new(None, Some(config));
        for i in 0..6 {
            set_line(&mut engine, "http://a.com/", line(&format!("c{i}"), "1"));
        }
        assert_eq!(all_cookies(&mut engine).len(), 3);
        assert_eq!(engine.config().domain_max_cookies, 5);
    }
}
