//! Commands sent from a [`CookieEngineHandle`] to the engine.
//!
//! Every command that produces a result carries a `oneshot` reply sender. The engine
//! answers once the operation has run, which may be much later than when the command
//! was received: operations wait for the persistent store to be loaded.
//!
//! [`CookieEngineHandle`]: crate::engine::CookieEngineHandle

use crate::engine::cookies::{
    CanonicalCookie, CookieChangeCallback, CookieChangeSubscription, CookieDetails,
    CookieInclusionStatus, CookieLineFields, CookieListResult, CookieOptions,
};
use crate::engine::{CookiePredicate, TimeRange};
use tokio::sync::oneshot;
use url::Url;

pub enum CookieCommand {
    SetCanonicalCookie {
        cookie: CanonicalCookie,
        source_url: Url,
        options: CookieOptions,
        reply: oneshot::Sender<CookieInclusionStatus>,
    },
    SetCookieWithOptions {
        url: Url,
        fields: CookieLineFields,
        options: CookieOptions,
        reply: oneshot::Sender<CookieInclusionStatus>,
    },
    SetCookieWithDetails {
        url: Url,
        details: CookieDetails,
        reply: oneshot::Sender<CookieInclusionStatus>,
    },
    GetCookieListWithOptions {
        url: Url,
        options: CookieOptions,
        reply: oneshot::Sender<CookieListResult>,
    },
    GetAllCookies {
        reply: oneshot::Sender<Vec<CanonicalCookie>>,
    },
    GetAllCookiesForUrl {
        url: Url,
        reply: oneshot::Sender<Vec<CanonicalCookie>>,
    },
    DeleteCookie {
        url: Url,
        name: String,
        reply: oneshot::Sender<u32>,
    },
    DeleteCanonicalCookie {
        cookie: CanonicalCookie,
        reply: oneshot::Sender<u32>,
    },
    DeleteAllCreatedInTimeRange {
        range: TimeRange,
        reply: oneshot::Sender<u32>,
    },
    DeleteAllMatching {
        range: TimeRange,
        predicate: CookiePredicate,
        reply: oneshot::Sender<u32>,
    },
    DeleteSessionCookies {
        reply: oneshot::Sender<u32>,
    },
    SetAllCookies {
        cookies: Vec<CanonicalCookie>,
        reply: oneshot::Sender<CookieInclusionStatus>,
    },
    FlushStore {
        reply: oneshot::Sender<()>,
    },
    SetForceKeepSessionState,
    SetPersistSessionCookies {
        persist: bool,
        reply: oneshot::Sender<bool>,
    },
    SetCookieableSchemes {
        schemes: Vec<String>,
        reply: oneshot::Sender<bool>,
    },
    AddCallbackForCookie {
        url: Url,
        name: String,
        callback: CookieChangeCallback,
        reply: oneshot::Sender<CookieChangeSubscription>,
    },
    AddCallbackForUrl {
        url: Url,
        callback: CookieChangeCallback,
        reply: oneshot::Sender<CookieChangeSubscription>,
    },
    AddCallbackForAllChanges {
        callback: CookieChangeCallback,
        reply: oneshot::Sender<CookieChangeSubscription>,
    },
    /// Stops the engine. Operations still waiting for a load are dropped.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl CookieCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CookieCommand::SetCanonicalCookie { .. } => "SetCanonicalCookie",
            CookieCommand::SetCookieWithOptions { .. } => "SetCookieWithOptions",
            CookieCommand::SetCookieWithDetails { .. } => "SetCookieWithDetails",
            CookieCommand::GetCookieListWithOptions { .. } => "GetCookieListWithOptions",
            CookieCommand::GetAllCookies { .. } => "GetAllCookies",
            CookieCommand::GetAllCookiesForUrl { .. } => "GetAllCookiesForUrl",
            CookieCommand::DeleteCookie { .. } => "DeleteCookie",
            CookieCommand::DeleteCanonicalCookie { .. } => "DeleteCanonicalCookie",
            CookieCommand::DeleteAllCreatedInTimeRange { .. } => "DeleteAllCreatedInTimeRange",
            CookieCommand::DeleteAllMatching { .. } => "DeleteAllMatching",
            CookieCommand::DeleteSessionCookies { .. } => "DeleteSessionCookies",
            CookieCommand::SetAllCookies { .. } => "SetAllCookies",
            CookieCommand::FlushStore { .. } => "FlushStore",
            CookieCommand::SetForceKeepSessionState => "SetForceKeepSessionState",
            CookieCommand::SetPersistSessionCookies { .. } => "SetPersistSessionCookies",
            CookieCommand::SetCookieableSchemes { .. } => "SetCookieableSchemes",
            CookieCommand::AddCallbackForCookie { .. } => "AddCallbackForCookie",
            CookieCommand::AddCallbackForUrl { .. } => "AddCallbackForUrl",
            CookieCommand::AddCallbackForAllChanges { .. } => "AddCallbackForAllChanges",
            CookieCommand::Shutdown { .. } => "Shutdown",
        }
    }
}

impl std::fmt::Debug for CookieCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
