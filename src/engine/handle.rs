use crate::engine::cookies::{
    CanonicalCookie, CookieChangeCallback, CookieChangeSubscription, CookieDetails,
    CookieInclusionStatus, CookieLineFields, CookieListResult, CookieOptions,
};
use crate::engine::errors::EngineError;
use crate::engine::events::CookieCommand;
use crate::engine::{CookiePredicate, TimeRange};
use tokio::sync::{mpsc, oneshot};
use url::Url;

/// Async front end to a [`CookieEngine`](crate::engine::CookieEngine).
///
/// Cheap to clone. Every method resolves once the engine has run the operation,
/// which includes waiting for the persistent store to load.
#[derive(Clone)]
pub struct CookieEngineHandle {
    cmd_tx: mpsc::Sender<CookieCommand>,
}

impl std::fmt::Debug for CookieEngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieEngineHandle")
            .field("closed", &self.cmd_tx.is_closed())
            .finish()
    }
}

impl CookieEngineHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<CookieCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn request<T>(
        &self,
        name: &'static str,
        build: impl FnOnce(oneshot::Sender<T>) -> CookieCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();

        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        rx.await.map_err(|_| EngineError::ReplyDropped(name))
    }

    pub async fn set_canonical_cookie(
        &self,
        cookie: CanonicalCookie,
        source_url: Url,
        options: CookieOptions,
    ) -> Result<CookieInclusionStatus, EngineError> {
        self.request("SetCanonicalCookie", |reply| CookieCommand::SetCanonicalCookie {
            cookie,
            source_url,
            options,
            reply,
        })
        .await
    }

    pub async fn set_cookie_with_options(
        &self,
        url: Url,
        fields: CookieLineFields,
        options: CookieOptions,
    ) -> Result<CookieInclusionStatus, EngineError> {
        self.request("SetCookieWithOptions", |reply| CookieCommand::SetCookieWithOptions {
            url,
            fields,
            options,
            reply,
        })
        .await
    }

    pub async fn set_cookie_with_details(
        &self,
        url: Url,
        details: CookieDetails,
    ) -> Result<CookieInclusionStatus, EngineError> {
        self.request("SetCookieWithDetails", |reply| CookieCommand::SetCookieWithDetails {
            url,
            details,
            reply,
        })
        .await
    }

    pub async fn get_cookie_list_with_options(
        &self,
        url: Url,
        options: CookieOptions,
    ) -> Result<CookieListResult, EngineError> {
        self.request("GetCookieListWithOptions", |reply| CookieCommand::GetCookieListWithOptions {
            url,
            options,
            reply,
        })
        .await
    }

    pub async fn get_all_cookies(&self) -> Result<Vec<CanonicalCookie>, EngineError> {
        self.request("GetAllCookies", |reply| CookieCommand::GetAllCookies { reply })
            .await
    }

    pub async fn get_all_cookies_for_url(
        &self,
        url: Url,
    ) -> Result<Vec<CanonicalCookie>, EngineError> {
        self.request("GetAllCookiesForUrl", |reply| {
            CookieCommand::GetAllCookiesForUrl { url, reply }
        })
        .await
    }

    /// Returns the number of cookies deleted.
    pub async fn delete_cookie(
        &self,
        url: Url,
        name: impl Into<String>,
    ) -> Result<u32, EngineError> {
        let name = name.into();
        self.request("DeleteCookie", |reply| CookieCommand::DeleteCookie { url, name, reply })
            .await
    }

    pub async fn delete_canonical_cookie(
        &self,
        cookie: CanonicalCookie,
    ) -> Result<u32, EngineError> {
        self.request("DeleteCanonicalCookie", |reply| CookieCommand::DeleteCanonicalCookie {
            cookie,
            reply,
        })
        .await
    }

    pub async fn delete_all_created_in_time_range(
        &self,
        range: TimeRange,
    ) -> Result<u32, EngineError> {
        self.request("DeleteAllCreatedInTimeRange", |reply| {
            CookieCommand::DeleteAllCreatedInTimeRange { range, reply }
        })
        .await
    }

    pub async fn delete_all_matching(
        &self,
        range: TimeRange,
        predicate: CookiePredicate,
    ) -> Result<u32, EngineError> {
        self.request("DeleteAllMatching", |reply| CookieCommand::DeleteAllMatching {
            range,
            predicate,
            reply,
        })
        .await
    }

    pub async fn delete_session_cookies(&self) -> Result<u32, EngineError> {
        self.request("DeleteSessionCookies", |reply| CookieCommand::DeleteSessionCookies { reply })
            .await
    }

    pub async fn set_all_cookies(
        &self,
        cookies: Vec<CanonicalCookie>,
    ) -> Result<CookieInclusionStatus, EngineError> {
        self.request("SetAllCookies", |reply| CookieCommand::SetAllCookies { cookies, reply })
            .await
    }

    pub async fn flush_store(&self) -> Result<(), EngineError> {
        self.request("FlushStore", |reply| CookieCommand::FlushStore { reply })
            .await
    }

    pub async fn set_force_keep_session_state(&self) -> Result<(), EngineError> {
        self.cmd_tx
            .send(CookieCommand::SetForceKeepSessionState)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Returns `false` when the engine was already in use.
    pub async fn set_persist_session_cookies(&self, persist: bool) -> Result<bool, EngineError> {
        self.request("SetPersistSessionCookies", |reply| CookieCommand::SetPersistSessionCookies {
            persist,
            reply,
        })
        .await
    }

    /// Returns `false` when the engine was already in use.
    pub async fn set_cookieable_schemes(&self, schemes: Vec<String>) -> Result<bool, EngineError> {
        self.request("SetCookieableSchemes", |reply| CookieCommand::SetCookieableSchemes {
            schemes,
            reply,
        })
        .await
    }

    pub async fn add_callback_for_cookie(
        &self,
        url: Url,
        name: impl Into<String>,
        callback: CookieChangeCallback,
    ) -> Result<CookieChangeSubscription, EngineError> {
        let name = name.into();
        self.request("AddCallbackForCookie", |reply| CookieCommand::AddCallbackForCookie {
            url,
            name,
            callback,
            reply,
        })
        .await
    }

    pub async fn add_callback_for_url(
        &self,
        url: Url,
        callback: CookieChangeCallback,
    ) -> Result<CookieChangeSubscription, EngineError> {
        self.request("AddCallbackForUrl", |reply| CookieCommand::AddCallbackForUrl {
            url,
            callback,
            reply,
        })
        .await
    }

    pub async fn add_callback_for_all_changes(
        &self,
        callback: CookieChangeCallback,
    ) -> Result<CookieChangeSubscription, EngineError> {
        self.request("AddCallbackForAllChanges", |reply| CookieCommand::AddCallbackForAllChanges {
            callback,
            reply,
        })
        .await
    }

    /// Stops the engine. Operations still waiting for a load never complete.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request("Shutdown", |reply| CookieCommand::Shutdown { reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cookies::{CookieChangeCause, CookieChangeInfo};
    use crate::engine::CookieEngine;
    use std::sync::Arc;
    use std::time::Duration;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn line(name: &str, value: &str) -> CookieLineFields {
        CookieLineFields {
            name: name.into(),
            value: value.into(),
            max_age: Some("3600".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn commands_round_trip() {
        init_logger();
        let (handle, join) = CookieEngine::new(None, None).start().unwrap();

        let status = handle
            .set_cookie_with_options(
                u("http://www.example.com/"),
                line("A", "B"),
                CookieOptions::default(),
            )
            .await
            .unwrap();
        assert!(status.is_include());

        let list = handle
            .get_cookie_list_with_options(u("http://www.example.com/"), CookieOptions::default())
            .await
            .unwrap();
        assert_eq!(list.included.len(), 1);
        assert_eq!(list.included[0].cookie.value(), "B");

        assert_eq!(handle.delete_cookie(u("http://www.example.com/"), "A").await.unwrap(), 1);
        assert!(handle.get_all_cookies().await.unwrap().is_empty());
        assert!(!handle.set_persist_session_cookies(true).await.unwrap());

        handle.shutdown().await.unwrap();
        join.await.unwrap();
        assert!(matches!(handle.get_all_cookies().await, Err(EngineError::ChannelClosed)));
    }

    #[tokio::test]
    async fn subscriptions_through_handle() {
        init_logger();
        let (handle, join) = CookieEngine::new(None, None).start().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = handle
            .add_callback_for_cookie(
                u("http://www.example.com/"),
                "A",
                Arc::new(move |change: &CookieChangeInfo| {
                    let _ = tx.send(change.clone());
                }),
            )
            .await
            .unwrap();

        handle
            .set_cookie_with_options(
                u("http://www.example.com/"),
                line("A", "B"),
                CookieOptions::default(),
            )
            .await
            .unwrap();
        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.cause, CookieChangeCause::Inserted);
        assert_eq!(change.cookie.value(), "B");

        drop(subscription);
        handle
            .set_cookie_with_options(
                u("http://www.example.com/"),
                line("A", "C"),
                CookieOptions::default(),
            )
            .await
            .unwrap();
        handle.flush_store().await.unwrap();
        assert!(rx.try_recv().is_err());

        handle.shutdown().await.unwrap();
        join.await.unwrap();
    }

    #[cfg(feature = "sqlite_cookie_store")]
    #[tokio::test]
    async fn cookies_survive_restart_with_sqlite_store() {
        use crate::engine::cookies::SqlitePersistentCookieStore;

        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.db");

        {
            let store = SqlitePersistentCookieStore::new(&path).unwrap();
            let (handle, join) = CookieEngine::new(Some(store), None).start().unwrap();
            handle
                .set_cookie_with_options(
                    u("https://www.example.com/"),
                    line("kept", "1"),
                    CookieOptions::default(),
                )
                .await
                .unwrap();
            let session = CookieLineFields {
                max_age: None,
                ..line("session", "1")
            };
            handle
                .set_cookie_with_options(
                    u("https://www.example.com/"),
                    session,
                    CookieOptions::default(),
                )
                .await
                .unwrap();
            handle.flush_store().await.unwrap();
            handle.shutdown().await.unwrap();
            join.await.unwrap();
        }

        let store = SqlitePersistentCookieStore::new(&path).unwrap();
        let (handle, join) = CookieEngine::new(Some(store), None).start().unwrap();
        let cookies = handle.get_all_cookies_for_url(u("https://www.example.com/")).await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name(), "kept");

        handle.shutdown().await.unwrap();
        join.await.unwrap();
    }
}
