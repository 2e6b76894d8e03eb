//! Fan-out of cookie changes to subscribers.
//!
//! Subscriptions live in a two-level bucket map: domain key, then cookie name. Either
//! level can be [`BucketKey::Any`], which is how "all cookies for a URL" and "every
//! change" subscriptions are stored. A dispatch only visits the buckets that can
//! possibly match, so the cost is independent of the total number of subscribers.
//!
//! Deliveries are never made inline. Each matching subscription gets its own task
//! posted on the engine's sequence, which checks the subscription's cancellation
//! token right before calling out. Dropping a [`CookieChangeSubscription`] cancels
//! that token, so a delivery that was already queued turns into a no-op.

use crate::engine::cookies::change::{CookieChangeCallback, CookieChangeInfo};
use crate::engine::cookies::options::CookieOptions;
use crate::engine::cookies::registry;
use crate::engine::sequence::SequencedTaskRunner;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Identifier of a subscription, unique for the lifetime of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum BucketKey {
    /// Matches every domain key, or every cookie name.
    Any,
    Exact(String),
}

struct Subscription {
    /// URL-scoped subscriptions only see cookies that would be sent to this URL.
    url: Option<Url>,
    callback: CookieChangeCallback,
    token: CancellationToken,
}

/// Owning handle for a change subscription. Dropping it unsubscribes.
pub struct CookieChangeSubscription {
    id: SubscriptionId,
    token: CancellationToken,
    unlink_tx: mpsc::UnboundedSender<SubscriptionId>,
}

impl CookieChangeSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl std::fmt::Debug for CookieChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieChangeSubscription")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Drop for CookieChangeSubscription {
    fn drop(&mut self) {
        self.token.cancel();
        // The dispatcher may already be gone; nothing left to unlink then.
        let _ = self.unlink_tx.send(self.id);
    }
}

type NameBuckets = HashMap<BucketKey, BTreeMap<SubscriptionId, Subscription>>;

pub struct CookieChangeDispatcher {
    runner: SequencedTaskRunner,
    buckets: HashMap<BucketKey, NameBuckets>,
    locations: HashMap<SubscriptionId, (BucketKey, BucketKey)>,
    next_id: u64,
    unlink_tx: mpsc::UnboundedSender<SubscriptionId>,
    unlink_rx: mpsc::UnboundedReceiver<SubscriptionId>,
}

impl std::fmt::Debug for CookieChangeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieChangeDispatcher")
            .field("subscriptions", &self.locations.len())
            .finish_non_exhaustive()
    }
}

impl CookieChangeDispatcher {
    pub fn new(runner: SequencedTaskRunner) -> Self {
        let (unlink_tx, unlink_rx) = mpsc::unbounded_channel();
        Self {
            runner,
            buckets: HashMap::new(),
            locations: HashMap::new(),
            next_id: 0,
            unlink_tx,
            unlink_rx,
        }
    }

    /// Changes to the cookie `name` that would be sent to `url`.
    pub fn add_callback_for_cookie(
        &mut self,
        url: &Url,
        name: &str,
        callback: CookieChangeCallback,
    ) -> CookieChangeSubscription {
        let domain_key = BucketKey::Exact(registry::get_key_for_url(url));
        self.link(domain_key, BucketKey::Exact(name.to_string()), Some(url.clone()), callback)
    }

    /// Changes to any cookie that would be sent to `url`.
    pub fn add_callback_for_url(
        &mut self,
        url: &Url,
        callback: CookieChangeCallback,
    ) -> CookieChangeSubscription {
        let domain_key = BucketKey::Exact(registry::get_key_for_url(url));
        self.link(domain_key, BucketKey::Any, Some(url.clone()), callback)
    }

    /// Every change that is reported globally.
    pub fn add_callback_for_all_changes(
        &mut self,
        callback: CookieChangeCallback,
    ) -> CookieChangeSubscription {
        self.link(BucketKey::Any, BucketKey::Any, None, callback)
    }

    /// Posts `change` to every matching subscriber. The all-changes bucket is only
    /// visited when `notify_global` is set.
    pub fn dispatch(&mut self, change: &CookieChangeInfo, notify_global: bool) {
        self.prune_unlinked();

        let domain_key = BucketKey::Exact(registry::get_key(change.cookie.domain()));
        self.dispatch_to_domain_bucket(&domain_key, change);
        if notify_global {
            self.dispatch_to_domain_bucket(&BucketKey::Any, change);
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&mut self) -> usize {
        self.prune_unlinked();
        self.locations.len()
    }

    fn link(
        &mut self,
        domain_key: BucketKey,
        name_key: BucketKey,
        url: Option<Url>,
        callback: CookieChangeCallback,
    ) -> CookieChangeSubscription {
        self.prune_unlinked();

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let token = CancellationToken::new();
        let subscription = Subscription {
            url,
            callback,
            token: token.clone(),
        };

        self.buckets
            .entry(domain_key.clone())
            .or_default()
            .entry(name_key.clone())
            .or_default()
            .insert(id, subscription);
        self.locations.insert(id, (domain_key, name_key));

        CookieChangeSubscription {
            id,
            token,
            unlink_tx: self.unlink_tx.clone(),
        }
    }

    fn prune_unlinked(&mut self) {
        while let Ok(id) = self.unlink_rx.try_recv() {
            self.unlink(id);
        }
    }

    fn unlink(&mut self, id: SubscriptionId) {
        let Some((domain_key, name_key)) = self.locations.remove(&id) else {
            return;
        };
        let Some(names) = self.buckets.get_mut(&domain_key) else {
            return;
        };
        if let Some(subscriptions) = names.get_mut(&name_key) {
            subscriptions.remove(&id);
            if subscriptions.is_empty() {
                names.remove(&name_key);
            }
        }
        if names.is_empty() {
            self.buckets.remove(&domain_key);
        }
    }

    fn dispatch_to_domain_bucket(&self, domain_key: &BucketKey, change: &CookieChangeInfo) {
        let Some(names) = self.buckets.get(domain_key) else {
            return;
        };

        let name_key = BucketKey::Exact(change.cookie.name().to_string());
        for key in [&name_key, &BucketKey::Any] {
            if let Some(subscriptions) = names.get(key) {
                for subscription in subscriptions.values() {
                    self.post_delivery(subscription, change);
                }
            }
        }
    }

    fn post_delivery(&self, subscription: &Subscription, change: &CookieChangeInfo) {
        if subscription.token.is_cancelled() {
            return;
        }

        if let Some(url) = &subscription.url {
            let access = change
                .cookie
                .include_for_request_url(
                    url,
                    &CookieOptions::all_inclusive(),
                    change.access_semantics,
                );
            if !access.status.is_include() {
                return;
            }
        }

        let callback = subscription.callback.clone();
        let token = subscription.token.clone();
        let change = change.clone();
        self.runner.post_task(move || {
            if !token.is_cancelled() {
                callback(&change);
            }
        });
    }
}
