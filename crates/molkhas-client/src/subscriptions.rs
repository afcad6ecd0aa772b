//! Subscription lifecycle management.
//!
//! Every live change feed the client holds open is registered here under a
//! [`Scope`] key. The set enforces the one rule the rest of the crate relies
//! on: at most one live subscription per scope. Opening a scope that is
//! already open tears the old one down first, so re-selecting a conversation
//! or re-running a bootstrap can never leak a stale feed that keeps mutating
//! state behind the new one's back.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc::UnboundedReceiver, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use molkhas_shared::ConversationId;

/// Identifies one logical subscription held by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Conversation-table changes feeding the conversation list.
    ConversationList,
    /// Notification-table changes feeding the notification center.
    Notifications,
    /// Message inserts for the selected conversation.
    Messages(ConversationId),
    /// Digest inserts for the selected conversation.
    Digests(ConversationId),
    /// Presence snapshots feeding the online-users view.
    Presence,
}

/// Registry of live subscriptions, keyed by [`Scope`].
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone, Default)]
pub struct SubscriptionSet {
    inner: Arc<Mutex<HashMap<Scope, JoinHandle<()>>>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a subscription: spawn a task that drains `rx` through `handler`
    /// until the feed ends or the scope is closed. Any subscription already
    /// registered under `scope` is closed first.
    pub async fn open<T, F>(&self, scope: Scope, mut rx: UnboundedReceiver<T>, mut handler: F)
    where
        T: Send + 'static,
        F: FnMut(T) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let mut map = self.inner.lock().await;
        if let Some(old) = map.remove(&scope) {
            old.abort();
            debug!(?scope, "Replaced existing subscription");
        }

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event).await;
            }
            debug!(?scope, "Change feed ended");
        });

        map.insert(scope, handle);
        debug!(?scope, "Subscription opened");
    }

    /// Close the subscription for `scope`, if any. Returns whether one
    /// was open. Closing an unknown scope is a no-op.
    pub async fn close(&self, scope: Scope) -> bool {
        match self.inner.lock().await.remove(&scope) {
            Some(handle) => {
                handle.abort();
                debug!(?scope, "Subscription closed");
                true
            }
            None => false,
        }
    }

    /// Close every live subscription. Used on sign-out.
    pub async fn close_all(&self) {
        let drained: Vec<(Scope, JoinHandle<()>)> = self.inner.lock().await.drain().collect();
        for (scope, handle) in drained {
            handle.abort();
            debug!(?scope, "Subscription closed");
        }
    }

    /// Whether a subscription is currently registered for `scope`.
    pub async fn is_open(&self, scope: Scope) -> bool {
        self.inner.lock().await.contains_key(&scope)
    }

    /// Snapshot of all currently registered scopes (unordered).
    pub async fn active_scopes(&self) -> Vec<Scope> {
        self.inner.lock().await.keys().copied().collect()
    }
}
