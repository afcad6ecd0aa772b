//! The client root: builds every component over one gateway and one auth
//! provider, and drives them through auth transitions.
//!
//! Per-identity lifecycle in one place: sign-in bootstraps the
//! conversation list and the notification window, sign-out closes every
//! subscription and drops all held state, a refresh touches nothing but
//! the session snapshot.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use molkhas_gateway::{AuthEvent, AuthProvider, Gateway, Generator};

use crate::assist::Assistant;
use crate::appeals::Appeals;
use crate::config::ClientConfig;
use crate::conversations::Conversations;
use crate::messages::Messages;
use crate::moderation::Moderation;
use crate::notifications::Notifications;
use crate::presence::Presence;
use crate::session::Session;
use crate::subscriptions::SubscriptionSet;

/// The assembled client.
pub struct Client {
    gateway: Arc<dyn Gateway>,
    auth: Arc<dyn AuthProvider>,
    session: Session,
    conversations: Conversations,
    messages: Messages,
    notifications: Notifications,
    presence: Presence,
    appeals: Appeals,
    moderation: Moderation,
    subs: SubscriptionSet,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Wire the components over `gateway` and `auth`. Nothing runs until
    /// [`Client::start`].
    pub fn new(
        gateway: Arc<dyn Gateway>,
        auth: Arc<dyn AuthProvider>,
        config: ClientConfig,
    ) -> Self {
        let subs = SubscriptionSet::new();
        let session = Session::new(auth.clone(), gateway.clone(), config.clone());
        let conversations = Conversations::new(gateway.clone(), session.clone(), subs.clone());
        let messages = Messages::new(
            gateway.clone(),
            session.clone(),
            subs.clone(),
            config.clone(),
        );
        let notifications = Notifications::new(
            gateway.clone(),
            session.clone(),
            subs.clone(),
            config.clone(),
        );
        let presence = Presence::new(gateway.clone(), session.clone(), subs.clone());
        let appeals = Appeals::new(gateway.clone(), session.clone(), notifications.clone());
        let moderation = Moderation::new(gateway.clone(), session.clone(), notifications.clone());

        Self {
            gateway,
            auth,
            session,
            conversations,
            messages,
            notifications,
            presence,
            appeals,
            moderation,
            subs,
            watcher: Mutex::new(None),
        }
    }

    /// Restore the session, bootstrap if someone is already signed in,
    /// and start pumping auth transitions.
    pub async fn start(self: &Arc<Self>) {
        self.session.start().await;
        if self.session.account().await.is_some() {
            self.bootstrap().await;
        }

        let mut events = self.auth.watch();
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => client.apply_auth_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Auth event stream lagged, re-syncing");
                        client.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Auth event stream closed");
                        break;
                    }
                }
            }
        });
        *self.watcher.lock().await = Some(handle);
        info!("Client started");
    }

    async fn apply_auth_event(&self, event: AuthEvent) {
        let is_sign_in = matches!(event, AuthEvent::SignedIn(_));
        let is_sign_out = matches!(event, AuthEvent::SignedOut);
        self.session.handle_auth_event(event).await;

        if is_sign_in {
            self.bootstrap().await;
        } else if is_sign_out {
            self.reset().await;
        }
    }

    /// Reconcile against the provider's live session. Used when auth
    /// transitions were missed: whatever events collapsed, the provider's
    /// answer to "who is signed in now" is authoritative.
    pub async fn resync(&self) {
        let live = match self.auth.current_session().await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Session re-sync failed, keeping current state");
                return;
            }
        };
        let held = self.session.account().await;

        match (held, live) {
            (None, Some(account)) => {
                self.apply_auth_event(AuthEvent::SignedIn(account)).await;
            }
            (Some(_), None) => {
                self.apply_auth_event(AuthEvent::SignedOut).await;
            }
            (Some(held), Some(account)) if held.id != account.id => {
                // Identity changed underneath us: full teardown, then a
                // fresh bootstrap as the new user.
                self.apply_auth_event(AuthEvent::SignedOut).await;
                self.apply_auth_event(AuthEvent::SignedIn(account)).await;
            }
            (Some(_), Some(account)) => {
                self.apply_auth_event(AuthEvent::Refreshed(account)).await;
            }
            (None, None) => {}
        }
    }

    /// Open the signed-in user's standing views.
    async fn bootstrap(&self) {
        self.conversations.start().await;
        self.notifications.start().await;
        self.presence.start().await;
    }

    /// Tear down everything identity-scoped: all subscriptions, then all
    /// held state.
    async fn reset(&self) {
        self.subs.close_all().await;
        self.messages.clear().await;
        self.conversations.clear().await;
        self.notifications.clear().await;
        self.presence.clear().await;
        info!("Client state cleared");
    }

    /// Stop the auth pump and close all subscriptions. Held state stays
    /// readable.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().await.take() {
            handle.abort();
        }
        self.subs.close_all().await;
        info!("Client stopped");
    }

    /// Build an assistant sharing this client's session.
    pub fn assistant(&self, generator: Arc<dyn Generator>) -> Assistant {
        Assistant::new(generator, self.gateway.clone(), self.session.clone())
    }

    // -- Component access ---------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn conversations(&self) -> &Conversations {
        &self.conversations
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn appeals(&self) -> &Appeals {
        &self.appeals
    }

    pub fn moderation(&self) -> &Moderation {
        &self.moderation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use molkhas_gateway::{MemoryAuth, MemoryGateway, NotificationRepo};
    use molkhas_shared::UserId;

    async fn rig() -> (Arc<Client>, Arc<MemoryAuth>, Arc<MemoryGateway>) {
        let auth = Arc::new(MemoryAuth::new());
        let gateway = Arc::new(MemoryGateway::new());
        let client = Arc::new(Client::new(
            gateway.clone(),
            auth.clone(),
            ClientConfig::default(),
        ));
        client.start().await;
        (client, auth, gateway)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_sign_in_bootstraps_views() {
        let (client, auth, _gateway) = rig().await;
        auth.register("amal@example.edu", "pw").await;

        auth.sign_in("amal@example.edu", "pw").await.unwrap();
        settle().await;

        use crate::subscriptions::Scope;
        assert!(client.subs.is_open(Scope::ConversationList).await);
        assert!(client.subs.is_open(Scope::Notifications).await);
    }

    #[tokio::test]
    async fn test_hello_reaches_both_views() {
        let (client, auth, _gateway) = rig().await;
        auth.register("amal@example.edu", "pw").await;
        client.session().sign_in("amal@example.edu", "pw").await.unwrap();
        settle().await;

        let other = UserId::new();
        let conversation = client
            .conversations()
            .create(vec![other], None)
            .await
            .unwrap();
        client.messages().select(Some(conversation.id)).await;

        client.messages().send(conversation.id, "hello").await.unwrap();
        settle().await;

        let held = client.messages().list().await;
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].content, "hello");

        let details = client.conversations().get(conversation.id).await.unwrap();
        assert_eq!(
            details.last_message.as_ref().map(|m| m.content.as_str()),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let (client, auth, gateway) = rig().await;
        auth.register("amal@example.edu", "pw").await;
        let account = client
            .session()
            .sign_in("amal@example.edu", "pw")
            .await
            .unwrap();
        settle().await;

        let conversation = client
            .conversations()
            .create(vec![UserId::new()], None)
            .await
            .unwrap();
        client.messages().select(Some(conversation.id)).await;
        gateway
            .insert_notification(molkhas_shared::NewNotification {
                user_id: account.id,
                title: "t".to_string(),
                message: "m".to_string(),
                kind: molkhas_shared::NotificationKind::System,
                related_id: None,
                related_kind: None,
            })
            .await
            .unwrap();
        settle().await;
        assert!(!client.conversations().list().await.is_empty());
        assert_eq!(client.notifications().unread_count().await, 1);

        auth.sign_out().await.unwrap();
        settle().await;

        assert!(client.session().account().await.is_none());
        assert!(client.conversations().list().await.is_empty());
        assert!(client.messages().list().await.is_empty());
        assert_eq!(client.notifications().unread_count().await, 0);
        assert!(client.subs.active_scopes().await.is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_announces_presence() {
        let (client, auth, gateway) = rig().await;
        auth.register("amal@example.edu", "pw").await;
        let account = client
            .session()
            .sign_in("amal@example.edu", "pw")
            .await
            .unwrap();
        settle().await;

        assert!(client.presence().is_online(account.id).await);

        auth.sign_out().await.unwrap();
        settle().await;

        assert_eq!(client.presence().online_count().await, 0);
        use molkhas_gateway::PresenceChannel;
        let mut feed = gateway.subscribe_presence();
        assert!(feed.recv().await.unwrap().online.is_empty());
    }

    #[tokio::test]
    async fn test_resync_recovers_missed_transitions() {
        // No start(): the auth pump never runs, standing in for a stream
        // that lagged past every transition.
        let auth = Arc::new(MemoryAuth::new());
        let gateway = Arc::new(MemoryGateway::new());
        let client = Arc::new(Client::new(
            gateway.clone(),
            auth.clone(),
            ClientConfig::default(),
        ));
        auth.register("amal@example.edu", "pw").await;

        // Missed sign-in: re-sync must adopt the live session and
        // bootstrap the views.
        auth.sign_in("amal@example.edu", "pw").await.unwrap();
        client.resync().await;
        settle().await;

        assert!(client.session().account().await.is_some());
        use crate::subscriptions::Scope;
        assert!(client.subs.is_open(Scope::ConversationList).await);
        assert!(client.subs.is_open(Scope::Notifications).await);

        // Missed sign-out: re-sync must tear everything down.
        auth.sign_out().await.unwrap();
        client.resync().await;

        assert!(client.session().account().await.is_none());
        assert!(client.subs.active_scopes().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_does_not_reset_views() {
        let (client, auth, _gateway) = rig().await;
        auth.register("amal@example.edu", "pw").await;
        client.session().sign_in("amal@example.edu", "pw").await.unwrap();
        settle().await;
        client
            .conversations()
            .create(vec![UserId::new()], None)
            .await
            .unwrap();

        auth.refresh().await;
        settle().await;

        assert!(!client.conversations().list().await.is_empty());
        use crate::subscriptions::Scope;
        assert!(client.subs.is_open(Scope::ConversationList).await);
    }
}
