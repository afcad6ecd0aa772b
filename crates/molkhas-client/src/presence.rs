//! Online-users view backed by the shared presence channel.
//!
//! On start the client subscribes to presence snapshots and then tracks
//! itself, so its own join is observed through the same feed as everyone
//! else's. Each snapshot carries the full online set; the view replaces
//! its state wholesale instead of reconciling deltas.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use molkhas_gateway::Gateway;
use molkhas_shared::UserId;

use crate::session::Session;
use crate::subscriptions::{Scope, SubscriptionSet};

#[derive(Default)]
struct PresenceState {
    online: Vec<UserId>,
    /// The identity this client announced, remembered so sign-out can
    /// withdraw it after the session is already gone.
    tracked: Option<UserId>,
}

/// Live view of who is online.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Presence {
    gateway: Arc<dyn Gateway>,
    session: Session,
    subs: SubscriptionSet,
    state: Arc<RwLock<PresenceState>>,
}

impl Presence {
    pub fn new(gateway: Arc<dyn Gateway>, session: Session, subs: SubscriptionSet) -> Self {
        Self {
            gateway,
            session,
            subs,
            state: Arc::new(RwLock::new(PresenceState::default())),
        }
    }

    /// Subscribe to presence snapshots and announce the signed-in user
    /// as online. Subscribing first means our own join arrives through
    /// the feed like any other.
    pub async fn start(&self) {
        let user = match self.session.user_id().await {
            Some(user) => user,
            None => return,
        };

        let rx = self.gateway.subscribe_presence();
        let view = self.clone();
        self.subs
            .open(Scope::Presence, rx, move |update| {
                let view = view.clone();
                Box::pin(async move {
                    debug!(online = update.online.len(), "Presence snapshot");
                    view.state.write().await.online = update.online;
                })
            })
            .await;

        if let Err(e) = self.gateway.track_presence(user).await {
            warn!(error = %e, "Presence track failed");
            return;
        }
        self.state.write().await.tracked = Some(user);
    }

    /// Everyone currently online, in join order.
    pub async fn online(&self) -> Vec<UserId> {
        self.state.read().await.online.clone()
    }

    pub async fn online_count(&self) -> usize {
        self.state.read().await.online.len()
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.state.read().await.online.contains(&user)
    }

    /// Withdraw our announcement and drop the held set. Called on
    /// sign-out.
    pub(crate) async fn clear(&self) {
        let tracked = {
            let mut state = self.state.write().await;
            state.online.clear();
            state.tracked.take()
        };
        if let Some(user) = tracked {
            if let Err(e) = self.gateway.untrack_presence(user).await {
                warn!(error = %e, "Presence untrack failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use molkhas_gateway::{MemoryAuth, MemoryGateway, PresenceChannel};

    async fn rig() -> (Presence, Arc<MemoryGateway>, UserId) {
        let auth = Arc::new(MemoryAuth::new());
        let gateway = Arc::new(MemoryGateway::new());
        auth.register("amal@example.edu", "pw").await;
        let session = Session::new(auth.clone(), gateway.clone(), Default::default());
        let account = session.sign_in("amal@example.edu", "pw").await.unwrap();
        let view = Presence::new(gateway.clone(), session, SubscriptionSet::new());
        (view, gateway, account.id)
    }

    #[tokio::test]
    async fn test_start_tracks_self_and_sees_own_join() {
        let (view, _gateway, user) = rig().await;
        view.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(view.is_online(user).await);
        assert_eq!(view.online_count().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_replaces_set_on_join_and_leave() {
        let (view, gateway, user) = rig().await;
        view.start().await;

        let other = UserId::new();
        gateway.track_presence(other).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(view.online().await, vec![user, other]);

        gateway.untrack_presence(other).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(view.online().await, vec![user]);
        assert!(!view.is_online(other).await);
    }

    #[tokio::test]
    async fn test_clear_untracks_and_empties() {
        let (view, gateway, user) = rig().await;
        view.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(view.is_online(user).await);

        view.clear().await;
        assert_eq!(view.online_count().await, 0);

        // The backend no longer lists us either.
        let mut feed = gateway.subscribe_presence();
        assert!(feed.recv().await.unwrap().online.is_empty());
    }
}
