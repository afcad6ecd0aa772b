//! Notification center: a sliding window over the signed-in user's
//! newest notifications, plus the fan-out helpers other flows use to
//! produce notifications.
//!
//! The unread count is derived state: it always equals the number of
//! unread entries in the held window, and mutations keep it consistent
//! incrementally instead of re-counting. Mutations are optimistic: the
//! backend write runs first and, on success, the identical transformation
//! is applied to the window without waiting for a refetch.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use molkhas_gateway::{ChangeFilter, Gateway, Table};
use molkhas_shared::constants::UNREAD_BADGE_MAX;
use molkhas_shared::{
    NewNotification, Notification, NotificationId, NotificationKind, OrderedLog, RelatedKind,
    UserId,
};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::session::Session;
use crate::subscriptions::{Scope, SubscriptionSet};

#[derive(Default)]
struct NotificationsState {
    /// Held window, newest first.
    log: OrderedLog<NotificationId, Notification>,
    unread: u32,
    loading: bool,
}

/// Live view of the signed-in user's notifications.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Notifications {
    gateway: Arc<dyn Gateway>,
    session: Session,
    subs: SubscriptionSet,
    config: ClientConfig,
    state: Arc<RwLock<NotificationsState>>,
}

impl Notifications {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        session: Session,
        subs: SubscriptionSet,
        config: ClientConfig,
    ) -> Self {
        Self {
            gateway,
            session,
            subs,
            config,
            state: Arc::new(RwLock::new(NotificationsState {
                loading: true,
                ..Default::default()
            })),
        }
    }

    /// Load the window and open the notification-table subscription.
    ///
    /// The subscription is table-wide, not filtered to the user: the feed
    /// cannot filter on recipient, so every change triggers a refetch of
    /// the user's own window. Cheap, and always correct.
    pub async fn start(&self) {
        self.refetch().await;

        let rx = self.gateway.subscribe(ChangeFilter::table(Table::Notifications));
        let center = self.clone();
        self.subs
            .open(Scope::Notifications, rx, move |event| {
                let center = center.clone();
                Box::pin(async move {
                    debug!(kind = ?event.kind, "Notification change, refetching window");
                    center.refetch().await;
                })
            })
            .await;
    }

    /// Re-fetch the newest window and re-derive the unread count from it.
    /// Read failures keep the previous window.
    pub async fn refetch(&self) {
        let user = match self.session.user_id().await {
            Some(user) => user,
            None => return,
        };

        match self
            .gateway
            .notifications_for(user, self.config.notification_window)
            .await
        {
            Ok(window) => {
                let mut state = self.state.write().await;
                state.unread = window.iter().filter(|n| !n.read).count() as u32;
                state.log.replace_all(window.into_iter().map(|n| (n.id, n)));
                state.loading = false;
            }
            Err(e) => {
                warn!(error = %e, "Notification refetch failed, keeping previous window");
                self.state.write().await.loading = false;
            }
        }
    }

    /// Mark one notification read. The unread count only moves if the
    /// entry was actually unread.
    pub async fn mark_as_read(&self, id: NotificationId) -> Result<()> {
        self.gateway.mark_notification_read(id).await.map_err(|e| {
            error!(notification = %id, error = %e, "Mark-as-read failed");
            e
        })?;

        let mut state = self.state.write().await;
        let mut was_unread = false;
        state.log.update(&id, |n| {
            was_unread = !n.read;
            n.read = true;
        });
        if was_unread {
            state.unread = state.unread.saturating_sub(1);
        }
        Ok(())
    }

    /// Mark every notification of the signed-in user read.
    pub async fn mark_all_as_read(&self) -> Result<()> {
        let user = self.session.require_user().await?;
        self.gateway.mark_all_notifications_read(user).await.map_err(|e| {
            error!(error = %e, "Mark-all-as-read failed");
            e
        })?;

        let mut state = self.state.write().await;
        state.log.for_each_mut(|n| n.read = true);
        state.unread = 0;
        Ok(())
    }

    /// Delete one notification. Deleting an unread entry decrements the
    /// count; deleting a read one leaves it untouched.
    pub async fn delete(&self, id: NotificationId) -> Result<()> {
        self.gateway.delete_notification(id).await.map_err(|e| {
            error!(notification = %id, error = %e, "Notification delete failed");
            e
        })?;

        let mut state = self.state.write().await;
        if let Some(removed) = state.log.remove(&id) {
            if !removed.read {
                state.unread = state.unread.saturating_sub(1);
            }
        }
        Ok(())
    }

    // -- Producers ----------------------------------------------------------

    /// Insert one notification for `target`. When the target is the
    /// signed-in user, the window picks it up immediately.
    pub async fn notify_user(
        &self,
        target: UserId,
        title: &str,
        message: &str,
        kind: NotificationKind,
        related_id: Option<Uuid>,
        related_kind: Option<RelatedKind>,
    ) -> Result<Notification> {
        let notification = self
            .gateway
            .insert_notification(NewNotification {
                user_id: target,
                title: title.to_string(),
                message: message.to_string(),
                kind,
                related_id,
                related_kind,
            })
            .await
            .map_err(|e| {
                error!(user = %target, error = %e, "Notification insert failed");
                e
            })?;

        if self.session.user_id().await == Some(target) {
            let mut state = self.state.write().await;
            if state.log.push_front(notification.id, notification.clone()) {
                state.unread += 1;
            }
        }
        Ok(notification)
    }

    /// Fan one notification out to every elevated-privilege user.
    ///
    /// An empty privilege table is a warning, not an error: the calling
    /// flow (content submission, appeal filing) must still succeed.
    pub async fn notify_admins(
        &self,
        title: &str,
        message: &str,
        kind: NotificationKind,
        related_id: Option<Uuid>,
        related_kind: Option<RelatedKind>,
    ) -> Result<()> {
        let admins = self.gateway.privileged_users().await?;
        if admins.is_empty() {
            warn!("No privileged users to notify");
            return Ok(());
        }

        let batch = admins
            .iter()
            .map(|admin| NewNotification {
                user_id: *admin,
                title: title.to_string(),
                message: message.to_string(),
                kind,
                related_id,
                related_kind,
            })
            .collect::<Vec<_>>();
        self.gateway.insert_notifications(batch).await?;
        info!(count = admins.len(), "Notified privileged users");
        Ok(())
    }

    /// Broadcast to all users.
    ///
    /// The backend exposes no user enumeration, so this currently reaches
    /// the privileged set only. Kept as its own entry point so the cap can
    /// be lifted without touching callers.
    pub async fn notify_all_users(
        &self,
        title: &str,
        message: &str,
        kind: NotificationKind,
        related_id: Option<Uuid>,
        related_kind: Option<RelatedKind>,
    ) -> Result<()> {
        self.notify_admins(title, message, kind, related_id, related_kind)
            .await
    }

    // -- Accessors ----------------------------------------------------------

    /// The held window, newest first.
    pub async fn list(&self) -> Vec<Notification> {
        self.state.read().await.log.to_vec()
    }

    pub async fn unread_count(&self) -> u32 {
        self.state.read().await.unread
    }

    /// Unread count formatted for a badge: counts past the cap collapse
    /// to `"9+"`, zero renders as empty.
    pub async fn badge(&self) -> String {
        let unread = self.state.read().await.unread;
        if unread == 0 {
            String::new()
        } else if unread > UNREAD_BADGE_MAX {
            format!("{UNREAD_BADGE_MAX}+")
        } else {
            unread.to_string()
        }
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    /// Drop the held window. Called on sign-out.
    pub(crate) async fn clear(&self) {
        let mut state = self.state.write().await;
        state.log.clear();
        state.unread = 0;
        state.loading = true;
    }
}
