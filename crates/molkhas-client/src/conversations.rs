//! Conversation store: the list of conversations the signed-in user
//! participates in, and the membership operations on it.
//!
//! The held list only ever moves forward: refreshes that fail are logged
//! and leave the previous snapshot in place. Mutations write through the
//! gateway first and then trigger a refresh rather than patching the list
//! locally, so ordering and last-message annotations always come from the
//! backend.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use molkhas_gateway::{ChangeFilter, Gateway, Table};
use molkhas_shared::{
    Conversation, ConversationDetails, ConversationId, ConversationKind, Participant, UserId,
};

use crate::error::{ClientError, Result};
use crate::session::Session;
use crate::subscriptions::{Scope, SubscriptionSet};

#[derive(Default)]
struct ConversationsState {
    list: Vec<ConversationDetails>,
    loading: bool,
}

/// Live view of the signed-in user's conversations.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Conversations {
    gateway: Arc<dyn Gateway>,
    session: Session,
    subs: SubscriptionSet,
    state: Arc<RwLock<ConversationsState>>,
}

impl Conversations {
    pub fn new(gateway: Arc<dyn Gateway>, session: Session, subs: SubscriptionSet) -> Self {
        Self {
            gateway,
            session,
            subs,
            state: Arc::new(RwLock::new(ConversationsState::default())),
        }
    }

    /// Load the list and open the conversation-table subscription. Any
    /// change to the table re-runs a full refresh; the annotations on each
    /// entry (last message, digests) are too entangled to patch in place.
    pub async fn start(&self) {
        self.refresh().await;

        let rx = self.gateway.subscribe(ChangeFilter::table(Table::Conversations));
        let store = self.clone();
        self.subs
            .open(Scope::ConversationList, rx, move |event| {
                let store = store.clone();
                Box::pin(async move {
                    debug!(kind = ?event.kind, "Conversation change, refreshing list");
                    store.refresh().await;
                })
            })
            .await;
    }

    /// Re-fetch the list from the gateway. Read failures keep the
    /// previous snapshot; a missing user quietly yields nothing.
    pub async fn refresh(&self) {
        let user = match self.session.user_id().await {
            Some(user) => user,
            None => return,
        };

        self.state.write().await.loading = true;
        match self.gateway.conversations_for_user(user).await {
            Ok(list) => {
                let mut state = self.state.write().await;
                state.list = list;
                state.loading = false;
            }
            Err(e) => {
                warn!(error = %e, "Conversation refresh failed, keeping previous list");
                self.state.write().await.loading = false;
            }
        }
    }

    /// Create a conversation with `participants` (the signed-in user is
    /// always included).
    ///
    /// An unnamed conversation with exactly one other participant is an
    /// individual chat, and creation is idempotent: if one already exists
    /// between the pair it is returned instead. A failed existence probe
    /// is logged and falls through to creation.
    ///
    /// Participant inserts are deliberately not transactional: a failed
    /// insert is logged and skipped so one bad row does not orphan the
    /// whole conversation.
    pub async fn create(
        &self,
        participants: Vec<UserId>,
        name: Option<String>,
    ) -> Result<Conversation> {
        let user = self.session.require_user().await?;

        let mut members: Vec<UserId> = Vec::new();
        for id in participants.into_iter().chain(std::iter::once(user)) {
            if !members.contains(&id) {
                members.push(id);
            }
        }

        let is_individual = name.is_none() && members.len() == 2;
        if is_individual {
            let other = members
                .iter()
                .copied()
                .find(|id| *id != user)
                .unwrap_or(user);
            match self.gateway.find_individual_conversation(user, other).await {
                Ok(Some(existing)) => {
                    debug!(conversation = %existing.id, "Reusing existing individual conversation");
                    return Ok(existing);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Individual-conversation probe failed, creating anyway");
                }
            }
        }

        let kind = if is_individual {
            ConversationKind::Individual
        } else {
            ConversationKind::Group
        };

        let conversation = match self.gateway.create_conversation(name, kind, user).await {
            Ok(conversation) => conversation,
            Err(e) => {
                error!(error = %e, "Conversation insert failed");
                return Err(e.into());
            }
        };

        for member in &members {
            if let Err(e) = self.gateway.add_participant(conversation.id, *member).await {
                warn!(conversation = %conversation.id, user = %member, error = %e,
                    "Could not add participant");
            }
        }

        info!(conversation = %conversation.id, kind = ?kind, "Conversation created");
        self.refresh().await;
        Ok(conversation)
    }

    /// Add `user` to an existing conversation.
    pub async fn add_member(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Participant> {
        self.session.require_user().await?;
        let participant = self.gateway.add_participant(conversation, user).await?;
        self.refresh().await;
        Ok(participant)
    }

    /// Remove `user` from a conversation, or leave it when `user` is
    /// `None`. The backend destroys the conversation when its last
    /// participant leaves.
    pub async fn remove_member(
        &self,
        conversation: ConversationId,
        user: Option<UserId>,
    ) -> Result<()> {
        let current = self.session.require_user().await?;
        let target = user.unwrap_or(current);
        self.gateway.remove_participant(conversation, target).await?;
        self.refresh().await;
        Ok(())
    }

    /// Delete a conversation and everything in it.
    ///
    /// Only participants may delete. The cascade runs child rows first
    /// (messages, then participants, then the conversation row) and any
    /// failing step aborts the rest; a partial cascade is surfaced rather
    /// than papered over.
    pub async fn delete(&self, conversation: ConversationId) -> Result<()> {
        let user = self.session.require_user().await?;
        if !self.gateway.is_participant(conversation, user).await? {
            return Err(ClientError::NotParticipant);
        }

        self.gateway.delete_messages_in(conversation).await?;
        self.gateway.delete_participants_in(conversation).await?;
        self.gateway.delete_conversation_row(conversation).await?;

        info!(conversation = %conversation, "Conversation deleted");
        self.refresh().await;
        Ok(())
    }

    // -- Accessors ----------------------------------------------------------

    pub async fn list(&self) -> Vec<ConversationDetails> {
        self.state.read().await.list.clone()
    }

    pub async fn get(&self, conversation: ConversationId) -> Option<ConversationDetails> {
        self.state
            .read()
            .await
            .list
            .iter()
            .find(|d| d.conversation.id == conversation)
            .cloned()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    /// Drop the held list. Called on sign-out.
    pub(crate) async fn clear(&self) {
        *self.state.write().await = ConversationsState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use molkhas_gateway::{ConversationRepo, MemoryAuth, MemoryGateway, MessageRepo};

    async fn signed_in(email: &str) -> (Conversations, Arc<MemoryGateway>, Session, UserId) {
        let auth = Arc::new(MemoryAuth::new());
        let gateway = Arc::new(MemoryGateway::new());
        auth.register(email, "pw").await;
        let session = Session::new(auth.clone(), gateway.clone(), Default::default());
        let account = session.sign_in(email, "pw").await.unwrap();
        let store = Conversations::new(gateway.clone(), session.clone(), SubscriptionSet::new());
        (store, gateway, session, account.id)
    }

    #[tokio::test]
    async fn test_individual_create_is_idempotent() {
        let (store, _gateway, _session, _user) = signed_in("amal@example.edu").await;
        let other = UserId::new();

        let first = store.create(vec![other], None).await.unwrap();
        let second = store.create(vec![other], None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, ConversationKind::Individual);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_named_create_is_group_and_not_deduplicated() {
        let (store, _gateway, _session, _user) = signed_in("amal@example.edu").await;
        let other = UserId::new();

        let a = store
            .create(vec![other], Some("study group".to_string()))
            .await
            .unwrap();
        let b = store
            .create(vec![other], Some("study group".to_string()))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.kind, ConversationKind::Group);
    }

    #[tokio::test]
    async fn test_creator_listed_once() {
        let (store, _gateway, _session, user) = signed_in("amal@example.edu").await;

        // Caller redundantly includes themselves.
        let conversation = store.create(vec![user, UserId::new()], None).await.unwrap();
        let details = store.get(conversation.id).await.unwrap();
        assert_eq!(
            details.participants.iter().filter(|p| **p == user).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_list() {
        let (store, gateway, _session, _user) = signed_in("amal@example.edu").await;
        store.create(vec![UserId::new()], None).await.unwrap();
        assert_eq!(store.list().await.len(), 1);

        gateway.set_fail_reads(true);
        store.refresh().await;
        assert_eq!(store.list().await.len(), 1);
        assert!(!store.is_loading().await);
    }

    #[tokio::test]
    async fn test_delete_requires_participation() {
        let (store, gateway, _session, _user) = signed_in("amal@example.edu").await;

        // A conversation this user is not part of.
        let outsider = UserId::new();
        let foreign = gateway
            .create_conversation(None, ConversationKind::Individual, outsider)
            .await
            .unwrap();
        gateway.add_participant(foreign.id, outsider).await.unwrap();

        let err = store.delete(foreign.id).await.unwrap_err();
        assert!(matches!(err, ClientError::NotParticipant));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (store, gateway, _session, user) = signed_in("amal@example.edu").await;
        let conversation = store.create(vec![UserId::new()], None).await.unwrap();
        gateway
            .insert_message(molkhas_shared::NewMessage {
                conversation_id: conversation.id,
                sender_id: user,
                content: "bye".to_string(),
            })
            .await
            .unwrap();

        store.delete(conversation.id).await.unwrap();
        assert!(store.list().await.is_empty());
        let page = gateway.messages_page(conversation.id, 50, 0).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_changes_refresh_list() {
        let (store, gateway, _session, user) = signed_in("amal@example.edu").await;
        store.start().await;
        assert!(store.list().await.is_empty());

        // Another participant writes a message; the Conversation update
        // event must refresh our list annotations.
        let conversation = store.create(vec![UserId::new()], None).await.unwrap();
        gateway
            .insert_message(molkhas_shared::NewMessage {
                conversation_id: conversation.id,
                sender_id: user,
                content: "ping".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let details = store.get(conversation.id).await.unwrap();
        assert_eq!(
            details.last_message.as_ref().map(|m| m.content.as_str()),
            Some("ping")
        );
    }
}
